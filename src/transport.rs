use crate::error::{ChatError, ChatResult};
use crate::protocol::{ChatRequest, LegacyReply};
use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use reqwest::Client as HttpClient;
use std::future::Future;

/// Raw response body, one item per network read.
pub type BodyStream = BoxStream<'static, ChatResult<Bytes>>;

/// Opens the streaming response for a chat request.
pub trait Transport: Send + Sync {
    fn open(&self, request: &ChatRequest) -> impl Future<Output = ChatResult<BodyStream>> + Send;
}

#[derive(Clone)]
pub struct HttpTransport {
    base_url: String,
    http: HttpClient,
}

impl HttpTransport {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: normalize_base_url(base_url),
            http: HttpClient::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// One-shot form of the chat endpoint: no framing, no phases.
    pub async fn reply(&self, message: &str) -> ChatResult<String> {
        let response = self
            .http
            .post(format!("{}/reply", self.base_url))
            .json(&ChatRequest::new(message))
            .send()
            .await?;

        let response = ensure_success(response).await?;
        let body: LegacyReply = response.json().await?;
        Ok(body.reply)
    }
}

impl Transport for HttpTransport {
    async fn open(&self, request: &ChatRequest) -> ChatResult<BodyStream> {
        let response = self
            .http
            .post(format!("{}/chat", self.base_url))
            .json(request)
            .send()
            .await?;

        let response = ensure_success(response).await?;
        if response.content_length() == Some(0) {
            return Err(ChatError::EmptyBody);
        }

        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map_err(ChatError::from))
            .boxed())
    }
}

async fn ensure_success(response: reqwest::Response) -> ChatResult<reqwest::Response> {
    if response.status().is_success() {
        return Ok(response);
    }

    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    Err(ChatError::Status { status, body })
}

fn normalize_base_url(value: &str) -> String {
    value.trim_end_matches('/').to_string()
}

#[cfg(test)]
pub(crate) mod scripted {
    use super::*;
    use std::sync::Mutex;

    /// Replays canned reads and records every request it was given.
    #[derive(Default)]
    pub(crate) struct ScriptedTransport {
        reads: Vec<Bytes>,
        refuse: Option<u16>,
        stall: bool,
        stall_open: bool,
        requests: Mutex<Vec<ChatRequest>>,
    }

    impl ScriptedTransport {
        /// One read per frame.
        pub(crate) fn frames(frames: &[&str]) -> Self {
            let reads = frames
                .iter()
                .map(|frame| Bytes::from(format!("{}\n", frame)))
                .collect();
            Self {
                reads,
                ..Self::default()
            }
        }

        /// Arbitrary reads, newlines included.
        pub(crate) fn reads(reads: &[&str]) -> Self {
            let reads = reads
                .iter()
                .map(|read| Bytes::from(read.to_string()))
                .collect();
            Self {
                reads,
                ..Self::default()
            }
        }

        pub(crate) fn refusing(status: u16) -> Self {
            Self {
                refuse: Some(status),
                ..Self::default()
            }
        }

        /// Delivers its reads, then never yields again.
        pub(crate) fn stalling(mut self) -> Self {
            self.stall = true;
            self
        }

        /// Accepts the request but never answers it.
        pub(crate) fn stalling_open(mut self) -> Self {
            self.stall_open = true;
            self
        }

        pub(crate) fn requests(&self) -> Vec<ChatRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    impl Transport for ScriptedTransport {
        async fn open(&self, request: &ChatRequest) -> ChatResult<BodyStream> {
            self.requests.lock().unwrap().push(request.clone());
            if self.stall_open {
                std::future::pending::<()>().await;
            }
            if let Some(status) = self.refuse {
                return Err(ChatError::Status {
                    status,
                    body: "refused".to_string(),
                });
            }

            let reads: Vec<ChatResult<Bytes>> = self.reads.iter().cloned().map(Ok).collect();
            let body = futures::stream::iter(reads);
            if self.stall {
                Ok(body.chain(futures::stream::pending()).boxed())
            } else {
                Ok(body.boxed())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_loses_trailing_slashes() {
        let transport = HttpTransport::new("http://localhost:8000//");
        assert_eq!(transport.base_url(), "http://localhost:8000");
    }
}
