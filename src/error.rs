use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("server response had no body")]
    EmptyBody,
    #[error("no data received for {}s", .0.as_secs())]
    IdleTimeout(Duration),
    #[error("session superseded")]
    Cancelled,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ChatError {
    /// Failures of the request or the response body, as opposed to errors the
    /// server reports inside the stream.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ChatError::Http(_)
                | ChatError::Status { .. }
                | ChatError::EmptyBody
                | ChatError::IdleTimeout(_)
        )
    }
}

pub type ChatResult<T> = Result<T, ChatError>;
