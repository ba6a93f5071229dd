use crate::cancel::{AbortHandle, AbortSignal, abort_pair};
use crate::config::{ClientConfig, RemovalPolicy};
use crate::decoder::FrameDecoder;
use crate::dispatch::{Dispatcher, Flow};
use crate::error::{ChatError, ChatResult};
use crate::protocol::ChatRequest;
use crate::transport::{BodyStream, Transport};
use crate::view::{Indicator, RegenerateAction, RegenerateMode, ViewHandle, ViewSink};
use bytes::Bytes;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Agent name used for errors raised by the client itself.
pub const CLIENT_AGENT: &str = "client";

/// A finished suggestion phase, reusable to skip straight to generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suggestion {
    pub agent: String,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Idle,
    Requesting,
    Streaming,
    Completed,
    Failed,
    /// Superseded by a newer session before it finished.
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct SessionReport {
    pub id: Uuid,
    pub status: SessionStatus,
    /// Suggestion completed during this session, if any.
    pub suggestion: Option<Suggestion>,
    pub error: Option<String>,
}

/// Hands out sessions and remembers the last finished suggestion.
///
/// Starting a session aborts the one started before it.
pub struct SessionController {
    config: ClientConfig,
    last_suggestion: Option<Suggestion>,
    active: Option<(Uuid, AbortHandle)>,
}

impl Default for SessionController {
    fn default() -> Self {
        Self::new(ClientConfig::default())
    }
}

impl SessionController {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            last_suggestion: None,
            active: None,
        }
    }

    /// A fresh exchange. Forgets the cached suggestion.
    pub fn send(&mut self, message: impl Into<String>) -> Session {
        self.last_suggestion = None;
        self.start(message.into(), None, None)
    }

    /// Replays the exchange behind `action`, replacing its message.
    pub fn regenerate(&mut self, action: &RegenerateAction) -> Session {
        let cached = match action.mode {
            RegenerateMode::Suggestions => None,
            RegenerateMode::Implementation => {
                let cached = action
                    .suggestion
                    .clone()
                    .or_else(|| self.last_suggestion.clone());
                if cached.is_none() {
                    log::warn!("no cached suggestion to reuse; replaying the whole message");
                }
                cached
            }
        };
        self.start(action.message.clone(), cached, Some(action.target))
    }

    /// Takes the suggestion a session completed, unless the session has
    /// been superseded since.
    pub fn record(&mut self, report: &SessionReport) {
        let is_active = self.active.as_ref().is_some_and(|(id, _)| *id == report.id);
        if !is_active {
            log::debug!("ignoring report from superseded session {}", report.id);
            return;
        }
        if let Some(suggestion) = &report.suggestion {
            self.last_suggestion = Some(suggestion.clone());
        }
    }

    pub fn last_suggestion(&self) -> Option<&Suggestion> {
        self.last_suggestion.as_ref()
    }

    fn start(
        &mut self,
        message: String,
        cached: Option<Suggestion>,
        supersedes: Option<ViewHandle>,
    ) -> Session {
        if let Some((id, previous)) = self.active.take() {
            log::debug!("aborting session {}", id);
            previous.abort();
        }

        let (handle, signal) = abort_pair();
        let session = Session::new(message, cached, supersedes, &self.config, signal);
        self.active = Some((session.id, handle));
        session
    }
}

/// One request and the stream that answers it.
pub struct Session {
    id: Uuid,
    message: String,
    cached: Option<Suggestion>,
    supersedes: Option<ViewHandle>,
    removal: RemovalPolicy,
    idle_timeout: Option<Duration>,
    abort: AbortSignal,
    status: SessionStatus,
    seen_event: bool,
    dispatcher: Dispatcher,
}

impl Session {
    fn new(
        message: String,
        cached: Option<Suggestion>,
        supersedes: Option<ViewHandle>,
        config: &ClientConfig,
        abort: AbortSignal,
    ) -> Self {
        let dispatcher = Dispatcher::new(&message, cached.clone(), config.malformed_lines);
        Self {
            id: Uuid::new_v4(),
            message,
            cached,
            supersedes,
            removal: config.removal,
            idle_timeout: config.idle_timeout,
            abort,
            status: SessionStatus::Idle,
            seen_event: false,
            dispatcher,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn request(&self) -> ChatRequest {
        ChatRequest {
            user_message: self.message.clone(),
            cached_suggestions: self.cached.as_ref().map(|s| s.content.clone()),
            cached_sugg_agent: self.cached.as_ref().map(|s| s.agent.clone()),
        }
    }

    /// Drives the session to a terminal state. Cleanup runs on every path.
    pub async fn run<T, V>(mut self, transport: &T, view: &mut V) -> SessionReport
    where
        T: Transport + ?Sized,
        V: ViewSink + ?Sized,
    {
        log::info!(
            "session {} started ({} chars, cached suggestion: {})",
            self.id,
            self.message.len(),
            self.cached.is_some()
        );
        self.status = SessionStatus::Requesting;
        if self.removal == RemovalPolicy::Eager {
            self.remove_superseded(view);
        }
        view.set_composer_enabled(false);
        view.set_indicator(Some(Indicator::Thinking));

        let result = self.drive(transport, view).await;
        self.finish(result, view)
    }

    async fn drive<T, V>(&mut self, transport: &T, view: &mut V) -> ChatResult<Flow>
    where
        T: Transport + ?Sized,
        V: ViewSink + ?Sized,
    {
        let request = self.request();
        let mut body = tokio::select! {
            biased;
            _ = self.abort.aborted() => return Err(ChatError::Cancelled),
            opened = open_within(transport.open(&request), self.idle_timeout) => opened?,
        };
        self.status = SessionStatus::Streaming;

        let mut decoder = FrameDecoder::new();
        loop {
            let next = tokio::select! {
                biased;
                _ = self.abort.aborted() => return Err(ChatError::Cancelled),
                next = read_next(&mut body, self.idle_timeout) => next?,
            };
            let Some(fragment) = next else {
                break;
            };

            for line in decoder.push(&fragment) {
                if self.abort.is_aborted() {
                    return Err(ChatError::Cancelled);
                }
                if self.handle_line(&line, view) == Flow::Stop {
                    return Ok(Flow::Stop);
                }
            }
        }

        decoder.finish();
        Ok(Flow::Continue)
    }

    fn handle_line<V: ViewSink + ?Sized>(&mut self, line: &str, view: &mut V) -> Flow {
        let flow = match self.dispatcher.decode(line, view) {
            Some(event) => {
                // Thinking holds until a well-formed event arrives.
                if !self.seen_event {
                    self.seen_event = true;
                    let next = self.cached.as_ref().map(|_| Indicator::Generating);
                    view.set_indicator(next);
                }
                self.dispatcher.handle_event(event, view)
            }
            None => Flow::Continue,
        };
        if self.dispatcher.has_rendered() {
            self.remove_superseded(view);
        }
        flow
    }

    fn remove_superseded<V: ViewSink + ?Sized>(&mut self, view: &mut V) {
        if let Some(target) = self.supersedes.take() {
            log::debug!("session {} replaces view {}", self.id, target.id());
            view.remove(target);
        }
    }

    fn finish<V: ViewSink + ?Sized>(
        mut self,
        result: ChatResult<Flow>,
        view: &mut V,
    ) -> SessionReport {
        let dangling = self.dispatcher.finish(view);
        if dangling > 0 {
            log::warn!("session {} closed {} unfinished bubbles", self.id, dangling);
        }

        let error = match result {
            Ok(Flow::Continue) => {
                self.status = SessionStatus::Completed;
                None
            }
            Ok(Flow::Stop) => {
                self.status = SessionStatus::Failed;
                self.dispatcher.upstream_error().map(str::to_string)
            }
            Err(ChatError::Cancelled) => {
                self.status = SessionStatus::Cancelled;
                None
            }
            Err(e) => {
                if e.is_transport() {
                    log::warn!("session {} failed: {}", self.id, e);
                } else {
                    log::error!("session {} failed: {}", self.id, e);
                }
                self.status = SessionStatus::Failed;
                let handle = view.show_error(CLIENT_AGENT, &e.to_string());
                let action = self.dispatcher.action(RegenerateMode::Suggestions, handle);
                view.attach_regenerate(handle, action);
                self.remove_superseded(view);
                Some(e.to_string())
            }
        };

        // A superseding session owns the composer and indicator by now.
        if self.status != SessionStatus::Cancelled {
            view.set_indicator(None);
            view.set_composer_enabled(true);
        }

        log::info!("session {} finished: {:?}", self.id, self.status);
        SessionReport {
            id: self.id,
            status: self.status,
            suggestion: self.dispatcher.completed_suggestion().cloned(),
            error,
        }
    }
}

/// Waiting for response headers counts against the idle limit too.
async fn open_within<F>(open: F, idle: Option<Duration>) -> ChatResult<BodyStream>
where
    F: Future<Output = ChatResult<BodyStream>>,
{
    match idle {
        Some(limit) => tokio::time::timeout(limit, open)
            .await
            .map_err(|_| ChatError::IdleTimeout(limit))?,
        None => open.await,
    }
}

async fn read_next(body: &mut BodyStream, idle: Option<Duration>) -> ChatResult<Option<Bytes>> {
    let next = match idle {
        Some(limit) => tokio::time::timeout(limit, body.next())
            .await
            .map_err(|_| ChatError::IdleTimeout(limit))?,
        None => body.next().await,
    };
    next.transpose()
}
