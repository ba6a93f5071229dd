//! Development backend speaking the `/chat` wire protocol with canned
//! suggestions and an echoed "implementation".

use crate::protocol::{ChatRequest, LegacyReply, StreamEvent};
use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use clap::{Args, ValueEnum};
use serde_json::json;
use std::convert::Infallible;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

pub const NDJSON: &str = "application/x-ndjson; charset=utf-8";
pub const MOCK_AGENT: &str = "MockedSuggestions";
pub const MOCK_SUGGESTIONS: &str =
    "• Split very large functions.\n• Add doc-strings.\n• Introduce type hints.";
pub const MAX_MESSAGE_CHARS: usize = 100_000;
pub const GENERATION_DISABLED: &str = "Code generation is disabled on this server.";

const CHUNK_CHARS: usize = 16;

type ServerResult<T> = Result<T, Box<dyn Error + Send + Sync>>;

/// Framing of the `/chat` body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum WireProtocol {
    /// `suggestions_chunk`* then `suggestions_end`.
    #[default]
    Chunked,
    /// A single `suggestions` frame.
    Atomic,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen: String,
    pub protocol: WireProtocol,
    pub model: String,
    pub chunk_delay: Duration,
    /// Answer with an `error` frame where the code would go.
    pub fail_generation: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8000".to_string(),
            protocol: WireProtocol::default(),
            model: "mock-coder".to_string(),
            chunk_delay: Duration::ZERO,
            fail_generation: false,
        }
    }
}

#[derive(Debug, Clone, Args)]
pub struct ServerArgs {
    /// Address to bind.
    #[arg(long, env = "REFINE_LISTEN", default_value = "127.0.0.1:8000")]
    pub listen: String,

    #[arg(long, env = "REFINE_PROTOCOL", value_enum, default_value_t = WireProtocol::Chunked)]
    pub protocol: WireProtocol,

    /// Agent name reported for generated code.
    #[arg(long, env = "REFINE_MODEL", default_value = "mock-coder")]
    pub model: String,

    /// Pause between frames, to watch the stream arrive.
    #[arg(long, env = "REFINE_CHUNK_DELAY_MS", default_value_t = 30)]
    pub chunk_delay_ms: u64,

    /// Send suggestions, then fail code generation with an `error` frame.
    #[arg(long, env = "REFINE_FAIL_GENERATION")]
    pub fail_generation: bool,
}

impl From<ServerArgs> for ServerConfig {
    fn from(args: ServerArgs) -> Self {
        Self {
            listen: args.listen,
            protocol: args.protocol,
            model: args.model,
            chunk_delay: Duration::from_millis(args.chunk_delay_ms),
            fail_generation: args.fail_generation,
        }
    }
}

pub fn router(config: ServerConfig) -> Router {
    Router::new()
        .route("/chat", post(chat))
        .route("/reply", post(reply))
        .with_state(Arc::new(config))
}

pub async fn run(config: ServerConfig) -> ServerResult<()> {
    let listener = tokio::net::TcpListener::bind(&config.listen).await?;
    log::info!(
        "refine dev server listening on http://{} ({:?} protocol, model {})",
        listener.local_addr()?,
        config.protocol,
        config.model
    );
    if config.fail_generation {
        log::warn!("code generation will fail on every request");
    }
    axum::serve(listener, router(config)).await?;

    Ok(())
}

async fn chat(
    State(config): State<Arc<ServerConfig>>,
    Json(request): Json<ChatRequest>,
) -> Result<Response, Response> {
    validate(&request)?;
    let events = script(&request, &config);
    log::info!(
        "streaming {} frames for a {}-char message",
        events.len(),
        request.user_message.chars().count()
    );

    let (tx, rx) = mpsc::channel::<Result<Bytes, Infallible>>(16);
    let delay = config.chunk_delay;
    tokio::spawn(async move {
        for event in events {
            let frame = match event.to_frame() {
                Ok(frame) => frame,
                Err(e) => {
                    log::error!("skipping {} frame that failed to serialize: {}", event.kind(), e);
                    continue;
                }
            };
            if tx.send(Ok(Bytes::from(frame))).await.is_err() {
                log::debug!("client hung up mid-stream");
                return;
            }
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
    });

    let body = Body::from_stream(ReceiverStream::new(rx));
    Ok(([(header::CONTENT_TYPE, NDJSON)], body).into_response())
}

async fn reply(
    State(config): State<Arc<ServerConfig>>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<LegacyReply>, Response> {
    validate(&request)?;
    if config.fail_generation {
        return Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "detail": GENERATION_DISABLED })),
        )
            .into_response());
    }
    let (agent, suggestions) = suggestions_for(&request);
    let reply = format!(
        "{}:\n{}\n\n{}:\n{}",
        agent,
        suggestions,
        config.model,
        implementation(&request.user_message)
    );
    Ok(Json(LegacyReply { reply }))
}

fn validate(request: &ChatRequest) -> Result<(), Response> {
    let chars = request.user_message.chars().count();
    if (1..=MAX_MESSAGE_CHARS).contains(&chars) {
        return Ok(());
    }

    log::warn!("rejecting message of {} chars", chars);
    let detail = format!(
        "user_message must be between 1 and {} characters",
        MAX_MESSAGE_CHARS
    );
    Err((
        StatusCode::UNPROCESSABLE_ENTITY,
        Json(json!({ "detail": detail })),
    )
        .into_response())
}

/// Every frame the server sends for `request`, in order.
pub fn script(request: &ChatRequest, config: &ServerConfig) -> Vec<StreamEvent> {
    let (agent, suggestions) = suggestions_for(request);
    let mut events = Vec::new();

    match config.protocol {
        WireProtocol::Chunked => {
            let pieces = chunks(&suggestions).into_iter();
            events.extend(pieces.map(|content| StreamEvent::SuggestionsChunk {
                agent: agent.clone(),
                content,
            }));
            events.push(StreamEvent::SuggestionsEnd {
                agent,
                content: String::new(),
            });
        }
        WireProtocol::Atomic => events.push(StreamEvent::Suggestions {
            agent,
            content: suggestions,
        }),
    }

    if config.fail_generation {
        events.push(StreamEvent::Error {
            agent: config.model.clone(),
            content: GENERATION_DISABLED.to_string(),
        });
        events.push(StreamEvent::StreamEnd {
            agent: config.model.clone(),
            content: String::new(),
        });
        return events;
    }

    let code = implementation(&request.user_message);
    let pieces = chunks(&code).into_iter();
    events.extend(pieces.map(|content| StreamEvent::GeneratedCodeChunk {
        agent: config.model.clone(),
        content,
    }));
    events.push(StreamEvent::StreamEnd {
        agent: config.model.clone(),
        content: String::new(),
    });
    events
}

/// Cached suggestions are echoed back; otherwise the canned review.
fn suggestions_for(request: &ChatRequest) -> (String, String) {
    match &request.cached_suggestions {
        Some(cached) => (
            request
                .cached_sugg_agent
                .clone()
                .unwrap_or_else(|| MOCK_AGENT.to_string()),
            cached.clone(),
        ),
        None => (MOCK_AGENT.to_string(), MOCK_SUGGESTIONS.to_string()),
    }
}

fn implementation(code: &str) -> String {
    format!("```\n{}\n```", code.trim_end())
}

fn chunks(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(CHUNK_CHARS)
        .map(|chunk| chunk.iter().collect())
        .collect()
}
