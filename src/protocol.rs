use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub user_message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached_suggestions: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached_sugg_agent: Option<String>,
}

impl ChatRequest {
    pub fn new(user_message: impl Into<String>) -> Self {
        Self {
            user_message: user_message.into(),
            ..Self::default()
        }
    }
}

/// Response of the non-streaming `/reply` endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegacyReply {
    pub reply: String,
}

/// One frame of the `/chat` response body.
///
/// `content` is an incremental fragment for the `*_chunk` kinds, the whole
/// text for `suggestions`, and a message or nothing for the rest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    SuggestionsChunk {
        #[serde(default)]
        agent: String,
        #[serde(default)]
        content: String,
    },
    SuggestionsEnd {
        #[serde(default)]
        agent: String,
        #[serde(default)]
        content: String,
    },
    Suggestions {
        #[serde(default)]
        agent: String,
        #[serde(default)]
        content: String,
    },
    GeneratedCodeChunk {
        #[serde(default)]
        agent: String,
        #[serde(default)]
        content: String,
    },
    StreamEnd {
        #[serde(default)]
        agent: String,
        #[serde(default)]
        content: String,
    },
    Error {
        #[serde(default)]
        agent: String,
        #[serde(default)]
        content: String,
    },
}

impl StreamEvent {
    pub fn agent(&self) -> &str {
        match self {
            StreamEvent::SuggestionsChunk { agent, .. }
            | StreamEvent::SuggestionsEnd { agent, .. }
            | StreamEvent::Suggestions { agent, .. }
            | StreamEvent::GeneratedCodeChunk { agent, .. }
            | StreamEvent::StreamEnd { agent, .. }
            | StreamEvent::Error { agent, .. } => agent,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            StreamEvent::SuggestionsChunk { .. } => "suggestions_chunk",
            StreamEvent::SuggestionsEnd { .. } => "suggestions_end",
            StreamEvent::Suggestions { .. } => "suggestions",
            StreamEvent::GeneratedCodeChunk { .. } => "generated_code_chunk",
            StreamEvent::StreamEnd { .. } => "stream_end",
            StreamEvent::Error { .. } => "error",
        }
    }

    /// Serializes the event as one newline-terminated frame.
    pub fn to_frame(&self) -> serde_json::Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}
