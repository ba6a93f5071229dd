use clap::{Args, ValueEnum};
use std::time::Duration;

pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:8000";
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 120;

/// What to do with a frame that is not a valid event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum MalformedLinePolicy {
    /// Log the frame and carry on.
    #[default]
    Skip,
    /// Show an inline notice in the conversation and carry on.
    Surface,
}

/// When a regenerate removes the message it replaces.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum RemovalPolicy {
    /// As soon as the replay starts.
    Eager,
    /// Once the replay has rendered something.
    #[default]
    AfterFirstUpdate,
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server_url: String,
    pub idle_timeout: Option<Duration>,
    pub malformed_lines: MalformedLinePolicy,
    pub removal: RemovalPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            idle_timeout: Some(Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS)),
            malformed_lines: MalformedLinePolicy::default(),
            removal: RemovalPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Args)]
pub struct ClientArgs {
    /// Base URL of the chat server.
    #[arg(long, env = "REFINE_SERVER_URL", default_value = DEFAULT_SERVER_URL)]
    pub server_url: String,

    /// Seconds without data before a stream is abandoned (0 waits forever).
    #[arg(long, env = "REFINE_IDLE_TIMEOUT_SECS", default_value_t = DEFAULT_IDLE_TIMEOUT_SECS)]
    pub idle_timeout_secs: u64,

    #[arg(long, env = "REFINE_MALFORMED_LINES", value_enum, default_value_t = MalformedLinePolicy::Skip)]
    pub malformed_lines: MalformedLinePolicy,

    #[arg(long, env = "REFINE_REGENERATE_REMOVAL", value_enum, default_value_t = RemovalPolicy::AfterFirstUpdate)]
    pub regenerate_removal: RemovalPolicy,
}

impl From<ClientArgs> for ClientConfig {
    fn from(args: ClientArgs) -> Self {
        Self {
            server_url: args.server_url,
            idle_timeout: (args.idle_timeout_secs > 0)
                .then(|| Duration::from_secs(args.idle_timeout_secs)),
            malformed_lines: args.malformed_lines,
            removal: args.regenerate_removal,
        }
    }
}
