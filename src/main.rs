mod accumulator;
mod cancel;
mod config;
mod decoder;
mod dispatch;
mod error;
mod markdown;
mod print;
mod protocol;
mod serve;
mod session;
mod transport;
mod ui;
mod view;

use clap::{Parser, Subcommand};
use config::{ClientArgs, ClientConfig};
use env_logger::{Env, Target};
use error::ChatResult;
use print::PrintView;
use serve::ServerArgs;
use session::{SessionController, SessionStatus};
use std::error::Error;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use transport::HttpTransport;

type MainResult<T> = Result<T, Box<dyn Error + Send + Sync>>;

#[derive(Parser)]
#[command(name = "refine", version, about = "Streaming code-review chat client")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Interactive chat in the terminal.
    Chat {
        #[command(flatten)]
        client: ClientArgs,

        /// Write logs here; the chat logs nowhere otherwise.
        #[arg(long)]
        log_file: Option<PathBuf>,
    },
    /// Send one message and stream the reply to stdout.
    Ask {
        /// Message to send; read from stdin when omitted.
        message: Option<String>,

        /// Use the non-streaming `/reply` endpoint.
        #[arg(long)]
        legacy: bool,

        #[command(flatten)]
        client: ClientArgs,
    },
    /// Run the development backend.
    Serve {
        #[command(flatten)]
        server: ServerArgs,
    },
}

#[tokio::main]
async fn main() -> MainResult<()> {
    dotenvy::dotenv().ok();

    match Cli::parse().command {
        Command::Chat { client, log_file } => {
            if let Some(path) = log_file {
                init_file_logging(&path)?;
            }
            ui::run_tui(client.into())
        }
        Command::Ask {
            message,
            legacy,
            client,
        } => {
            init_logging("warn");
            ask(message, legacy, client.into()).await
        }
        Command::Serve { server } => {
            init_logging("info");
            serve::run(server.into()).await
        }
    }
}

fn init_logging(default_filter: &str) {
    env_logger::Builder::from_env(Env::default().default_filter_or(default_filter)).init();
}

// Raw mode owns the terminal, so the chat only ever logs to a file.
fn init_file_logging(path: &Path) -> MainResult<()> {
    let file = std::fs::File::create(path)?;
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .target(Target::Pipe(Box::new(file)))
        .init();
    Ok(())
}

async fn ask(message: Option<String>, legacy: bool, config: ClientConfig) -> MainResult<()> {
    let message = read_message(message, io::stdin())?;
    if message.trim().is_empty() {
        return Err("nothing to send".into());
    }

    let transport = HttpTransport::new(&config.server_url);
    if legacy {
        println!("{}", transport.reply(&message).await?);
        return Ok(());
    }

    let mut controller = SessionController::new(config);
    let mut view = PrintView::new(io::stdout());
    let report = controller.send(message).run(&transport, &mut view).await;
    view.finish()?;

    match report.status {
        SessionStatus::Completed => Ok(()),
        status => {
            let reason = report
                .error
                .unwrap_or_else(|| format!("session ended as {:?}", status));
            Err(reason.into())
        }
    }
}

fn read_message(message: Option<String>, mut input: impl Read) -> ChatResult<String> {
    if let Some(message) = message {
        return Ok(message);
    }
    let mut buffer = String::new();
    input.read_to_string(&mut buffer)?;
    Ok(buffer)
}
