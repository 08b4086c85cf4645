use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use client_core::{HttpCompanionApi, SessionController, WebSocketTransport};
use storage::{MemoryPreferenceStore, PreferenceStore, Storage};
use tokio::{
    io::{self, AsyncBufReadExt, BufReader},
    sync::mpsc,
};
use tokio_stream::{wrappers::LinesStream, StreamExt};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod terminal;

use terminal::{parse_input, Input, TerminalView};

#[derive(Parser, Debug)]
#[command(about = "Terminal client for the AI companion backend")]
struct Args {
    /// Backend base url, e.g. http://127.0.0.1:5000
    #[arg(long)]
    server_url: Option<String>,
    /// SQLite url for local preferences
    #[arg(long)]
    database_url: Option<String>,
    /// Path to a companion.toml
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    log_filter: Option<String>,
    /// Reload chat history after every reconnect
    #[arg(long)]
    resync_history: bool,
    /// Keep preferences in memory only
    #[arg(long)]
    ephemeral: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut settings = config::load_settings(args.config.as_deref())?;
    if let Some(url) = args.server_url {
        settings.server_url = url;
    }
    if let Some(url) = args.database_url {
        settings.database_url = url;
    }
    if let Some(filter) = args.log_filter {
        settings.log_filter = filter;
    }
    settings.resync_history_on_reconnect |= args.resync_history;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.log_filter.clone()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let store: Arc<dyn PreferenceStore> = if args.ephemeral {
        Arc::new(MemoryPreferenceStore::new())
    } else {
        let opened = match Storage::new(&settings.database_url).await {
            Ok(storage) => storage.health_check().await.map(|()| storage),
            Err(err) => Err(err),
        };
        match opened {
            Ok(storage) => Arc::new(storage),
            Err(err) => {
                warn!(error = %err, "preferences will not survive this session");
                Arc::new(MemoryPreferenceStore::new())
            }
        }
    };
    let transport = Arc::new(WebSocketTransport::new(&settings.server_url)?);
    let api = Arc::new(HttpCompanionApi::new(settings.server_url.clone()));
    info!(server_url = %settings.server_url, "starting companion session");

    let controller = SessionController::new(
        settings.session_config(),
        transport,
        api,
        store,
        Box::new(TerminalView::new(std::io::stdout())),
    );
    let (actions, actions_rx) = mpsc::channel(64);
    let session = tokio::spawn(controller.run(actions_rx));

    let mut lines = LinesStream::new(BufReader::new(io::stdin()).lines());
    while let Some(line) = lines.next().await {
        let line = line.context("failed to read stdin")?;
        match parse_input(&line) {
            Ok(Input::Action(action)) => {
                if actions.send(action).await.is_err() {
                    break;
                }
            }
            Ok(Input::Help) => println!("{}", terminal::HELP),
            Ok(Input::Quit) => break,
            Err(message) => println!("{message}"),
        }
    }

    drop(actions);
    let controller = session.await.context("session task failed")?;
    info!(
        messages = controller.transcript().len(),
        theme = %controller.theme(),
        "session closed"
    );
    Ok(())
}
