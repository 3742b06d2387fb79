use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use jahid_core::{Config, GeminiClient, GenerativeBackend};

mod app;
mod handler;
mod tui;
mod ui;

use app::App;
use tui::EventHandler;

#[derive(Parser)]
#[command(name = "jahid")]
#[command(version, about = "Terminal chat client for Gemini text, image generation and image editing")]
struct Cli {
    /// Text model to chat with (overrides the config file)
    #[arg(long)]
    model: Option<String>,

    /// Start with web search grounding enabled
    #[arg(long)]
    search: bool,

    /// Directory for saved images
    #[arg(long, env = "JAHID_OUTPUT_DIR")]
    output_dir: Option<PathBuf>,

    /// Log file (defaults to the local data directory)
    #[arg(long)]
    log_file: Option<PathBuf>,
}

fn default_log_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("jahid")
        .join("jahid.log")
}

/// Logs go to a file; the terminal belongs to the UI
fn init_logging(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = File::options()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open log file {}", path.display()))?;

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "jahid_core=info,jahid_tui=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(Mutex::new(file))
                .with_ansi(false),
        )
        .init();

    Ok(())
}

fn build_backend(config: &Config) -> Option<Arc<dyn GenerativeBackend>> {
    let api_key = config.resolve_api_key()?;
    match GeminiClient::from_config(config, &api_key) {
        Ok(client) => Some(Arc::new(client)),
        Err(err) => {
            warn!(error = %err, "could not build Gemini client");
            None
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_file.clone().unwrap_or_else(default_log_path))?;

    let mut config = Config::load().unwrap_or_else(|err| {
        warn!(error = %err, "config unreadable, using defaults");
        Config::new()
    });
    if let Some(model) = cli.model {
        config.text_model = model;
    }
    if cli.search {
        config.use_search = true;
    }
    if let Some(dir) = cli.output_dir {
        config.output_dir = Some(dir);
    }

    let backend = build_backend(&config);
    info!(
        model = %config.text_model,
        has_key = backend.is_some(),
        "starting jahid"
    );

    let mut app = App::new(config, backend);

    tui::install_panic_hook();
    let mut terminal = tui::init()?;
    let mut events = EventHandler::new(tui::TICK_RATE);

    let result = run(&mut terminal, &mut app, &mut events).await;

    tui::restore()?;
    info!("jahid exited");
    result
}

async fn run(terminal: &mut tui::Tui, app: &mut App, events: &mut EventHandler) -> Result<()> {
    while !app.should_quit {
        terminal.draw(|frame| ui::render(app, frame))?;

        match events.next().await {
            Some(event) => handler::handle_event(app, event).await,
            None => break,
        }
    }
    Ok(())
}
