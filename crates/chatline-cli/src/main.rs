mod chat;
mod commands;
mod terminal_surface;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use chatline_core::controllers::{ControllerError, ConversationController};
use chatline_core::exporters::ExportFormat;
use chatline_core::models::{ConversationId, StreamEventKind};
use chatline_core::repositories::ConversationSqliteRepository;
use chatline_core::services::{DiagnosticsLayer, DiagnosticsLog, OpenAiTransport, TransportConfig};
use chatline_core::settings::{EngineSettings, SettingsJsonRepository, SettingsRepository};

use crate::terminal_surface::TerminalSurface;

#[derive(Debug, Parser)]
#[command(name = "chatline", version, about = "Stream chat completions into a local conversation log")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Settings file (defaults to the user config directory)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Conversation database (defaults to the user config directory)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[arg(long, global = true)]
    model: Option<String>,

    /// OpenAI-compatible API base URL
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// API key; falls back to OPENAI_API_KEY
    #[arg(long, global = true)]
    api_key: Option<String>,

    #[arg(long, global = true)]
    system_prompt: Option<String>,

    /// Skip TLS certificate verification (self-hosted endpoints)
    #[arg(long, global = true)]
    insecure: bool,

    /// Log at INFO instead of WARN
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Interactive chat (default)
    Chat {
        /// Open an existing conversation instead of starting fresh
        #[arg(long)]
        open: Option<i64>,
    },
    /// Send one prompt and print the streamed reply
    Ask {
        #[arg(required = true)]
        prompt: Vec<String>,
    },
    /// List conversations, most recently updated first
    List {
        /// Only conversations carrying this tag
        #[arg(long)]
        tag: Option<String>,
    },
    /// Find conversations by title or message text
    Search { query: String },
    /// Write conversations to a JSON or Markdown file
    Export {
        #[arg(short, long, default_value = "json")]
        format: String,
        #[arg(short, long)]
        output: PathBuf,
        /// Conversation ids to export (all when omitted)
        #[arg(long = "id")]
        ids: Vec<i64>,
    },
    /// Check that the API endpoint answers with the configured key and model
    Ping,
    /// Print the effective settings as JSON
    Config {
        /// Write them back to the settings file, flags included
        #[arg(long)]
        save: bool,
    },
}

fn init_logging(verbose: bool) -> DiagnosticsLog {
    let default_level = if verbose { "info" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let diagnostics = DiagnosticsLog::default();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(filter),
        )
        .with(DiagnosticsLayer::new(diagnostics.clone()))
        .init();
    diagnostics
}

fn settings_repository(cli: &Cli) -> Result<SettingsJsonRepository> {
    match &cli.settings {
        Some(path) => Ok(SettingsJsonRepository::with_path(path)),
        None => SettingsJsonRepository::new().context("Failed to locate settings file"),
    }
}

async fn load_settings(cli: &Cli) -> Result<EngineSettings> {
    let repository = settings_repository(cli)?;
    let mut settings = repository
        .load()
        .await
        .with_context(|| format!("Failed to load settings from {}", repository.path().display()))?;

    if let Some(model) = &cli.model {
        settings.model = model.clone();
    }
    if let Some(base_url) = &cli.base_url {
        settings.base_url = base_url.clone();
    }
    if let Some(system_prompt) = &cli.system_prompt {
        settings.system_prompt = Some(system_prompt.clone());
    }
    if cli.insecure {
        settings.verify_tls = false;
    }
    match &cli.api_key {
        Some(key) => settings.api_key = key.clone(),
        None if settings.api_key.is_empty() => {
            if let Ok(key) = std::env::var("OPENAI_API_KEY") {
                settings.api_key = key;
            }
        }
        None => {}
    }
    if settings.api_key.is_empty() {
        warn!("No API key configured");
    }
    Ok(settings.normalized())
}

async fn open_repository(cli: &Cli) -> Result<ConversationSqliteRepository> {
    let repository = match &cli.db {
        Some(path) => ConversationSqliteRepository::open(path).await,
        None => ConversationSqliteRepository::new().await,
    };
    repository.context("Failed to open conversation database")
}

async fn build_controller(cli: &Cli, quiet_render: bool) -> Result<ConversationController> {
    let settings = load_settings(cli).await?;
    let repository = open_repository(cli).await?;
    let transport = OpenAiTransport::new(TransportConfig::from(&settings))
        .context("Failed to create HTTP client")?;
    let surface = if quiet_render {
        TerminalSurface::quiet()
    } else {
        TerminalSurface::new()
    };

    info!(model = %settings.model, base_url = %settings.base_url, "Engine ready");
    Ok(ConversationController::new(
        settings,
        Arc::new(repository),
        Arc::new(transport),
        Arc::new(surface),
    ))
}

async fn ask(controller: &mut ConversationController, prompt: &str) -> Result<()> {
    controller.submit(prompt).await?;
    let events = controller.run_until_idle().await?;
    controller.join_title_task().await;

    match events.last().map(|e| &e.kind) {
        Some(StreamEventKind::Completed(_)) => Ok(()),
        Some(StreamEventKind::Failed { kind, message }) => {
            bail!("{}: {message}\n{}", kind.title(), kind.suggestion())
        }
        Some(StreamEventKind::Cancelled) => bail!("Response cancelled"),
        _ => match controller.notice() {
            Some(notice) => bail!("{}", notice.title),
            None => bail!("No response"),
        },
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let diagnostics = init_logging(cli.verbose);

    match &cli.command {
        None | Some(Command::Chat { open: None }) => {
            let controller = build_controller(&cli, false).await?;
            chat::run(controller, diagnostics, None).await
        }
        Some(Command::Chat { open: Some(id) }) => {
            let controller = build_controller(&cli, false).await?;
            chat::run(controller, diagnostics, Some(ConversationId(*id))).await
        }
        Some(Command::Ask { prompt }) => {
            let mut controller = build_controller(&cli, false).await?;
            let result = ask(&mut controller, &prompt.join(" ")).await;
            controller.close().await?;
            result
        }
        Some(Command::List { tag }) => {
            let controller = build_controller(&cli, true).await?;
            let summaries = match tag {
                Some(tag) => controller.conversations_with_tag(tag).await?,
                None => controller.list_conversations().await?,
            };
            chat::print_summaries(&summaries);
            Ok(())
        }
        Some(Command::Ping) => {
            let controller = build_controller(&cli, true).await?;
            match controller.test_connection().await {
                Ok(()) => {
                    println!("Connection OK ({})", controller.settings().model);
                    Ok(())
                }
                Err(ControllerError::Transport(e)) => {
                    bail!("{}: {}\n{}", e.kind.title(), e.message, e.kind.suggestion())
                }
                Err(e) => Err(e.into()),
            }
        }
        Some(Command::Search { query }) => {
            let controller = build_controller(&cli, true).await?;
            chat::print_summaries(&controller.search(query).await?);
            Ok(())
        }
        Some(Command::Export {
            format,
            output,
            ids,
        }) => {
            let format: ExportFormat = format.parse()?;
            let controller = build_controller(&cli, true).await?;
            let ids: Vec<ConversationId> = ids.iter().copied().map(ConversationId).collect();
            let selected = (!ids.is_empty()).then_some(ids.as_slice());
            let count = controller
                .export(output, format, selected)
                .await
                .with_context(|| format!("Failed to export to {}", output.display()))?;
            println!("Exported {count} conversation(s) to {}", output.display());
            Ok(())
        }
        Some(Command::Config { save }) => {
            let settings = load_settings(&cli).await?;
            if *save {
                let repository = settings_repository(&cli)?;
                repository
                    .save(settings.clone())
                    .await
                    .with_context(|| format!("Failed to save {}", repository.path().display()))?;
                println!("Saved {}", repository.path().display());
            }
            let mut shown = settings;
            if !shown.api_key.is_empty() {
                shown.api_key = "********".to_string();
            }
            println!("{}", serde_json::to_string_pretty(&shown)?);
            Ok(())
        }
    }
}
