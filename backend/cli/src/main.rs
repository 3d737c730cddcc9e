mod api;
mod runtime;
mod sessions_cmd;
mod status_cmd;
mod terminal_output;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use stepforge_agent::CreateSessionRequest;
use stepforge_config::{config_dir, config_file_path, load_and_prepare, write_config, StepforgeConfig};
use stepforge_core::SessionStatus;
use stepforge_logging::init_logger;

use api::AppState;
use sessions_cmd::SessionCommands;
use terminal_output::{note_error, note_success, note_warn, write_event};

#[derive(Parser)]
#[command(name = "stepforge")]
#[command(about = "Stepforge: agent session execution orchestrator")]
#[command(version)]
struct Cli {
    /// Config file (default: ~/.stepforge/config.yaml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API server
    Serve {
        /// Port to bind the HTTP server to
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Run one session in-process and print its events as NDJSON
    Run {
        #[arg(short, long)]
        agent: String,
        goal: String,
        /// JSON object passed to the reasoning collaborator
        #[arg(long)]
        context: Option<String>,
    },
    /// Show the status of a running server
    Status {
        #[arg(long)]
        server: Option<String>,
    },
    /// Inspect sessions on a running server
    Sessions {
        #[arg(long, global = true)]
        server: Option<String>,
        #[command(subcommand)]
        command: SessionCommands,
    },
    /// Write a default config file
    Init {
        /// Replace an existing file (the old one is kept as a backup)
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli
        .config
        .unwrap_or_else(|| config_file_path(&config_dir()));

    match cli.command {
        Commands::Init { force } => init_config(&config_path, force).await,
        Commands::Serve { port } => {
            let mut config = load(&config_path).await?;
            if let Some(port) = port {
                config.server.port = port;
            }
            run_server(config).await
        }
        Commands::Run {
            agent,
            goal,
            context,
        } => {
            let config = load(&config_path).await?;
            let context = context
                .map(|raw| serde_json::from_str(&raw).context("--context must be JSON"))
                .transpose()?;
            run_session(config, CreateSessionRequest { agent_id: agent, goal, context }).await
        }
        Commands::Status { server } => {
            let config = load(&config_path).await?;
            status_cmd::run(&server_url(server, &config)).await
        }
        Commands::Sessions { server, command } => {
            let config = load(&config_path).await?;
            sessions_cmd::run(&server_url(server, &config), command).await
        }
    }
}

async fn load(path: &Path) -> Result<StepforgeConfig> {
    let config = load_and_prepare(path)
        .await
        .with_context(|| format!("Failed to load config from {}", path.display()))?;
    init_logger(
        config.logging.dir.as_deref().map(Path::new),
        &config.logging.level,
        config.logging.json,
    );
    Ok(config)
}

fn server_url(explicit: Option<String>, config: &StepforgeConfig) -> String {
    explicit.unwrap_or_else(|| format!("http://127.0.0.1:{}", config.server.port))
}

async fn init_config(path: &Path, force: bool) -> Result<()> {
    if tokio::fs::try_exists(path).await.unwrap_or(false) && !force {
        bail!("{} already exists; pass --force to replace it", path.display());
    }
    write_config(&StepforgeConfig::default(), path).await?;
    note_success(&format!("Wrote {}", path.display()));
    Ok(())
}

async fn run_server(config: StepforgeConfig) -> Result<()> {
    info!(
        port = config.server.port,
        bind = %config.server.bind_address,
        db = %config.storage.db_path,
        "Starting Stepforge"
    );

    let store = runtime::open_store(&config)?;
    let manager = Arc::new(runtime::build_manager(&config, store));
    let state = Arc::new(AppState {
        manager,
        default_trust: config.governance.default_trust.clone(),
        started_at: Instant::now(),
    });

    let app = api::build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());
    let addr = format!("{}:{}", config.server.bind_address, config.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(addr = %addr, "HTTP API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await?;
    Ok(())
}

/// Ctrl-C cancels the session; the stream then runs to its terminal event.
async fn run_session(config: StepforgeConfig, request: CreateSessionRequest) -> Result<()> {
    let store = runtime::open_store(&config)?;
    let manager = runtime::build_manager(&config, store);

    let session = manager.create(request, config.governance.default_trust.clone())?;
    let mut events = manager.subscribe(session.id, 0)?;
    manager.start(session.id)?;

    let mut stdout = std::io::stdout();
    let mut interrupted = false;
    loop {
        tokio::select! {
            next = events.next() => match next {
                Some(Ok(event)) => write_event(&mut stdout, &event)?,
                Some(Err(lagged)) => {
                    note_warn(&lagged.to_string());
                    events = manager.subscribe(session.id, events.last_sequence())?;
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c(), if !interrupted => {
                interrupted = true;
                note_warn("Cancelling session");
                manager.cancel(session.id)?;
            }
        }
    }

    let finished = manager.wait(session.id).await?;
    match finished.status {
        SessionStatus::Completed => {
            note_success(&format!("Session {} completed", finished.id));
            Ok(())
        }
        status => {
            let reason = finished.error.map(|e| e.message).unwrap_or_default();
            note_error(&format!("Session {} {status}: {reason}", finished.id));
            bail!("session ended {status}")
        }
    }
}
