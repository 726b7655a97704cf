//! LiveShare Agent
//!
//! Background agent that broadcasts the camera, serves a shared directory
//! over HTTP and follows remote commands for a signed-in user.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use agent::broadcast::{headless_factory, EngineFactory, EngineProbe};
use agent::config::{Config, StoreBackend};
use agent::identity::RouteProbe;
use agent::indicator::TerminalIndicator;
use agent::ipc::{get_socket_path, AgentStatus, IpcClient, IpcServer};
use agent::lifecycle::{Agent, AgentEvent, Collaborators, SessionInfo, SessionState, StartOutcome};
use agent::store::{DocumentStore, MemoryStore, RemoteStore, RemoteStoreConfig};
use agent::ui::qr::{generate_png_qr, generate_terminal_qr};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// LiveShare Agent - camera broadcast and file sharing for a signed-in user.
#[derive(Parser, Debug)]
#[command(name = "liveshare-agent")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for the agent.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start a session and run until stopped
    Run {
        /// Identifier of the signed-in user
        #[arg(long, short)]
        user: String,

        /// Name shown to controllers (defaults to "Unknown")
        #[arg(long, short)]
        name: Option<String>,

        /// Print the share link as a QR code once the session is up
        #[arg(long)]
        qr: bool,
    },

    /// Show the state of the running agent
    Status {
        /// Print the raw status as JSON
        #[arg(long)]
        json: bool,
    },

    /// Stop the running agent
    Stop {
        /// Timeout in seconds for graceful shutdown (default: 30)
        #[arg(long, default_value = "30")]
        timeout: u64,
    },

    /// Show recorded subsystem failures
    Diagnostics {
        /// Print entries as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the share link of the running session as a QR code
    Qr {
        /// Write a PNG image instead of printing to the terminal
        #[arg(long, value_name = "FILE")]
        png: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(config_path) => Config::load(config_path)?,
        None => Config::load_default()?,
    };
    config.apply_env_overrides();
    config.validate()?;

    let _log_guard = init_tracing(&config, cli.verbose)?;
    if let Some(config_path) = &cli.config {
        tracing::debug!("Using config file: {:?}", config_path);
    }

    match cli.command {
        Commands::Run { user, name, qr } => {
            if is_agent_running().await {
                eprintln!("Error: Agent already running");
                eprintln!();
                eprintln!("To stop the running agent, run:");
                eprintln!("  liveshare-agent stop");
                std::process::exit(1);
            }

            let collaborators = build_collaborators(&config)?;
            let agent = Agent::new(config, collaborators);
            run_session(&agent, &user, name.as_deref(), qr).await?;
        }
        Commands::Status { json } => match query_status().await {
            Ok(status) => {
                if json {
                    let value = serde_json::json!({
                        "state": status.state,
                        "uptime_secs": status.uptime_secs,
                        "session": status.session,
                    });
                    println!("{}", serde_json::to_string_pretty(&value)?);
                } else {
                    print_status(&status);
                }
            }
            Err(e) => {
                tracing::debug!("Status query failed: {}", e);
                println!("Agent Status: not running");
                std::process::exit(1);
            }
        },
        Commands::Stop { timeout } => match graceful_stop_agent(timeout).await {
            Ok(()) => println!("Agent stopped successfully"),
            Err(e) => {
                eprintln!("Failed to stop agent: {}", e);
                std::process::exit(1);
            }
        },
        Commands::Diagnostics { json } => {
            let entries = connect().await?.diagnostics().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else if entries.is_empty() {
                println!("No failures recorded");
            } else {
                for entry in entries {
                    println!(
                        "{}  {:<12} {:<28} {}",
                        entry.at_millis,
                        entry.subsystem.to_string(),
                        format!("{:?}", entry.kind),
                        entry.message
                    );
                }
            }
        }
        Commands::Qr { png } => {
            let status = query_status().await?;
            let link = status
                .session
                .as_ref()
                .and_then(|s| s.share_url.clone())
                .ok_or_else(|| anyhow::anyhow!("No file share is running"))?;

            match png {
                Some(path) => {
                    generate_png_qr(&link, &path)?;
                    println!("QR code written to {}", path.display());
                }
                None => {
                    print!("{}", generate_terminal_qr(&link)?);
                    println!("{}", link);
                }
            }
        }
    }

    Ok(())
}

/// Installs the global subscriber. The returned guard flushes the log file
/// and must live until exit.
fn init_tracing(config: &Config, verbose: bool) -> anyhow::Result<Option<WorkerGuard>> {
    let level = if verbose {
        "debug".to_string()
    } else {
        config.agent.log_level.to_lowercase()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let (file_layer, guard) = match &config.agent.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(dir, "agent.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();

    Ok(guard)
}

fn build_collaborators(config: &Config) -> anyhow::Result<Collaborators> {
    let store: Arc<dyn DocumentStore> = match config.store.backend {
        StoreBackend::Memory => {
            tracing::info!("Using in-process document store");
            Arc::new(MemoryStore::new())
        }
        StoreBackend::Remote => {
            tracing::info!("Using document store at {}", config.store.base_url);
            let remote = RemoteStoreConfig::new(&config.store.base_url, &config.store.realtime_url)
                .with_api_key(config.store.api_key.clone());
            Arc::new(RemoteStore::new(remote)?)
        }
    };

    Ok(Collaborators {
        store,
        engines: broadcast_engines(),
        addresses: Arc::new(RouteProbe::new(config.network.probe_address.parse()?)),
        indicator: Arc::new(TerminalIndicator),
    })
}

/// The binary links no native media stack, so sessions broadcast nothing.
fn broadcast_engines() -> Arc<dyn EngineFactory> {
    tracing::warn!("Using the headless broadcast engine: no camera or microphone media will be sent");
    Arc::new(headless_factory(EngineProbe::new()))
}

/// Starts a session and blocks until a signal or an IPC stop ends it.
async fn run_session(
    agent: &Agent,
    user_id: &str,
    display_name: Option<&str>,
    show_qr: bool,
) -> anyhow::Result<()> {
    let mut events = agent.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                AgentEvent::StateChanged(state) => {
                    tracing::info!("Agent state: {}", state);
                }
                AgentEvent::SessionStarted(info) => {
                    tracing::info!("Session {} started", info.session_id);
                }
                AgentEvent::SubsystemFailed {
                    subsystem,
                    kind,
                    message,
                } => {
                    tracing::warn!("{} failed ({:?}): {}", subsystem, kind, message);
                }
                AgentEvent::SessionEnded { session_id } => {
                    tracing::info!("Session {} ended", session_id);
                }
            }
        }
    });

    let info = match agent.start(user_id, display_name).await? {
        StartOutcome::Started(info) => info,
        StartOutcome::AlreadyActive { state, .. } => {
            anyhow::bail!("Session already active ({})", state);
        }
    };
    print_session(&info);

    if show_qr {
        if let Some(link) = &info.share_url {
            match generate_terminal_qr(link) {
                Ok(qr) => print!("{}", qr),
                Err(e) => tracing::warn!("Failed to render QR code: {}", e),
            }
        }
    }

    let shutdown = CancellationToken::new();
    let socket_path = get_socket_path();
    match IpcServer::bind(&socket_path).await {
        Ok(server) => {
            tokio::spawn(server.serve(agent.clone(), shutdown.clone()));
        }
        Err(e) => tracing::warn!("IPC unavailable at {}: {}", socket_path.display(), e),
    }

    tokio::select! {
        result = wait_for_shutdown_signal() => {
            result?;
            tracing::info!("Received shutdown signal");
        }
        _ = shutdown.cancelled() => {
            tracing::info!("Shutdown requested over IPC");
        }
    }

    let outcome = agent.stop();
    tracing::debug!(?outcome, "Stopping session");

    let mut state = agent.watch_state();
    let settled = tokio::time::timeout(
        Duration::from_secs(10),
        state.wait_for(|s| matches!(s, SessionState::Stopped | SessionState::Failed)),
    )
    .await;
    if settled.is_err() {
        tracing::warn!("Teardown did not finish in time");
    }

    shutdown.cancel();
    Ok(())
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
async fn wait_for_shutdown_signal() -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM");
        }
        _ = sigint.recv() => {
            tracing::info!("Received SIGINT");
        }
    }
    Ok(())
}

async fn is_agent_running() -> bool {
    match IpcClient::connect_with_timeout(&get_socket_path(), Duration::from_millis(500)).await {
        Ok(mut client) => client.ping().await.unwrap_or(false),
        Err(_) => false,
    }
}

async fn connect() -> anyhow::Result<IpcClient> {
    IpcClient::connect_with_timeout(&get_socket_path(), Duration::from_secs(5))
        .await
        .map_err(|_| anyhow::anyhow!("Agent is not running (cannot connect to socket)"))
}

async fn query_status() -> anyhow::Result<AgentStatus> {
    Ok(connect().await?.status().await?)
}

/// Stop the agent over IPC and wait for it to exit.
async fn graceful_stop_agent(timeout_secs: u64) -> anyhow::Result<()> {
    let socket_path = get_socket_path();
    let mut client = connect().await?;

    println!("Sending stop request...");
    client.set_timeout(Duration::from_secs(timeout_secs));
    client.stop().await?;
    println!("Stop acknowledged, waiting for agent to exit...");

    let start = std::time::Instant::now();
    let timeout = Duration::from_secs(timeout_secs);

    while start.elapsed() < timeout {
        if !socket_path.exists() {
            return Ok(());
        }
        if IpcClient::connect_with_timeout(&socket_path, Duration::from_millis(100))
            .await
            .is_err()
        {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }

    Err(anyhow::anyhow!(
        "Timeout waiting for agent to exit ({}s)",
        timeout_secs
    ))
}

fn print_session(info: &SessionInfo) {
    println!("Session {} ({})", info.session_id, info.state);
    println!("  User:     {} ({})", info.user_id, info.display_name);
    println!("  Address:  {}", info.local_address);
    println!(
        "  Files:    {}",
        info.server_url.as_deref().unwrap_or("unavailable")
    );
    if let Some(link) = &info.share_url {
        println!("  Share:    {}", link);
    }
    if !info.degraded.is_empty() {
        let names: Vec<String> = info.degraded.iter().map(|s| s.to_string()).collect();
        println!("  Degraded: {}", names.join(", "));
    }
}

fn print_status(status: &AgentStatus) {
    println!("Agent Status: {}", status.state);
    println!("  Uptime:   {}", format_duration(status.uptime_secs));
    if let Some(info) = &status.session {
        print_session(info);
    }
}

/// Format a duration in seconds to human-readable format.
fn format_duration(secs: u64) -> String {
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}
