//! screensaverd - session screen-lock and screensaver activation daemon.
//!
//! Owns the `org.screensaverd.ScreenSaver` name on the session bus, watches
//! logind and X11 idle time, and grabs input while the screen is locked.

use anyhow::{Context, Result};
use clap::Parser;
use screensaverd::config::Config;
use screensaverd::coordinator::Coordinator;
use screensaverd::grab::X11Grab;
use screensaverd::listener::dbus::DbusSession;
use screensaverd::listener::logind;
use screensaverd::listener::x11::X11Idle;
use screensaverd::prefs::PreferencesLoader;
use screensaverd::presenter::CommandPresenter;
use std::path::PathBuf;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Capacity of the coordinator's event queue.
const EVENT_QUEUE: usize = 64;

/// Screen-lock and screensaver activation daemon.
///
/// Locks the session on request, on idle, and before suspend.
#[derive(Parser, Debug)]
#[command(name = "screensaverd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to config file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable dry-run mode (don't grab input or run the unlock prompt).
    #[arg(long)]
    dry_run: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Print the effective configuration as TOML and exit.
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level)?;

    let mut config =
        Config::load_or_default(args.config.as_deref()).context("Failed to load configuration")?;

    if args.dry_run {
        config.dry_run = true;
    }

    if args.print_config {
        let rendered =
            toml::to_string_pretty(&config).context("Failed to serialize configuration")?;
        print!("{rendered}");
        return Ok(());
    }

    info!("screensaverd v{} starting", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded (dry_run={})", config.dry_run);

    run_daemon(config, args.config).await
}

/// Initialize logging with the specified level.
fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(format!("screensaverd={level}"))
        .or_else(|_| EnvFilter::try_new("info"))
        .context("Invalid log level")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .init();

    Ok(())
}

/// Wire everything up and run until quit or a termination signal.
async fn run_daemon(config: Config, config_path: Option<PathBuf>) -> Result<()> {
    let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE);

    let loader = PreferencesLoader::new(config.clone(), config_path);
    let prefs = loader.subscribe();
    loader
        .spawn_reload_on_hangup()
        .context("Failed to install SIGHUP handler")?;

    let grab = X11Grab::connect(config.dry_run)
        .context("Failed to connect to the X display for input grabs")?;
    let presenter = CommandPresenter::from_config(&config, events_tx.clone());
    let bus = DbusSession::new(events_tx.clone());
    let display = X11Idle::new(events_tx.clone(), config.idle_check_interval());

    let shutdown = CancellationToken::new();
    let mut coordinator = Coordinator::new(
        prefs,
        Box::new(bus),
        Box::new(display),
        Box::new(grab),
        Box::new(presenter),
        shutdown.clone(),
    );

    coordinator
        .start()
        .await
        .context("Failed to start screensaver")?;

    logind::spawn_watch(events_tx, config.idle_check_interval());
    spawn_shutdown_on_signal(shutdown).context("Failed to install termination handler")?;

    coordinator.run(events_rx).await;

    info!("screensaverd stopped");
    Ok(())
}

/// Cancel `shutdown` on SIGTERM or SIGINT.
fn spawn_shutdown_on_signal(shutdown: CancellationToken) -> Result<()> {
    let mut terminate = signal(SignalKind::terminate())?;
    let mut interrupt = signal(SignalKind::interrupt())?;

    tokio::spawn(async move {
        tokio::select! {
            _ = terminate.recv() => info!("SIGTERM received"),
            _ = interrupt.recv() => info!("SIGINT received"),
        }
        shutdown.cancel();
    });

    Ok(())
}
