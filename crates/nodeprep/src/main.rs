//! nodeprep - node bootstrap reconciler
//!
//! `nodeprep init` installs host configuration and restarts what changed.
//! Without a recognized subcommand it idles so the container stays ready.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use nodeprep::{orchestrator, sentinel, Config, NsenterRunner, Orchestrator};

#[derive(Parser)]
#[command(name = "nodeprep")]
#[command(about = "Install node configuration and restart affected services", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (defaults to /etc/nodeprep/config.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconcile host configuration, then exit
    Init,

    /// Show which files and services would change, without touching the host
    Check,

    #[command(external_subcommand)]
    Other(Vec<String>),
}

fn init_logging(level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .with_target(false)
        .init();
}

fn init(config_path: Option<&PathBuf>) -> Result<()> {
    let config = Config::load(config_path.map(PathBuf::as_path))
        .context("Failed to load configuration")?;
    let runner = NsenterRunner::new(config.host.nsenter.clone());
    let report = Orchestrator::new(&config, &runner).run()?;
    if report.is_noop() {
        info!("Host already configured, nothing to do");
    }
    Ok(())
}

fn check(config_path: Option<&PathBuf>) -> Result<()> {
    let config = Config::load(config_path.map(PathBuf::as_path))
        .context("Failed to load configuration")?;
    let report = orchestrator::preview(&config)?;
    for sub in &report.subsystems {
        for unit in sub.changes.changed_units() {
            info!("{}: {} would be updated", sub.subsystem, unit);
        }
        for action in &sub.actions {
            info!("{}: would {}", sub.subsystem, action);
        }
    }
    if report.is_noop() {
        info!("Host already configured");
    }
    Ok(())
}

fn exit_with(result: Result<()>) -> ExitCode {
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(1)
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli.log_level);
    debug!("nodeprep v{} starting", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Some(Commands::Init) => exit_with(init(cli.config.as_ref())),
        Some(Commands::Check) => exit_with(check(cli.config.as_ref())),
        Some(Commands::Other(args)) => {
            debug!("Ignoring unrecognized command {:?}", args);
            sentinel::idle()
        }
        None => sentinel::idle(),
    }
}
