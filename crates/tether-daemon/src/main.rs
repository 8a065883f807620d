//! Tether Daemon - Main entry point
//!
//! Runs the presence reconciliation engine and serves the REST API.

mod api;
mod auth;
mod config;
mod server;
mod state;
mod ws;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "tetherd")]
#[command(about = "Bluetooth presence tracking daemon")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "tether.toml")]
    config: PathBuf,

    /// Bind address for the API server
    #[arg(short, long)]
    bind: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Run a single reconciliation cycle and exit
    #[arg(long)]
    cycle_once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Tether v{}", env!("CARGO_PKG_VERSION"));

    let mut config = config::load_config(&args.config)?;
    if let Some(bind) = args.bind {
        config.daemon.bind = bind;
    }

    info!(
        poll_interval = config.engine.poll_interval_secs,
        grace_period = config.engine.grace_period_secs,
        registry = %config.registry.path,
        "Configuration loaded"
    );

    let state = state::AppState::new(config.clone())?;

    if args.cycle_once {
        info!("Running single reconciliation cycle");
        let summary = state.reconciler.cycle_once().await?;
        println!(
            "Cycle complete: {} probed, {} failed, {} changed, {} pending registered",
            summary.probed, summary.failed, summary.changed, summary.pending_created
        );
        for device in state.registry.list_devices().await {
            println!(
                "  - {} ({}) {}{}",
                device.display_name(),
                device.address,
                device.status,
                if device.pending_registration {
                    " [pending]"
                } else {
                    ""
                }
            );
        }
    } else {
        server::run(state, &config.daemon.bind).await?;
    }

    Ok(())
}
