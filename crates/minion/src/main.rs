//! Minion - edge agent for a monitoring location
//!
//! # Usage
//!
//! ```bash
//! # Streaming transport, identity from flags
//! minion --id minion01 --location Apex --broker-url server:8990
//!
//! # Config file plus listener flags
//! minion --config /etc/minion.yaml -L Graphite,12003,ForwardParser
//! ```
//!
//! Every flag has a `MINION_*` environment fallback; flag and environment
//! values override the config file, which overrides built-in defaults.

mod bootstrap;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use minion_broker::{create_broker, serve_stats};

/// Edge agent brokering telemetry and RPC for a monitoring location
#[derive(Parser, Debug)]
#[command(name = "minion", version, about, long_about = None)]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long, env = "MINION_CONFIG")]
    config: Option<PathBuf>,

    /// Agent id (SystemId)
    #[arg(short, long, env = "MINION_ID")]
    id: Option<String>,

    /// Agent location
    #[arg(short, long, env = "MINION_LOCATION")]
    location: Option<String>,

    /// Broker endpoint, host:port
    #[arg(short = 'b', long, env = "MINION_BROKER_URL")]
    broker_url: Option<String>,

    /// Broker transport: streaming or pubsub
    #[arg(long, env = "MINION_BROKER_TYPE")]
    broker_type: Option<String>,

    /// SNMP trap port
    #[arg(short = 't', long, env = "MINION_TRAP_PORT")]
    trap_port: Option<u16>,

    /// Syslog port
    #[arg(short = 's', long, env = "MINION_SYSLOG_PORT")]
    syslog_port: Option<u16>,

    /// Stats endpoint port
    #[arg(long, env = "MINION_STATS_PORT")]
    stats_port: Option<u16>,

    /// Flow/telemetry listeners, e.g. -L Graphite,2003,ForwardParser
    #[arg(short = 'L', long = "listener")]
    listeners: Vec<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'x', long, env = "MINION_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level)?;

    let config = bootstrap::load_config(
        cli.config.as_deref(),
        bootstrap::Overrides {
            id: cli.id,
            location: cli.location,
            broker_url: cli.broker_url,
            broker_type: cli.broker_type,
            trap_port: cli.trap_port,
            syslog_port: cli.syslog_port,
            stats_port: cli.stats_port,
            listeners: cli.listeners,
        },
    )
    .context("invalid configuration")?;

    let registry = bootstrap::build_registry().context("module registration failed")?;
    registry.log_modules();

    tracing::info!("starting minion agent\n{config}");
    let config = Arc::new(config);
    let broker = create_broker(Arc::clone(&config), Arc::new(registry))
        .context("cannot initialize broker")?;
    broker
        .start()
        .await
        .context("cannot connect to the broker")?;

    let shutdown = CancellationToken::new();
    if let Some(port) = config.stats_port {
        let metrics = broker.metrics();
        let token = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = serve_stats(port, metrics, token).await {
                tracing::error!(error = %e, "stats endpoint failed");
            }
        });
    }
    if let Some(agent) = &config.trace_agent {
        tracing::info!(trace_agent = %agent, "trace agent configured");
    }

    tokio::signal::ctrl_c()
        .await
        .context("cannot listen for interrupt")?;
    tracing::info!("interrupt received, shutting down");
    shutdown.cancel();
    broker.stop().await;
    Ok(())
}

/// Initialize the tracing subscriber for logging
fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(level)
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|e| anyhow::anyhow!("invalid log level: {e}"))?;
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .init();
    Ok(())
}
