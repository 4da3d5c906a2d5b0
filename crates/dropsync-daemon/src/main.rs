//! Dropsync Daemon - Main entry point
//!
//! Long-running process that keeps a DMF chip layout synchronized
//! across processes over an MQTT broker.

mod bus;
mod config;
mod reactor;
mod topics;

use anyhow::{bail, Result};
use clap::Parser;
use dropsync_core::SvgDeviceParser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "dropsync")]
#[command(about = "DMF chip layout synchronization daemon")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "dropsync.toml")]
    config: PathBuf,

    /// MQTT broker host override
    #[arg(long)]
    host: Option<String>,

    /// MQTT broker port override
    #[arg(long)]
    port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
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

    info!("Dropsync v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let mut config = config::load_config(&args.config)?;
    if let Some(host) = args.host {
        config.broker.host = host;
    }
    if let Some(port) = args.port {
        config.broker.port = port;
    }

    let client_id = config.broker.effective_client_id();
    let broker_addr = format!("{}:{}", config.broker.host, config.broker.port);
    info!(
        broker = %broker_addr,
        client_id = %client_id,
        namespace = %config.sync.namespace,
        "Configuration loaded"
    );

    // One channel carries every event the reactor acts on: bus
    // traffic, connect/disconnect transitions, and the interrupt
    // signal
    let (event_tx, event_rx) = mpsc::channel(64);
    let session = bus::open_session(&config.broker, &client_id, event_tx.clone());

    let interrupt_tx = event_tx;
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received");
            let _ = interrupt_tx.send(bus::BusEvent::Shutdown).await;
        }
    });

    let mut reactor =
        reactor::SyncReactor::new(&config, Arc::new(SvgDeviceParser), Arc::new(session));

    match reactor.run(event_rx).await {
        reactor::Exit::Shutdown => {
            info!("clean shutdown");
            Ok(())
        }
        reactor::Exit::ConnectExhausted => bail!(
            "could not connect to broker {}:{} after {} attempts",
            config.broker.host,
            config.broker.port,
            config.broker.max_connect_attempts
        ),
    }
}
