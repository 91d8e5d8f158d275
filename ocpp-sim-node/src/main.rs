//! OCPP Sim Node - CLI for the charge point simulator
//!
//! Runs one simulated OCPP 1.6J charge point until Ctrl-C.
//!
//! # Usage
//!
//! ```bash
//! # Start with defaults
//! ocpp-sim-node --charge-point-id CP001
//!
//! # Connect to a specific central system
//! ocpp-sim-node --charge-point-id CP001 \
//!     --server-url ws://localhost:8180/steve/websocket/CentralSystemService
//!
//! # Two connectors, fast heartbeat, verbose frames
//! ocpp-sim-node --charge-point-id CP001 --connectors 2 \
//!     --heartbeat-interval 10 --log-level debug
//! ```

use std::time::Duration;

use clap::Parser;
use ocpp_sim_engine::{Engine, EngineConfig};
use tokio::sync::watch;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

/// Simulated OCPP 1.6J charge point
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Central system WebSocket URL (charge point id is appended)
    #[arg(long, default_value = "ws://localhost:8180/steve/websocket/CentralSystemService")]
    server_url: String,

    /// Charge point identity
    #[arg(short, long, default_value = "EK3-001")]
    charge_point_id: String,

    /// Vendor name
    #[arg(long, default_value = "Elektrokombinacija")]
    vendor: String,

    /// Model name
    #[arg(long, default_value = "EK3-OCPP")]
    model: String,

    /// Serial number
    #[arg(long)]
    serial: Option<String>,

    /// Firmware version
    #[arg(long, default_value = "0.1.0")]
    firmware: String,

    /// Number of connectors
    #[arg(long, default_value = "1")]
    connectors: u32,

    /// Heartbeat interval in seconds until the central system sets one
    #[arg(long, default_value = "60")]
    heartbeat_interval: u64,

    /// Default id tag for local transactions
    #[arg(long, default_value = "SIM-TAG-001")]
    id_tag: String,

    /// Seconds to wait for an Authorize reply
    #[arg(long, default_value = "60")]
    authorize_timeout: u64,

    /// Reconnect attempts before giving up
    #[arg(long, default_value = "10")]
    max_reconnect_attempts: u32,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Setup logging
    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut config = EngineConfig::new(&args.server_url, &args.charge_point_id)
        .with_vendor(&args.vendor, &args.model)
        .with_firmware(&args.firmware)
        .with_connector_count(args.connectors)
        .with_heartbeat_interval(args.heartbeat_interval)
        .with_id_tag(&args.id_tag)
        .with_authorize_timeout(Duration::from_secs(args.authorize_timeout))
        .with_max_reconnect_attempts(args.max_reconnect_attempts);

    if let Some(serial) = &args.serial {
        config = config.with_serial(serial);
    }

    // Print banner
    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║            OCPP Sim Node - Simulated Charge Point            ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║  Charge point: {:<46} ║", truncate(&args.charge_point_id, 46));
    println!("║  Endpoint:     {:<46} ║", truncate(&config.endpoint_url(), 46));
    println!("║  Model:        {:<46} ║", truncate(&format!("{} {}", args.vendor, args.model), 46));
    println!("║  Connectors:   {:<46} ║", args.connectors);
    println!("║  Heartbeat:    {:<46} ║", format!("{}s", args.heartbeat_interval));
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, shutting down...");
            let _ = shutdown_tx.send(true);
        }
    });

    info!("Starting charge point {}...", args.charge_point_id);

    let engine = Engine::new(config);
    if let Err(e) = engine.run(shutdown_rx).await {
        error!("Charge point stopped: {}", e);
        return Err(e.into());
    }

    Ok(())
}

/// Truncate string with ellipsis
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len - 3).collect();
        format!("{}...", head)
    }
}
