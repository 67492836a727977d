#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use overlay_core::device::TunDevice;
use overlay_core::socket::UdpTransport;
use overlay_core::{load_from_path, ArcSwapMappingStore};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Overlay network tunnel data plane")]
struct Cli {
    /// Path to configuration TOML file
    #[arg(short, long, value_name = "FILE", default_value = "overlayd.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();
    let config = match load_from_path(&cli.config) {
        Ok(config) => config,
        Err(err) => {
            error!(%err, "failed to load configuration");
            std::process::exit(1);
        }
    };

    let queue_count = config.queue_count();
    info!(listen = %config.listen, overlay_ip = %config.overlay_ip, queues = queue_count, peers = config.peers.len(), "configuration loaded");

    let mappings = match config.mappings() {
        Ok(mappings) => mappings,
        Err(err) => {
            error!(%err, "invalid peer table");
            std::process::exit(1);
        }
    };
    let store = Arc::new(ArcSwapMappingStore::new(mappings));

    let device = match TunDevice::open(&config.device_name, config.overlay_ip, queue_count) {
        Ok(device) => Arc::new(device),
        Err(err) => {
            error!(%err, "failed to open virtual device");
            std::process::exit(1);
        }
    };
    let socket = match UdpTransport::bind(config.listen, queue_count) {
        Ok(socket) => Arc::new(socket),
        Err(err) => {
            error!(%err, "failed to bind transport socket");
            std::process::exit(1);
        }
    };

    let metrics = match overlay_core::init_metrics() {
        Ok((metrics, _registry)) => Some(metrics),
        Err(err) => {
            error!(%err, "failed to initialize metrics, continuing without them");
            None
        }
    };

    let handle = overlay_core::run_with_metrics(device, socket, store, config.overlay_ip.octets(), metrics);

    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(%err, "failed to install signal handler");
    }
    info!("shutdown signal received, draining in-flight packets");
    handle.shutdown();
    handle.join().await;
    info!("shutdown complete");
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).with_target(false).init();
}
