//! lansync: serverless directory sync for machines on the same LAN.
//!
//! Every node runs the same daemon: watch a directory, find peers by UDP
//! broadcast, and push local changes to them over HTTP. No hub, no cloud,
//! no state outside the synced tree itself.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use lansync_daemon::daemon::{self, DaemonConfig, DEFAULT_PASSCODE, DEFAULT_PORT};
use lansync_daemon::discovery::DEFAULT_DISCOVERY_PORT;

#[derive(Parser, Debug)]
#[command(name = "lansync")]
#[command(about = "Serverless LAN directory sync daemon")]
struct Args {
    /// Directory to synchronize
    #[arg(short, long, default_value = ".")]
    directory: PathBuf,

    /// Address to bind the sync endpoint to
    #[arg(long, default_value = "0.0.0.0", env = "LANSYNC_BIND")]
    bind: IpAddr,

    /// Port for the sync endpoint (peers are probed on the same port)
    #[arg(short, long, default_value_t = DEFAULT_PORT, env = "LANSYNC_PORT")]
    port: u16,

    /// Shared passcode; only nodes with the same passcode sync with each other
    #[arg(long, default_value = DEFAULT_PASSCODE, env = "LANSYNC_PASSCODE")]
    passcode: String,

    /// Static peer address (repeatable). Disables UDP discovery.
    #[arg(long = "peer")]
    peers: Vec<SocketAddr>,

    /// UDP port used for peer discovery broadcasts
    #[arg(long, default_value_t = DEFAULT_DISCOVERY_PORT, env = "LANSYNC_DISCOVERY_PORT")]
    discovery_port: u16,

    /// Seconds between discovery rounds (1-10)
    #[arg(long, default_value_t = 2, value_parser = clap::value_parser!(u64).range(1..=10))]
    discovery_window: u64,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging - respects RUST_LOG env var, defaults to info (or debug with --verbose)
    let default_filter = if args.verbose {
        "debug,lansync_daemon=debug"
    } else {
        "info,lansync_daemon=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    anyhow::ensure!(
        args.directory.is_dir(),
        "not a directory: {}",
        args.directory.display()
    );

    info!("Starting lansync");
    info!("Sync root: {:?}", args.directory);
    info!("Endpoint: {}:{}", args.bind, args.port);

    let mut config = DaemonConfig::new(args.directory);
    config.bind = args.bind;
    config.port = args.port;
    config.passcode = args.passcode;
    config.peers = args.peers;
    config.discovery.discovery_port = args.discovery_port;
    config.discovery.broadcast_target = SocketAddr::new(
        IpAddr::V4(Ipv4Addr::BROADCAST),
        args.discovery_port,
    );
    config.discovery.window = Duration::from_secs(args.discovery_window);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    daemon::run(config, shutdown_rx).await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
