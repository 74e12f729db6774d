//! Parley Signal Server
//!
//! Signaling relay only, without LAN discovery.
//!
//! # Usage
//!
//! ```bash
//! parley-signal --port 8080
//! ```

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use parley_core::Config;
use parley_signal::SignalServer;

#[derive(Parser, Debug)]
#[command(name = "parley-signal")]
#[command(about = "Parley signaling relay for WebRTC handshakes")]
#[command(version)]
struct Args {
    /// Port to listen on (overrides the config file)
    #[arg(short, long, env = "PARLEY_SIGNAL_PORT")]
    port: Option<u16>,

    /// Bind address (overrides the config file)
    #[arg(short, long)]
    bind: Option<IpAddr>,

    /// Configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(Level::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load(),
    };

    let port = args.port.unwrap_or(config.signal.port);
    let bind = args.bind.unwrap_or(config.signal.bind);
    let addr = SocketAddr::new(bind, port);

    info!("Starting Parley Signal Server");
    info!("Listening on {}", addr);

    let server = SignalServer::new();
    server.serve(addr).await?;

    Ok(())
}
