//! Parley - LAN rendezvous and signaling daemon
//!
//! # Usage
//!
//! ```bash
//! parley serve                  # relay on 8080, API on 8081, discovery on 8888
//! parley serve --no-discovery   # relay and API only
//! parley config                 # print a sample config file
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use parley_core::Config;
use parley_daemon::api::{self, ApiState};
use parley_discovery::{Beacon, Blocklist};
use parley_signal::SignalServer;

#[derive(Parser)]
#[command(name = "parley")]
#[command(about = "LAN rendezvous and signaling daemon", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the relay, the discovery beacon and the HTTP API
    Serve {
        /// Signaling port (also advertised to the LAN)
        #[arg(long, env = "PARLEY_SIGNAL_PORT")]
        signal_port: Option<u16>,

        /// Discovery API port
        #[arg(long, env = "PARLEY_API_PORT")]
        api_port: Option<u16>,

        /// UDP discovery port
        #[arg(long, env = "PARLEY_DISCOVERY_PORT")]
        discovery_port: Option<u16>,

        /// Blocklist file
        #[arg(long)]
        blocklist: Option<PathBuf>,

        /// Do not start the LAN discovery beacon
        #[arg(long)]
        no_discovery: bool,
    },

    /// Print a sample configuration file
    Config {
        /// Write the sample to the default config path instead of stdout
        #[arg(long)]
        write: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(level.into())
                .from_env_lossy(),
        )
        .init();

    let config = match &cli.config {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("loading config from {:?}", path))?,
        None => Config::load(),
    };

    match cli.command {
        Commands::Serve {
            signal_port,
            api_port,
            discovery_port,
            blocklist,
            no_discovery,
        } => {
            let mut config = config;
            if let Some(port) = signal_port {
                config.signal.port = port;
            }
            if let Some(port) = api_port {
                config.api.port = port;
            }
            if let Some(port) = discovery_port {
                config.discovery.port = port;
            }
            if blocklist.is_some() {
                config.discovery.blocklist_path = blocklist;
            }
            if no_discovery {
                config.discovery.enabled = false;
            }
            run_serve(config).await?;
        }
        Commands::Config { write } => {
            if write {
                let path = Config::default_path().context("no config directory available")?;
                Config::default().save_to(&path)?;
                println!("Wrote {}", path.display());
            } else {
                print!("{}", Config::sample());
            }
        }
    }

    Ok(())
}

async fn run_serve(config: Config) -> anyhow::Result<()> {
    let signal_addr = SocketAddr::new(config.signal.bind, config.signal.port);
    let api_addr = SocketAddr::new(config.api.bind, config.api.port);

    info!("Starting Parley...");
    info!("  Signaling:     ws://{}", signal_addr);
    info!("  Discovery API: http://{}/api/discovery", api_addr);

    let blocklist = Arc::new(Blocklist::load(config.discovery.blocklist_file()));

    let beacon = if config.discovery.enabled {
        match Beacon::start(&config.discovery, config.signal.port, blocklist.clone()).await {
            Ok(beacon) => Some(beacon),
            Err(e) => {
                warn!("LAN discovery unavailable: {}", e);
                None
            }
        }
    } else {
        info!("LAN discovery disabled");
        None
    };

    let server = SignalServer::new();
    let state = ApiState {
        beacon: beacon.clone(),
        blocklist,
    };

    // Handle Ctrl+C
    tokio::select! {
        result = server.serve(signal_addr) => {
            if let Err(e) = result {
                error!("Signal server error: {}", e);
            }
        }
        result = api::serve(state, api_addr) => {
            if let Err(e) = result {
                error!("Discovery API error: {:#}", e);
            }
        }
        _ = signal::ctrl_c() => {
            info!("Shutting down...");
        }
    }

    if let Some(beacon) = beacon {
        beacon.shutdown();
    }

    Ok(())
}
