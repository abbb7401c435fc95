//! Tezos connector (v1)
//!
//! Bridges a transaction-manager host to a Tezos node.
//!
//! # Architecture Overview
//!
//! ```text
//!     Host request
//!     ──────────────▶ http server ──▶ TezosConnector
//!                                         │
//!                    ┌────────────────────┼─────────────────────┐
//!                    ▼                    ▼                     ▼
//!              transactions         events registry          caches
//!              (forge, sign,        (one listener task       (blocks,
//!               broadcast)           per stream)              receipts)
//!                    │                    │                     │
//!                    ▼                    ▼                     │
//!              remote signer        node RPC client ◀──────────┘
//!                                   (failover, retry)
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tokio::net::TcpListener;

use tezos_connector::config::{load_config, ConnectorConfig};
use tezos_connector::lifecycle::signals::wait_for_signal;
use tezos_connector::observability::{logging, metrics};
use tezos_connector::{HttpServer, TezosConnector};

#[derive(Parser)]
#[command(name = "tezos-connector")]
#[command(about = "Tezos blockchain connector for transaction managers", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the connector server
    Run {
        /// Path to a TOML config file; defaults apply when omitted
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Print version information
    Version {
        /// Only print the version number
        #[arg(long)]
        short: bool,

        #[arg(short, long, value_enum, default_value_t = OutputFormat::Json)]
        output: OutputFormat,
    },
    /// Print the default configuration
    Docs,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Json,
    Toml,
}

#[derive(Serialize)]
struct VersionInfo {
    name: &'static str,
    version: &'static str,
    license: &'static str,
}

const VERSION_INFO: VersionInfo = VersionInfo {
    name: env!("CARGO_PKG_NAME"),
    version: env!("CARGO_PKG_VERSION"),
    license: env!("CARGO_PKG_LICENSE"),
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config } => run(config).await?,
        Commands::Version { short, output } => {
            if short {
                println!("{}", VERSION_INFO.version);
            } else {
                match output {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&VERSION_INFO)?)
                    }
                    OutputFormat::Toml => print!("{}", toml::to_string(&VERSION_INFO)?),
                }
            }
        }
        Commands::Docs => print!("{}", toml::to_string_pretty(&ConnectorConfig::default())?),
    }
    Ok(())
}

async fn run(path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let config = match &path {
        Some(path) => load_config(path)?,
        None => ConnectorConfig::default(),
    };

    logging::init_logging(&config.observability);
    tracing::info!(version = VERSION_INFO.version, "tezos-connector starting");
    tracing::info!(
        config_file = ?path,
        rpc_url = %config.connector.rpc_url,
        failover_urls = config.connector.failover_urls.len(),
        bind_address = %config.server.bind_address,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = TcpListener::bind(&config.server.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let server_config = config.server.clone();
    let connector = Arc::new(TezosConnector::new(config)?);
    let shutdown = connector.shutdown_handle();
    tokio::spawn(wait_for_signal(shutdown.clone()));

    let server = HttpServer::new(connector.clone(), &server_config);
    server.run(listener, shutdown).await?;

    connector.shutdown().await;
    tracing::info!("Shutdown complete");
    Ok(())
}
