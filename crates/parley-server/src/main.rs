//! Parley relay server binary.
//!
//! # Usage
//!
//! ```bash
//! # In-memory storage, self-signed certificate (development)
//! parley-server --bind 127.0.0.1:4433
//!
//! # Durable storage and a real certificate
//! parley-server --bind 0.0.0.0:4433 --cert cert.pem --key key.pem --db parley.redb
//! ```

use std::{path::PathBuf, time::Duration};

use clap::Parser;
use parley_server::{
    Directory, MemoryStorage, RedbStorage, RelayConfig, Server, ServerRuntimeConfig, Storage,
};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Parley end-to-end encrypted message relay
#[derive(Parser, Debug)]
#[command(name = "parley-server")]
#[command(about = "Parley end-to-end encrypted message relay")]
#[command(version)]
struct Args {
    /// Address to bind to
    #[arg(short, long, default_value = "0.0.0.0:4433")]
    bind: String,

    /// Path to TLS certificate (PEM format)
    #[arg(short, long)]
    cert: Option<PathBuf>,

    /// Path to TLS private key (PEM format)
    #[arg(short, long)]
    key: Option<PathBuf>,

    /// Redb database file (in-memory storage when omitted)
    #[arg(long)]
    db: Option<PathBuf>,

    /// Deadline for each storage call, in milliseconds
    #[arg(long, default_value = "5000")]
    storage_timeout_ms: u64,

    /// Maximum concurrent connections
    #[arg(long, default_value = "10000")]
    max_connections: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    tracing::info!(bind = %args.bind, "parley server starting");

    if args.cert.is_none() || args.key.is_none() {
        tracing::warn!("no TLS certificate provided, using self-signed certificate");
    }

    let config = ServerRuntimeConfig {
        bind_address: args.bind,
        cert_path: args.cert,
        key_path: args.key,
        database_path: args.db,
        relay: RelayConfig { storage_timeout: Duration::from_millis(args.storage_timeout_ms) },
        max_connections: args.max_connections,
        ..Default::default()
    };

    match config.database_path.clone() {
        Some(path) => {
            tracing::info!(path = %path.display(), "using redb storage");
            let storage = RedbStorage::open(&path)?;
            serve(config, storage).await
        },
        None => {
            tracing::warn!("no database configured, messages are lost on restart");
            serve(config, MemoryStorage::new()).await
        },
    }
}

async fn serve<S: Storage + Directory>(
    config: ServerRuntimeConfig,
    storage: S,
) -> Result<(), Box<dyn std::error::Error>> {
    let server = Server::bind(config, storage)?;
    tracing::info!(addr = %server.local_addr()?, "server listening");
    server.run().await?;
    Ok(())
}
