//! Hayloft service binary.
//!
//! One executable, three services:
//!
//! ```text
//! hayloft store <listen> <hay-dir>
//! hayloft directory <listen> <mongo-uri> <store-addr>
//! hayloft cache <listen> <redis-url> <store-addr>
//! ```
//!
//! Each service binds its listener and accepts forever; the process only
//! exits with a non-zero status on argument errors or startup failure.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use hayloft::{
    CacheService, Directory, MongoCatalog, RedisCache, Store, StoreClient, StoreConfig,
    StoreService, VOLUME_COUNT, metrics,
};

/// Haystack-style packed blob storage services.
#[derive(Parser, Debug)]
#[command(name = "hayloft", version, about)]
struct Cli {
    /// Address to expose Prometheus metrics on (optional).
    #[arg(long, global = true)]
    metrics_listen: Option<SocketAddr>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the store service over a directory of haystack volumes.
    Store {
        /// Address to listen on, e.g. 0.0.0.0:5000.
        listen: SocketAddr,
        /// Directory holding (or receiving) the haystack_<id> volume files.
        hay_dir: PathBuf,
    },
    /// Run the directory facade (id allocation, placement, needle catalog).
    Directory {
        /// Address to listen on.
        listen: SocketAddr,
        /// MongoDB URI for the needle catalog, e.g. mongodb://localhost:27017.
        mongo_uri: String,
        /// Address of the store service, e.g. 127.0.0.1:5000.
        store_addr: String,
    },
    /// Run the cache facade over an external KV cache.
    Cache {
        /// Address to listen on.
        listen: SocketAddr,
        /// Redis URL for the KV cache, e.g. redis://localhost:6379.
        redis_url: String,
        /// Address of the store service.
        store_addr: String,
    },
}

/// Initialize the global `tracing` subscriber with an `EnvFilter`.
///
/// Reads `RUST_LOG` for level filtering, defaulting to `info`. `try_init` so
/// that repeated calls in one process are a silent no-op.
fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Bind the service listener or exit non-zero.
async fn bind_or_exit(addr: SocketAddr) -> tokio::net::TcpListener {
    match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(%addr, error = %e, "failed to bind listener");
            std::process::exit(1);
        }
    }
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();

    if let Some(addr) = cli.metrics_listen {
        match metrics::install_recorder() {
            Ok(handle) => {
                metrics::serve_metrics(handle, addr);
            }
            Err(e) => tracing::warn!(error = %e, "metrics recorder not installed"),
        }
    }

    match cli.command {
        Command::Store { listen, hay_dir } => run_store(listen, hay_dir).await,
        Command::Directory {
            listen,
            mongo_uri,
            store_addr,
        } => run_directory(listen, mongo_uri, store_addr).await,
        Command::Cache {
            listen,
            redis_url,
            store_addr,
        } => run_cache(listen, redis_url, store_addr).await,
    }
}

async fn run_store(listen: SocketAddr, hay_dir: PathBuf) {
    tracing::info!(hay_dir = %hay_dir.display(), "opening store");
    let store = match Store::open(StoreConfig::new(hay_dir)) {
        Ok(store) => store,
        Err(e) => {
            tracing::error!(error = %e, "failed to open store");
            std::process::exit(1);
        }
    };
    tracing::info!(needles = store.needle_count(), "index rebuilt");

    let listener = bind_or_exit(listen).await;
    tracing::info!(addr = %listen, "store listening");
    StoreService::new(Arc::new(store)).serve(listener).await;
}

async fn run_directory(listen: SocketAddr, mongo_uri: String, store_addr: String) {
    let catalog = match MongoCatalog::connect(&mongo_uri).await {
        Ok(catalog) => catalog,
        Err(e) => {
            tracing::error!(error = %e, "failed to connect to the needle catalog");
            std::process::exit(1);
        }
    };

    let directory = Directory::new(
        Arc::new(catalog),
        StoreClient::new(store_addr),
        VOLUME_COUNT,
    )
    .await;

    let listener = bind_or_exit(listen).await;
    tracing::info!(addr = %listen, "directory listening");
    Arc::new(directory).serve(listener).await;
}

async fn run_cache(listen: SocketAddr, redis_url: String, store_addr: String) {
    let cache = match RedisCache::open(&redis_url) {
        Ok(cache) => cache,
        Err(e) => {
            tracing::error!(error = %e, "failed to configure the KV cache client");
            std::process::exit(1);
        }
    };

    let service = CacheService::new(Arc::new(cache), StoreClient::new(store_addr));

    let listener = bind_or_exit(listen).await;
    tracing::info!(addr = %listen, "cache listening");
    Arc::new(service).serve(listener).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_store_command() {
        let cli = Cli::try_parse_from(["hayloft", "store", "0.0.0.0:5000", "/var/hay"])
            .expect("valid store args");
        match cli.command {
            Command::Store { listen, hay_dir } => {
                assert_eq!(listen, "0.0.0.0:5000".parse().unwrap());
                assert_eq!(hay_dir, PathBuf::from("/var/hay"));
            }
            other => panic!("expected store command, got {other:?}"),
        }
    }

    #[test]
    fn cli_parses_directory_command_with_metrics() {
        let cli = Cli::try_parse_from([
            "hayloft",
            "directory",
            "--metrics-listen",
            "127.0.0.1:9100",
            "0.0.0.0:6000",
            "mongodb://localhost:27017",
            "127.0.0.1:5000",
        ])
        .expect("valid directory args");
        assert_eq!(cli.metrics_listen, Some("127.0.0.1:9100".parse().unwrap()));
        assert!(matches!(cli.command, Command::Directory { .. }));
    }

    #[test]
    fn cli_rejects_missing_arguments() {
        assert!(Cli::try_parse_from(["hayloft", "cache", "0.0.0.0:7000"]).is_err());
        assert!(Cli::try_parse_from(["hayloft"]).is_err());
        assert!(Cli::try_parse_from(["hayloft", "store", "not-an-addr", "/hay"]).is_err());
    }
}
