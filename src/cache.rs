//! Cache facade: a read-through front end over an external KV cache.
//!
//! On `get`, the external cache is consulted first; a hit is served straight
//! from it. On a miss the blob is fetched from the store, sent to the client,
//! and only then written back into the cache -- the client never waits on the
//! backfill, and a failed backfill is logged rather than surfaced. `delete`
//! only evicts from the KV cache; it deliberately does not touch the store.
//!
//! Commands:
//!
//! ```text
//! get <needleId>\n     -> ok <size>\n<size bytes>
//! delete <needleId>\n  -> ok
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

use crate::client::StoreClient;
use crate::error::Error;
use crate::service::write_error_line;

/// Largest blob the cache will hold, in bytes (1 MiB).
///
/// A store blob larger than this is refused with `err TooBig` rather than
/// cached or served.
pub const MAX_CACHEABLE_SIZE: u64 = 1 << 20;

/// How long to wait for a connection to the external KV cache.
pub const KV_CONNECT_TIMEOUT: Duration = Duration::from_millis(1500);

/// The external KV cache, reduced to the three commands the facade needs.
///
/// The production implementation speaks to a Redis-compatible server; tests
/// swap in an in-memory map.
#[async_trait]
pub trait BlobCache: Send + Sync {
    /// Fetch the cached blob for `needle_id`, if any.
    async fn fetch(&self, needle_id: u64) -> Result<Option<Vec<u8>>, Error>;

    /// Cache `payload` under `needle_id`, replacing any previous value.
    async fn store(&self, needle_id: u64, payload: &[u8]) -> Result<(), Error>;

    /// Drop the cached blob for `needle_id`. Absent keys are not an error.
    async fn invalidate(&self, needle_id: u64) -> Result<(), Error>;
}

/// [`BlobCache`] backed by a Redis-compatible server.
pub struct RedisCache {
    client: redis::Client,
}

impl RedisCache {
    /// Bind a client for the KV cache at `url` (e.g. `redis://host:port`).
    ///
    /// No connection is made until a request needs one.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cache`] if the URL does not parse.
    pub fn open(url: &str) -> Result<Self, Error> {
        let client = redis::Client::open(url).map_err(|e| Error::Cache(e.to_string()))?;
        Ok(Self { client })
    }

    /// Connect with the facade's timeout.
    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, Error> {
        tokio::time::timeout(
            KV_CONNECT_TIMEOUT,
            self.client.get_multiplexed_async_connection(),
        )
        .await
        .map_err(|_| Error::Cache("connect timed out".into()))?
        .map_err(|e| Error::Cache(e.to_string()))
    }
}

#[async_trait]
impl BlobCache for RedisCache {
    async fn fetch(&self, needle_id: u64) -> Result<Option<Vec<u8>>, Error> {
        let mut connection = self.connection().await?;
        connection
            .get(needle_id)
            .await
            .map_err(|e| Error::Cache(e.to_string()))
    }

    async fn store(&self, needle_id: u64, payload: &[u8]) -> Result<(), Error> {
        let mut connection = self.connection().await?;
        connection
            .set(needle_id, payload)
            .await
            .map_err(|e| Error::Cache(e.to_string()))
    }

    async fn invalidate(&self, needle_id: u64) -> Result<(), Error> {
        let mut connection = self.connection().await?;
        connection
            .del(needle_id)
            .await
            .map_err(|e| Error::Cache(e.to_string()))
    }
}

/// The cache service.
pub struct CacheService {
    cache: Arc<dyn BlobCache>,
    store: StoreClient,
}

impl CacheService {
    /// Build the facade over a KV cache and the store behind it.
    pub fn new(cache: Arc<dyn BlobCache>, store: StoreClient) -> Self {
        Self { cache, store }
    }

    /// Accept connections forever, one task per connection.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let service = Arc::clone(&self);
                    tokio::spawn(async move {
                        tracing::debug!(%peer, "cache connection accepted");
                        service.handle_connection(stream).await;
                    });
                }
                Err(e) => {
                    tracing::error!(error = %e, "cache accept failed");
                }
            }
        }
    }

    async fn handle_connection(&self, stream: tokio::net::TcpStream) {
        let (read_half, mut writer) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        let mut line = String::new();
        match reader.read_line(&mut line).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }

        let result = match parse_command(line.trim_end()) {
            Ok(CacheCommand::Get { needle_id }) => self.get(&mut writer, needle_id).await,
            Ok(CacheCommand::Delete { needle_id }) => self.delete(&mut writer, needle_id).await,
            Err(err) => Err(err),
        };

        if let Err(err) = result {
            write_error_line(&mut writer, &err).await;
        }
    }

    /// Serve from the KV cache, falling back to the store on a miss.
    async fn get<W>(&self, writer: &mut W, needle_id: u64) -> Result<(), Error>
    where
        W: tokio::io::AsyncWrite + Unpin,
    {
        if let Some(payload) = self.cache.fetch(needle_id).await? {
            writer
                .write_all(format!("ok {}\n", payload.len()).as_bytes())
                .await?;
            writer.write_all(&payload).await?;
            return Ok(());
        }

        // Miss: fetch from the store. Store errors are forwarded verbatim.
        let payload = self.store.get(needle_id).await?;
        if payload.len() as u64 > MAX_CACHEABLE_SIZE {
            return Err(Error::TooBig {
                size: payload.len() as u64,
                max: MAX_CACHEABLE_SIZE,
            });
        }

        // Answer the client before touching the cache again; the backfill is
        // best-effort and must not delay or fail the response.
        writer
            .write_all(format!("ok {}\n", payload.len()).as_bytes())
            .await?;
        writer.write_all(&payload).await?;
        let _ = writer.shutdown().await;

        if let Err(e) = self.cache.store(needle_id, &payload).await {
            tracing::warn!(needle_id, error = %e, "cache backfill failed");
        }
        Ok(())
    }

    /// Evict from the KV cache only.
    async fn delete<W>(&self, writer: &mut W, needle_id: u64) -> Result<(), Error>
    where
        W: tokio::io::AsyncWrite + Unpin,
    {
        self.cache.invalidate(needle_id).await?;
        writer.write_all(b"ok\n").await?;
        Ok(())
    }
}

/// One parsed cache command line.
#[derive(Debug, PartialEq, Eq)]
enum CacheCommand {
    Get { needle_id: u64 },
    Delete { needle_id: u64 },
}

fn parse_command(line: &str) -> Result<CacheCommand, Error> {
    let bad = || Error::BadCommand(line.to_string());
    let mut words = line.split_whitespace();

    let command = match words.next().ok_or_else(bad)? {
        "get" => CacheCommand::Get {
            needle_id: words.next().ok_or_else(bad)?.parse().map_err(|_| bad())?,
        },
        "delete" => CacheCommand::Delete {
            needle_id: words.next().ok_or_else(bad)?.parse().map_err(|_| bad())?,
        },
        _ => return Err(bad()),
    };

    if words.next().is_some() {
        return Err(bad());
    }
    Ok(command)
}
