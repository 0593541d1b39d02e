//! Directory facade: id allocation, placement, and the needle catalog.
//!
//! The directory fronts uploads. It hands out needle ids from an atomic
//! counter, spreads blobs across the store's volumes round-robin, proxies the
//! actual bytes to the store, and persists the `needle id -> volume` mapping
//! in an external document store behind the [`NeedleCatalog`] seam.
//!
//! Commands:
//!
//! ```text
//! upload <size>\n<size bytes>   -> ok <needleId>
//! list\n                        -> ok <byteLength>\n<newline-separated ids>
//! delete <needleId>\n           -> ok
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::{Document, doc};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

use crate::client::StoreClient;
use crate::error::Error;
use crate::service::{read_payload, write_error_line};

/// Database name holding the needle catalog.
pub const CATALOG_DB: &str = "HAYSTACK";

/// Collection name holding the needle documents.
pub const CATALOG_COLLECTION: &str = "NEEDLES";

/// Persistent record of which volume holds which needle.
///
/// The production implementation writes documents of shape
/// `{needleId: int64, haystackId: int32}` to a document database; tests swap
/// in an in-memory table.
#[async_trait]
pub trait NeedleCatalog: Send + Sync {
    /// Record that `needle_id` lives in `volume_id`.
    async fn insert(&self, needle_id: u64, volume_id: u32) -> Result<(), Error>;

    /// Forget `needle_id`. Returns `true` if a record was removed.
    async fn remove(&self, needle_id: u64) -> Result<bool, Error>;

    /// All recorded needle ids, in no particular order.
    async fn list_ids(&self) -> Result<Vec<u64>, Error>;
}

/// [`NeedleCatalog`] backed by a MongoDB collection.
pub struct MongoCatalog {
    collection: mongodb::Collection<Document>,
}

impl MongoCatalog {
    /// Connect to the document store at `uri` and bind the catalog collection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Db`] if the URI does not parse or the client cannot
    /// be constructed.
    pub async fn connect(uri: &str) -> Result<Self, Error> {
        let client = mongodb::Client::with_uri_str(uri)
            .await
            .map_err(|e| Error::Db(e.to_string()))?;
        let collection = client.database(CATALOG_DB).collection(CATALOG_COLLECTION);
        Ok(Self { collection })
    }
}

#[async_trait]
impl NeedleCatalog for MongoCatalog {
    async fn insert(&self, needle_id: u64, volume_id: u32) -> Result<(), Error> {
        self.collection
            .insert_one(doc! {
                "needleId": needle_id as i64,
                "haystackId": volume_id as i32,
            })
            .await
            .map_err(|e| Error::Db(e.to_string()))?;
        Ok(())
    }

    async fn remove(&self, needle_id: u64) -> Result<bool, Error> {
        let result = self
            .collection
            .delete_one(doc! { "needleId": needle_id as i64 })
            .await
            .map_err(|e| Error::Db(e.to_string()))?;
        Ok(result.deleted_count > 0)
    }

    async fn list_ids(&self) -> Result<Vec<u64>, Error> {
        let mut cursor = self
            .collection
            .find(doc! {})
            .await
            .map_err(|e| Error::Db(e.to_string()))?;

        let mut ids = Vec::new();
        while let Some(document) = cursor
            .try_next()
            .await
            .map_err(|e| Error::Db(e.to_string()))?
        {
            match document.get_i64("needleId") {
                Ok(id) => ids.push(id as u64),
                Err(e) => return Err(Error::Db(format!("malformed catalog document: {e}"))),
            }
        }
        Ok(ids)
    }
}

/// The directory service.
pub struct Directory {
    catalog: Arc<dyn NeedleCatalog>,
    store: StoreClient,
    volume_count: u64,
    id_counter: AtomicU64,
    volume_counter: AtomicU64,
}

impl Directory {
    /// Build a directory over the given catalog and store.
    ///
    /// The id counter is seeded from the largest id already in the catalog so
    /// that a restarted directory does not re-issue ids. If the catalog is
    /// unreachable the directory logs a warning and starts from zero.
    pub async fn new(
        catalog: Arc<dyn NeedleCatalog>,
        store: StoreClient,
        volume_count: usize,
    ) -> Self {
        let next_id = match catalog.list_ids().await {
            Ok(ids) => ids.iter().max().map_or(0, |max| max + 1),
            Err(e) => {
                tracing::warn!(error = %e, "could not seed id counter from catalog; starting at 0");
                0
            }
        };
        tracing::info!(next_id, "directory id counter seeded");

        Self {
            catalog,
            store,
            volume_count: volume_count as u64,
            id_counter: AtomicU64::new(next_id),
            volume_counter: AtomicU64::new(0),
        }
    }

    /// Accept connections forever, one task per connection.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let directory = Arc::clone(&self);
                    tokio::spawn(async move {
                        tracing::debug!(%peer, "directory connection accepted");
                        directory.handle_connection(stream).await;
                    });
                }
                Err(e) => {
                    tracing::error!(error = %e, "directory accept failed");
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
            Ok(DirCommand::Upload { size }) => {
                self.upload(&mut reader, &mut writer, size).await
            }
            Ok(DirCommand::List) => self.list(&mut writer).await,
            Ok(DirCommand::Delete { needle_id }) => self.delete(&mut writer, needle_id).await,
            Err(err) => Err(err),
        };

        if let Err(err) = result {
            write_error_line(&mut writer, &err).await;
        }
    }

    /// Take a payload, place it, persist the mapping, answer with the new id.
    async fn upload<R, W>(&self, reader: &mut R, writer: &mut W, size: u64) -> Result<(), Error>
    where
        R: tokio::io::AsyncRead + Unpin,
        W: tokio::io::AsyncWrite + Unpin,
    {
        let payload = read_payload(reader, size as usize).await?;

        let needle_id = self.id_counter.fetch_add(1, Ordering::SeqCst);
        let volume_id = self.volume_counter.fetch_add(1, Ordering::SeqCst) % self.volume_count;

        // Store first; only a stored blob earns a catalog entry.
        self.store.put(volume_id, needle_id, &payload).await?;
        self.catalog.insert(needle_id, volume_id as u32).await?;

        writer
            .write_all(format!("ok {needle_id}\n").as_bytes())
            .await?;
        Ok(())
    }

    /// Answer with every catalog id, newline separated, length-prefixed.
    async fn list<W>(&self, writer: &mut W) -> Result<(), Error>
    where
        W: tokio::io::AsyncWrite + Unpin,
    {
        let ids = self.catalog.list_ids().await?;
        let mut body = String::new();
        for id in ids {
            body.push_str(&id.to_string());
            body.push('\n');
        }

        writer
            .write_all(format!("ok {}\n", body.len()).as_bytes())
            .await?;
        writer.write_all(body.as_bytes()).await?;
        Ok(())
    }

    /// Forward the delete to the store, then drop the catalog entry.
    async fn delete<W>(&self, writer: &mut W, needle_id: u64) -> Result<(), Error>
    where
        W: tokio::io::AsyncWrite + Unpin,
    {
        self.store.delete(needle_id).await?;

        if !self.catalog.remove(needle_id).await? {
            return Err(Error::Db(format!("needle {needle_id} not in catalog")));
        }
        writer.write_all(b"ok\n").await?;
        Ok(())
    }
}

/// One parsed directory command line.
#[derive(Debug, PartialEq, Eq)]
enum DirCommand {
    Upload { size: u64 },
    List,
    Delete { needle_id: u64 },
}

fn parse_command(line: &str) -> Result<DirCommand, Error> {
    let bad = || Error::BadCommand(line.to_string());
    let mut words = line.split_whitespace();

    let command = match words.next().ok_or_else(bad)? {
        "upload" => DirCommand::Upload {
            size: words.next().ok_or_else(bad)?.parse().map_err(|_| bad())?,
        },
        "list" => DirCommand::List,
        "delete" => DirCommand::Delete {
            needle_id: words.next().ok_or_else(bad)?.parse().map_err(|_| bad())?,
        },
        _ => return Err(bad()),
    };

    if words.next().is_some() {
        return Err(bad());
    }
    Ok(command)
}
