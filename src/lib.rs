//! Hayloft: a Haystack-style packed blob store.
//!
//! Many small immutable blobs ("needles") are packed into a few large
//! append-only container files ("volumes") to dodge per-blob filesystem
//! overhead. A store service owns the volumes and a rebuildable in-memory
//! index; a directory facade allocates ids and placement; a cache facade
//! fronts reads with an external KV cache. All three speak the same
//! line-oriented TCP protocol.

pub mod cache;
pub mod client;
pub mod codec;
pub mod directory;
pub mod error;
pub mod index;
/// Prometheus metrics infrastructure for the Hayloft services.
pub mod metrics;
pub mod service;
pub mod store;
pub mod types;
pub mod volume;

pub use cache::{BlobCache, CacheService, RedisCache};
pub use client::StoreClient;
pub use directory::{Directory, MongoCatalog, NeedleCatalog};
pub use error::Error;
pub use index::NeedleIndex;
pub use service::StoreService;
pub use store::{Store, StoreConfig};
pub use types::{MAX_NEEDLE_SIZE, MAX_VOLUME_SIZE, Needle, NeedleFlags, VOLUME_COUNT};
pub use volume::Volume;
