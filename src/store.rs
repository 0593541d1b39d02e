//! Storage engine for Hayloft.
//!
//! The store owns a fixed set of haystack volumes under one directory plus the
//! needle index that maps ids to on-disk descriptors. Opening a store creates
//! any volume files that are missing, recovers the ones that exist, and
//! rebuilds the index by scanning every recovered volume -- the index is
//! volatile, the volume files are the source of truth.

use std::path::PathBuf;

use bytes::Bytes;

use crate::error::Error;
use crate::index::NeedleIndex;
use crate::types::{MAX_NEEDLE_SIZE, MAX_VOLUME_SIZE, VOLUME_COUNT};
use crate::volume::Volume;

/// Sizing configuration for a [`Store`].
///
/// The defaults are five volumes of 1 GiB each with a 1 MiB per-needle
/// payload cap. Tests shrink these to keep fixtures small.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Directory holding the `haystack_<id>` volume files.
    pub dir: PathBuf,
    /// Number of volumes the store owns.
    pub volume_count: usize,
    /// Maximum size of each volume file in bytes.
    pub max_volume_size: u64,
    /// Maximum payload size of a single needle in bytes.
    pub max_needle_size: u64,
}

impl StoreConfig {
    /// Configuration with default sizing under the given directory.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            volume_count: VOLUME_COUNT,
            max_volume_size: MAX_VOLUME_SIZE,
            max_needle_size: MAX_NEEDLE_SIZE,
        }
    }
}

/// Multi-volume blob store with a rebuildable in-memory index.
///
/// All methods take `&self`; each volume serializes its own operations behind
/// its mutex and the index serializes its own, so concurrent callers on
/// different volumes proceed in parallel.
pub struct Store {
    volumes: Vec<Volume>,
    index: NeedleIndex,
    max_needle_size: u64,
}

impl Store {
    /// Open the store, creating missing volumes and recovering existing ones.
    ///
    /// Volumes whose file already exists are opened in recovering mode and
    /// scanned; every live (non-tombstoned) record is inserted into the index.
    /// A duplicate needle id found during the scan keeps the record seen first
    /// and skips the later one with a warning.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if a volume file cannot be created, opened, or
    /// scanned.
    pub fn open(config: StoreConfig) -> Result<Store, Error> {
        let mut volumes = Vec::with_capacity(config.volume_count);
        for id in 0..config.volume_count as u32 {
            let path = config.dir.join(format!("haystack_{id}"));
            let volume = if path.exists() {
                Volume::open(id, &config.dir, config.max_volume_size)?
            } else {
                Volume::create(id, &config.dir, config.max_volume_size)?
            };
            volumes.push(volume);
        }

        let index = NeedleIndex::new();
        let mut tombstones = 0u64;
        for volume in &volumes {
            for needle in volume.needles()? {
                if needle.flags.is_deleted {
                    tombstones += 1;
                    continue;
                }
                if !index.put(needle.flags.id, needle) {
                    tracing::warn!(
                        needle_id = needle.flags.id,
                        volume_id = volume.id(),
                        offset = needle.offset,
                        "duplicate needle id during recovery; keeping the record seen first"
                    );
                }
            }
        }
        tracing::info!(
            volumes = volumes.len(),
            needles = index.len(),
            tombstones,
            "store recovered"
        );

        Ok(Store {
            volumes,
            index,
            max_needle_size: config.max_needle_size,
        })
    }

    /// Number of volumes this store owns.
    pub fn volume_count(&self) -> usize {
        self.volumes.len()
    }

    /// Per-needle payload cap in bytes.
    pub fn max_needle_size(&self) -> u64 {
        self.max_needle_size
    }

    /// Number of live needles in the index.
    pub fn needle_count(&self) -> usize {
        self.index.len()
    }

    /// Borrow a volume by id, if the store owns it.
    pub fn volume(&self, volume_id: u64) -> Option<&Volume> {
        self.volumes.get(usize::try_from(volume_id).ok()?)
    }

    /// Store a blob under `needle_id` in the given volume.
    ///
    /// The record is appended first, then inserted into the index. If the
    /// insert finds the id already taken, the just-written record is
    /// tombstoned before this returns, so the index never points at a record
    /// that does not exist and no orphaned live record survives a failed put.
    /// The disk space of the tombstoned duplicate is not reclaimed.
    ///
    /// # Errors
    ///
    /// - [`Error::BadHaystackId`] if `volume_id` names no volume.
    /// - [`Error::TooManyBytes`] if the payload exceeds the per-needle cap.
    /// - [`Error::NoFit`] if the volume refuses the write or the id is taken.
    pub fn put(&self, volume_id: u64, needle_id: u64, payload: &[u8]) -> Result<(), Error> {
        let volume = self
            .volume(volume_id)
            .ok_or(Error::BadHaystackId { volume_id })?;
        if payload.len() as u64 > self.max_needle_size {
            return Err(Error::TooManyBytes {
                size: payload.len() as u64,
                max: self.max_needle_size,
            });
        }

        let mut needle = volume.write(needle_id, payload)?;
        if !self.index.put(needle_id, needle) {
            volume.delete(&mut needle)?;
            return Err(Error::NoFit);
        }
        Ok(())
    }

    /// Fetch the blob stored under `needle_id`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BadNeedle`] if the id is not indexed or the on-disk
    /// record no longer matches its descriptor.
    pub fn get(&self, needle_id: u64) -> Result<Bytes, Error> {
        let needle = self.index.get(needle_id).ok_or(Error::BadNeedle)?;
        let volume = self
            .volume(u64::from(needle.volume_id))
            .ok_or(Error::BadNeedle)?;

        let mut buf = vec![0u8; needle.flags.size as usize];
        volume.read(&needle, &mut buf)?;
        Ok(Bytes::from(buf))
    }

    /// Tombstone the blob stored under `needle_id` and drop it from the index.
    ///
    /// After this returns, neither the index nor a subsequent read will
    /// produce the blob.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BadNeedle`] if the id is not indexed.
    pub fn remove(&self, needle_id: u64) -> Result<(), Error> {
        let mut needle = self.index.get(needle_id).ok_or(Error::BadNeedle)?;
        let volume = self
            .volume(u64::from(needle.volume_id))
            .ok_or(Error::BadNeedle)?;

        volume.delete(&mut needle)?;
        self.index.remove(needle_id);
        Ok(())
    }
}
