//! The haystack volume: one append-only file of packed needle records.
//!
//! A volume owns one file handle and the mutable state that describes it
//! (`current_size`, read-only flag), all behind a single mutex. The file is a
//! dense sequence of `(header, payload)` records, so a scan from offset zero
//! reconstructs every needle the volume has ever taken -- that scan is the
//! recovery contract the store's index rebuild relies on.
//!
//! Bytes once written are never overwritten, with one exception: deletion
//! rewrites the single tombstone byte inside the record's header. Deleted
//! payloads stay on disk; reclaiming them is out of scope.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::codec::{self, DELETED_FLAG_OFFSET, HEADER_SIZE, TOMBSTONE};
use crate::error::Error;
use crate::types::{Needle, NeedleFlags};

/// Mutable volume state guarded by the mutex.
///
/// The file handle carries a single seek cursor, so every operation that
/// touches it must hold the lock for its entire duration.
struct Inner {
    /// The volume file handle.
    file: File,
    /// Current length of the file in bytes. Monotone non-decreasing.
    current_size: u64,
    /// Set once `current_size` reaches the volume's maximum size.
    is_read_only: bool,
}

/// One append-only container file holding a sequence of needle records.
///
/// All operations are mutually exclusive within a single volume; operations on
/// different volumes proceed in parallel. Writes land in the kernel page cache
/// -- no fsync is part of the contract -- and the file is flushed when the
/// volume is dropped.
pub struct Volume {
    /// Identifier of this volume; also encoded in the file name.
    id: u32,
    /// Path of the backing file, `<dir>/haystack_<id>`.
    path: PathBuf,
    /// Hard upper bound on the file length in bytes.
    max_size: u64,
    inner: Mutex<Inner>,
}

impl Volume {
    /// File path for volume `id` under `dir`.
    fn file_path(id: u32, dir: &Path) -> PathBuf {
        dir.join(format!("haystack_{id}"))
    }

    /// Create a fresh, empty volume, truncating any existing file.
    ///
    /// The parent directory is created if it does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the directory or file cannot be created.
    pub fn create(id: u32, dir: &Path, max_size: u64) -> Result<Volume, Error> {
        std::fs::create_dir_all(dir)?;
        let path = Self::file_path(id, dir);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        tracing::info!(volume_id = id, path = %path.display(), max_size, "created volume");

        Ok(Volume {
            id,
            path,
            max_size,
            inner: Mutex::new(Inner {
                file,
                current_size: 0,
                is_read_only: false,
            }),
        })
    }

    /// Open a volume over an existing file.
    ///
    /// `current_size` is taken from the file length and the read-only flag is
    /// derived from it. The records themselves are not validated here; callers
    /// that need the contents go through [`Volume::needles`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file does not exist or cannot be opened.
    pub fn open(id: u32, dir: &Path, max_size: u64) -> Result<Volume, Error> {
        let path = Self::file_path(id, dir);
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let current_size = file.metadata()?.len();
        let is_read_only = current_size >= max_size;
        tracing::info!(
            volume_id = id,
            path = %path.display(),
            current_size,
            is_read_only,
            "opened volume from file"
        );

        Ok(Volume {
            id,
            path,
            max_size,
            inner: Mutex::new(Inner {
                file,
                current_size,
                is_read_only,
            }),
        })
    }

    /// Identifier of this volume.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of bytes still available for records (`max_size - current_size`).
    pub fn free_count(&self) -> u64 {
        let inner = self.inner.lock().expect("volume mutex poisoned");
        self.max_size.saturating_sub(inner.current_size)
    }

    /// Whether the volume has stopped accepting writes.
    pub fn is_read_only(&self) -> bool {
        let inner = self.inner.lock().expect("volume mutex poisoned");
        inner.is_read_only
    }

    /// Append a record and return its descriptor.
    ///
    /// The caller is responsible for the uniqueness of `needle_id`; the volume
    /// happily stores duplicates.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoFit`] if the volume is read-only or the record would
    /// exceed the maximum size; no bytes are written in that case. Returns
    /// [`Error::Io`] if the underlying write fails.
    pub fn write(&self, needle_id: u64, payload: &[u8]) -> Result<Needle, Error> {
        let mut inner = self.inner.lock().expect("volume mutex poisoned");
        let size = payload.len() as u64;

        if inner.is_read_only || inner.current_size + HEADER_SIZE as u64 + size > self.max_size {
            return Err(Error::NoFit);
        }

        let flags = NeedleFlags::new(needle_id, size);
        let needle = Needle {
            volume_id: self.id,
            offset: inner.current_size,
            flags,
        };

        inner.file.seek(SeekFrom::Start(needle.offset))?;
        inner.file.write_all(&codec::encode_flags(&flags))?;
        inner.file.write_all(payload)?;

        inner.current_size += HEADER_SIZE as u64 + size;
        inner.is_read_only = inner.current_size >= self.max_size;

        Ok(needle)
    }

    /// Read the payload of a live record into `buf`.
    ///
    /// `buf` must have room for at least `needle.flags.size` bytes; that is
    /// the caller's contract. The header at the needle's offset is re-read and
    /// verified before any payload bytes are produced.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BadNeedle`] if the needle names a different volume,
    /// its offset is out of range, the on-disk id or size disagree with the
    /// descriptor, or the record is tombstoned.
    pub fn read(&self, needle: &Needle, buf: &mut [u8]) -> Result<(), Error> {
        let mut inner = self.inner.lock().expect("volume mutex poisoned");

        if needle.volume_id != self.id
            || needle.offset + HEADER_SIZE as u64 > inner.current_size
        {
            return Err(Error::BadNeedle);
        }

        let mut header = [0u8; HEADER_SIZE];
        inner.file.seek(SeekFrom::Start(needle.offset))?;
        inner.file.read_exact(&mut header)?;
        let flags = codec::decode_flags(&header);

        if flags.is_deleted || flags.id != needle.flags.id || flags.size != needle.flags.size {
            return Err(Error::BadNeedle);
        }

        inner.file.read_exact(&mut buf[..flags.size as usize])?;
        Ok(())
    }

    /// Tombstone a record.
    ///
    /// Rewrites the single tombstone byte at the record's header; the rest of
    /// the record is untouched. The in-memory descriptor is marked deleted as
    /// well. Deleting an already-tombstoned record is a no-op on disk, so the
    /// operation is idempotent. Unlike [`Volume::read`], the on-disk size is
    /// not required to match -- only the id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BadNeedle`] on volume-id mismatch, out-of-range
    /// offset, or id mismatch.
    pub fn delete(&self, needle: &mut Needle) -> Result<(), Error> {
        let mut inner = self.inner.lock().expect("volume mutex poisoned");

        if needle.volume_id != self.id
            || needle.offset + HEADER_SIZE as u64 > inner.current_size
        {
            return Err(Error::BadNeedle);
        }

        let mut header = [0u8; HEADER_SIZE];
        inner.file.seek(SeekFrom::Start(needle.offset))?;
        inner.file.read_exact(&mut header)?;
        let flags = codec::decode_flags(&header);

        if flags.id != needle.flags.id {
            return Err(Error::BadNeedle);
        }

        needle.flags.is_deleted = true;
        if !flags.is_deleted {
            inner
                .file
                .seek(SeekFrom::Start(needle.offset + DELETED_FLAG_OFFSET as u64))?;
            inner.file.write_all(&[TOMBSTONE])?;
        }

        Ok(())
    }

    /// Scan the file and return one descriptor per record, in file order.
    ///
    /// Tombstoned records are included; the caller decides what to do with
    /// them. This is the recovery path: the store rebuilds its index from this
    /// scan at startup.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if a header cannot be read, which means the file
    /// does not end on a record boundary.
    pub fn needles(&self) -> Result<Vec<Needle>, Error> {
        let mut inner = self.inner.lock().expect("volume mutex poisoned");
        let end = inner.current_size;

        let mut needles = Vec::new();
        let mut pos = 0u64;
        while pos < end {
            let mut header = [0u8; HEADER_SIZE];
            inner.file.seek(SeekFrom::Start(pos))?;
            inner.file.read_exact(&mut header)?;
            let flags = codec::decode_flags(&header);

            needles.push(Needle {
                volume_id: self.id,
                offset: pos,
                flags,
            });
            pos += HEADER_SIZE as u64 + flags.size;
        }

        Ok(needles)
    }
}

impl Drop for Volume {
    fn drop(&mut self) {
        // Clean shutdown flushes the file; a poisoned mutex means a writer
        // panicked mid-operation and there is nothing more to salvage.
        if let Ok(inner) = self.inner.get_mut() {
            let _ = inner.file.flush();
        }
    }
}
