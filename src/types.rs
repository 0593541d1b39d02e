//! Core domain types for Hayloft.
//!
//! This module defines the two descriptor types that every other module depends
//! on -- the on-disk needle header value and the in-memory needle address -- plus
//! the size and count limits of the store.

/// Maximum payload size of a single needle in bytes (1 MiB).
///
/// Blobs larger than this are rejected on `put`. A haystack volume packs many
/// small blobs; anything bigger belongs in a different storage tier.
pub const MAX_NEEDLE_SIZE: u64 = 1 << 20;

/// Number of volumes a store owns by default.
pub const VOLUME_COUNT: usize = 5;

/// Maximum size of a single volume file in bytes (1 GiB).
///
/// Once a volume reaches this length it flips to read-only and all further
/// writes to it fail.
pub const MAX_VOLUME_SIZE: u64 = 1 << 30;

/// The fixed-size header preceding every needle payload on disk.
///
/// A copy of this value travels inside every [`Needle`] so that reads can
/// verify the descriptor against what is actually at the offset.
///
/// # Fields
///
/// * `id` - Caller-assigned needle identifier, unique store-wide.
/// * `size` - Payload length in bytes.
/// * `is_deleted` - Tombstone flag; set once, never cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NeedleFlags {
    /// Caller-assigned needle identifier, unique store-wide.
    pub id: u64,
    /// Payload length in bytes.
    pub size: u64,
    /// Tombstone flag. A tombstoned record keeps its payload on disk but can
    /// no longer be read back.
    pub is_deleted: bool,
}

impl NeedleFlags {
    /// Build the header for a fresh (live) record.
    pub fn new(id: u64, size: u64) -> Self {
        Self {
            id,
            size,
            is_deleted: false,
        }
    }
}

/// The address and expected header of one record inside a volume.
///
/// A needle owns no bytes; it is a claim that the record at `offset` in volume
/// `volume_id` carries exactly `flags`. Volume operations verify that claim
/// against the file before acting on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Needle {
    /// The volume that contains this record.
    pub volume_id: u32,
    /// Byte offset within the volume at which the header begins.
    pub offset: u64,
    /// Copy of the on-disk header.
    pub flags: NeedleFlags,
}

impl Needle {
    /// Build a descriptor for a live record.
    pub fn new(volume_id: u32, offset: u64, id: u64, size: u64) -> Self {
        Self {
            volume_id,
            offset,
            flags: NeedleFlags::new(id, size),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn needle_flags_new_starts_live() {
        let flags = NeedleFlags::new(7, 400);
        assert_eq!(flags.id, 7);
        assert_eq!(flags.size, 400);
        assert!(!flags.is_deleted);
    }

    #[test]
    fn needle_new_wraps_fresh_flags() {
        let needle = Needle::new(2, 1024, 42, 99);
        assert_eq!(needle.volume_id, 2);
        assert_eq!(needle.offset, 1024);
        assert_eq!(needle.flags, NeedleFlags::new(42, 99));
    }

    #[test]
    fn equality_compares_all_fields() {
        let a = Needle::new(0, 0, 1, 10);
        let mut b = a;
        assert_eq!(a, b);

        b.flags.is_deleted = true;
        assert_ne!(a, b, "tombstone flag must participate in equality");

        let c = Needle::new(1, 0, 1, 10);
        assert_ne!(a, c, "volume id must participate in equality");

        let d = Needle::new(0, 17, 1, 10);
        assert_ne!(a, d, "offset must participate in equality");
    }

    #[test]
    fn limits_have_expected_values() {
        assert_eq!(MAX_NEEDLE_SIZE, 1_048_576);
        assert_eq!(MAX_VOLUME_SIZE, 1_073_741_824);
        assert_eq!(VOLUME_COUNT, 5);
    }
}
