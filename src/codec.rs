//! Binary codec for the needle header.
//!
//! A volume file is a contiguous sequence of `(header, payload)` records with
//! no inter-record padding, so the header layout *is* the file format. This
//! module owns that layout: a packed 17-byte little-endian header encoded and
//! decoded field by field. No file I/O and no index management happens here.
//!
//! Layout:
//!
//! ```text
//! offset  0..8   needle id   (u64 LE)
//! offset  8..16  payload len (u64 LE)
//! offset 16      tombstone   (0 = live, 1 = deleted)
//! ```
//!
//! The tombstone byte sits at a fixed offset so that deletion can rewrite a
//! single byte in place without touching the rest of the record.

use crate::types::NeedleFlags;

/// Size of the packed on-disk header in bytes.
pub const HEADER_SIZE: usize = 17;

/// Byte offset of the tombstone flag within the header.
pub const DELETED_FLAG_OFFSET: usize = 16;

/// Value written to the tombstone byte when a record is deleted.
pub const TOMBSTONE: u8 = 1;

/// Encode a needle header into its packed 17-byte on-disk form.
pub fn encode_flags(flags: &NeedleFlags) -> [u8; HEADER_SIZE] {
    let mut buf = [0u8; HEADER_SIZE];
    buf[0..8].copy_from_slice(&flags.id.to_le_bytes());
    buf[8..16].copy_from_slice(&flags.size.to_le_bytes());
    buf[DELETED_FLAG_OFFSET] = u8::from(flags.is_deleted);
    buf
}

/// Decode a packed 17-byte header read from disk.
///
/// Any byte pattern decodes; validation of the decoded fields against a
/// descriptor is the volume's job. A nonzero tombstone byte counts as deleted.
pub fn decode_flags(buf: &[u8; HEADER_SIZE]) -> NeedleFlags {
    let id = u64::from_le_bytes(buf[0..8].try_into().expect("8 bytes for u64"));
    let size = u64::from_le_bytes(buf[8..16].try_into().expect("8 bytes for u64"));
    NeedleFlags {
        id,
        size,
        is_deleted: buf[DELETED_FLAG_OFFSET] != 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips() {
        let flags = NeedleFlags::new(0xDEAD_BEEF_0042, 1 << 19);
        let decoded = decode_flags(&encode_flags(&flags));
        assert_eq!(decoded, flags);
    }

    #[test]
    fn tombstoned_header_round_trips() {
        let mut flags = NeedleFlags::new(3, 10);
        flags.is_deleted = true;
        let buf = encode_flags(&flags);
        assert_eq!(buf[DELETED_FLAG_OFFSET], TOMBSTONE);
        assert_eq!(decode_flags(&buf), flags);
    }

    #[test]
    fn layout_is_little_endian_and_packed() {
        let flags = NeedleFlags::new(0x0102_0304_0506_0708, 0x1122_3344);
        let buf = encode_flags(&flags);

        assert_eq!(&buf[0..8], &[0x08, 0x07, 0x06, 0x05, 0x04, 0x03, 0x02, 0x01]);
        assert_eq!(&buf[8..16], &[0x44, 0x33, 0x22, 0x11, 0x00, 0x00, 0x00, 0x00]);
        assert_eq!(buf[16], 0, "live record has a zero tombstone byte");
    }

    #[test]
    fn nonzero_tombstone_byte_reads_as_deleted() {
        let mut buf = encode_flags(&NeedleFlags::new(1, 1));
        buf[DELETED_FLAG_OFFSET] = 0xFF;
        assert!(decode_flags(&buf).is_deleted);
    }
}
