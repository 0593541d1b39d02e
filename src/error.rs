//! Error types for Hayloft.
//!
//! This module defines the unified error enum used throughout the crate. All
//! fallible operations return `Result<T, Error>`. The service layers map each
//! variant onto the one-line wire form `err <Kind>` via [`Error::wire_token`];
//! no error ever crosses an accept loop.

/// Unified error type for all Hayloft operations.
///
/// Each variant corresponds to a failure kind on the wire:
///
/// - `BadNeedle` -> `err BadNeedle`
/// - `NoFit` -> `err NoFit`
/// - `BadHaystackId` -> `err BadHaystackId`
/// - `TooManyBytes` -> `err TooManyBytes`
/// - `TooBig` -> `err TooBig`
/// - `BadCommand` -> `err BadCommand`
/// - `Db` -> `err DbErr`
/// - `Cache` -> `err RedisErr`
/// - `Remote` -> the token forwarded from the store, verbatim
/// - `Io` / `Protocol` -> `err Unknown`
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The needle is not in the index, or the on-disk header disagrees with
    /// the descriptor, or the offset is out of range, or the record is
    /// tombstoned.
    #[error("needle not found or descriptor does not match the on-disk record")]
    BadNeedle,

    /// The volume is read-only, the record would exceed the volume's maximum
    /// size, or a duplicate needle id tried to insert.
    #[error("record does not fit: volume is read-only, full, or the id is taken")]
    NoFit,

    /// The request named a volume the store does not own.
    #[error("no such volume: {volume_id}")]
    BadHaystackId {
        /// The out-of-range volume id from the request.
        volume_id: u64,
    },

    /// The payload exceeds the per-needle cap.
    #[error("payload of {size} bytes exceeds the {max} byte cap")]
    TooManyBytes {
        /// Requested payload size in bytes.
        size: u64,
        /// Maximum allowed payload size in bytes.
        max: u64,
    },

    /// A blob fetched from the store is too large for the cache's buffer.
    #[error("blob of {size} bytes exceeds the {max} byte cache buffer")]
    TooBig {
        /// Size of the blob in bytes.
        size: u64,
        /// Cache buffer capacity in bytes.
        max: u64,
    },

    /// The request line did not parse as a known command.
    #[error("bad command: {0:?}")]
    BadCommand(String),

    /// An I/O error occurred on a socket or volume file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The external document store failed or returned an unusable result.
    #[error("document store error: {0}")]
    Db(String),

    /// The external KV cache failed or could not be reached.
    #[error("KV cache error: {0}")]
    Cache(String),

    /// The store replied with an error line; the token is forwarded verbatim.
    #[error("store replied err {0}")]
    Remote(String),

    /// The store's response did not follow the line protocol.
    #[error("malformed store response: {0}")]
    Protocol(String),
}

impl Error {
    /// The token this error carries on the wire, as in `err <token>`.
    pub fn wire_token(&self) -> &str {
        match self {
            Error::BadNeedle => "BadNeedle",
            Error::NoFit => "NoFit",
            Error::BadHaystackId { .. } => "BadHaystackId",
            Error::TooManyBytes { .. } => "TooManyBytes",
            Error::TooBig { .. } => "TooBig",
            Error::BadCommand(_) => "BadCommand",
            Error::Db(_) => "DbErr",
            Error::Cache(_) => "RedisErr",
            Error::Remote(token) => token,
            Error::Io(_) | Error::Protocol(_) => "Unknown",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_tokens_match_the_protocol() {
        assert_eq!(Error::BadNeedle.wire_token(), "BadNeedle");
        assert_eq!(Error::NoFit.wire_token(), "NoFit");
        assert_eq!(
            Error::BadHaystackId { volume_id: 9 }.wire_token(),
            "BadHaystackId"
        );
        assert_eq!(
            Error::TooManyBytes {
                size: 2_000_000,
                max: 1_048_576
            }
            .wire_token(),
            "TooManyBytes"
        );
        assert_eq!(
            Error::TooBig {
                size: 2_000_000,
                max: 1_048_576
            }
            .wire_token(),
            "TooBig"
        );
        assert_eq!(Error::BadCommand("frob".into()).wire_token(), "BadCommand");
        assert_eq!(Error::Db("down".into()).wire_token(), "DbErr");
        assert_eq!(Error::Cache("down".into()).wire_token(), "RedisErr");
    }

    #[test]
    fn remote_token_is_forwarded_verbatim() {
        let err = Error::Remote("NoFit".into());
        assert_eq!(err.wire_token(), "NoFit");
    }

    #[test]
    fn io_and_protocol_surface_as_unknown() {
        let io = Error::from(std::io::Error::other("boom"));
        assert_eq!(io.wire_token(), "Unknown");
        assert_eq!(Error::Protocol("garbage".into()).wire_token(), "Unknown");
    }

    #[test]
    fn io_error_question_mark_coercion() {
        fn fallible() -> Result<(), Error> {
            Err(std::io::Error::other("boom"))?
        }
        assert!(matches!(fallible().unwrap_err(), Error::Io(_)));
    }

    #[test]
    fn display_carries_the_interesting_numbers() {
        let msg = Error::TooManyBytes {
            size: 1_048_577,
            max: 1_048_576,
        }
        .to_string();
        assert!(msg.contains("1048577"), "size missing from: {msg}");
        assert!(msg.contains("1048576"), "cap missing from: {msg}");

        let msg = Error::BadHaystackId { volume_id: 12 }.to_string();
        assert!(msg.contains("12"), "volume id missing from: {msg}");
    }
}
