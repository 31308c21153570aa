//! Error taxonomy (§7).
//!
//! [`PutMessageStatus`] is a *result tag*, not [`std::error::Error`]: most of
//! its variants describe an append that wrote bytes successfully but missed a
//! durability or replication deadline. Genuine I/O failures (a read syscall
//! failing, a corrupt index file) use the `thiserror` enums below instead,
//! mirroring the teacher crate's `error::Traversal` / `error::SegmentMetadata`
//! style.

use std::io;

use thiserror::Error;

/// Outcome of [`crate::CommitLog::put_message`] / `put_messages`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PutMessageStatus {
    PutOk,
    CreateMappedFileFailed,
    MessageIllegal,
    FlushDiskTimeout,
    FlushSlaveTimeout,
    SlaveNotAvailable,
    UnknownError,
}

impl PutMessageStatus {
    pub fn is_ok(self) -> bool {
        matches!(self, Self::PutOk)
    }
}

/// Why [`crate::record::encode_into`] refused to encode a record (§4.1, §4.2).
#[derive(Debug, Error, Eq, PartialEq)]
pub enum EncodeError {
    #[error("message size {size} exceeds the configured maximum {max}")]
    MessageSizeExceeded { size: u64, max: u64 },
    #[error("topic length {len} exceeds 255 bytes")]
    TopicSizeExceeded { len: usize },
    #[error("properties length {len} exceeds {max} bytes")]
    PropertiesSizeExceeded { len: usize, max: usize },
}

/// Error from the Recovery Engine (§4.5).
#[derive(Debug, Error)]
pub enum RecoveryError {
    #[error("segment store error: {0}")]
    Segment(#[from] SegmentError),
    #[error("dispatch sink rejected record at physical offset {offset}: {source}")]
    Dispatch {
        offset: u64,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Error surfaced by the Segment Store collaborator (§6).
#[derive(Debug, Error)]
pub enum SegmentError {
    #[error("segment {offset} not found")]
    NotFound { offset: u64 },
    #[error("failed to create segment at {offset}: {source}")]
    Create {
        offset: u64,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// A checksum mismatch was detected decoding a record body.
///
/// Usually carried inside [`crate::record::DecodeOutcome::Corrupt`] rather
/// than propagated as an [`std::error::Error`] — see §4.1's decoding
/// protocol, which treats a bad CRC as data to route around, not a fault to
/// unwind on.
#[derive(Debug, Error)]
#[error("body CRC mismatch")]
pub struct ChecksumMismatch;
