//! Error taxonomy for the container, the needle codec, and the indexer.

use thiserror::Error;

/// Errors raised by the needle codec while framing or parsing a record.
#[derive(Debug, Error)]
pub enum NeedleError {
    #[error("needle header magic mismatch")]
    BadHeaderMagic,

    #[error("needle payload exceeds max frame size ({len} > {max})")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("needle checksum mismatch")]
    ChecksumMismatch,

    #[error("needle frame truncated: wanted {wanted} bytes, got {got}")]
    Truncated { wanted: usize, got: usize },
}

/// Errors raised by an [`crate::indexer::Indexer`] implementation.
#[derive(Debug, Error)]
pub enum IndexerError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("index record at offset {offset} is not contiguous with the previous entry")]
    NonContiguous { offset: u64 },
}

/// Errors raised by [`crate::superblock::SuperBlock`] operations.
#[derive(Debug, Error)]
pub enum SuperBlockError {
    #[error("bad file header magic")]
    BadMagic,

    #[error("unsupported file format version {0}")]
    UnsupportedVersion(u8),

    #[error("container has no space left for a frame of {framed_slots} slots")]
    NoSpace { framed_slots: u32 },

    #[error("needle frame failed to parse at byte offset {offset}")]
    Parse { offset: i64, #[source] source: NeedleError },

    #[error("this handle is poisoned after a prior I/O failure")]
    Poisoned,

    #[error(transparent)]
    Codec(#[from] NeedleError),

    #[error(transparent)]
    Index(#[from] IndexerError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SuperBlockError>;
