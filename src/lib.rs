//! # needlecask — append-only super block container
//!
//! Format guarantees (frozen at v1):
//! - The file header is 8 bytes: magic `AB CD EF 00`, version `01`, 3 bytes
//!   padding; never negotiated.
//! - Every needle frame is self-describing and padded to a multiple of
//!   [`offset::PADDING_UNIT`] bytes; the flag byte sits at a fixed offset.
//! - All externally visible positions are 32-bit slot offsets
//!   (`byte = slot * PADDING_UNIT`).
//! - Recovery tolerates a torn/truncated final needle — that is success, not
//!   failure — and leaves both the write cursor and the handle's own slot
//!   counter at the first byte past the last good needle.
//! - Concurrency control across callers is out of scope: mutating operations
//!   are single-threaded per handle; only `get` is safe to call concurrently.

pub mod cache;
pub mod error;
pub mod indexer;
pub mod needle;
pub mod offset;
pub mod superblock;
pub mod volume;

pub use cache::{NeedleCache, NeedleCacheEntry, SlotState};
pub use error::{IndexerError, NeedleError, SuperBlockError};
pub use indexer::{FileIndexer, Indexer};
pub use needle::{Flag, Header, NeedleCodec, StandardNeedleCodec};
pub use superblock::{SuperBlock, SuperBlockOptions};
pub use volume::{Volume, VolumeSink};

/// Install a `tracing` subscriber reading verbosity from `RUST_LOG`, when the
/// `trace-log` feature is enabled. A no-op otherwise. Safe to call more than
/// once; subsequent calls are ignored.
#[cfg(feature = "trace-log")]
pub fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt::try_init();
    });
}

#[cfg(not(feature = "trace-log"))]
pub fn init_tracing() {}
