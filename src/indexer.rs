//! Indexer collaborator: a separate append-only index file.
//!
//! The super block only ever calls [`Indexer::add`] during Recovery (and the
//! [`crate::volume::Volume`] aggregator calls it on every live append too).
//! [`FileIndexer`] is the concrete implementation shipped with this crate.

use crate::error::IndexerError;
use byteorder::{ByteOrder, LittleEndian};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Small interface the super block's Recovery path feeds live needles to.
pub trait Indexer {
    fn add(&mut self, key: i64, slot_offset: u32, framed_size: i32) -> Result<(), IndexerError>;
    fn flush(&mut self) -> Result<(), IndexerError>;
}

/// Fixed-size record: `key(8) | slot_offset(4) | framed_size(4)` = 16 bytes.
const RECORD_SIZE: usize = 8 + 4 + 4;

/// Number of pending records buffered before an automatic flush.
const AUTO_FLUSH_THRESHOLD: usize = 32;

/// Append-only index file of fixed-size `(key, slot_offset, framed_size)`
/// records, batched and flushed every [`AUTO_FLUSH_THRESHOLD`] entries.
pub struct FileIndexer {
    file: File,
    pending: Vec<u8>,
    pending_count: usize,
}

impl FileIndexer {
    /// Create (or truncate) a fresh index file at `path`.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, IndexerError> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .read(true)
            .open(path)?;
        Ok(Self {
            file,
            pending: Vec::with_capacity(RECORD_SIZE * AUTO_FLUSH_THRESHOLD),
            pending_count: 0,
        })
    }

    /// Open an existing index file for continued appends, positioning at end.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, IndexerError> {
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;
        file.seek(SeekFrom::End(0))?;
        Ok(Self {
            file,
            pending: Vec::with_capacity(RECORD_SIZE * AUTO_FLUSH_THRESHOLD),
            pending_count: 0,
        })
    }

    /// Read every record currently committed to disk, validating that each
    /// record is contiguous with the one before (offsets strictly
    /// non-decreasing). Used by callers that want to rebuild a cache from
    /// the index rather than a full container scan.
    pub fn read_all(&mut self) -> Result<Vec<(i64, u32, i32)>, IndexerError> {
        self.file.seek(SeekFrom::Start(0))?;
        let mut buf = Vec::new();
        self.file.read_to_end(&mut buf)?;
        self.file.seek(SeekFrom::End(0))?;

        let usable = buf.len() - (buf.len() % RECORD_SIZE);
        let mut out = Vec::with_capacity(usable / RECORD_SIZE);
        let mut last_offset: Option<u32> = None;
        for chunk in buf[..usable].chunks_exact(RECORD_SIZE) {
            let key = LittleEndian::read_i64(&chunk[0..8]);
            let slot_offset = LittleEndian::read_u32(&chunk[8..12]);
            let framed_size = LittleEndian::read_i32(&chunk[12..16]);
            if let Some(prev) = last_offset {
                if slot_offset < prev {
                    return Err(IndexerError::NonContiguous {
                        offset: slot_offset as u64,
                    });
                }
            }
            last_offset = Some(slot_offset);
            out.push((key, slot_offset, framed_size));
        }
        Ok(out)
    }
}

impl Indexer for FileIndexer {
    fn add(&mut self, key: i64, slot_offset: u32, framed_size: i32) -> Result<(), IndexerError> {
        let mut record = [0u8; RECORD_SIZE];
        LittleEndian::write_i64(&mut record[0..8], key);
        LittleEndian::write_u32(&mut record[8..12], slot_offset);
        LittleEndian::write_i32(&mut record[12..16], framed_size);
        self.pending.extend_from_slice(&record);
        self.pending_count += 1;

        if self.pending_count >= AUTO_FLUSH_THRESHOLD {
            self.flush()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), IndexerError> {
        if !self.pending.is_empty() {
            self.file.write_all(&self.pending)?;
            self.file.sync_data()?;
            self.pending.clear();
            self.pending_count = 0;
        }
        Ok(())
    }
}
