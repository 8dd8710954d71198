//! Volume: the day-to-day aggregate of a super block, an indexer, and an
//! in-memory needle cache.
//!
//! A `Volume` is also a [`VolumeSink`], so one volume's super block can
//! `compress` directly into a freshly-created sibling volume.

use crate::cache::{NeedleCache, NeedleCacheEntry};
use crate::error::Result;
use crate::indexer::{FileIndexer, Indexer};
use crate::needle::NeedleCodec;
use crate::superblock::{SuperBlock, SuperBlockOptions};
use std::path::Path;

/// Sink a super block's `compress` operation writes live needles into.
pub trait VolumeSink {
    fn write(&mut self, key: i64, cookie: i64, payload: &[u8]) -> Result<()>;
    fn flush(&mut self) -> Result<()>;
}

/// Combines a [`SuperBlock`] handle, a [`FileIndexer`], and an in-memory
/// [`NeedleCache`]. Runs Recovery once at construction time to populate both.
pub struct Volume<C: NeedleCodec> {
    super_block: SuperBlock<C>,
    indexer: FileIndexer,
    cache: NeedleCache,
}

impl<C: NeedleCodec> Volume<C> {
    pub fn open<P: AsRef<Path>>(path: P, codec: C, options: SuperBlockOptions) -> Result<Self> {
        let path = path.as_ref();
        let idx_path = path.with_extension("idx");

        let mut super_block = SuperBlock::open(path, codec, options)?;
        let mut indexer = if idx_path.exists() {
            FileIndexer::open(&idx_path)?
        } else {
            FileIndexer::create(&idx_path)?
        };

        let mut cache = NeedleCache::new();
        super_block.recover(&mut cache, &mut indexer, 0)?;

        Ok(Self {
            super_block,
            indexer,
            cache,
        })
    }

    pub fn get(&mut self, key: i64) -> Result<Option<Vec<u8>>> {
        let entry = match self.cache.get(&key) {
            Some(e) if e.is_live() => *e,
            _ => return Ok(None),
        };
        let slot = match entry.slot {
            crate::cache::SlotState::Live(s) => s,
            crate::cache::SlotState::Tombstone => return Ok(None),
        };
        let mut buf = vec![0u8; entry.framed_size as usize];
        self.super_block.get(slot, &mut buf)?;
        Ok(Some(buf))
    }

    pub fn put(&mut self, key: i64, cookie: i64, payload: &[u8]) -> Result<()> {
        let (slot, framed) = self.super_block.add(key, cookie, payload)?;
        self.indexer.add(key, slot, framed)?;
        self.cache.insert(key, NeedleCacheEntry::live(slot, framed));
        Ok(())
    }

    pub fn delete(&mut self, key: i64) -> Result<()> {
        if let Some(entry) = self.cache.get(&key).copied() {
            if let crate::cache::SlotState::Live(slot) = entry.slot {
                self.super_block.del(slot)?;
                self.cache.insert(key, NeedleCacheEntry::tombstone(entry.framed_size));
            }
        }
        Ok(())
    }

    pub fn compact_into<P: AsRef<Path>>(&self, dest_path: P, codec: C) -> Result<()> {
        let options = SuperBlockOptions::with_codec(&codec);
        let mut dest = Volume::open(dest_path, codec, options)?;
        self.super_block.compress(&mut dest)?;
        Ok(())
    }

    pub fn cache(&self) -> &NeedleCache {
        &self.cache
    }
}

impl<C: NeedleCodec> VolumeSink for Volume<C> {
    fn write(&mut self, key: i64, cookie: i64, payload: &[u8]) -> Result<()> {
        self.put(key, cookie, payload)
    }

    fn flush(&mut self) -> Result<()> {
        self.super_block.flush()?;
        self.indexer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::needle::StandardNeedleCodec;
    use tempfile::NamedTempFile;

    fn open(path: &Path) -> Volume<StandardNeedleCodec> {
        let codec = StandardNeedleCodec::default();
        let options = SuperBlockOptions::with_codec(&codec);
        Volume::open(path, codec, options).unwrap()
    }

    #[test]
    fn put_get_delete_roundtrip() {
        let tmp = NamedTempFile::new().unwrap();
        let mut vol = open(tmp.path());

        vol.put(1, 1, b"alive").unwrap();
        assert_eq!(vol.get(1).unwrap().is_some(), true);

        vol.delete(1).unwrap();
        assert!(vol.get(1).unwrap().is_none());
    }

    #[test]
    fn compact_drops_tombstones() {
        let tmp = NamedTempFile::new().unwrap();
        let dest = NamedTempFile::new().unwrap();
        let mut vol = open(tmp.path());

        vol.put(1, 1, b"keep").unwrap();
        vol.put(2, 1, b"drop").unwrap();
        vol.delete(2).unwrap();

        vol.compact_into(dest.path(), StandardNeedleCodec::default())
            .unwrap();

        let mut reopened = open(dest.path());
        assert!(reopened.get(1).unwrap().is_some());
        assert!(reopened.get(2).unwrap().is_none());
    }
}
