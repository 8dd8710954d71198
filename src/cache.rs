//! Caller-owned in-memory index of live/deleted needles.
//!
//! The super block never owns this map itself — [`crate::superblock::SuperBlock::recover`]
//! and [`crate::superblock::SuperBlock::dump`] populate one handed in by the
//! caller, matching the spec's "caller-owned key -> (slot_offset, framed_size)
//! map" design.

use std::collections::HashMap;

/// Where a cached key's bytes live, or that they no longer do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Live(u32),
    Tombstone,
}

/// One entry in the in-memory needle cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NeedleCacheEntry {
    pub slot: SlotState,
    pub framed_size: i32,
}

impl NeedleCacheEntry {
    pub fn live(slot: u32, framed_size: i32) -> Self {
        Self {
            slot: SlotState::Live(slot),
            framed_size,
        }
    }

    pub fn tombstone(framed_size: i32) -> Self {
        Self {
            slot: SlotState::Tombstone,
            framed_size,
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self.slot, SlotState::Live(_))
    }
}

/// `key -> (slot_offset_or_tombstone, framed_size)`, the type Recovery rebuilds.
pub type NeedleCache = HashMap<i64, NeedleCacheEntry>;
