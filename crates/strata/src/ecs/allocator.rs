//! # Allocator — Recycling Entity Ids From a Bounded Range
//!
//! Entity ids ([`Eid`]) are plain integers drawn from a fixed inclusive range.
//! Instead of a stack of freed ids, the allocator keeps a sorted list of
//! disjoint free *blocks*:
//!
//! ```text
//! range 0..=9, ids 0,1,2,5 handed out, 1 released:
//!
//! blocks: [1..=1] [3..=4] [6..=9]
//! ```
//!
//! `acquire` always takes the lowest free id, so a released id is only reissued
//! once every smaller free id has been used. `release` re-inserts an id and
//! merges it with neighbouring blocks, keeping the list minimal.

use crate::error::{EcsError, Result};

/// Integer entity identifier. Indexes component storage directly.
pub type Eid = u32;

/// An inclusive run of free ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Block {
    low: Eid,
    high: Eid,
}

/// Issues and recycles [`Eid`]s from `min..=max`.
#[derive(Debug, Clone)]
pub struct IdAllocator {
    /// Sorted, disjoint, non-adjacent free blocks.
    blocks: Vec<Block>,
    min: Eid,
    max: Eid,
}

impl IdAllocator {
    /// Create an allocator whose whole range `min..=max` is free.
    pub fn new(min: Eid, max: Eid) -> Self {
        debug_assert!(min <= max, "empty id range {min}..={max}");
        Self {
            blocks: vec![Block { low: min, high: max }],
            min,
            max,
        }
    }

    /// Take the lowest free id.
    pub fn acquire(&mut self) -> Result<Eid> {
        let Some(first) = self.blocks.first_mut() else {
            return Err(EcsError::AllocatorExhausted);
        };

        let eid = first.low;
        if first.low == first.high {
            self.blocks.remove(0);
        } else {
            first.low += 1;
        }
        Ok(eid)
    }

    /// Return `eid` to the free list.
    ///
    /// Returns `false` (and changes nothing) if `eid` is outside the range or
    /// already free.
    pub fn release(&mut self, eid: Eid) -> bool {
        if eid < self.min || eid > self.max {
            log::warn!("release of out-of-range entity id {eid}");
            return false;
        }

        // First block starting after `eid`.
        let next = self.blocks.partition_point(|b| b.low <= eid);

        if next > 0 && self.blocks[next - 1].high >= eid {
            log::warn!("release of already free entity id {eid}");
            return false;
        }

        let joins_prev = next > 0 && self.blocks[next - 1].high + 1 == eid;
        let joins_next = next < self.blocks.len() && eid + 1 == self.blocks[next].low;

        match (joins_prev, joins_next) {
            (true, true) => {
                self.blocks[next - 1].high = self.blocks[next].high;
                self.blocks.remove(next);
            }
            (true, false) => self.blocks[next - 1].high = eid,
            (false, true) => self.blocks[next].low = eid,
            (false, false) => self.blocks.insert(next, Block { low: eid, high: eid }),
        }
        true
    }

    /// Whether `eid` is currently free.
    pub fn is_free(&self, eid: Eid) -> bool {
        let next = self.blocks.partition_point(|b| b.low <= eid);
        next > 0 && self.blocks[next - 1].high >= eid
    }

    /// Number of free ids left.
    pub fn free_count(&self) -> usize {
        self.blocks
            .iter()
            .map(|b| (b.high - b.low) as usize + 1)
            .sum()
    }

    /// Number of disjoint free blocks. One means no fragmentation.
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Total size of the configured range.
    pub fn capacity(&self) -> usize {
        (self.max - self.min) as usize + 1
    }
}
