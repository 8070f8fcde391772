//! Block-granularity presence map derived once from a frozen ledger.
//!
//! A block is `Discard` only when its whole byte range is covered by
//! discarded chunks; everything else, including ranges the ledger knows
//! nothing about, is conservatively `Present` and must be transmitted.

use crate::ledger::chunk::Chunk;
use crate::ledger::disk::FrozenLedger;

pub const DEFAULT_BLOCK_SIZE: u64 = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockClass {
    Present,
    Discard,
}

/// Run of same-classification blocks. `start_block` and `end_block` are
/// inclusive block indices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockRange {
    pub start_block: u64,
    pub end_block: u64,
    pub class: BlockClass,
    /// Carried for format compatibility; nothing computes or verifies it.
    pub checksum: Option<String>,
}

impl BlockRange {
    fn new(start_block: u64, end_block: u64, class: BlockClass) -> Self {
        Self {
            start_block,
            end_block,
            class,
            checksum: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BlockMap {
    pub block_size: u64,
    pub image_size: u64,
    pub ranges: Vec<BlockRange>,
}

impl BlockMap {
    /// The final partial block rounds up: an image whose size is not a
    /// multiple of `block_size` still gets full coverage.
    pub fn from_ledger(ledger: &FrozenLedger, block_size: u64) -> Self {
        let image_size = ledger.capacity();
        let block_count = image_size.div_ceil(block_size);
        let discarded = coalesce(ledger.discarded());

        // Blocks fully inside a coalesced discard interval. The ledger keeps
        // data and discards disjoint, so full coverage by discards implies no
        // data intersection.
        let mut discard_blocks: Vec<(u64, u64)> = Vec::new();
        for (start, end) in discarded {
            let lo = start.div_ceil(block_size);
            let hi = if end == image_size - 1 {
                block_count - 1
            } else {
                match ((end + 1) / block_size).checked_sub(1) {
                    Some(hi) => hi,
                    None => continue,
                }
            };
            if lo <= hi {
                discard_blocks.push((lo, hi));
            }
        }

        let mut ranges = Vec::new();
        let mut next_block = 0u64;
        for (lo, hi) in discard_blocks {
            if next_block < lo {
                ranges.push(BlockRange::new(next_block, lo - 1, BlockClass::Present));
            }
            ranges.push(BlockRange::new(lo, hi, BlockClass::Discard));
            next_block = hi + 1;
        }
        if next_block < block_count {
            ranges.push(BlockRange::new(
                next_block,
                block_count - 1,
                BlockClass::Present,
            ));
        }

        Self {
            block_size,
            image_size,
            ranges,
        }
    }

    /// Present ranges as inclusive byte intervals, clipped to the image size.
    pub fn present_byte_ranges(&self) -> Vec<(u64, u64)> {
        self.ranges
            .iter()
            .filter(|r| r.class == BlockClass::Present)
            .map(|r| {
                let start = r.start_block * self.block_size;
                let end = ((r.end_block + 1) * self.block_size).min(self.image_size) - 1;
                (start, end)
            })
            .collect()
    }
}

/// Merges adjacent or touching discard chunks into maximal byte intervals.
fn coalesce<'a>(chunks: impl Iterator<Item = &'a Chunk>) -> Vec<(u64, u64)> {
    let mut merged: Vec<(u64, u64)> = Vec::new();
    for chunk in chunks {
        match merged.last_mut() {
            Some((_, end)) if chunk.start <= *end + 1 => {
                *end = (*end).max(chunk.end);
            }
            _ => merged.push((chunk.start, chunk.end)),
        }
    }
    merged
}
