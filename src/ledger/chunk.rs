//! Ledger chunks: inclusive byte intervals carrying recorded data or a
//! discard marker.

use bytes::Bytes;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkKind {
    Data(Bytes),
    Discard,
}

/// One recorded interval. `start` and `end` are inclusive byte offsets;
/// a `Data` chunk's buffer length always equals `end - start + 1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub start: u64,
    pub end: u64,
    pub kind: ChunkKind,
}

impl Chunk {
    pub fn data(start: u64, data: Bytes) -> Self {
        debug_assert!(!data.is_empty());
        let end = start + data.len() as u64 - 1;
        Self {
            start,
            end,
            kind: ChunkKind::Data(data),
        }
    }

    pub fn discard(start: u64, length: u64) -> Self {
        debug_assert!(length > 0);
        Self {
            start,
            end: start + length - 1,
            kind: ChunkKind::Discard,
        }
    }

    /// Interval length in bytes; chunks are never empty.
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn is_data(&self) -> bool {
        matches!(self.kind, ChunkKind::Data(_))
    }

    pub fn intersects(&self, start: u64, end: u64) -> bool {
        self.start <= end && start <= self.end
    }

    /// Split off the parts of this chunk lying outside `[start, end]`.
    /// Returns the remainder to the left of `start` and the remainder to the
    /// right of `end`; `Data` remainders keep their slice of the buffer.
    pub fn carve(&self, start: u64, end: u64) -> (Option<Chunk>, Option<Chunk>) {
        let left = if self.start < start {
            let kind = match &self.kind {
                ChunkKind::Data(data) => {
                    ChunkKind::Data(data.slice(0..(start - self.start) as usize))
                }
                ChunkKind::Discard => ChunkKind::Discard,
            };
            Some(Chunk {
                start: self.start,
                end: start - 1,
                kind,
            })
        } else {
            None
        };
        let right = if self.end > end {
            let kind = match &self.kind {
                ChunkKind::Data(data) => {
                    ChunkKind::Data(data.slice((end + 1 - self.start) as usize..))
                }
                ChunkKind::Discard => ChunkKind::Discard,
            };
            Some(Chunk {
                start: end + 1,
                end: self.end,
                kind,
            })
        } else {
            None
        };
        (left, right)
    }
}
