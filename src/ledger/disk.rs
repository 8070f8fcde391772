//! The `VirtualDisk` ledger and the `DiskAccess` view filesystem sessions
//! write through.
//!
//! A `VirtualDisk` is bound to exactly one random-readable source. It never
//! mutates the source: writes and discards are recorded as sorted,
//! non-overlapping chunks and reconciled into the byte stream later by the
//! overlay stage. `DestinationDisk` implements the same view directly against
//! a random-accessible destination for the deferred-configuration path.

use crate::dest::RandomDestination;
use crate::error::{ImageError, Result};
use crate::ledger::chunk::{Chunk, ChunkKind};
use crate::source::RandomSource;
use crate::stream::ImageRead;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Shared disk view. Sessions over distinct partitions are independent, but
/// all of them funnel through one handle, so same-partition access is
/// serialized by the lock.
pub type DiskHandle = Arc<Mutex<dyn DiskAccess>>;

/// The configure engine's view of a disk: capacity, reads, and the two
/// recording operations. Implemented by `VirtualDisk` (records into the
/// ledger) and `DestinationDisk` (writes through to the destination).
#[async_trait]
pub trait DiskAccess: Send {
    async fn capacity(&mut self) -> Result<u64>;
    async fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<()>;
    async fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()>;
    async fn discard(&mut self, offset: u64, length: u64) -> Result<()>;
    async fn flush(&mut self) -> Result<()>;
}

/// Immutable snapshot of a ledger, taken the instant streaming begins.
#[derive(Debug, Clone)]
pub struct FrozenLedger {
    capacity: u64,
    chunks: Vec<Chunk>,
}

impl FrozenLedger {
    pub(crate) fn new(capacity: u64, chunks: Vec<Chunk>) -> Self {
        Self { capacity, chunks }
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// All recorded chunks, ascending and non-overlapping. Implicit gaps mean
    /// "unchanged, pass through from the source".
    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn into_chunks(self) -> Vec<Chunk> {
        self.chunks
    }

    pub fn discarded(&self) -> impl Iterator<Item = &Chunk> {
        self.chunks.iter().filter(|c| !c.is_data())
    }
}

/// Write-recording ledger over a random-readable source.
pub struct VirtualDisk {
    source: Box<dyn RandomSource>,
    capacity: Option<u64>,
    chunks: Vec<Chunk>,
    frozen: bool,
}

impl VirtualDisk {
    pub fn new(source: Box<dyn RandomSource>) -> Self {
        Self {
            source,
            capacity: None,
            chunks: Vec::new(),
            frozen: false,
        }
    }

    /// Queries the source once; later calls return the cached value.
    pub async fn capacity(&mut self) -> Result<u64> {
        if let Some(capacity) = self.capacity {
            return Ok(capacity);
        }
        let metadata = self.source.metadata().await?;
        self.capacity = Some(metadata.size);
        Ok(metadata.size)
    }

    /// Records `data` at `offset`. Overlapped chunks of either kind are
    /// carved so the new data wins in the overlapped sub-range.
    pub fn write(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        if self.frozen {
            return Err(ImageError::LedgerFrozen);
        }
        if data.is_empty() {
            return Ok(());
        }
        self.insert(Chunk::data(offset, Bytes::copy_from_slice(data)));
        Ok(())
    }

    /// Records a discard over `[offset, offset + length)`. Sub-ranges already
    /// holding data keep it, whatever order the calls arrive in.
    pub fn discard(&mut self, offset: u64, length: u64) -> Result<()> {
        if self.frozen {
            return Err(ImageError::LedgerFrozen);
        }
        if length == 0 {
            return Ok(());
        }
        let end = offset + length - 1;
        let mut gaps = Vec::new();
        let mut cursor = offset;
        for chunk in self
            .chunks
            .iter()
            .filter(|c| c.is_data() && c.intersects(offset, end))
        {
            if chunk.start > cursor {
                gaps.push((cursor, chunk.start - 1));
            }
            cursor = cursor.max(chunk.end + 1);
            if cursor > end {
                break;
            }
        }
        if cursor <= end {
            gaps.push((cursor, end));
        }
        for (start, gap_end) in gaps {
            self.insert(Chunk::discard(start, gap_end - start + 1));
        }
        Ok(())
    }

    fn insert(&mut self, new: Chunk) {
        let (start, end) = (new.start, new.end);
        let mut rebuilt = Vec::with_capacity(self.chunks.len() + 2);
        for chunk in self.chunks.drain(..) {
            if !chunk.intersects(start, end) {
                rebuilt.push(chunk);
                continue;
            }
            let (left, right) = chunk.carve(start, end);
            if let Some(left) = left {
                rebuilt.push(left);
            }
            if let Some(right) = right {
                rebuilt.push(right);
            }
        }
        rebuilt.push(new);
        rebuilt.sort_by_key(|c| c.start);
        self.chunks = rebuilt;
    }

    pub fn known_chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn discarded_chunks(&self) -> impl Iterator<Item = &Chunk> {
        self.chunks.iter().filter(|c| !c.is_data())
    }

    /// Flips the ledger immutable and snapshots it for the streaming stages.
    pub async fn freeze(&mut self) -> Result<FrozenLedger> {
        if self.frozen {
            return Err(ImageError::LedgerFrozen);
        }
        let capacity = self.capacity().await?;
        self.frozen = true;
        Ok(FrozenLedger {
            capacity,
            chunks: self.chunks.clone(),
        })
    }

    /// Opens the source's sequential stream. Call after `freeze`; the overlay
    /// stage pairs the stream with the frozen snapshot.
    pub async fn create_source_stream(&mut self) -> Result<Box<dyn ImageRead>> {
        self.source.create_read_stream().await
    }
}

#[async_trait]
impl DiskAccess for VirtualDisk {
    async fn capacity(&mut self) -> Result<u64> {
        VirtualDisk::capacity(self).await
    }

    /// Read-through: source bytes with recorded data overlaid and discarded
    /// ranges reading as zero.
    async fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<()> {
        if buf.is_empty() {
            return Ok(());
        }
        self.source.read_at(buf, offset).await?;
        let end = offset + buf.len() as u64 - 1;
        for chunk in self.chunks.iter().filter(|c| c.intersects(offset, end)) {
            let lo = chunk.start.max(offset);
            let hi = chunk.end.min(end);
            let target = (lo - offset) as usize;
            let len = (hi - lo + 1) as usize;
            match &chunk.kind {
                ChunkKind::Data(data) => {
                    let from = (lo - chunk.start) as usize;
                    buf[target..target + len].copy_from_slice(&data[from..from + len]);
                }
                ChunkKind::Discard => {
                    buf[target..target + len].fill(0);
                }
            }
        }
        Ok(())
    }

    async fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        self.write(offset, data)
    }

    async fn discard(&mut self, offset: u64, length: u64) -> Result<()> {
        VirtualDisk::discard(self, offset, length)
    }

    async fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Write-through view over a random-accessible destination, used when
/// configuration is deferred until after the plain stream copy.
pub struct DestinationDisk {
    dest: Box<dyn RandomDestination>,
}

impl DestinationDisk {
    pub fn new(dest: Box<dyn RandomDestination>) -> Self {
        Self { dest }
    }
}

#[async_trait]
impl DiskAccess for DestinationDisk {
    async fn capacity(&mut self) -> Result<u64> {
        Ok(self.dest.size())
    }

    async fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<()> {
        self.dest.read_at(buf, offset).await?;
        Ok(())
    }

    async fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        self.dest.write_at(offset, data).await
    }

    async fn discard(&mut self, _offset: u64, _length: u64) -> Result<()> {
        Err(ImageError::NotSupported(
            "discard against a destination disk".to_string(),
        ))
    }

    async fn flush(&mut self) -> Result<()> {
        self.dest.flush().await
    }
}
