//! Streaming model: position-tagged chunks, the pull-stream and sink traits,
//! and the pump that drives one into the other.
//!
//! Submodules:
//! - `overlay`: merges a frozen ledger into the live sequential stream
//! - `blockmap`: block-granularity presence map derived from a frozen ledger
//! - `sparse`: filters a stream down to the blocks that must be transmitted
//! - `progress`: the sample emitted per pumped chunk

pub mod blockmap;
pub mod overlay;
pub mod progress;
pub mod sparse;

pub use blockmap::{BlockClass, BlockMap, BlockRange, DEFAULT_BLOCK_SIZE};
pub use overlay::OverlayStream;
pub use progress::ProgressSample;
pub use sparse::SparseStream;

use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Instant;

/// One stream chunk: `data` belongs at absolute offset `position`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageChunk {
    pub position: u64,
    pub data: Bytes,
}

impl ImageChunk {
    /// Inclusive end offset. Chunks are never empty.
    pub fn end(&self) -> u64 {
        self.position + self.data.len() as u64 - 1
    }
}

/// Pull stream of image chunks. Pulling means destination backpressure
/// governs the source read rate for free.
#[async_trait]
pub trait ImageRead: Send {
    async fn next_chunk(&mut self) -> Result<Option<ImageChunk>>;
}

#[async_trait]
pub trait ChunkSink: Send {
    async fn write_chunk(&mut self, chunk: ImageChunk) -> Result<()>;
    async fn finish(&mut self) -> Result<()>;
}

/// Drives `stream` into `sink` until exhaustion, emitting a progress sample
/// after every chunk. Returns the number of bytes written. Any error from
/// either side aborts the pump.
pub async fn pipe<F>(
    stream: &mut dyn ImageRead,
    sink: &mut dyn ChunkSink,
    mut progress: F,
) -> Result<u64>
where
    F: FnMut(ProgressSample) + Send,
{
    let started = Instant::now();
    let mut bytes_processed = 0u64;
    while let Some(chunk) = stream.next_chunk().await? {
        let len = chunk.data.len() as u64;
        let stream_position = chunk.position + len;
        sink.write_chunk(chunk).await?;
        bytes_processed += len;
        progress(ProgressSample {
            bytes_processed,
            stream_position,
            elapsed: started.elapsed(),
            compressed_bytes_processed: None,
        });
    }
    Ok(bytes_processed)
}
