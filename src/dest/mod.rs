//! Destination collaborators: capability traits and the file destination.
//!
//! A destination is either sequential-only or random-accessible; as with
//! sources, the capability is fixed at construction through the
//! `ImageDestination` enum.

pub mod file;

pub use file::FileDestination;

use crate::error::{ImageError, Result};
use crate::stream::ChunkSink;
use async_trait::async_trait;

/// Plain write path against a pre-sized target. Chunks arrive gapless.
#[async_trait]
pub trait StreamDestination: Send {
    async fn create_write_stream(&mut self) -> Result<Box<dyn ChunkSink>>;
}

/// Adds the sparse write path (position-tagged chunks, holes skipped) and
/// positioned reads/writes for deferred configuration.
#[async_trait]
pub trait RandomDestination: StreamDestination {
    async fn create_sparse_write_stream(&mut self) -> Result<Box<dyn ChunkSink>>;
    async fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<usize>;
    async fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()>;
    async fn flush(&mut self) -> Result<()>;
    fn size(&self) -> u64;
}

/// Capability-tagged destination, fixed at construction.
pub enum ImageDestination {
    Stream(Box<dyn StreamDestination>),
    Random(Box<dyn RandomDestination>),
}

impl ImageDestination {
    pub fn is_random(&self) -> bool {
        matches!(self, ImageDestination::Random(_))
    }

    pub async fn create_write_stream(&mut self) -> Result<Box<dyn ChunkSink>> {
        match self {
            ImageDestination::Stream(dest) => dest.create_write_stream().await,
            ImageDestination::Random(dest) => dest.create_write_stream().await,
        }
    }

    pub async fn create_sparse_write_stream(&mut self) -> Result<Box<dyn ChunkSink>> {
        match self {
            ImageDestination::Stream(_) => Err(ImageError::NotSupported(
                "sparse writes against a sequential destination".to_string(),
            )),
            ImageDestination::Random(dest) => dest.create_sparse_write_stream().await,
        }
    }
}
