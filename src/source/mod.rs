//! Source collaborators: capability traits, the URL registry, and the
//! adapter that turns any async reader into a chunk stream.
//!
//! A source is either sequential-only or random-readable; the capability is
//! fixed at construction through the `ImageSource` enum, so the orchestrator
//! decides by matching instead of probing at runtime.
//!
//! Submodules:
//! - `file`: random-readable source over a local file
//! - `s3`: sequential-only source streaming from an object store
//! - `materialize`: copies a sequential source into a scoped temp file

pub mod file;
pub mod materialize;
pub mod s3;

pub use file::FileSource;
pub use materialize::{MaterializedSource, materialize};
pub use s3::ObjectStoreSource;

use crate::error::{ImageError, Result};
use crate::stream::{ImageChunk, ImageRead};
use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};

pub const READ_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceMetadata {
    pub size: u64,
    pub compressed_size: Option<u64>,
}

/// Sequential access: a gapless, monotonic chunk stream covering the whole
/// image, plus metadata.
#[async_trait]
pub trait StreamSource: Send {
    async fn metadata(&mut self) -> Result<SourceMetadata>;
    async fn create_read_stream(&mut self) -> Result<Box<dyn ImageRead>>;
}

/// Adds positioned reads. Returns the number of bytes read, which is short
/// only at end of image.
#[async_trait]
pub trait RandomSource: StreamSource {
    async fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<usize>;
}

/// Capability-tagged source, fixed at construction.
pub enum ImageSource {
    Stream(Box<dyn StreamSource>),
    Random(Box<dyn RandomSource>),
}

impl ImageSource {
    pub fn is_random(&self) -> bool {
        matches!(self, ImageSource::Random(_))
    }

    pub async fn metadata(&mut self) -> Result<SourceMetadata> {
        match self {
            ImageSource::Stream(source) => source.metadata().await,
            ImageSource::Random(source) => source.metadata().await,
        }
    }

    pub async fn create_read_stream(&mut self) -> Result<Box<dyn ImageRead>> {
        match self {
            ImageSource::Stream(source) => source.create_read_stream().await,
            ImageSource::Random(source) => source.create_read_stream().await,
        }
    }
}

/// Adapts any async reader into an `ImageRead` of fixed-size chunks. Chunks
/// come out gapless and monotonic by construction.
pub struct ChunkedReader<R> {
    inner: R,
    position: u64,
    chunk_size: usize,
}

impl<R> ChunkedReader<R> {
    pub fn new(inner: R, chunk_size: usize) -> Self {
        let chunk_size = if chunk_size == 0 {
            READ_CHUNK_SIZE
        } else {
            chunk_size
        };
        Self {
            inner,
            position: 0,
            chunk_size,
        }
    }
}

#[async_trait]
impl<R> ImageRead for ChunkedReader<R>
where
    R: AsyncRead + Unpin + Send,
{
    async fn next_chunk(&mut self) -> Result<Option<ImageChunk>> {
        let mut buf = vec![0u8; self.chunk_size];
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.inner.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        if filled == 0 {
            return Ok(None);
        }
        buf.truncate(filled);
        let chunk = ImageChunk {
            position: self.position,
            data: Bytes::from(buf),
        };
        self.position += filled as u64;
        Ok(Some(chunk))
    }
}

/// Resolves an input URL against the known schemes, `file:` first. The
/// object-store client is constructed by the caller and passed in; there is
/// no process-wide client state.
pub async fn open_source(url: &str, s3: &aws_sdk_s3::Client) -> Result<ImageSource> {
    if let Some(path) = url.strip_prefix("file://") {
        return Ok(ImageSource::Random(Box::new(FileSource::open(path).await?)));
    }
    if let Some(rest) = url.strip_prefix("img-s3://") {
        let source = ObjectStoreSource::from_url_parts(s3.clone(), rest)
            .ok_or_else(|| ImageError::UnsupportedSource(url.to_string()))?;
        return Ok(ImageSource::Stream(Box::new(source)));
    }
    Err(ImageError::UnsupportedSource(url.to_string()))
}
