//! Materialization: fully copy a sequential-only source into a temporary
//! file so it can be treated as random-readable. The temp file is deleted
//! when the materialized source goes out of scope, on every exit path.

use crate::error::Result;
use crate::source::{FileSource, RandomSource, SourceMetadata, StreamSource};
use crate::stream::ImageRead;
use async_trait::async_trait;
use tempfile::TempPath;
use tokio::io::AsyncWriteExt;
use tracing::debug;

pub struct MaterializedSource {
    inner: FileSource,
    _temp: TempPath,
}

/// Copies `source` into a fresh temp file and reopens it as a file source.
/// This is the one stage that buffers the whole image.
pub async fn materialize(source: &mut dyn StreamSource) -> Result<MaterializedSource> {
    let temp = tempfile::NamedTempFile::new()?.into_temp_path();
    debug!(path = %temp.display(), "materializing sequential source");
    let mut file = tokio::fs::File::create(&temp).await?;
    let mut stream = source.create_read_stream().await?;
    while let Some(chunk) = stream.next_chunk().await? {
        file.write_all(&chunk.data).await?;
    }
    file.flush().await?;
    file.sync_all().await?;
    drop(file);
    let inner = FileSource::open(&temp).await?;
    Ok(MaterializedSource { inner, _temp: temp })
}

#[async_trait]
impl StreamSource for MaterializedSource {
    async fn metadata(&mut self) -> Result<SourceMetadata> {
        self.inner.metadata().await
    }

    async fn create_read_stream(&mut self) -> Result<Box<dyn ImageRead>> {
        self.inner.create_read_stream().await
    }
}

#[async_trait]
impl RandomSource for MaterializedSource {
    async fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<usize> {
        self.inner.read_at(buf, offset).await
    }
}
