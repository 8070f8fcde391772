//! Random-accessible destination over a local file. The target is pre-sized
//! at creation, so the sparse path can skip holes and still leave a
//! correctly-sized image.

use crate::dest::{RandomDestination, StreamDestination};
use crate::error::{ImageError, Result};
use crate::stream::{ChunkSink, ImageChunk};
use async_trait::async_trait;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

pub struct FileDestination {
    path: PathBuf,
    file: File,
    size: u64,
}

impl FileDestination {
    pub async fn create(path: impl AsRef<Path>, size: u64) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .await?;
        file.set_len(size).await?;
        Ok(Self { path, file, size })
    }

    async fn open_handle(&self) -> Result<File> {
        Ok(OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)
            .await?)
    }
}

#[async_trait]
impl StreamDestination for FileDestination {
    async fn create_write_stream(&mut self) -> Result<Box<dyn ChunkSink>> {
        Ok(Box::new(FileWriteSink {
            file: self.open_handle().await?,
            position: 0,
        }))
    }
}

#[async_trait]
impl RandomDestination for FileDestination {
    async fn create_sparse_write_stream(&mut self) -> Result<Box<dyn ChunkSink>> {
        Ok(Box::new(SparseFileWriteSink {
            file: self.open_handle().await?,
            position: 0,
        }))
    }

    async fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<usize> {
        self.file.seek(SeekFrom::Start(offset)).await?;
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.file.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(filled)
    }

    async fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset)).await?;
        self.file.write_all(data).await?;
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        self.file.flush().await?;
        self.file.sync_all().await?;
        Ok(())
    }

    fn size(&self) -> u64 {
        self.size
    }
}

/// Plain sequential sink. Chunks must arrive gapless and in order.
struct FileWriteSink {
    file: File,
    position: u64,
}

#[async_trait]
impl ChunkSink for FileWriteSink {
    async fn write_chunk(&mut self, chunk: ImageChunk) -> Result<()> {
        if chunk.position != self.position {
            return Err(ImageError::StreamIntegrity(format!(
                "sequential sink expected byte {}, got {}",
                self.position, chunk.position
            )));
        }
        self.file.write_all(&chunk.data).await?;
        self.position += chunk.data.len() as u64;
        Ok(())
    }

    async fn finish(&mut self) -> Result<()> {
        self.file.flush().await?;
        self.file.sync_all().await?;
        Ok(())
    }
}

/// Sparse sink: seeks to each chunk's position, leaving skipped regions as
/// holes in the pre-sized file.
struct SparseFileWriteSink {
    file: File,
    position: u64,
}

#[async_trait]
impl ChunkSink for SparseFileWriteSink {
    async fn write_chunk(&mut self, chunk: ImageChunk) -> Result<()> {
        if chunk.position != self.position {
            self.file.seek(SeekFrom::Start(chunk.position)).await?;
            self.position = chunk.position;
        }
        self.file.write_all(&chunk.data).await?;
        self.position += chunk.data.len() as u64;
        Ok(())
    }

    async fn finish(&mut self) -> Result<()> {
        self.file.flush().await?;
        self.file.sync_all().await?;
        Ok(())
    }
}
