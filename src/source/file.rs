//! Random-readable source over a local file.

use crate::error::{ImageError, Result};
use crate::source::{ChunkedReader, READ_CHUNK_SIZE, RandomSource, SourceMetadata, StreamSource};
use crate::stream::ImageRead;
use async_trait::async_trait;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

pub struct FileSource {
    path: PathBuf,
    file: File,
    size: Option<u64>,
}

impl FileSource {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).await?;
        Ok(Self {
            path,
            file,
            size: None,
        })
    }
}

#[async_trait]
impl StreamSource for FileSource {
    async fn metadata(&mut self) -> Result<SourceMetadata> {
        if self.size.is_none() {
            let metadata = self
                .file
                .metadata()
                .await
                .map_err(|e| ImageError::Metadata(format!("{}: {e}", self.path.display())))?;
            self.size = Some(metadata.len());
        }
        Ok(SourceMetadata {
            size: self.size.unwrap(),
            compressed_size: None,
        })
    }

    /// Each stream gets its own handle so positioned reads on the source
    /// handle cannot disturb it.
    async fn create_read_stream(&mut self) -> Result<Box<dyn ImageRead>> {
        let file = File::open(&self.path).await?;
        Ok(Box::new(ChunkedReader::new(file, READ_CHUNK_SIZE)))
    }
}

#[async_trait]
impl RandomSource for FileSource {
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
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn fixture(content: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content).unwrap();
        file.flush().unwrap();
        file
    }

    #[tokio::test]
    async fn test_metadata_reports_file_size() {
        let fixture = fixture(&[7u8; 12345]);
        let mut source = FileSource::open(fixture.path()).await.unwrap();
        let metadata = source.metadata().await.unwrap();
        assert_eq!(metadata.size, 12345);
        assert_eq!(metadata.compressed_size, None);
    }

    #[tokio::test]
    async fn test_read_at_returns_requested_range() {
        let content: Vec<u8> = (0..1000).map(|i| (i % 256) as u8).collect();
        let fixture = fixture(&content);
        let mut source = FileSource::open(fixture.path()).await.unwrap();
        let mut buf = vec![0u8; 100];
        let n = source.read_at(&mut buf, 500).await.unwrap();
        assert_eq!(n, 100);
        assert_eq!(buf, &content[500..600]);
    }

    #[tokio::test]
    async fn test_read_at_short_at_end_of_file() {
        let fixture = fixture(&[1u8; 100]);
        let mut source = FileSource::open(fixture.path()).await.unwrap();
        let mut buf = vec![0u8; 64];
        let n = source.read_at(&mut buf, 80).await.unwrap();
        assert_eq!(n, 20);
    }

    #[tokio::test]
    async fn test_stream_covers_whole_file() {
        let content: Vec<u8> = (0..200_000).map(|i| (i % 256) as u8).collect();
        let fixture = fixture(&content);
        let mut source = FileSource::open(fixture.path()).await.unwrap();
        let mut stream = source.create_read_stream().await.unwrap();
        let mut rebuilt = Vec::new();
        while let Some(chunk) = stream.next_chunk().await.unwrap() {
            assert_eq!(chunk.position, rebuilt.len() as u64);
            rebuilt.extend_from_slice(&chunk.data);
        }
        assert_eq!(rebuilt, content);
    }
}
