//! Overlay stream: reconciles a frozen ledger with the source's live
//! sequential stream.
//!
//! Incoming chunks must be gapless, monotonic, and cover exactly
//! `[0, capacity)`; that is a hard precondition on every source. Recorded
//! data is copied into the passthrough buffer at the shifted offset, so the
//! source's chunk boundaries survive downstream. Discard entries pass the
//! original bytes through untouched; only the blockmap cares about them.

use crate::error::{ImageError, Result};
use crate::ledger::chunk::{Chunk, ChunkKind};
use crate::ledger::disk::FrozenLedger;
use crate::stream::{ImageChunk, ImageRead};
use async_trait::async_trait;
use bytes::BytesMut;

pub struct OverlayStream {
    inner: Box<dyn ImageRead>,
    cursor: std::vec::IntoIter<Chunk>,
    current: Option<Chunk>,
    position: u64,
    capacity: u64,
}

impl OverlayStream {
    pub fn new(inner: Box<dyn ImageRead>, ledger: FrozenLedger) -> Self {
        let capacity = ledger.capacity();
        let mut cursor = ledger.into_chunks().into_iter();
        let current = cursor.next();
        Self {
            inner,
            cursor,
            current,
            position: 0,
            capacity,
        }
    }
}

#[async_trait]
impl ImageRead for OverlayStream {
    async fn next_chunk(&mut self) -> Result<Option<ImageChunk>> {
        let Some(chunk) = self.inner.next_chunk().await? else {
            if self.position != self.capacity {
                return Err(ImageError::StreamIntegrity(format!(
                    "source stream ended at byte {} of {}",
                    self.position, self.capacity
                )));
            }
            return Ok(None);
        };
        if chunk.data.is_empty() {
            return Err(ImageError::StreamIntegrity(
                "source emitted an empty chunk".to_string(),
            ));
        }
        if chunk.position != self.position {
            return Err(ImageError::StreamIntegrity(format!(
                "expected chunk at byte {}, got {}",
                self.position, chunk.position
            )));
        }
        let start = chunk.position;
        let end = chunk.end();
        if end + 1 > self.capacity {
            return Err(ImageError::StreamIntegrity(format!(
                "source stream runs past the image size ({} > {})",
                end + 1,
                self.capacity
            )));
        }

        let mut buf = BytesMut::from(&chunk.data[..]);
        while let Some(current) = &self.current {
            if current.intersects(start, end) {
                if let ChunkKind::Data(data) = &current.kind {
                    let start_shift = current.start as i64 - start as i64;
                    let end_shift = current.end as i64 - end as i64;
                    let source_start = (-start_shift.min(0)) as usize;
                    let source_end = data.len() - end_shift.max(0) as usize;
                    let target_start = start_shift.max(0) as usize;
                    buf[target_start..target_start + (source_end - source_start)]
                        .copy_from_slice(&data[source_start..source_end]);
                }
            }
            // An entry may span several incoming chunks; hold the cursor
            // until its end falls inside the current one.
            if current.end > end {
                break;
            }
            self.current = self.cursor.next();
        }

        self.position = end + 1;
        Ok(Some(ImageChunk {
            position: start,
            data: buf.freeze(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::collections::VecDeque;

    struct VecStream {
        chunks: VecDeque<ImageChunk>,
    }

    impl VecStream {
        fn split(content: &[u8], chunk_len: usize) -> Self {
            let mut chunks = VecDeque::new();
            let mut position = 0u64;
            for piece in content.chunks(chunk_len) {
                chunks.push_back(ImageChunk {
                    position,
                    data: Bytes::copy_from_slice(piece),
                });
                position += piece.len() as u64;
            }
            Self { chunks }
        }
    }

    #[async_trait]
    impl ImageRead for VecStream {
        async fn next_chunk(&mut self) -> Result<Option<ImageChunk>> {
            Ok(self.chunks.pop_front())
        }
    }

    async fn collect(mut stream: OverlayStream) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        while let Some(chunk) = stream.next_chunk().await? {
            assert_eq!(chunk.position, out.len() as u64);
            out.extend_from_slice(&chunk.data);
        }
        Ok(out)
    }

    /// Applies `writes` to a copy of `content` the random-access way, streams
    /// the same writes through the overlay, and compares byte for byte.
    async fn check_against_reference(
        content: &[u8],
        chunk_len: usize,
        writes: &[(u64, Vec<u8>)],
    ) {
        let mut reference = content.to_vec();
        let mut chunks = Vec::new();
        for (offset, data) in writes {
            let start = *offset as usize;
            reference[start..start + data.len()].copy_from_slice(data);
            chunks.push(Chunk::data(*offset, Bytes::copy_from_slice(data)));
        }
        chunks.sort_by_key(|c| c.start);
        let ledger = FrozenLedger::new(content.len() as u64, chunks);
        let overlay = OverlayStream::new(Box::new(VecStream::split(content, chunk_len)), ledger);
        assert_eq!(collect(overlay).await.unwrap(), reference);
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[tokio::test]
    async fn test_write_inside_one_source_chunk() {
        check_against_reference(&pattern(4000), 1000, &[(1200, vec![0xAA; 100])]).await;
    }

    #[tokio::test]
    async fn test_write_spanning_multiple_source_chunks() {
        check_against_reference(&pattern(4000), 1000, &[(500, vec![0xBB; 2500])]).await;
    }

    #[tokio::test]
    async fn test_write_aligned_to_chunk_boundaries() {
        check_against_reference(&pattern(4000), 1000, &[(1000, vec![0xCC; 1000])]).await;
    }

    #[tokio::test]
    async fn test_single_byte_at_both_ends() {
        check_against_reference(&pattern(4000), 1000, &[(0, vec![0xDD]), (3999, vec![0xEE])])
            .await;
    }

    #[tokio::test]
    async fn test_many_scattered_writes() {
        let writes: Vec<(u64, Vec<u8>)> = vec![
            (0, vec![1; 17]),
            (333, vec![2; 700]),
            (1999, vec![3; 2]),
            (2048, vec![4; 512]),
            (3583, vec![5; 417]),
        ];
        check_against_reference(&pattern(4000), 512, &writes).await;
    }

    #[tokio::test]
    async fn test_discards_pass_original_bytes_through() {
        let content = pattern(2000);
        let ledger = FrozenLedger::new(2000, vec![Chunk::discard(512, 512)]);
        let overlay = OverlayStream::new(Box::new(VecStream::split(&content, 600)), ledger);
        assert_eq!(collect(overlay).await.unwrap(), content);
    }

    #[tokio::test]
    async fn test_short_stream_is_an_integrity_error() {
        let content = pattern(1000);
        let ledger = FrozenLedger::new(2000, vec![]);
        let overlay = OverlayStream::new(Box::new(VecStream::split(&content, 400)), ledger);
        assert!(matches!(
            collect(overlay).await,
            Err(ImageError::StreamIntegrity(_))
        ));
    }

    #[tokio::test]
    async fn test_overlong_stream_is_an_integrity_error() {
        let content = pattern(3000);
        let ledger = FrozenLedger::new(2000, vec![]);
        let overlay = OverlayStream::new(Box::new(VecStream::split(&content, 1500)), ledger);
        assert!(matches!(
            collect(overlay).await,
            Err(ImageError::StreamIntegrity(_))
        ));
    }

    #[tokio::test]
    async fn test_gap_in_stream_is_an_integrity_error() {
        let mut stream = VecStream::split(&pattern(2000), 1000);
        stream.chunks.remove(0);
        let ledger = FrozenLedger::new(2000, vec![]);
        let overlay = OverlayStream::new(Box::new(stream), ledger);
        assert!(matches!(
            collect(overlay).await,
            Err(ImageError::StreamIntegrity(_))
        ));
    }
}
