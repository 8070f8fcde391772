//! Sparse filter: forwards only the bytes inside the blockmap's Present
//! ranges, tagged with their absolute destination position. Bytes inside
//! Discard ranges are dropped, not forwarded; the destination pre-sizes the
//! target or relies on filesystem holes for the skipped regions.

use crate::error::Result;
use crate::stream::blockmap::BlockMap;
use crate::stream::{ImageChunk, ImageRead};
use async_trait::async_trait;
use std::collections::VecDeque;

pub struct SparseStream {
    inner: Box<dyn ImageRead>,
    /// Present ranges as inclusive byte intervals, ascending.
    ranges: Vec<(u64, u64)>,
    range_index: usize,
    pending: VecDeque<ImageChunk>,
    bytes_forwarded: u64,
    current_position: u64,
}

impl SparseStream {
    pub fn new(inner: Box<dyn ImageRead>, map: &BlockMap) -> Self {
        Self {
            inner,
            ranges: map.present_byte_ranges(),
            range_index: 0,
            pending: VecDeque::new(),
            bytes_forwarded: 0,
            current_position: 0,
        }
    }

    /// Bytes forwarded so far; excludes everything dropped.
    pub fn bytes_forwarded(&self) -> u64 {
        self.bytes_forwarded
    }

    /// Absolute position just past the last forwarded byte.
    pub fn current_position(&self) -> u64 {
        self.current_position
    }

    fn split_chunk(&mut self, chunk: ImageChunk) {
        let start = chunk.position;
        let end = chunk.end();
        while self.range_index < self.ranges.len() && self.ranges[self.range_index].1 < start {
            self.range_index += 1;
        }
        let mut index = self.range_index;
        while index < self.ranges.len() {
            let (range_start, range_end) = self.ranges[index];
            if range_start > end {
                break;
            }
            let lo = start.max(range_start);
            let hi = end.min(range_end);
            self.pending.push_back(ImageChunk {
                position: lo,
                data: chunk
                    .data
                    .slice((lo - start) as usize..=(hi - start) as usize),
            });
            index += 1;
        }
    }
}

#[async_trait]
impl ImageRead for SparseStream {
    async fn next_chunk(&mut self) -> Result<Option<ImageChunk>> {
        loop {
            if let Some(piece) = self.pending.pop_front() {
                self.bytes_forwarded += piece.data.len() as u64;
                self.current_position = piece.position + piece.data.len() as u64;
                return Ok(Some(piece));
            }
            match self.inner.next_chunk().await? {
                Some(chunk) => self.split_chunk(chunk),
                None => return Ok(None),
            }
        }
    }
}
