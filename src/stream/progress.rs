//! Progress sample emitted by the streaming stages. Rendering (bars, ETA)
//! stays outside the core.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressSample {
    /// Bytes actually read or written so far.
    pub bytes_processed: u64,
    /// Position in the stream; runs ahead of `bytes_processed` when sparse
    /// output skips chunks.
    pub stream_position: u64,
    pub elapsed: Duration,
    /// Bytes read from the compressed source, when one is in play.
    pub compressed_bytes_processed: Option<u64>,
}
