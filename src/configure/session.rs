//! Filesystem collaborator seams. Concrete FAT/ext drivers and partition
//! table parsing live outside this crate; the engine only needs these
//! traits. Sessions are scoped: open, use, close — close runs on every exit
//! path, errors included.

use crate::error::{ImageError, Result};
use crate::ledger::disk::DiskHandle;
use crate::stream::{ChunkSink, ImageRead};
use async_trait::async_trait;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionEntry {
    /// Absolute 1-based partition index.
    pub index: u32,
    /// MBR partition type id.
    pub type_id: u8,
}

/// Resolves the image's partition table. Extended entries are excluded.
#[async_trait]
pub trait PartitionScanner: Send + Sync {
    async fn partitions(&self, disk: &DiskHandle) -> Result<Vec<PartitionEntry>>;
}

/// Scoped filesystem access to one partition. All writes ultimately land in
/// the disk handle the session was opened over — never in the real source.
#[async_trait]
pub trait FilesystemSession: Send {
    /// `None` when the file does not exist.
    async fn read_file(&mut self, path: &str) -> Result<Option<Vec<u8>>>;
    async fn write_file(&mut self, path: &str, data: &[u8]) -> Result<()>;
    async fn open_reader(&mut self, path: &str) -> Result<Box<dyn ImageRead>>;
    async fn open_writer(&mut self, path: &str) -> Result<Box<dyn ChunkSink>>;
    /// Discards unused filesystem space through the disk handle. `Ok(false)`
    /// when the filesystem does not support trimming.
    async fn trim(&mut self) -> Result<bool>;
    async fn close(self: Box<Self>) -> Result<()>;
}

#[async_trait]
pub trait FilesystemInteractor: Send + Sync {
    async fn open_session(
        &self,
        disk: DiskHandle,
        partition: u32,
    ) -> Result<Box<dyn FilesystemSession>>;
}

/// Collaborator wired by the binary. Configuration and trim need a real
/// filesystem driver; without one every session open fails and the pipeline
/// aborts cleanly.
pub struct NoFilesystem;

#[async_trait]
impl FilesystemInteractor for NoFilesystem {
    async fn open_session(
        &self,
        _disk: DiskHandle,
        partition: u32,
    ) -> Result<Box<dyn FilesystemSession>> {
        Err(ImageError::FilesystemSession(format!(
            "no filesystem driver registered for partition {partition}"
        )))
    }
}

#[async_trait]
impl PartitionScanner for NoFilesystem {
    async fn partitions(&self, _disk: &DiskHandle) -> Result<Vec<PartitionEntry>> {
        Err(ImageError::FilesystemSession(
            "no partition scanner registered".to_string(),
        ))
    }
}
