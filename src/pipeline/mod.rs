//! Pipeline orchestration: the total decision procedure over source and
//! destination capabilities and the requested work, plus the partition trim
//! pass.
//!
//! Every (source capability, destination capability, configuration?, trim?)
//! combination maps to exactly one plan, and no plan ever invokes a
//! random-access operation against a capability that does not support it.

use crate::configure::{Configurator, FilesystemInteractor, PartitionScanner};
use crate::dest::ImageDestination;
use crate::error::Result;
use crate::ledger::disk::{DestinationDisk, DiskAccess, DiskHandle, VirtualDisk};
use crate::source::{ImageSource, RandomSource, materialize};
use crate::stream::{
    BlockMap, DEFAULT_BLOCK_SIZE, OverlayStream, ProgressSample, SparseStream, pipe,
};
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plan {
    /// Nothing to apply: stream the source straight into the destination.
    DirectCopy,
    /// Source is random-readable: configure/trim a ledger over it, then
    /// stream through the overlay (sparse-filtered when trim ran).
    ConfiguredStream,
    /// Sequential source, random destination, no trim: stream-copy first,
    /// then configure directly against the written destination.
    StreamThenConfigure,
    /// Sequential source needing random access: copy it into a scoped temp
    /// file and continue as `ConfiguredStream`.
    MaterializeFirst,
}

/// The decision procedure. Total over all four inputs.
pub fn plan(source_random: bool, wants_config: bool, wants_trim: bool, dest_random: bool) -> Plan {
    if !wants_config && !wants_trim {
        return Plan::DirectCopy;
    }
    if source_random {
        return Plan::ConfiguredStream;
    }
    if dest_random && !wants_trim {
        return Plan::StreamThenConfigure;
    }
    Plan::MaterializeFirst
}

#[derive(Default)]
pub struct PipelineOptions {
    /// User configuration payload; `Some` means configuration is requested.
    pub config: Option<Value>,
    pub trim: bool,
    /// Flags matched against operation `when` clauses.
    pub flags: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub plan: Plan,
    pub bytes_written: u64,
}

pub struct Pipeline {
    interactor: Arc<dyn FilesystemInteractor>,
    scanner: Arc<dyn PartitionScanner>,
}

impl Pipeline {
    pub fn new(
        interactor: Arc<dyn FilesystemInteractor>,
        scanner: Arc<dyn PartitionScanner>,
    ) -> Self {
        Self {
            interactor,
            scanner,
        }
    }

    pub async fn run<F>(
        &self,
        source: ImageSource,
        mut dest: ImageDestination,
        options: PipelineOptions,
        mut progress: F,
    ) -> Result<RunSummary>
    where
        F: FnMut(ProgressSample) + Send,
    {
        let selected = plan(
            source.is_random(),
            options.config.is_some(),
            options.trim,
            dest.is_random(),
        );
        info!(plan = ?selected, "pipeline plan selected");
        let bytes_written = match (selected, source) {
            (Plan::DirectCopy, mut source) => {
                let mut stream = source.create_read_stream().await?;
                let mut sink = dest.create_write_stream().await?;
                let bytes = pipe(stream.as_mut(), sink.as_mut(), &mut progress).await?;
                sink.finish().await?;
                bytes
            }
            (Plan::ConfiguredStream, ImageSource::Random(source)) => {
                self.run_configured(source, dest, &options, &mut progress)
                    .await?
            }
            (Plan::StreamThenConfigure, mut source) => {
                let ImageDestination::Random(mut dest) = dest else {
                    unreachable!("plan requires a random-accessible destination");
                };
                let mut stream = source.create_read_stream().await?;
                let mut sink = dest.create_write_stream().await?;
                let bytes = pipe(stream.as_mut(), sink.as_mut(), &mut progress).await?;
                sink.finish().await?;
                drop(sink);
                let disk = Arc::new(Mutex::new(DestinationDisk::new(dest)));
                let handle: DiskHandle = disk.clone();
                let config = options.config.clone().unwrap_or_default();
                self.configurator()
                    .configure(&handle, config, &options.flags)
                    .await?;
                disk.lock().await.flush().await?;
                bytes
            }
            (Plan::MaterializeFirst, source) => {
                let mut inner = match source {
                    ImageSource::Stream(source) => source,
                    ImageSource::Random(_) => {
                        unreachable!("plan never materializes a random-readable source")
                    }
                };
                let materialized = materialize(inner.as_mut()).await?;
                self.run_configured(Box::new(materialized), dest, &options, &mut progress)
                    .await?
            }
            (Plan::ConfiguredStream, ImageSource::Stream(_)) => {
                unreachable!("plan requires a random-readable source");
            }
        };
        Ok(RunSummary {
            plan: selected,
            bytes_written,
        })
    }

    fn configurator(&self) -> Configurator {
        Configurator::new(self.interactor.clone(), self.scanner.clone())
    }

    async fn run_configured<F>(
        &self,
        source: Box<dyn RandomSource>,
        mut dest: ImageDestination,
        options: &PipelineOptions,
        progress: &mut F,
    ) -> Result<u64>
    where
        F: FnMut(ProgressSample) + Send,
    {
        let disk = Arc::new(Mutex::new(VirtualDisk::new(source)));
        let handle: DiskHandle = disk.clone();
        if let Some(config) = options.config.clone() {
            self.configurator()
                .configure(&handle, config, &options.flags)
                .await?;
        }
        if options.trim {
            self.trim_partitions(&disk, &handle).await?;
        }

        let (frozen, stream) = {
            let mut guard = disk.lock().await;
            let frozen = guard.freeze().await?;
            let stream = guard.create_source_stream().await?;
            (frozen, stream)
        };
        let mut overlay = OverlayStream::new(stream, frozen.clone());

        // Sparse output only pays off when trim produced discards, and only
        // a random-accessible destination can seek over the holes.
        let bytes = if options.trim && dest.is_random() {
            let map = BlockMap::from_ledger(&frozen, DEFAULT_BLOCK_SIZE);
            debug!(ranges = map.ranges.len(), "streaming sparse output");
            let mut sparse = SparseStream::new(Box::new(overlay), &map);
            let mut sink = dest.create_sparse_write_stream().await?;
            let bytes = pipe(&mut sparse, sink.as_mut(), &mut *progress).await?;
            sink.finish().await?;
            bytes
        } else {
            let mut sink = dest.create_write_stream().await?;
            let bytes = pipe(&mut overlay, sink.as_mut(), &mut *progress).await?;
            sink.finish().await?;
            bytes
        };
        Ok(bytes)
    }

    /// Trims every partition in table order, one session each, then accounts
    /// for what was discarded. Finding nothing to discard is not an error.
    async fn trim_partitions(
        &self,
        disk: &Arc<Mutex<VirtualDisk>>,
        handle: &DiskHandle,
    ) -> Result<()> {
        let partitions = self.scanner.partitions(handle).await?;
        for entry in &partitions {
            let mut session = self
                .interactor
                .open_session(handle.clone(), entry.index)
                .await?;
            let trimmed = session.trim().await;
            let closed = session.close().await;
            let supported = trimmed?;
            closed?;
            if !supported {
                debug!(
                    partition = entry.index,
                    "filesystem does not support trimming"
                );
            }
        }

        let mut guard = disk.lock().await;
        let capacity = guard.capacity().await?;
        let (mut chunk_count, mut discarded_bytes) = (0u64, 0u64);
        for chunk in guard.discarded_chunks() {
            chunk_count += 1;
            discarded_bytes += chunk.len();
        }
        let percentage = if capacity == 0 {
            0
        } else {
            discarded_bytes * 100 / capacity
        };
        info!(
            chunks = chunk_count,
            bytes = discarded_bytes,
            percentage,
            "discarded space"
        );
        Ok(())
    }
}
