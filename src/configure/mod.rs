//! Configuration engine: locates the device descriptor inside the image,
//! assembles the operation list, and executes it strictly in order against
//! a disk handle. Later operations may depend on filesystem state left by
//! earlier ones, so there is no parallelism here by contract.
//!
//! Submodules:
//! - `operation`: descriptor operation model and partition resolution
//! - `session`: filesystem-session and partition-scanner collaborator traits
//! - `network`: network profile generation

pub mod network;
pub mod operation;
pub mod session;

pub use network::{NETWORK_SETTINGS_KEYS, NetworkProfiles, split_network_config};
pub use operation::{
    ConfigLocation, DescriptorConfiguration, DeviceDescriptor, Endpoint, Operation, PartitionSpec,
    RawOperation,
};
pub use session::{
    FilesystemInteractor, FilesystemSession, NoFilesystem, PartitionEntry, PartitionScanner,
};

use crate::error::Result;
use crate::ledger::disk::DiskHandle;
use crate::stream::{ChunkSink, ImageRead};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info};

/// MBR partition type hosting the device descriptor.
pub const DESCRIPTOR_PARTITION_TYPE: u8 = 14;

const DESCRIPTOR_FILE: &str = "/device-type.json";
const SETTINGS_FILE: &str = "/config.json";
const CONNECTIONS_DIR: &str = "/system-connections";

pub struct Configurator {
    interactor: Arc<dyn FilesystemInteractor>,
    scanner: Arc<dyn PartitionScanner>,
}

impl Configurator {
    pub fn new(interactor: Arc<dyn FilesystemInteractor>, scanner: Arc<dyn PartitionScanner>) -> Self {
        Self {
            interactor,
            scanner,
        }
    }

    /// Scans descriptor-typed partitions for the descriptor file. Absence is
    /// not an error; an image without one simply has nothing to configure.
    pub async fn read_device_descriptor(
        &self,
        disk: &DiskHandle,
    ) -> Result<Option<DeviceDescriptor>> {
        let partitions = self.scanner.partitions(disk).await?;
        for entry in partitions
            .iter()
            .filter(|p| p.type_id == DESCRIPTOR_PARTITION_TYPE)
        {
            let mut session = self.interactor.open_session(disk.clone(), entry.index).await?;
            let read = session.read_file(DESCRIPTOR_FILE).await;
            let closed = session.close().await;
            let data = read?;
            closed?;
            if let Some(bytes) = data {
                return Ok(Some(serde_json::from_slice(&bytes)?));
            }
        }
        Ok(None)
    }

    /// Runs the descriptor's operations with `config` as the user payload.
    pub async fn configure(
        &self,
        disk: &DiskHandle,
        config: Value,
        flags: &Map<String, Value>,
    ) -> Result<()> {
        let Some(descriptor) = self.read_device_descriptor(disk).await? else {
            info!("no device descriptor found in image, nothing to configure");
            return Ok(());
        };
        if let Some(slug) = &descriptor.slug {
            info!(device_type = %slug, "device descriptor read from image");
        }
        let configuration = descriptor.configuration.unwrap_or_default();
        let mut raw_operations = configuration.operations;
        if let Some(location) = configuration.config {
            raw_operations.push(RawOperation {
                command: "configure".to_string(),
                partition: location.partition,
                from: None,
                to: None,
                data: Some(config),
                when: None,
            });
        }

        let operations = raw_operations
            .into_iter()
            .filter(|op| op.when_matches(flags))
            .map(Operation::resolve)
            .collect::<Result<Vec<_>>>()?;

        for (index, operation) in operations.iter().enumerate() {
            debug!(index, "executing operation");
            match operation {
                Operation::Configure { partition, data } => {
                    self.execute_configure(disk, *partition, data).await?;
                }
                Operation::Copy {
                    from_partition,
                    from_path,
                    to_partition,
                    to_path,
                } => {
                    self.execute_copy(disk, *from_partition, from_path, *to_partition, to_path)
                        .await?;
                }
            }
        }
        Ok(())
    }

    async fn execute_configure(
        &self,
        disk: &DiskHandle,
        partition: u32,
        data: &Value,
    ) -> Result<()> {
        let (settings, profiles) = split_network_config(data);
        info!(
            partition,
            ethernet = profiles.ethernet.len(),
            wifi = profiles.wifi.len(),
            "writing configuration"
        );
        let mut session = self.interactor.open_session(disk.clone(), partition).await?;
        let written = write_configuration(session.as_mut(), &settings, &profiles).await;
        let closed = session.close().await;
        written?;
        closed?;
        Ok(())
    }

    async fn execute_copy(
        &self,
        disk: &DiskHandle,
        from_partition: u32,
        from_path: &str,
        to_partition: u32,
        to_path: &str,
    ) -> Result<()> {
        info!(
            from_partition,
            from_path, to_partition, to_path, "copying file"
        );
        if from_partition == to_partition {
            // One partition, one session: never nest two sessions over the
            // same partition.
            let mut session = self.interactor.open_session(disk.clone(), from_partition).await?;
            let copied = copy_within(session.as_mut(), from_path, to_path).await;
            let closed = session.close().await;
            copied?;
            closed?;
        } else {
            let mut from_session = self.interactor.open_session(disk.clone(), from_partition).await?;
            let mut to_session = match self.interactor.open_session(disk.clone(), to_partition).await
            {
                Ok(session) => session,
                Err(e) => {
                    let _ = from_session.close().await;
                    return Err(e);
                }
            };
            let copied =
                copy_between(from_session.as_mut(), from_path, to_session.as_mut(), to_path).await;
            let closed_to = to_session.close().await;
            let closed_from = from_session.close().await;
            copied?;
            closed_to?;
            closed_from?;
        }
        Ok(())
    }
}

async fn write_configuration(
    session: &mut dyn FilesystemSession,
    settings: &Value,
    profiles: &NetworkProfiles,
) -> Result<()> {
    session
        .write_file(SETTINGS_FILE, &serde_json::to_vec(settings)?)
        .await?;
    // One counter across both categories so ethernet and wifi profiles
    // cannot land on the same file name.
    let mut counter = 0usize;
    for content in profiles.ethernet.iter().chain(profiles.wifi.iter()) {
        counter += 1;
        let path = format!("{CONNECTIONS_DIR}/connection-{counter:02}");
        session.write_file(&path, content.as_bytes()).await?;
    }
    Ok(())
}

async fn copy_within(
    session: &mut dyn FilesystemSession,
    from_path: &str,
    to_path: &str,
) -> Result<()> {
    let mut reader = session.open_reader(from_path).await?;
    let mut writer = session.open_writer(to_path).await?;
    copy_streams(reader.as_mut(), writer.as_mut()).await
}

async fn copy_between(
    from_session: &mut dyn FilesystemSession,
    from_path: &str,
    to_session: &mut dyn FilesystemSession,
    to_path: &str,
) -> Result<()> {
    let mut reader = from_session.open_reader(from_path).await?;
    let mut writer = to_session.open_writer(to_path).await?;
    copy_streams(reader.as_mut(), writer.as_mut()).await
}

async fn copy_streams(reader: &mut dyn ImageRead, writer: &mut dyn ChunkSink) -> Result<()> {
    while let Some(chunk) = reader.next_chunk().await? {
        writer.write_chunk(chunk).await?;
    }
    writer.finish().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ImageError;
    use crate::ledger::disk::DiskAccess;
    use crate::stream::ImageChunk;
    use async_trait::async_trait;
    use bytes::Bytes;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex;

    /// Stand-in disk; engine tests only need a handle to thread through.
    struct NullDisk;

    #[async_trait]
    impl DiskAccess for NullDisk {
        async fn capacity(&mut self) -> Result<u64> {
            Ok(0)
        }
        async fn read_at(&mut self, _buf: &mut [u8], _offset: u64) -> Result<()> {
            Ok(())
        }
        async fn write_at(&mut self, _offset: u64, _data: &[u8]) -> Result<()> {
            Ok(())
        }
        async fn discard(&mut self, _offset: u64, _length: u64) -> Result<()> {
            Ok(())
        }
        async fn flush(&mut self) -> Result<()> {
            Ok(())
        }
    }

    fn null_disk() -> DiskHandle {
        Arc::new(Mutex::new(NullDisk))
    }

    type FileMap = Arc<StdMutex<HashMap<(u32, String), Vec<u8>>>>;

    /// Flat in-memory filesystem keyed by (partition, path), recording every
    /// write in arrival order.
    struct FakeFs {
        files: FileMap,
        write_log: Arc<StdMutex<Vec<(u32, String)>>>,
        sessions_opened: Arc<AtomicUsize>,
    }

    impl FakeFs {
        fn new() -> Self {
            Self {
                files: Arc::new(StdMutex::new(HashMap::new())),
                write_log: Arc::new(StdMutex::new(Vec::new())),
                sessions_opened: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn put(&self, partition: u32, path: &str, data: &[u8]) {
            self.files
                .lock()
                .unwrap()
                .insert((partition, path.to_string()), data.to_vec());
        }

        fn get(&self, partition: u32, path: &str) -> Option<Vec<u8>> {
            self.files
                .lock()
                .unwrap()
                .get(&(partition, path.to_string()))
                .cloned()
        }
    }

    struct FakeSession {
        partition: u32,
        files: FileMap,
        write_log: Arc<StdMutex<Vec<(u32, String)>>>,
    }

    #[async_trait]
    impl FilesystemSession for FakeSession {
        async fn read_file(&mut self, path: &str) -> Result<Option<Vec<u8>>> {
            Ok(self
                .files
                .lock()
                .unwrap()
                .get(&(self.partition, path.to_string()))
                .cloned())
        }

        async fn write_file(&mut self, path: &str, data: &[u8]) -> Result<()> {
            self.write_log
                .lock()
                .unwrap()
                .push((self.partition, path.to_string()));
            self.files
                .lock()
                .unwrap()
                .insert((self.partition, path.to_string()), data.to_vec());
            Ok(())
        }

        async fn open_reader(&mut self, path: &str) -> Result<Box<dyn ImageRead>> {
            let data = self
                .read_file(path)
                .await?
                .ok_or_else(|| ImageError::FilesystemSession(format!("{path} not found")))?;
            struct OneShot(Option<ImageChunk>);
            #[async_trait]
            impl ImageRead for OneShot {
                async fn next_chunk(&mut self) -> Result<Option<ImageChunk>> {
                    Ok(self.0.take())
                }
            }
            Ok(Box::new(OneShot(Some(ImageChunk {
                position: 0,
                data: Bytes::from(data),
            }))))
        }

        async fn open_writer(&mut self, path: &str) -> Result<Box<dyn ChunkSink>> {
            struct BufWriter {
                partition: u32,
                path: String,
                files: FileMap,
                write_log: Arc<StdMutex<Vec<(u32, String)>>>,
                buf: Vec<u8>,
            }
            #[async_trait]
            impl ChunkSink for BufWriter {
                async fn write_chunk(&mut self, chunk: ImageChunk) -> Result<()> {
                    self.buf.extend_from_slice(&chunk.data);
                    Ok(())
                }
                async fn finish(&mut self) -> Result<()> {
                    self.write_log
                        .lock()
                        .unwrap()
                        .push((self.partition, self.path.clone()));
                    self.files
                        .lock()
                        .unwrap()
                        .insert((self.partition, self.path.clone()), self.buf.clone());
                    Ok(())
                }
            }
            Ok(Box::new(BufWriter {
                partition: self.partition,
                path: path.to_string(),
                files: self.files.clone(),
                write_log: self.write_log.clone(),
                buf: Vec::new(),
            }))
        }

        async fn trim(&mut self) -> Result<bool> {
            Ok(false)
        }

        async fn close(self: Box<Self>) -> Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl FilesystemInteractor for FakeFs {
        async fn open_session(
            &self,
            _disk: DiskHandle,
            partition: u32,
        ) -> Result<Box<dyn FilesystemSession>> {
            self.sessions_opened.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FakeSession {
                partition,
                files: self.files.clone(),
                write_log: self.write_log.clone(),
            }))
        }
    }

    struct FixedScanner(Vec<PartitionEntry>);

    #[async_trait]
    impl PartitionScanner for FixedScanner {
        async fn partitions(&self, _disk: &DiskHandle) -> Result<Vec<PartitionEntry>> {
            Ok(self.0.clone())
        }
    }

    fn engine(fs: Arc<FakeFs>, scanner: FixedScanner) -> Configurator {
        Configurator::new(fs, Arc::new(scanner))
    }

    fn descriptor_scanner() -> FixedScanner {
        FixedScanner(vec![
            PartitionEntry {
                index: 1,
                type_id: DESCRIPTOR_PARTITION_TYPE,
            },
            PartitionEntry {
                index: 5,
                type_id: 0x83,
            },
        ])
    }

    #[tokio::test]
    async fn test_configure_writes_settings_and_profiles() {
        let fs = Arc::new(FakeFs::new());
        fs.put(
            1,
            DESCRIPTOR_FILE,
            &serde_json::to_vec(&json!({
                "slug": "some-board",
                "configuration": {"config": {"partition": 5}},
            }))
            .unwrap(),
        );
        let engine = engine(fs.clone(), descriptor_scanner());
        let disk = null_disk();
        let config = json!({
            "applicationId": 7,
            "wifiSsid": "mynet",
            "wifiKey": "pw",
            "network": [{"configuration": "eth-passthrough"}],
        });
        engine
            .configure(&disk, config, &Map::new())
            .await
            .unwrap();

        let settings = fs.get(5, SETTINGS_FILE).unwrap();
        assert_eq!(
            serde_json::from_slice::<Value>(&settings).unwrap(),
            json!({"applicationId": 7})
        );
        assert_eq!(
            fs.get(5, "/system-connections/connection-01").unwrap(),
            b"eth-passthrough"
        );
        let wifi = String::from_utf8(fs.get(5, "/system-connections/connection-02").unwrap())
            .unwrap();
        assert!(wifi.contains("ssid=mynet"));
    }

    #[tokio::test]
    async fn test_operations_execute_strictly_in_list_order() {
        let fs = Arc::new(FakeFs::new());
        fs.put(2, "/seed", b"seed-content");
        fs.put(
            1,
            DESCRIPTOR_FILE,
            &serde_json::to_vec(&json!({
                "configuration": {
                    "operations": [
                        {"command": "copy",
                         "from": {"partition": 2, "path": "/seed"},
                         "to": {"partition": 3, "path": "/copied"}},
                        {"command": "configure", "partition": 3,
                         "data": {"step": 2}},
                    ],
                },
            }))
            .unwrap(),
        );
        let engine = engine(fs.clone(), descriptor_scanner());
        engine
            .configure(&null_disk(), json!({}), &Map::new())
            .await
            .unwrap();

        let log = fs.write_log.lock().unwrap().clone();
        assert_eq!(
            log,
            vec![
                (3, "/copied".to_string()),
                (3, SETTINGS_FILE.to_string()),
            ]
        );
        assert_eq!(fs.get(3, "/copied").unwrap(), b"seed-content");
    }

    #[tokio::test]
    async fn test_when_clause_skips_unmatched_operations() {
        let fs = Arc::new(FakeFs::new());
        fs.put(
            1,
            DESCRIPTOR_FILE,
            &serde_json::to_vec(&json!({
                "configuration": {
                    "operations": [
                        {"command": "configure", "partition": 5,
                         "data": {"skipped": true},
                         "when": {"installer": true}},
                    ],
                },
            }))
            .unwrap(),
        );
        let engine = engine(fs.clone(), descriptor_scanner());
        engine
            .configure(&null_disk(), json!({}), &Map::new())
            .await
            .unwrap();
        assert!(fs.get(5, SETTINGS_FILE).is_none());

        let mut flags = Map::new();
        flags.insert("installer".to_string(), json!(true));
        engine
            .configure(&null_disk(), json!({}), &flags)
            .await
            .unwrap();
        assert!(fs.get(5, SETTINGS_FILE).is_some());
    }

    #[tokio::test]
    async fn test_same_partition_copy_uses_one_session() {
        let fs = Arc::new(FakeFs::new());
        fs.put(2, "/a", b"payload");
        fs.put(
            1,
            DESCRIPTOR_FILE,
            &serde_json::to_vec(&json!({
                "configuration": {
                    "operations": [
                        {"command": "copy",
                         "from": {"partition": 2, "path": "/a"},
                         "to": {"partition": 2, "path": "/b"}},
                    ],
                },
            }))
            .unwrap(),
        );
        let engine = engine(fs.clone(), descriptor_scanner());
        let before = fs.sessions_opened.load(Ordering::SeqCst);
        engine
            .configure(&null_disk(), json!({}), &Map::new())
            .await
            .unwrap();
        // One session for the descriptor read, one for the copy.
        assert_eq!(fs.sessions_opened.load(Ordering::SeqCst) - before, 2);
        assert_eq!(fs.get(2, "/b").unwrap(), b"payload");
    }

    #[tokio::test]
    async fn test_missing_descriptor_is_a_no_op() {
        let fs = Arc::new(FakeFs::new());
        let engine = engine(fs.clone(), descriptor_scanner());
        engine
            .configure(&null_disk(), json!({"x": 1}), &Map::new())
            .await
            .unwrap();
        assert!(fs.files.lock().unwrap().is_empty());
    }
}
