//! Sequential-only source streaming a stored image from an object store.
//!
//! Accepts `img-s3://bucket/device-type/version` URLs and streams the image
//! at `images/<device-type>/<version>/image/disk.img`. Deliberately not
//! random-readable: when the pipeline needs random access it materializes
//! the stream into a temp file instead.

use crate::error::{ImageError, Result};
use crate::source::{ChunkedReader, READ_CHUNK_SIZE, SourceMetadata, StreamSource};
use crate::stream::ImageRead;
use async_trait::async_trait;
use aws_sdk_s3::Client;

pub struct ObjectStoreSource {
    client: Client,
    bucket: String,
    device_type: String,
    version: String,
    metadata: Option<SourceMetadata>,
}

impl ObjectStoreSource {
    pub fn new(
        client: Client,
        bucket: impl Into<String>,
        device_type: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            device_type: device_type.into(),
            version: version.into(),
            metadata: None,
        }
    }

    /// Parses the `bucket/device-type/version` remainder of an `img-s3://`
    /// URL. Returns `None` when the shape does not match.
    pub fn from_url_parts(client: Client, rest: &str) -> Option<Self> {
        let mut parts = rest.split('/');
        let bucket = parts.next()?;
        let device_type = parts.next()?;
        let version = parts.next()?;
        if bucket.is_empty() || device_type.is_empty() || version.is_empty() || parts.next().is_some()
        {
            return None;
        }
        Some(Self::new(client, bucket, device_type, version))
    }

    fn key(&self) -> String {
        format!(
            "images/{}/{}/image/disk.img",
            self.device_type, self.version
        )
    }
}

#[async_trait]
impl StreamSource for ObjectStoreSource {
    async fn metadata(&mut self) -> Result<SourceMetadata> {
        if let Some(metadata) = self.metadata {
            return Ok(metadata);
        }
        let head = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(self.key())
            .send()
            .await
            .map_err(|e| ImageError::Metadata(format!("head {}: {e}", self.key())))?;
        let size = head
            .content_length()
            .filter(|len| *len >= 0)
            .ok_or_else(|| {
                ImageError::Metadata(format!("no content length for {}", self.key()))
            })?;
        let metadata = SourceMetadata {
            size: size as u64,
            compressed_size: None,
        };
        self.metadata = Some(metadata);
        Ok(metadata)
    }

    async fn create_read_stream(&mut self) -> Result<Box<dyn ImageRead>> {
        let object = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(self.key())
            .send()
            .await
            .map_err(|e| ImageError::ObjectStore(format!("get {}: {e}", self.key())))?;
        Ok(Box::new(ChunkedReader::new(
            object.body.into_async_read(),
            READ_CHUNK_SIZE,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_s3::config::Region;

    fn client() -> Client {
        let config = aws_sdk_s3::Config::builder()
            .behavior_version(aws_sdk_s3::config::BehaviorVersion::latest())
            .region(Region::new("us-east-1"))
            .build();
        Client::from_conf(config)
    }

    #[test]
    fn test_url_parts_accepted() {
        let source =
            ObjectStoreSource::from_url_parts(client(), "images-bucket/raspberry-pi/2.9.6")
                .unwrap();
        assert_eq!(source.key(), "images/raspberry-pi/2.9.6/image/disk.img");
    }

    #[test]
    fn test_malformed_url_parts_rejected() {
        assert!(ObjectStoreSource::from_url_parts(client(), "bucket-only").is_none());
        assert!(ObjectStoreSource::from_url_parts(client(), "bucket/type").is_none());
        assert!(ObjectStoreSource::from_url_parts(client(), "bucket//version").is_none());
        assert!(
            ObjectStoreSource::from_url_parts(client(), "bucket/type/version/extra").is_none()
        );
    }
}
