//! Device-descriptor operation model: the raw serde shapes as they appear in
//! the descriptor JSON, partition reference resolution, and the resolved
//! operations the engine executes.

use crate::error::{ImageError, Result};
use serde::Deserialize;
use serde_json::{Map, Value};

const MBR_LAST_PRIMARY_PARTITION: u32 = 4;

/// Partition reference as found in descriptors: either an absolute 1-based
/// index or the legacy `{primary}` / `{primary, logical}` pair.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum PartitionSpec {
    Index(u32),
    Legacy {
        #[serde(default)]
        primary: Option<u32>,
        #[serde(default)]
        logical: Option<u32>,
    },
    Other(Value),
}

impl PartitionSpec {
    pub fn resolve(&self) -> Result<u32> {
        match self {
            PartitionSpec::Index(index) => Ok(*index),
            PartitionSpec::Legacy {
                logical: Some(logical),
                ..
            } => Ok(MBR_LAST_PRIMARY_PARTITION + logical),
            PartitionSpec::Legacy {
                primary: Some(primary),
                logical: None,
            } => Ok(*primary),
            PartitionSpec::Legacy {
                primary: None,
                logical: None,
            } => Err(ImageError::UnsupportedPartitionEncoding("{}".to_string())),
            PartitionSpec::Other(value) => {
                Err(ImageError::UnsupportedPartitionEncoding(value.to_string()))
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Endpoint {
    #[serde(default)]
    pub partition: Option<PartitionSpec>,
    #[serde(default)]
    pub path: Option<String>,
}

/// One descriptor operation, exactly as deserialized.
#[derive(Debug, Clone, Deserialize)]
pub struct RawOperation {
    pub command: String,
    #[serde(default)]
    pub partition: Option<PartitionSpec>,
    #[serde(default)]
    pub from: Option<Endpoint>,
    #[serde(default)]
    pub to: Option<Endpoint>,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub when: Option<Map<String, Value>>,
}

impl RawOperation {
    /// An operation with a `when` clause runs only if every named flag
    /// matches; no clause means it always runs.
    pub fn when_matches(&self, flags: &Map<String, Value>) -> bool {
        match &self.when {
            None => true,
            Some(conditions) => conditions.iter().all(|(key, want)| flags.get(key) == Some(want)),
        }
    }
}

/// Operation with partitions resolved and required fields checked.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Configure {
        partition: u32,
        data: Value,
    },
    Copy {
        from_partition: u32,
        from_path: String,
        to_partition: u32,
        to_path: String,
    },
}

impl Operation {
    pub fn resolve(raw: RawOperation) -> Result<Operation> {
        match raw.command.as_str() {
            "configure" => {
                let partition = raw
                    .partition
                    .ok_or(ImageError::MissingPartition)?
                    .resolve()?;
                let data = raw.data.ok_or(ImageError::MissingPayload)?;
                Ok(Operation::Configure { partition, data })
            }
            "copy" => {
                let from = raw.from.ok_or(ImageError::MissingEndpoints)?;
                let to = raw.to.ok_or(ImageError::MissingEndpoints)?;
                let (Some(from_partition), Some(from_path), Some(to_partition), Some(to_path)) =
                    (from.partition, from.path, to.partition, to.path)
                else {
                    return Err(ImageError::MissingEndpoints);
                };
                Ok(Operation::Copy {
                    from_partition: from_partition.resolve()?,
                    from_path,
                    to_partition: to_partition.resolve()?,
                    to_path,
                })
            }
            other => Err(ImageError::UnknownCommand(other.to_string())),
        }
    }
}

/// Descriptor located inside the image; carries the operation list and,
/// optionally, where the main settings file belongs.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct DeviceDescriptor {
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub configuration: Option<DescriptorConfiguration>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct DescriptorConfiguration {
    #[serde(default)]
    pub operations: Vec<RawOperation>,
    #[serde(default)]
    pub config: Option<ConfigLocation>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ConfigLocation {
    #[serde(default)]
    pub partition: Option<PartitionSpec>,
}
