//! Persisted driver/tag records and the config-store boundary.
//!
//! The agent is constructed from two persisted record types: driver rows
//! (one per device, with the connection URL) and tag rows (the points each
//! device exposes). Where those rows live is an external concern behind the
//! [`ConfigStore`] trait; this module ships a TOML-file-backed store for
//! standalone use.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::data::DataType;
use crate::core::error::{AgentError, Result};

/// Persisted driver row.
///
/// `url` encodes the protocol scheme, host and protocol-specific query
/// parameters: `<protocol>://host[:port]?param=value&...`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverRecord {
    /// Unique driver id.
    pub id: String,

    /// Human-readable name.
    #[serde(default)]
    pub name: String,

    /// Connection URL.
    pub url: String,

    /// Disabled drivers are skipped at load time.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Persisted tag row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagRecord {
    /// Owning driver id.
    pub driver_id: String,

    /// Tag name, unique within the driver.
    pub name: String,

    /// Raw protocol address string.
    pub address: String,

    /// Declared datatype.
    pub datatype: DataType,

    /// Whether writes are accepted.
    #[serde(default)]
    pub writable: bool,

    /// Optional description.
    #[serde(default)]
    pub description: String,

    /// Initial value as a string; empty means unset.
    #[serde(default)]
    pub initial_value: String,
}

fn default_true() -> bool {
    true
}

/// Boundary to the persisted configuration.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Fetch enabled driver rows, filtered by an allow-list of driver ids.
    /// An empty allow-list selects every enabled driver.
    async fn drivers(&self, allow: &[String]) -> Result<Vec<DriverRecord>>;

    /// Fetch the tag rows of one driver.
    async fn tags(&self, driver_id: &str) -> Result<Vec<TagRecord>>;
}

/// TOML document shape for [`FileConfigStore`].
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    drivers: Vec<DriverRecord>,

    #[serde(default)]
    tags: Vec<TagRecord>,
}

/// Config store backed by a TOML file.
pub struct FileConfigStore {
    drivers: Vec<DriverRecord>,
    tags: Vec<TagRecord>,
}

impl FileConfigStore {
    /// Load from a TOML file.
    pub fn from_path(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| AgentError::Config(format!("read {}: {}", path.display(), e)))?;
        Self::from_toml(&text)
    }

    /// Parse from TOML text.
    pub fn from_toml(text: &str) -> Result<Self> {
        let file: ConfigFile =
            toml::from_str(text).map_err(|e| AgentError::Config(format!("parse config: {}", e)))?;
        Ok(Self {
            drivers: file.drivers,
            tags: file.tags,
        })
    }

    /// Build directly from records (used by tests and embedders).
    pub fn from_records(drivers: Vec<DriverRecord>, tags: Vec<TagRecord>) -> Self {
        Self { drivers, tags }
    }
}

#[async_trait]
impl ConfigStore for FileConfigStore {
    async fn drivers(&self, allow: &[String]) -> Result<Vec<DriverRecord>> {
        Ok(self
            .drivers
            .iter()
            .filter(|d| d.enabled && (allow.is_empty() || allow.contains(&d.id)))
            .cloned()
            .collect())
    }

    async fn tags(&self, driver_id: &str) -> Result<Vec<TagRecord>> {
        Ok(self
            .tags
            .iter()
            .filter(|t| t.driver_id == driver_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[[drivers]]
id = "plc1"
name = "Line 1 PLC"
url = "s7://192.168.0.10:102?rack=0&slot=1&interval=500"

[[drivers]]
id = "plc2"
url = "s7://192.168.0.11"
enabled = false

[[tags]]
driver_id = "plc1"
name = "motor_on"
address = "DB1.DBX0.3"
datatype = "bool"
writable = true

[[tags]]
driver_id = "plc1"
name = "speed"
address = "DB1.DBW16"
datatype = "uint16"
initial_value = "100"
"#;

    #[tokio::test]
    async fn test_parse_and_filter() {
        let store = FileConfigStore::from_toml(SAMPLE).unwrap();

        // disabled drivers are skipped even with an empty allow-list
        let drivers = store.drivers(&[]).await.unwrap();
        assert_eq!(drivers.len(), 1);
        assert_eq!(drivers[0].id, "plc1");

        let none = store.drivers(&["plc2".to_string()]).await.unwrap();
        assert!(none.is_empty());

        let tags = store.tags("plc1").await.unwrap();
        assert_eq!(tags.len(), 2);
        assert_eq!(tags[0].datatype, DataType::Bool);
        assert!(tags[0].writable);
        assert_eq!(tags[1].initial_value, "100");
    }

    #[test]
    fn test_malformed_config() {
        assert!(FileConfigStore::from_toml("[[drivers]]\nname = 1").is_err());
    }
}
