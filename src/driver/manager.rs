//! Driver manager.
//!
//! Loads driver and tag records from the config store, builds tag lists,
//! resolves each driver's protocol from its URL scheme and constructs the
//! drivers through the registry. A failure while loading one driver is
//! logged and skips that driver only; the rest of the fleet still loads,
//! starts and collects data.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{error, info, warn};
use url::Url;

use crate::core::data::{DataType, Value};
use crate::core::error::Result;
use crate::core::tag::Tag;
use crate::core::traits::DeviceDriver;
use crate::driver::config::{ConfigStore, TagRecord};
use crate::driver::registry::{DriverParams, DriverRegistry};
use crate::store::RealtimeSink;

/// Owns the active driver set and its lifecycle.
pub struct DriverManager {
    drivers: HashMap<String, Box<dyn DeviceDriver>>,
}

impl DriverManager {
    /// Load drivers from the config store.
    ///
    /// `allow` filters by driver id; empty selects every enabled driver.
    /// Only a failure to list the driver rows themselves is returned as an
    /// error — everything after that is per-driver and non-fatal.
    pub async fn load(
        registry: &DriverRegistry,
        store: &dyn ConfigStore,
        sink: Arc<dyn RealtimeSink>,
        allow: &[String],
    ) -> Result<Self> {
        let records = store.drivers(allow).await?;
        let mut drivers: HashMap<String, Box<dyn DeviceDriver>> = HashMap::new();

        for record in records {
            let tag_records = match store.tags(&record.id).await {
                Ok(rows) => rows,
                Err(e) => {
                    error!(driver = %record.id, error = %e, "failed to load tag rows, skipping driver");
                    continue;
                }
            };

            let protocol = match Url::parse(&record.url) {
                Ok(url) => url.scheme().to_string(),
                Err(e) => {
                    error!(driver = %record.id, url = %record.url, error = %e, "invalid driver URL, skipping driver");
                    continue;
                }
            };

            let params = DriverParams {
                id: record.id.clone(),
                name: record.name.clone(),
                raw_url: record.url.clone(),
                tags: build_tags(&tag_records),
                sink: sink.clone(),
            };

            match registry.construct(&protocol, params) {
                Ok(driver) => {
                    info!(driver = %record.id, protocol = %protocol, tags = tag_records.len(), "driver loaded");
                    drivers.insert(record.id, driver);
                }
                Err(e) => {
                    error!(driver = %record.id, protocol = %protocol, error = %e, "driver construction failed, skipping");
                }
            }
        }

        Ok(Self { drivers })
    }

    /// Start every loaded driver. One driver failing to start does not
    /// prevent the others from starting.
    pub async fn start_all(&self) {
        for (id, driver) in &self.drivers {
            info!(driver = %id, "starting driver");
            if let Err(e) = driver.start().await {
                error!(driver = %id, error = %e, "driver failed to start");
            }
        }
    }

    /// Stop every driver, waiting for each polling loop to exit.
    pub async fn stop_all(&self) {
        for (id, driver) in &self.drivers {
            if let Err(e) = driver.stop().await {
                warn!(driver = %id, error = %e, "driver failed to stop cleanly");
            }
        }
    }

    /// Look up an active driver by id.
    pub fn driver(&self, id: &str) -> Option<&dyn DeviceDriver> {
        self.drivers.get(id).map(|driver| driver.as_ref())
    }

    /// Ids of the active drivers.
    pub fn driver_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.drivers.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    /// Number of active drivers.
    pub fn len(&self) -> usize {
        self.drivers.len()
    }

    /// Check if any driver loaded.
    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty()
    }
}

/// Build in-memory tags from persisted rows, applying the initial value
/// conversion. An empty string with a non-string datatype is an unset
/// value, not an error; an unparseable initial value is logged and left
/// unset.
fn build_tags(records: &[TagRecord]) -> Vec<Tag> {
    records
        .iter()
        .map(|row| {
            let initial = if row.initial_value.is_empty() && row.datatype != DataType::String {
                Value::Null
            } else {
                match Value::parse(&row.initial_value, row.datatype) {
                    Ok(v) => v,
                    Err(e) => {
                        warn!(tag = %row.name, error = %e, "bad initial value, leaving unset");
                        Value::Null
                    }
                }
            };

            Tag::new(row.name.clone(), row.address.clone(), row.datatype)
                .with_writable(row.writable)
                .with_description(row.description.clone())
                .with_initial(initial)
        })
        .collect()
}
