//! In-memory realtime sink using DashMap.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::core::data::Value;
use crate::core::error::Result;
use crate::core::quality::Quality;

use super::traits::{RealtimeSink, RealtimeUpdate};

/// In-memory realtime sink.
///
/// Keeps the latest state per `(driver, tag)` and broadcasts every update
/// to subscribers. This is the default sink for standalone usage; a
/// deployment would swap in a networked store behind the same trait.
pub struct MemorySink {
    /// Latest state: "driver_id:tag" -> update
    data: DashMap<String, RealtimeUpdate>,

    /// Update broadcast for downstream consumers.
    updates: broadcast::Sender<RealtimeUpdate>,
}

impl MemorySink {
    /// Create a new memory sink.
    pub fn new() -> Self {
        let (updates, _) = broadcast::channel(1024);
        Self {
            data: DashMap::new(),
            updates,
        }
    }

    fn make_key(driver_id: &str, tag: &str) -> String {
        format!("{}:{}", driver_id, tag)
    }

    /// Get the latest reported state of one tag.
    pub fn get(&self, driver_id: &str, tag: &str) -> Option<RealtimeUpdate> {
        self.data
            .get(&Self::make_key(driver_id, tag))
            .map(|r| r.value().clone())
    }

    /// Get the latest reported state of every tag of a driver.
    pub fn all_for(&self, driver_id: &str) -> Vec<RealtimeUpdate> {
        let prefix = format!("{}:", driver_id);
        self.data
            .iter()
            .filter(|e| e.key().starts_with(&prefix))
            .map(|e| e.value().clone())
            .collect()
    }

    /// Subscribe to the update stream.
    pub fn subscribe(&self) -> broadcast::Receiver<RealtimeUpdate> {
        self.updates.subscribe()
    }

    /// Number of distinct tags seen so far.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if the sink has received anything yet.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RealtimeSink for MemorySink {
    async fn report(
        &self,
        driver_id: &str,
        tag: &str,
        value: &Value,
        quality: Quality,
        timestamp: DateTime<Utc>,
    ) -> Result<()> {
        let update = RealtimeUpdate {
            driver_id: driver_id.to_string(),
            tag: tag.to_string(),
            value: value.clone(),
            quality,
            timestamp,
        };
        self.data
            .insert(Self::make_key(driver_id, tag), update.clone());
        // Best-effort delivery, lagging subscribers are not an error
        let _ = self.updates.send(update);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_report_and_get() {
        let sink = MemorySink::new();
        sink.report("d1", "temp", &Value::UInt16(21), Quality::Good, Utc::now())
            .await
            .unwrap();

        let entry = sink.get("d1", "temp").unwrap();
        assert_eq!(entry.value, Value::UInt16(21));
        assert_eq!(entry.quality, Quality::Good);
        assert!(sink.get("d1", "missing").is_none());
    }

    #[tokio::test]
    async fn test_latest_state_wins() {
        let sink = MemorySink::new();
        let ts = Utc::now();
        sink.report("d1", "temp", &Value::UInt16(1), Quality::Good, ts)
            .await
            .unwrap();
        sink.report("d1", "temp", &Value::Null, Quality::Bad, ts)
            .await
            .unwrap();

        let entry = sink.get("d1", "temp").unwrap();
        assert_eq!(entry.quality, Quality::Bad);
        assert_eq!(sink.len(), 1);
    }

    #[tokio::test]
    async fn test_subscribe_receives_updates() {
        let sink = MemorySink::new();
        let mut rx = sink.subscribe();

        sink.report("d1", "flow", &Value::Float32(1.5), Quality::Good, Utc::now())
            .await
            .unwrap();

        let update = rx.recv().await.unwrap();
        assert_eq!(update.tag, "flow");
        assert_eq!(update.driver_id, "d1");
    }
}
