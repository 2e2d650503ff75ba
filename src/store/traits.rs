//! RealtimeSink trait definition.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::core::data::Value;
use crate::core::error::Result;
use crate::core::quality::Quality;

/// One reported tag state.
#[derive(Debug, Clone, Serialize)]
pub struct RealtimeUpdate {
    /// Owning driver id.
    pub driver_id: String,

    /// Tag name within the driver.
    pub tag: String,

    /// Reported value.
    pub value: Value,

    /// Reported quality.
    pub quality: Quality,

    /// Timestamp of the read that produced the value.
    pub timestamp: DateTime<Utc>,
}

/// External store receiving each poll cycle's tag values.
///
/// Report failures are logged by the caller, never retried inline, and must
/// not interrupt the poll cycle.
#[async_trait]
pub trait RealtimeSink: Send + Sync {
    /// Report one tag's current state.
    async fn report(
        &self,
        driver_id: &str,
        tag: &str,
        value: &Value,
        quality: Quality,
        timestamp: DateTime<Utc>,
    ) -> Result<()>;
}
