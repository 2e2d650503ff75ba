//! Driver capability contract.
//!
//! Every protocol driver implements [`DeviceDriver`]. The trait is object
//! safe: the registry hands out `Box<dyn DeviceDriver>` and the manager
//! never needs to know which protocol is behind it.
//!
//! # Lifecycle
//!
//! A driver is constructed once from its persisted records, started once,
//! and stopped exactly once at shutdown. `start()` spawns the background
//! polling loop without blocking on the first successful connection;
//! `stop()` returns only after the loop has observed the stop sentinel and
//! exited, so no device I/O happens after it returns. Reconfiguration is
//! delivered as a message to the running loop, never by rebuilding the
//! driver.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::oneshot;

use crate::core::data::Value;
use crate::core::error::Result;
use crate::core::tag::Tag;

/// The operations every protocol driver exposes.
#[async_trait]
pub trait DeviceDriver: Send + Sync {
    /// Driver id from the persisted record.
    fn id(&self) -> &str;

    /// Human-readable driver name.
    fn name(&self) -> &str;

    /// Protocol identifier (the URL scheme this driver was registered under).
    fn protocol(&self) -> &'static str;

    /// Establish the device connection.
    async fn connect(&self) -> Result<()>;

    /// Close the device connection.
    async fn disconnect(&self) -> Result<()>;

    /// Check connection state without touching the device.
    fn is_connected(&self) -> bool;

    /// Execute one read cycle over all parsed tags.
    ///
    /// Returns the per-tag values of this cycle. Individual tag failures do
    /// not abort the batch; the affected tags come back as `Value::Null`.
    async fn read(&self) -> Result<HashMap<String, Value>>;

    /// Write a value to a named tag.
    ///
    /// Synchronous from the caller's perspective: the call blocks until the
    /// driver's own loop has performed the device I/O and produced a
    /// result. This serializes writes to one in flight per driver, which is
    /// the intended backpressure mechanism.
    async fn write(&self, tag: &str, value: Value) -> Result<()>;

    /// Launch the background polling loop.
    async fn start(&self) -> Result<()>;

    /// Stop the polling loop and wait for it to exit.
    async fn stop(&self) -> Result<()>;

    /// Ask the running loop to re-read its parameters (poll interval etc.)
    /// without restarting the process.
    async fn reconfig(&self) -> Result<()>;

    /// Immutable snapshot of all tags, published at the end of each poll
    /// cycle. External readers never observe a half-updated cycle.
    fn tags(&self) -> Arc<Vec<Tag>>;

    /// Diagnostics snapshot.
    fn status(&self) -> DriverStatus;
}

impl std::fmt::Debug for dyn DeviceDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceDriver")
            .field("id", &self.id())
            .field("protocol", &self.protocol())
            .finish()
    }
}

/// Inbound message for a driver's background loop.
///
/// One queue with tagged variants, rather than separate command and write
/// channels; the polling tick joins these in the loop's event match.
#[derive(Debug)]
pub enum DriverMessage {
    /// Terminate the loop.
    Stop,

    /// Re-read interval/parameters.
    Reconfig,

    /// Perform a device write and answer on `reply`.
    Write {
        tag: String,
        value: Value,
        reply: oneshot::Sender<Result<()>>,
    },
}

/// Driver diagnostics snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct DriverStatus {
    /// Driver id.
    pub id: String,

    /// Driver name.
    pub name: String,

    /// Protocol identifier.
    pub protocol: String,

    /// Current connection state.
    pub connected: bool,

    /// Consecutive failed poll cycles.
    pub fail_count: u32,

    /// Number of configured tags (parsed or not).
    pub tag_count: usize,

    /// Time of the last successful device contact.
    pub last_contact: Option<DateTime<Utc>>,

    /// Protocol-specific information.
    pub extra: serde_json::Value,
}
