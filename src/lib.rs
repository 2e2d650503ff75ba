//! # Data Collection Agent (dcagent)
//!
//! An industrial data-collection agent: polls field devices over vendor
//! protocols at a configured interval, maintains a live tag table with
//! value/quality/timestamp, and accepts write commands back to the device.
//!
//! ## Architecture
//!
//! - **Tags** are built from persisted records; each protocol parses its
//!   own address grammar once at construction.
//! - **Drivers** implement the [`DeviceDriver`] capability contract and
//!   run one background polling loop per device.
//! - The **registry** maps URL schemes to driver constructors, so
//!   protocols plug in without touching the manager.
//! - The **manager** loads configuration, constructs drivers and owns
//!   their lifecycle; one misconfigured device never stops the others.
//! - Collected values are reported once per tag per cycle to a
//!   [`RealtimeSink`].
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use dcagent::prelude::*;
//!
//! # async fn run() -> dcagent::Result<()> {
//! let registry = DriverRegistry::with_builtin();
//! let store = FileConfigStore::from_path("agent.toml")?;
//! let sink = Arc::new(MemorySink::new());
//!
//! let manager = DriverManager::load(&registry, &store, sink, &[]).await?;
//! manager.start_all().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Supported protocols
//!
//! | Protocol | Scheme | Status |
//! |----------|--------|--------|
//! | S7 fieldbus (ISO-on-TCP) | `s7` | Available |

pub mod codec;
pub mod core;
pub mod driver;
pub mod protocols;
pub mod store;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::core::{
        data::{DataType, Value},
        error::{AgentError, Result},
        quality::Quality,
        tag::{Tag, TagMeta},
        traits::{DeviceDriver, DriverStatus},
    };
    pub use crate::driver::{
        config::{ConfigStore, DriverRecord, FileConfigStore, TagRecord},
        manager::DriverManager,
        registry::{DriverParams, DriverRegistry},
    };
    pub use crate::store::{MemorySink, RealtimeSink};
}

// Re-export core types at crate root for convenience
pub use crate::core::data::{DataType, Value};
pub use crate::core::error::{AgentError, Result};
pub use crate::core::quality::Quality;
pub use crate::core::tag::{Tag, TagMeta};
pub use crate::core::traits::{DeviceDriver, DriverStatus};
pub use crate::driver::{DriverManager, DriverRegistry, FileConfigStore};
pub use crate::store::{MemorySink, RealtimeSink};
