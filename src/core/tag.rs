//! Tag model.
//!
//! A tag is a named, addressable point on a device. Its raw address string
//! is parsed exactly once, at driver construction, by the owning protocol's
//! address parser; the structured result lives in [`TagMeta`]. A tag whose
//! address failed to parse keeps `parsed = false` and is excluded from
//! every read/write cycle until the configuration is reloaded.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::core::data::{DataType, Value};
use crate::core::quality::Quality;
use crate::protocols::s7::S7Address;

/// Protocol-specific parsed address metadata.
///
/// Modeled as a tagged union keyed by protocol so that each protocol's
/// metadata is statically distinguishable: a driver can only ever see its
/// own variant, never another protocol's payload.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(tag = "protocol", rename_all = "lowercase")]
pub enum TagMeta {
    /// Address not parsed (or owned by no protocol).
    #[default]
    None,
    /// Parsed S7 fieldbus address.
    S7(S7Address),
}

impl TagMeta {
    /// Get the S7 address, if this tag belongs to an S7 driver.
    pub fn as_s7(&self) -> Option<&S7Address> {
        match self {
            Self::S7(addr) => Some(addr),
            Self::None => None,
        }
    }
}

/// A named data point on a device.
#[derive(Debug, Clone, Serialize)]
pub struct Tag {
    /// Tag name, unique within its driver.
    pub name: String,

    /// Raw address string, e.g. `"DB1.DBW20"` or `"I0.0"`.
    pub address: String,

    /// Declared wire datatype.
    pub datatype: DataType,

    /// Whether write commands are accepted for this tag.
    pub writable: bool,

    /// Optional free-form description from the persisted record.
    pub description: String,

    /// Whether the address string parsed successfully.
    pub parsed: bool,

    /// Parsed protocol metadata; populated once at construction.
    pub meta: TagMeta,

    /// Last read value (`Null` after a failed read).
    pub value: Value,

    /// Quality of the last value.
    pub quality: Quality,

    /// Timestamp of the last read attempt; `None` before the first one.
    pub timestamp: Option<DateTime<Utc>>,
}

impl Tag {
    /// Create a tag with the given identity and no runtime state.
    pub fn new(name: impl Into<String>, address: impl Into<String>, datatype: DataType) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            datatype,
            writable: false,
            description: String::new(),
            parsed: false,
            meta: TagMeta::None,
            value: Value::Null,
            quality: Quality::Uncertain,
            timestamp: None,
        }
    }

    /// Set writability.
    #[must_use]
    pub fn with_writable(mut self, writable: bool) -> Self {
        self.writable = writable;
        self
    }

    /// Set the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the initial value.
    #[must_use]
    pub fn with_initial(mut self, value: Value) -> Self {
        self.value = value;
        self
    }

    /// Record a successful read.
    pub fn mark_good(&mut self, value: Value, timestamp: DateTime<Utc>) {
        self.value = value;
        self.quality = Quality::Good;
        self.timestamp = Some(timestamp);
    }

    /// Record a failed read. The value is cleared.
    pub fn mark_bad(&mut self, timestamp: DateTime<Utc>) {
        self.value = Value::Null;
        self.quality = Quality::Bad;
        self.timestamp = Some(timestamp);
    }
}
