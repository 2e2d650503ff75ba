//! Protocol driver registry.
//!
//! Maps a protocol name (the scheme of a driver's URL) to a constructor,
//! so new protocols plug in without touching the manager. The registry is
//! an explicitly-owned object, not process-global state: tests inject a
//! scoped registry with fake protocols, the binary builds one with the
//! built-in set.

use std::collections::HashMap;
use std::sync::Arc;

use crate::core::error::{AgentError, Result};
use crate::core::tag::Tag;
use crate::core::traits::DeviceDriver;
use crate::store::RealtimeSink;

/// Everything a protocol constructor receives.
pub struct DriverParams {
    /// Driver id from the persisted record.
    pub id: String,

    /// Human-readable name.
    pub name: String,

    /// Full connection URL (the constructor re-parses its own query
    /// parameters from it).
    pub raw_url: String,

    /// Tags built from the persisted rows, addresses not yet parsed.
    pub tags: Vec<Tag>,

    /// Sink the driver reports to each poll cycle.
    pub sink: Arc<dyn RealtimeSink>,
}

/// Constructor function registered per protocol.
pub type DriverConstructor =
    Box<dyn Fn(DriverParams) -> Result<Box<dyn DeviceDriver>> + Send + Sync>;

/// Protocol-name-to-constructor lookup.
#[derive(Default)]
pub struct DriverRegistry {
    constructors: HashMap<String, DriverConstructor>,
}

impl DriverRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with all built-in protocols registered.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        crate::protocols::register_all(&mut registry);
        registry
    }

    /// Register a constructor for a protocol name.
    ///
    /// Names are matched case-insensitively against URL schemes; a second
    /// registration under the same name replaces the first.
    pub fn register<F>(&mut self, protocol: &str, constructor: F)
    where
        F: Fn(DriverParams) -> Result<Box<dyn DeviceDriver>> + Send + Sync + 'static,
    {
        self.constructors
            .insert(protocol.to_ascii_lowercase(), Box::new(constructor));
    }

    /// Check whether a protocol is registered.
    pub fn contains(&self, protocol: &str) -> bool {
        self.constructors.contains_key(&protocol.to_ascii_lowercase())
    }

    /// Registered protocol names.
    pub fn protocols(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.constructors.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Construct a driver for the given protocol.
    ///
    /// Returns [`AgentError::UnknownProtocol`] when no constructor is
    /// registered. The manager treats that as non-fatal: the offending
    /// device is omitted from the active set.
    pub fn construct(&self, protocol: &str, params: DriverParams) -> Result<Box<dyn DeviceDriver>> {
        let constructor = self
            .constructors
            .get(&protocol.to_ascii_lowercase())
            .ok_or_else(|| AgentError::UnknownProtocol(protocol.to_string()))?;
        constructor(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemorySink;

    fn params(id: &str) -> DriverParams {
        DriverParams {
            id: id.to_string(),
            name: String::new(),
            raw_url: "s7://10.0.0.1?rack=0&slot=1".to_string(),
            tags: Vec::new(),
            sink: Arc::new(MemorySink::new()),
        }
    }

    #[test]
    fn test_unknown_protocol() {
        let registry = DriverRegistry::new();
        let err = registry.construct("dnp3", params("d1")).unwrap_err();
        assert!(matches!(err, AgentError::UnknownProtocol(p) if p == "dnp3"));
    }

    #[test]
    fn test_builtin_has_s7() {
        let registry = DriverRegistry::with_builtin();
        assert!(registry.contains("s7"));
        assert!(registry.contains("S7"));
        assert_eq!(registry.protocols(), vec!["s7"]);
    }
}
