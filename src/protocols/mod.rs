//! Protocol driver implementations.

pub mod s7;

use crate::driver::registry::DriverRegistry;

/// Register every built-in protocol.
pub fn register_all(registry: &mut DriverRegistry) {
    s7::register(registry);
}
