//! S7 fieldbus protocol driver.
//!
//! The reference protocol implementation: Siemens-style PLC access over
//! ISO-on-TCP. Register URL scheme: `s7`.
//!
//! # URL parameters
//!
//! `s7://host[:port]?rack=0&slot=1&interval=1000`
//!
//! - `rack`/`slot`: CPU position, default 0/1
//! - `interval`: poll interval in milliseconds, default 1000
//! - port defaults to 102
//!
//! # Address examples
//!
//! - `DB1.DBX0.3` — bit 3 of byte 0 in data block 1
//! - `DB2.STRING10(20)` — string at offset 10, max 20 chars
//! - `MW200` — word at internal-memory offset 200
//! - `Q5.2` — output bit 2 of byte 5

pub mod address;
pub mod client;
pub mod transport;

pub use address::{parse_address, Area, S7Address, WordLen};
pub use client::S7Driver;
pub use transport::{IsoTcpTransport, S7Transport};

use crate::core::traits::DeviceDriver;
use crate::driver::registry::DriverRegistry;

/// Register the S7 driver under its URL scheme.
pub fn register(registry: &mut DriverRegistry) {
    registry.register("s7", |params| {
        S7Driver::from_params(params).map(|driver| Box::new(driver) as Box<dyn DeviceDriver>)
    });
}
