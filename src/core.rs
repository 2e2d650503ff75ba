//! Core abstractions for the data-collection agent.
//!
//! This module provides the foundational types that drivers, the registry
//! and the manager build on.

pub mod data;
pub mod error;
pub mod quality;
pub mod tag;
pub mod traits;

pub use data::*;
pub use error::{AgentError, Result};
pub use quality::*;
pub use tag::*;
pub use traits::*;
