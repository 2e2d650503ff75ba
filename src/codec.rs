//! Value codecs.
//!
//! Conversion between raw device bytes and typed values.

pub mod value;

pub use value::{decode, encode, set_bit};
