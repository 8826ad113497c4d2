//! # Formats Module
//!
//! Serialization formats for persisted records.
//!
//! Pure byte transformations only; file I/O lives in the backends.

mod persistence;

pub use persistence::*;
