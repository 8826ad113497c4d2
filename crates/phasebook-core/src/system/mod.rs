//! # System Module
//!
//! Phase gate evaluation.
//!
//! Phase *assessment* is a pure, deterministic function of the state record,
//! so it lives in the core. Phase *changes* are explicit operations on the
//! engine and always require operator confirmation.

mod gate;

pub use gate::*;
