//! # Phasebook Application Library
//!
//! Exposes the CLI, project layout and configuration loading so integration
//! tests can drive commands without spawning the binary.

pub mod cli;
pub mod config;
pub mod project;
