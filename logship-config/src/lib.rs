//! Configuration management for the log exporter.
//!
//! Provides environment detection, layered loading from YAML files and `APP_` prefixed
//! environment variables, secret handling, and the shared configuration types consumed by
//! the exporter binary and the core library.

mod environment;
mod load;
mod secret;
pub mod shared;

pub use environment::*;
pub use load::*;
pub use secret::*;
