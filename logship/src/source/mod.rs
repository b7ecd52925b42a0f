mod base;
pub mod lgp;

pub use base::{LogSource, LogSourceFactory};
