//! Helpers shared by unit and integration tests.

pub mod cluster;
pub mod failing;
pub mod notify;
pub mod pipeline;
pub mod sink;
pub mod source;
