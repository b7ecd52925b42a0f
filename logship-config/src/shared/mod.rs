mod base;
mod cluster;
mod exporter;
mod pipeline;
mod retry;
mod sentry;
mod sink;

pub use base::*;
pub use cluster::*;
pub use exporter::*;
pub use pipeline::*;
pub use retry::*;
pub use sentry::*;
pub use sink::*;
