//! Continuous export of tenant event logs into analytical stores.
//!
//! The crate tails the append-only event logs of every tenant hosted on a cluster and ships
//! newly appended records to a pluggable [`sink::Sink`]. A [`supervisor::PipelineSupervisor`]
//! owns one [`pipeline::ExportPipeline`] per tenant and starts or stops them as the
//! [`topology::RegistryTopologyWatcher`] reports tenants appearing and disappearing.
//!
//! Every sink persists its own [`types::Checkpoint`] together with the data it writes, so a
//! restarted pipeline resumes right after the last committed batch. Delivery is at-least-once.

mod concurrency;
pub mod conversions;
pub mod error;
mod macros;
pub mod pipeline;
pub mod sink;
pub mod source;
pub mod supervisor;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod topology;
pub mod types;
pub mod utils;

pub use concurrency::shutdown::{ShutdownRx, ShutdownTx, create_shutdown_channel};
