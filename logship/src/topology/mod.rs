//! Discovery of the tenants hosted on a cluster.

mod events;
pub mod registry;

pub use events::{TenantSnapshot, TopologyEvent, diff_snapshots};
pub use registry::RegistryTopologyWatcher;
