use std::collections::BTreeMap;

use crate::types::{TenantDescriptor, TenantId};

/// Tenants known at one point in time, keyed by id.
pub type TenantSnapshot = BTreeMap<TenantId, TenantDescriptor>;

/// A change of the cluster topology.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopologyEvent {
    TenantAdded(TenantDescriptor),
    TenantRemoved { id: TenantId, name: String },
}

/// Computes the events turning `old` into `new`.
///
/// Removals come first. A tenant whose name changed is reported as removed and added again,
/// since the id alone identifies a pipeline.
pub fn diff_snapshots(old: &TenantSnapshot, new: &TenantSnapshot) -> Vec<TopologyEvent> {
    let mut removed = Vec::new();
    let mut added = Vec::new();

    for (id, tenant) in old {
        match new.get(id) {
            Some(current) if current == tenant => {}
            Some(current) => {
                removed.push(TopologyEvent::TenantRemoved {
                    id: *id,
                    name: tenant.display_name.clone(),
                });
                added.push(TopologyEvent::TenantAdded(current.clone()));
            }
            None => removed.push(TopologyEvent::TenantRemoved {
                id: *id,
                name: tenant.display_name.clone(),
            }),
        }
    }

    for (id, tenant) in new {
        if !old.contains_key(id) {
            added.push(TopologyEvent::TenantAdded(tenant.clone()));
        }
    }

    removed.extend(added);
    removed
}
