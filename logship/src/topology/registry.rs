//! Tenant discovery from the cluster registry file.
//!
//! The registry (`1CV8Clst.lst` by default) is a brace-nested text file. Every tenant entry
//! starts with `{<uuid>,"<name>","<description>",` and the tenant data lives in the
//! `<cluster>/<uuid>` folder. Other entries of the file also start with a uuid, so only the
//! ones with a matching folder are tenants.

use std::collections::HashSet;
use std::time::Duration;

use logship_config::shared::ClusterConfig;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::concurrency::shutdown::ShutdownRx;
use crate::error::{ErrorKind, ExportResult};
use crate::export_error;
use crate::topology::{TenantSnapshot, TopologyEvent, diff_snapshots};
use crate::types::{TenantDescriptor, TenantId};

const UUID_LEN: usize = 36;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// An entry of the registry file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryEntry {
    pub id: TenantId,
    pub name: String,
    pub description: String,
}

/// Extracts every `{<uuid>,"<name>"` entry of a registry file, first occurrence wins.
pub fn parse_registry(content: &str) -> Vec<RegistryEntry> {
    let mut entries = Vec::new();
    let mut seen = HashSet::new();

    let mut pos = 0;
    while let Some(found) = content.get(pos..).and_then(|rest| rest.find('{')) {
        let start = pos + found + 1;
        pos = start;

        let Some(id) = content
            .get(start..start + UUID_LEN)
            .and_then(TenantId::parse)
        else {
            continue;
        };
        let Some((name, next)) = quoted_field(content, start + UUID_LEN) else {
            continue;
        };
        let description = quoted_field(content, next)
            .map(|(description, _)| description)
            .unwrap_or_default();

        if seen.insert(id) {
            entries.push(RegistryEntry {
                id,
                name,
                description,
            });
        }
        pos = next;
    }

    entries
}

/// Reads a `,"..."` field at `at`, returning the unescaped value and the index after it.
fn quoted_field(content: &str, at: usize) -> Option<(String, usize)> {
    let rest = content.get(at..)?.strip_prefix(",\"")?;

    let mut value = String::new();
    let mut chars = rest.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if c != '"' {
            value.push(c);
            continue;
        }
        if chars.next_if(|&(_, next)| next == '"').is_some() {
            value.push('"');
            continue;
        }
        return Some((value, at + 2 + i + 1));
    }

    None
}

/// Watches the registry file of a cluster and reports tenant changes.
#[derive(Debug, Clone)]
pub struct RegistryTopologyWatcher {
    config: ClusterConfig,
}

impl RegistryTopologyWatcher {
    pub fn new(config: ClusterConfig) -> Self {
        Self { config }
    }

    /// Reads the registry and returns the selected tenants that have a folder on disk.
    pub async fn scan(&self) -> ExportResult<TenantSnapshot> {
        let path = self.config.registry_path();
        let bytes = tokio::fs::read(&path).await.map_err(|err| {
            export_error!(
                ErrorKind::SourceUnavailable,
                "Cluster registry is not readable",
                format!("{}: {err}", path.display())
            )
        })?;
        let content = String::from_utf8_lossy(&bytes);
        let content = content.trim_start_matches('\u{feff}');

        let mut snapshot = TenantSnapshot::new();
        for entry in parse_registry(content) {
            let folder = self.config.directory.join(entry.id.to_string());
            let is_tenant = tokio::fs::metadata(&folder)
                .await
                .is_ok_and(|metadata| metadata.is_dir());
            if !is_tenant {
                continue;
            }

            if !self.config.is_tenant_selected(&entry.name) {
                debug!(tenant_id = %entry.id, tenant = %entry.name, "tenant excluded by discovery rules");
                continue;
            }

            snapshot.insert(entry.id, TenantDescriptor::new(entry.id, entry.name));
        }

        Ok(snapshot)
    }

    /// Takes the initial snapshot and spawns the rescan task.
    ///
    /// The task sends the differences between consecutive scans until `shutdown_rx` fires or
    /// the receiver is dropped. A failed rescan keeps the previous snapshot.
    pub async fn start(
        self,
        mut shutdown_rx: ShutdownRx,
    ) -> ExportResult<(TenantSnapshot, mpsc::Receiver<TopologyEvent>, JoinHandle<()>)> {
        let initial = self.scan().await?;
        info!(
            tenants = initial.len(),
            registry = %self.config.registry_path().display(),
            "initial cluster scan completed"
        );

        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let mut known = initial.clone();
        let period = Duration::from_secs(self.config.scan_interval_secs.max(1));

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;

                    _ = shutdown_rx.changed() => {
                        info!("topology watcher stopped");
                        return;
                    }
                    _ = interval.tick() => {}
                }

                let current = match self.scan().await {
                    Ok(current) => current,
                    Err(err) => {
                        warn!(error = %err, "cluster rescan failed, keeping the previous snapshot");
                        continue;
                    }
                };

                for event in diff_snapshots(&known, &current) {
                    debug!(?event, "topology changed");
                    if events_tx.send(event).await.is_err() {
                        debug!("topology event receiver dropped, watcher exits");
                        return;
                    }
                }
                known = current;
            }
        });

        Ok((initial, events_rx, handle))
    }
}
