use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Default name of the cluster registry file listing the tenants.
pub const DEFAULT_REGISTRY_FILE: &str = "1CV8Clst.lst";

/// Default interval between two scans of the cluster directory.
pub const DEFAULT_SCAN_INTERVAL_SECS: u64 = 60;

/// Where tenants are discovered and which of them are exported.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Root directory of the cluster, holding the registry file and one folder per tenant.
    pub directory: PathBuf,
    /// Name of the registry file inside [`ClusterConfig::directory`].
    #[serde(default = "default_registry_file")]
    pub registry_file: String,
    /// Seconds between two registry scans.
    #[serde(default = "default_scan_interval_secs")]
    pub scan_interval_secs: u64,
    /// Tenant names to export. Empty means every tenant.
    #[serde(default)]
    pub include: Vec<String>,
    /// Tenant names never exported. Wins over [`ClusterConfig::include`].
    #[serde(default)]
    pub exclude: Vec<String>,
}

impl ClusterConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !self.directory.is_dir() {
            return Err(ValidationError::ClusterDirectoryMissing(
                self.directory.clone(),
            ));
        }

        if self.scan_interval_secs == 0 {
            return Err(ValidationError::ZeroValue("cluster.scan_interval_secs"));
        }

        Ok(())
    }

    /// Returns the full path of the registry file.
    pub fn registry_path(&self) -> PathBuf {
        self.directory.join(&self.registry_file)
    }

    /// Applies the include and exclude rules to a tenant name, ignoring case.
    pub fn is_tenant_selected(&self, name: &str) -> bool {
        let name = name.to_lowercase();
        let matches = |rule: &String| rule.to_lowercase() == name;

        if self.exclude.iter().any(matches) {
            return false;
        }

        self.include.is_empty() || self.include.iter().any(matches)
    }
}

fn default_registry_file() -> String {
    DEFAULT_REGISTRY_FILE.to_owned()
}

fn default_scan_interval_secs() -> u64 {
    DEFAULT_SCAN_INTERVAL_SECS
}
