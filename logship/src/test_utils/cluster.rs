use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use logship_config::shared::{ClusterConfig, DEFAULT_REGISTRY_FILE};
use tempfile::TempDir;
use uuid::Uuid;

use crate::source::lgp::{LEGACY_MARKER_FILE, LOG_FOLDER_NAME, SQLITE_LOG_FILE};
use crate::types::{TenantDescriptor, TenantId};

const LGP_HEADER: &str = "1CV8LOG(ver 2.0)\r\n7b0c4b0e-9b5e-4f3b-8c2a-9f1e0d2c3b4a\r\n\r\n";

/// Builds one legacy record with the given timestamp (`YYYYMMDDhhmmss`) and comment.
pub fn lgp_record(timestamp: &str, comment: &str) -> String {
    let comment = comment.replace('"', "\"\"");
    format!(
        "{{{timestamp},N,\r\n{{2451f,1a8}},1,1,1,1,1,I,\"{comment}\",2,\r\n{{\"U\"}},\"\",1,1,0,1,0,\r\n{{0}}\r\n}}"
    )
}

/// A cluster directory in a temporary folder, removed on drop.
pub struct TestCluster {
    dir: TempDir,
    tenants: Vec<TenantDescriptor>,
}

impl TestCluster {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("failed to create cluster directory");
        let cluster = Self {
            dir,
            tenants: Vec::new(),
        };
        cluster.write_registry();

        cluster
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn cluster_config(&self) -> ClusterConfig {
        ClusterConfig {
            directory: self.path().to_path_buf(),
            registry_file: DEFAULT_REGISTRY_FILE.to_owned(),
            scan_interval_secs: 1,
            include: Vec::new(),
            exclude: Vec::new(),
        }
    }

    pub fn log_folder(&self, id: TenantId) -> PathBuf {
        self.path().join(id.to_string()).join(LOG_FOLDER_NAME)
    }

    /// Registers a tenant using the legacy log layout.
    pub fn add_tenant(&mut self, name: &str) -> TenantDescriptor {
        let tenant = self.register(name);
        fs::write(self.log_folder(tenant.id).join(LEGACY_MARKER_FILE), "1CV8LOG(ver 2.0)\r\n")
            .expect("failed to write log dictionary");

        tenant
    }

    /// Registers a tenant using the single-file database layout.
    pub fn add_sqlite_tenant(&mut self, name: &str) -> TenantDescriptor {
        let tenant = self.register(name);
        fs::write(self.log_folder(tenant.id).join(SQLITE_LOG_FILE), b"SQLite format 3\0")
            .expect("failed to write log database");

        tenant
    }

    /// Removes a tenant from the registry, keeping its folder.
    pub fn remove_tenant(&mut self, id: TenantId) {
        self.tenants.retain(|tenant| tenant.id != id);
        self.write_registry();
    }

    /// Renames a tenant in the registry, keeping its id.
    pub fn rename_tenant(&mut self, id: TenantId, name: &str) -> TenantDescriptor {
        let renamed = TenantDescriptor::new(id, name);
        for tenant in &mut self.tenants {
            if tenant.id == id {
                *tenant = renamed.clone();
            }
        }
        self.write_registry();

        renamed
    }

    /// Appends records to a data file of `id`, writing the file header first if needed.
    pub fn append_records(&self, id: TenantId, file_name: &str, records: &[String]) {
        let path = self.log_folder(id).join(file_name);
        let is_new = !path.exists();

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .expect("failed to open log file");

        let mut content = String::new();
        if is_new {
            content.push_str(LGP_HEADER);
        }
        for (i, record) in records.iter().enumerate() {
            if !is_new || i > 0 {
                content.push_str(",\r\n");
            }
            content.push_str(record);
        }

        file.write_all(content.as_bytes())
            .expect("failed to append log records");
    }

    /// Appends raw bytes to a data file of `id`.
    pub fn append_raw(&self, id: TenantId, file_name: &str, bytes: &[u8]) {
        let path = self.log_folder(id).join(file_name);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .expect("failed to open log file");

        file.write_all(bytes).expect("failed to append log bytes");
    }

    fn register(&mut self, name: &str) -> TenantDescriptor {
        let tenant = TenantDescriptor::new(TenantId::new(Uuid::new_v4()), name);
        fs::create_dir_all(self.log_folder(tenant.id)).expect("failed to create log folder");

        self.tenants.push(tenant.clone());
        self.write_registry();

        tenant
    }

    fn write_registry(&self) {
        let entries: Vec<String> = self
            .tenants
            .iter()
            .map(|tenant| {
                format!(
                    "{{{},\"{}\",\"\",\"PostgreSQL\",\"db01\",\"{}\",\"\",\"\",0,0,0}}",
                    tenant.id,
                    tenant.display_name.replace('"', "\"\""),
                    tenant.database_name
                )
            })
            .collect();

        let content = format!(
            "{{0,\r\n{{\"Test cluster\",0,1541}},\r\n{{{},\r\n{}\r\n}}\r\n}}",
            entries.len(),
            entries.join(",\r\n")
        );

        // Written through a temporary file so a concurrent scan never sees a partial registry.
        let target = self.path().join(DEFAULT_REGISTRY_FILE);
        let staging = self.path().join(format!("{DEFAULT_REGISTRY_FILE}.tmp"));
        fs::write(&staging, content).expect("failed to write cluster registry");
        fs::rename(&staging, &target).expect("failed to replace cluster registry");
    }
}

impl Default for TestCluster {
    fn default() -> Self {
        Self::new()
    }
}
