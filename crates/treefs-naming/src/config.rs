//! Naming service configuration

use std::path::Path as FsPath;

use serde::{Deserialize, Serialize};

use crate::types::{NamingError, Result};

/// In-memory storage server started by the binary at boot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DemoServerConfig {
    /// Advertised capacity.
    pub capacity: u64,
    /// Files the server holds when it registers, e.g. `/data/a/b.txt`.
    #[serde(default)]
    pub files: Vec<String>,
}

/// Configuration for the naming service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NamingConfig {
    /// Shared grants per hot-path report (a report every N grants).
    pub replication_threshold: u64,
    /// Maximum hot paths kept waiting for a replicator.
    pub replication_queue_capacity: usize,
    /// In-memory storage servers to register at startup.
    pub storage_servers: Vec<DemoServerConfig>,
}

impl Default for NamingConfig {
    fn default() -> Self {
        Self {
            replication_threshold: 20,
            replication_queue_capacity: 1024,
            storage_servers: Vec::new(),
        }
    }
}

impl NamingConfig {
    /// Loads a TOML or JSON config, chosen by file extension.
    pub fn from_file(path: &FsPath) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| NamingError::Config(format!("{}: {}", path.display(), e)))?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        let config: NamingConfig = match ext.to_lowercase().as_str() {
            "toml" => toml::from_str(&contents).map_err(|e| NamingError::Config(e.to_string()))?,
            "json" => {
                serde_json::from_str(&contents).map_err(|e| NamingError::Config(e.to_string()))?
            }
            _ => {
                return Err(NamingError::Config(format!(
                    "unsupported config file extension: {}",
                    ext
                )))
            }
        };
        config.validate()?;
        Ok(config)
    }

    /// Rejects values the service cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.replication_threshold == 0 {
            return Err(NamingError::Config(
                "replication_threshold must be at least 1".to_string(),
            ));
        }
        if self.replication_queue_capacity == 0 {
            return Err(NamingError::Config(
                "replication_queue_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
