use crate::constants::{DEFAULT_DATA_DIR, DEFAULT_LISTEN};
use anyhow::{Context, Result};
use audit_core::LedgerConfig;
use audit_storage::StorageBackend;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Node settings. The `[ledger]` table carries the [`LedgerConfig`].
///
/// ```toml
/// listen = "0.0.0.0:8080"
/// data_dir = "/var/lib/audit"
/// backend = "sled"
///
/// [ledger]
/// difficulty = 3
/// seal_threshold = 25
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub listen: String,
    pub data_dir: PathBuf,
    pub backend: StorageBackend,
    pub ledger: LedgerConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN.to_string(),
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            backend: StorageBackend::File,
            ledger: LedgerConfig::default(),
        }
    }
}

impl NodeConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
    }

    /// Defaults when `path` is `None`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    pub fn listen_addr(&self) -> Result<SocketAddr> {
        self.listen
            .parse()
            .with_context(|| format!("invalid listen address '{}'", self.listen))
    }
}
