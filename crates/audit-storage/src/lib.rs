//! Durable [`SnapshotStore`] backends: a single JSON file replaced atomically,
//! or a sled database.

pub mod file_store;
pub mod sled_store;

use anyhow::{bail, Result};
use audit_core::SnapshotStore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

pub use file_store::FileStore;
pub use sled_store::SledStore;

/// File name used by [`FileStore`] inside the data directory.
pub const SNAPSHOT_FILE_NAME: &str = "audit-ledger.json";
/// Sub-directory holding the sled database.
pub const SLED_DIR_NAME: &str = "sled";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    File,
    Sled,
}

impl fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageBackend::File => f.write_str("file"),
            StorageBackend::Sled => f.write_str("sled"),
        }
    }
}

impl FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" => Ok(StorageBackend::File),
            "sled" => Ok(StorageBackend::Sled),
            other => bail!("unknown storage backend '{other}' (expected 'file' or 'sled')"),
        }
    }
}

/// Open the chosen backend under `data_dir`, creating the directory if needed.
pub fn open_store(backend: StorageBackend, data_dir: &Path) -> Result<Arc<dyn SnapshotStore>> {
    std::fs::create_dir_all(data_dir)?;
    Ok(match backend {
        StorageBackend::File => Arc::new(FileStore::new(data_dir.join(SNAPSHOT_FILE_NAME))),
        StorageBackend::Sled => Arc::new(SledStore::open(data_dir.join(SLED_DIR_NAME))?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_names_parse() {
        assert_eq!("FILE".parse::<StorageBackend>().unwrap(), StorageBackend::File);
        assert_eq!(" sled ".parse::<StorageBackend>().unwrap(), StorageBackend::Sled);
        assert!("postgres".parse::<StorageBackend>().is_err());
        assert_eq!(StorageBackend::Sled.to_string(), "sled");
    }
}
