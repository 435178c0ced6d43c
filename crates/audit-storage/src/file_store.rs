use anyhow::{Context, Result};
use audit_core::types::now_millis;
use audit_core::SnapshotStore;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// Keeps the snapshot in one file. Writes go to a temporary file in the same
/// directory which is synced and then renamed over the target, so a crash
/// leaves either the old or the new snapshot on disk.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sibling file a corrupt snapshot is copied to before being replaced.
    pub fn quarantine_path(&self, stamp: u64) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(format!(".corrupt-{stamp}"));
        self.path.with_file_name(name)
    }

    fn dir(&self) -> &Path {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        }
    }
}

impl SnapshotStore for FileStore {
    fn write(&self, bytes: &[u8]) -> Result<()> {
        let dir = self.dir();
        fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
        let mut tmp = NamedTempFile::new_in(dir)
            .with_context(|| format!("creating temporary file in {}", dir.display()))?;
        tmp.write_all(bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path)
            .with_context(|| format!("replacing {}", self.path.display()))?;
        debug!(path = %self.path.display(), bytes = bytes.len(), "snapshot file replaced");
        Ok(())
    }

    fn read(&self) -> Result<Option<Vec<u8>>> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err).with_context(|| format!("reading {}", self.path.display())),
        }
    }

    fn describe(&self) -> String {
        format!("file:{}", self.path.display())
    }

    fn preserve(&self, bytes: &[u8]) -> Result<Option<String>> {
        let target = self.quarantine_path(now_millis());
        fs::write(&target, bytes).with_context(|| format!("writing {}", target.display()))?;
        warn!(path = %target.display(), bytes = bytes.len(), "corrupt snapshot copied aside");
        Ok(Some(format!("file:{}", target.display())))
    }
}
