use anyhow::{Context, Result};
use audit_core::types::now_millis;
use audit_core::SnapshotStore;
use serde::{Deserialize, Serialize};
use sled::{Db, Tree};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const TREE_SNAPSHOTS: &str = "snapshots";
const TREE_CORRUPT: &str = "corrupt";
const KEY_LATEST: &[u8] = b"latest";

/// Envelope stored under [`KEY_LATEST`].
#[derive(Debug, Serialize, Deserialize)]
struct SnapshotRecord {
  generation: u64,
  payload: Vec<u8>,
}

/// Snapshot kept as one value in a sled tree. A single `insert` replaces it,
/// which sled applies atomically.
#[derive(Clone)]
pub struct SledStore {
  db: Db,
  snapshots: Tree,
  path: PathBuf,
}

impl SledStore {
  pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
    let path = path.as_ref().to_path_buf();
    let db = sled::open(&path).with_context(|| format!("opening sled at {}", path.display()))?;
    let snapshots = db.open_tree(TREE_SNAPSHOTS)?;
    info!(path = %path.display(), "sled store opened");
    Ok(Self {
      db,
      snapshots,
      path,
    })
  }

  /// Number of snapshots written over the life of this database; 0 when empty.
  pub fn generation(&self) -> Result<u64> {
    Ok(self.latest()?.map(|r| r.generation).unwrap_or(0))
  }

  /// Drop the stored snapshot.
  pub fn clear(&self) -> Result<()> {
    self.snapshots.clear()?;
    self.db.flush()?;
    Ok(())
  }

  /// Snapshots set aside by `preserve`, oldest first.
  pub fn preserved(&self) -> Result<Vec<Vec<u8>>> {
    self
      .db
      .open_tree(TREE_CORRUPT)?
      .iter()
      .values()
      .map(|v| Ok::<_, anyhow::Error>(v?.to_vec()))
      .collect()
  }

  fn latest(&self) -> Result<Option<SnapshotRecord>> {
    self
      .snapshots
      .get(KEY_LATEST)?
      .map(|raw| bincode::deserialize(&raw).context("decoding sled snapshot record"))
      .transpose()
  }
}

impl SnapshotStore for SledStore {
  fn write(&self, bytes: &[u8]) -> Result<()> {
    let generation = self.generation()? + 1;
    let record = SnapshotRecord {
      generation,
      payload: bytes.to_vec(),
    };
    self
      .snapshots
      .insert(KEY_LATEST, bincode::serialize(&record)?)?;
    self.db.flush()?;
    Ok(())
  }

  fn read(&self) -> Result<Option<Vec<u8>>> {
    Ok(self.latest()?.map(|r| r.payload))
  }

  fn describe(&self) -> String {
    format!("sled:{}", self.path.display())
  }

  /// Raw corrupt bytes go to the `corrupt` tree keyed by big-endian millis.
  fn preserve(&self, bytes: &[u8]) -> Result<Option<String>> {
    let stamp = now_millis();
    let tree = self.db.open_tree(TREE_CORRUPT)?;
    tree.insert(stamp.to_be_bytes(), bytes)?;
    self.db.flush()?;
    warn!(stamp, bytes = bytes.len(), "corrupt snapshot copied aside");
    Ok(Some(format!("sled:{}#{TREE_CORRUPT}/{stamp}", self.path.display())))
  }
}
