//! Snapshot persistence over a pluggable durable byte-store.
//!
//! The snapshot is one JSON document `{metadata, chain, pool}`. Stores must
//! replace it atomically; this module owns encoding and the corruption checks
//! applied on load.

use crate::constants::SNAPSHOT_VERSION;
use crate::types::{now_millis, Block, Transaction};
use crate::validation::validate_chain;
use crate::{LedgerError, Result};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMetadata {
    pub version: u32,
    pub saved_at: u64,
    pub length: usize,
    #[serde(default)]
    pub pending: usize,
    #[serde(default)]
    pub difficulty: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub metadata: SnapshotMetadata,
    pub chain: Vec<Block>,
    pub pool: Vec<Transaction>,
}

impl Snapshot {
    pub fn new(chain: Vec<Block>, pool: Vec<Transaction>, difficulty: usize) -> Self {
        Self {
            metadata: SnapshotMetadata {
                version: SNAPSHOT_VERSION,
                saved_at: now_millis(),
                length: chain.len(),
                pending: pool.len(),
                difficulty,
            },
            chain,
            pool,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| LedgerError::Serialization(e.to_string()))
    }

    /// Decode without validating the chain.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| LedgerError::corruption(None, format!("unreadable snapshot: {e}")))
    }
}

/// Durable byte-store holding the latest snapshot.
/// This lives in `audit-core` so storage backends can depend on it without a cycle.
pub trait SnapshotStore: Send + Sync {
    /// Replace the stored snapshot. Readers must never observe a partial write.
    fn write(&self, bytes: &[u8]) -> anyhow::Result<()>;

    /// `Ok(None)` when nothing has been stored yet.
    fn read(&self) -> anyhow::Result<Option<Vec<u8>>>;

    fn describe(&self) -> String;

    /// Keep a copy of a snapshot that failed to load before it gets replaced.
    /// Returns where the copy went, or `None` when the store cannot keep one.
    fn preserve(&self, bytes: &[u8]) -> anyhow::Result<Option<String>> {
        let _ = bytes;
        Ok(None)
    }
}

#[derive(Debug)]
pub enum LoadOutcome {
    Absent,
    Restored(Snapshot),
}

/// Saves and loads snapshots, distinguishing "absent" from "corrupt".
#[derive(Clone)]
pub struct Persistence {
    store: Arc<dyn SnapshotStore>,
    difficulty: usize,
}

impl Persistence {
    pub fn new(store: Arc<dyn SnapshotStore>, difficulty: usize) -> Self {
        Self { store, difficulty }
    }

    pub fn describe(&self) -> String {
        self.store.describe()
    }

    pub fn save(&self, chain: &[Block], pool: &[Transaction]) -> Result<SnapshotMetadata> {
        let snapshot = Snapshot::new(chain.to_vec(), pool.to_vec(), self.difficulty);
        let bytes = snapshot.to_bytes()?;
        self.store
            .write(&bytes)
            .map_err(|e| LedgerError::PersistenceWrite(format!("{e:#}")))?;
        debug!(
            length = snapshot.metadata.length,
            pending = snapshot.metadata.pending,
            bytes = bytes.len(),
            "snapshot saved"
        );
        Ok(snapshot.metadata)
    }

    /// Copy the currently stored bytes aside through [`SnapshotStore::preserve`].
    pub fn preserve_current(&self) -> Result<Option<String>> {
        let bytes = match self
            .store
            .read()
            .map_err(|e| LedgerError::Storage(format!("{e:#}")))?
        {
            Some(bytes) => bytes,
            None => return Ok(None),
        };
        self.store
            .preserve(&bytes)
            .map_err(|e| LedgerError::PersistenceWrite(format!("preserving corrupt snapshot: {e:#}")))
    }

    pub fn load(&self) -> Result<LoadOutcome> {
        let bytes = match self
            .store
            .read()
            .map_err(|e| LedgerError::Storage(format!("{e:#}")))?
        {
            Some(bytes) => bytes,
            None => return Ok(LoadOutcome::Absent),
        };
        let snapshot = Snapshot::from_bytes(&bytes)?;
        check_snapshot(&snapshot, self.difficulty)?;
        info!(
            location = %self.store.describe(),
            length = snapshot.chain.len(),
            pending = snapshot.pool.len(),
            "snapshot restored"
        );
        Ok(LoadOutcome::Restored(snapshot))
    }
}

fn check_snapshot(snapshot: &Snapshot, difficulty: usize) -> Result<()> {
    if snapshot.metadata.version != SNAPSHOT_VERSION {
        return Err(LedgerError::corruption(
            None,
            format!("unsupported snapshot version {}", snapshot.metadata.version),
        ));
    }
    if snapshot.metadata.length != snapshot.chain.len() {
        return Err(LedgerError::corruption(
            None,
            format!(
                "metadata records {} blocks but snapshot holds {}",
                snapshot.metadata.length,
                snapshot.chain.len()
            ),
        ));
    }
    let report = validate_chain(&snapshot.chain, difficulty);
    if !report.valid {
        return Err(LedgerError::corruption(
            report.first_invalid_index,
            report.reason.unwrap_or_else(|| "chain failed validation".into()),
        ));
    }
    if let Some(tx) = snapshot.pool.iter().find(|tx| !tx.is_hash_valid()) {
        return Err(LedgerError::corruption(
            None,
            format!("pending transaction {} hash mismatch", tx.id),
        ));
    }
    Ok(())
}

/// In-process store. Useful for tests and for embedding without durability.
#[derive(Debug, Default)]
pub struct MemoryStore {
    bytes: Mutex<Option<Vec<u8>>>,
    preserved: Mutex<Vec<Vec<u8>>>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bytes(bytes: Vec<u8>) -> Self {
        Self {
            bytes: Mutex::new(Some(bytes)),
            preserved: Mutex::new(Vec::new()),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Make subsequent writes fail, simulating an unavailable disk.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn contents(&self) -> Option<Vec<u8>> {
        self.bytes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Copies kept by [`SnapshotStore::preserve`], oldest first.
    pub fn preserved(&self) -> Vec<Vec<u8>> {
        self.preserved
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl SnapshotStore for MemoryStore {
    fn write(&self, bytes: &[u8]) -> anyhow::Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            anyhow::bail!("memory store is rejecting writes");
        }
        *self.bytes.lock().unwrap_or_else(PoisonError::into_inner) = Some(bytes.to_vec());
        Ok(())
    }

    fn read(&self) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self.contents())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }

    fn preserve(&self, bytes: &[u8]) -> anyhow::Result<Option<String>> {
        let mut preserved = self.preserved.lock().unwrap_or_else(PoisonError::into_inner);
        preserved.push(bytes.to_vec());
        Ok(Some(format!("memory:preserved/{}", preserved.len() - 1)))
    }
}
