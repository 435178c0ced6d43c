#![allow(dead_code)]

use audit_core::{Ledger, LedgerConfig, SnapshotStore};
use audit_storage::{FileStore, SledStore};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::{tempdir, TempDir};

pub fn create_temp_dir() -> (TempDir, PathBuf) {
    let temp_dir = tempdir().expect("Failed to create temp dir");
    let path = temp_dir.path().to_path_buf();
    (temp_dir, path)
}

pub fn remove_temp_dir(temp_dir: TempDir) {
    let path = temp_dir.path().to_path_buf();
    temp_dir.close().expect("Failed to delete temp dir");
    let _ = fs::remove_dir_all(&path);
    assert!(!path.exists(), "Data directory should be removed");
}

pub fn create_file_store() -> (TempDir, FileStore) {
    let (temp_dir, path) = create_temp_dir();
    (temp_dir, FileStore::new(path.join("ledger.json")))
}

pub fn create_sled_store() -> (TempDir, SledStore) {
    let (temp_dir, path) = create_temp_dir();
    let store = SledStore::open(path.join("db")).expect("Failed to open SledStore");
    (temp_dir, store)
}

pub fn ledger_config() -> LedgerConfig {
    LedgerConfig {
        difficulty: 1,
        seal_threshold: 1_000,
        ..LedgerConfig::default()
    }
}

pub fn open_ledger(store: Arc<dyn SnapshotStore>) -> Ledger {
    Ledger::open(ledger_config(), store).expect("Failed to open ledger")
}
