//! Tamper-evident audit ledger.
//!
//! Business operations are admitted into a pending pool, sealed into
//! hash-linked proof-of-work blocks, and persisted as atomic snapshots. Any
//! edit to a sealed block or transaction is caught by recomputing hashes.
//!
//! ```no_run
//! # async fn demo() -> audit_core::Result<()> {
//! use audit_core::{Ledger, LedgerConfig, MemoryStore};
//! use std::sync::Arc;
//!
//! let ledger = Ledger::open(LedgerConfig::default(), Arc::new(MemoryStore::new()))?;
//! let receipt = ledger
//!     .log_operation("TASK_COMPLETED", &serde_json::json!({ "taskId": 7 }), "driver-3", Some("task-7"))
//!     .await;
//! assert!(receipt.success);
//! # Ok(())
//! # }
//! ```

pub mod chain;
pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod hash;
pub mod ledger;
pub mod pool;
pub mod pow;
pub mod query;
pub mod sanitize;
pub mod sealer;
pub mod snapshot;
pub mod types;
pub mod validation;

pub use chain::{genesis_block, Chain};
pub use config::LedgerConfig;
pub use error::{LedgerError, Result};
pub use events::{EventBus, LedgerEvent};
pub use hash::{hash_block, hash_transaction, Hash};
pub use ledger::{Ledger, OperationReceipt, SealReport, Submission};
pub use pool::TransactionPool;
pub use query::{
    ChainStats, ExportBundle, ExportFormat, HistoryEntry, HistoryFilter, HistoryPage,
    TransactionStatus, VerificationReport,
};
pub use sanitize::Sanitizer;
pub use sealer::{SealTrigger, Sealer, SealerState};
pub use snapshot::{LoadOutcome, MemoryStore, Persistence, Snapshot, SnapshotMetadata, SnapshotStore};
pub use types::{Block, BlockSummary, OperationType, Payload, Transaction};
pub use validation::{first_invalid_index, is_chain_valid, validate_chain, ValidationReport};
