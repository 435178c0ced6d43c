//! Error types for the audit ledger

use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Ledger errors
#[derive(Error, Debug)]
pub enum LedgerError {
    /// Operation type is not one the ledger records
    #[error("invalid operation type: {0}")]
    InvalidOperationType(String),

    /// Payload or snapshot could not be encoded
    #[error("serialization failure: {0}")]
    Serialization(String),

    /// Stored chain failed validation or could not be decoded
    #[error("chain corruption{}: {reason}", .index.map(|i| format!(" at block {i}")).unwrap_or_default())]
    ChainCorruption { index: Option<u64>, reason: String },

    /// A seal is already running
    #[error("seal already in progress")]
    SealInProgress,

    /// Proof-of-work hit the iteration bound without a valid nonce
    #[error("proof-of-work exhausted after {iterations} iterations")]
    SealExhausted { iterations: u64 },

    /// The background seal worker panicked or was cancelled
    #[error("seal worker failed: {0}")]
    SealWorker(String),

    /// A sealed block was rejected when appended to the chain
    #[error("block rejected: {0}")]
    BlockRejected(String),

    /// Snapshot write failed; the in-memory chain is ahead of storage
    #[error("persistence write failure: {0}")]
    PersistenceWrite(String),

    /// Byte-store read error
    #[error("storage error: {0}")]
    Storage(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}

impl LedgerError {
    pub fn corruption(index: Option<u64>, reason: impl Into<String>) -> Self {
        LedgerError::ChainCorruption {
            index,
            reason: reason.into(),
        }
    }

    pub fn is_corruption(&self) -> bool {
        matches!(self, LedgerError::ChainCorruption { .. })
    }
}
