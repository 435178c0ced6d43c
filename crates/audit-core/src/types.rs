//! Ledger data model: operation types, transactions and blocks.

use crate::constants::TRANSACTION_ID_BYTES;
use crate::hash;
use crate::{LedgerError, Result};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

/// Sanitized key-value payload attached to a transaction.
pub type Payload = Map<String, Value>;

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Business operations the ledger records.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationType {
    /// Bootstrap record carried by the genesis block. Never accepted from callers.
    SystemInit,
    TaskCreated,
    TaskAssigned,
    TaskStarted,
    TaskCompleted,
    TaskCancelled,
    CashCollected,
    CashHandover,
    CashDeposited,
    InventoryAdjusted,
    InventoryReceived,
    InventoryIssued,
    UserCreated,
    UserUpdated,
    UserLogin,
    UserAction,
    AlertRaised,
    AlertResolved,
}

impl OperationType {
    pub const ALL: [OperationType; 18] = [
        OperationType::SystemInit,
        OperationType::TaskCreated,
        OperationType::TaskAssigned,
        OperationType::TaskStarted,
        OperationType::TaskCompleted,
        OperationType::TaskCancelled,
        OperationType::CashCollected,
        OperationType::CashHandover,
        OperationType::CashDeposited,
        OperationType::InventoryAdjusted,
        OperationType::InventoryReceived,
        OperationType::InventoryIssued,
        OperationType::UserCreated,
        OperationType::UserUpdated,
        OperationType::UserLogin,
        OperationType::UserAction,
        OperationType::AlertRaised,
        OperationType::AlertResolved,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::SystemInit => "SYSTEM_INIT",
            OperationType::TaskCreated => "TASK_CREATED",
            OperationType::TaskAssigned => "TASK_ASSIGNED",
            OperationType::TaskStarted => "TASK_STARTED",
            OperationType::TaskCompleted => "TASK_COMPLETED",
            OperationType::TaskCancelled => "TASK_CANCELLED",
            OperationType::CashCollected => "CASH_COLLECTED",
            OperationType::CashHandover => "CASH_HANDOVER",
            OperationType::CashDeposited => "CASH_DEPOSITED",
            OperationType::InventoryAdjusted => "INVENTORY_ADJUSTED",
            OperationType::InventoryReceived => "INVENTORY_RECEIVED",
            OperationType::InventoryIssued => "INVENTORY_ISSUED",
            OperationType::UserCreated => "USER_CREATED",
            OperationType::UserUpdated => "USER_UPDATED",
            OperationType::UserLogin => "USER_LOGIN",
            OperationType::UserAction => "USER_ACTION",
            OperationType::AlertRaised => "ALERT_RAISED",
            OperationType::AlertResolved => "ALERT_RESOLVED",
        }
    }

    /// Whether callers may submit this type. `SYSTEM_INIT` is reserved for genesis.
    pub fn is_submittable(&self) -> bool {
        !matches!(self, OperationType::SystemInit)
    }

    /// Parse a caller-supplied operation type, rejecting reserved values.
    pub fn parse_submittable(raw: &str) -> Result<Self> {
        let op: OperationType = raw.parse()?;
        if !op.is_submittable() {
            return Err(LedgerError::InvalidOperationType(raw.to_string()));
        }
        Ok(op)
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationType {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_uppercase();
        OperationType::ALL
            .iter()
            .copied()
            .find(|op| op.as_str() == wanted)
            .ok_or_else(|| LedgerError::InvalidOperationType(s.to_string()))
    }
}

/// One recorded business operation. `hash` is fixed at creation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: String,
    pub timestamp: u64,
    pub operation_type: OperationType,
    pub actor_id: String,
    pub subject_id: Option<String>,
    pub payload: Payload,
    pub hash: String,
}

impl Transaction {
    /// Record a new operation with a random id and the current time.
    pub fn record(
        operation_type: OperationType,
        actor_id: impl Into<String>,
        subject_id: Option<String>,
        payload: Payload,
    ) -> Self {
        Self::with_fields(
            new_transaction_id(),
            now_millis(),
            operation_type,
            actor_id,
            subject_id,
            payload,
        )
    }

    /// Build a transaction from explicit fields, computing its hash.
    pub fn with_fields(
        id: impl Into<String>,
        timestamp: u64,
        operation_type: OperationType,
        actor_id: impl Into<String>,
        subject_id: Option<String>,
        payload: Payload,
    ) -> Self {
        let id = id.into();
        let actor_id = actor_id.into();
        let hash = hash::hash_transaction(
            &id,
            timestamp,
            operation_type,
            &actor_id,
            subject_id.as_deref(),
            &payload,
        );
        Self {
            id,
            timestamp,
            operation_type,
            actor_id,
            subject_id,
            payload,
            hash,
        }
    }

    /// Recompute the content hash from the stored fields.
    pub fn compute_hash(&self) -> String {
        hash::hash_transaction(
            &self.id,
            self.timestamp,
            self.operation_type,
            &self.actor_id,
            self.subject_id.as_deref(),
            &self.payload,
        )
    }

    pub fn is_hash_valid(&self) -> bool {
        self.compute_hash() == self.hash
    }
}

/// Cryptographically random transaction identifier, hex encoded.
pub fn new_transaction_id() -> String {
    let mut bytes = [0u8; TRANSACTION_ID_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// A sealed, hash-linked batch of transactions.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub index: u64,
    pub timestamp: u64,
    pub transactions: Vec<Transaction>,
    pub previous_hash: String,
    pub hash: String,
    pub nonce: u64,
}

impl Block {
    /// Unsealed block: nonce 0 and no hash until proof-of-work runs.
    pub fn template(index: u64, previous_hash: impl Into<String>, transactions: Vec<Transaction>) -> Self {
        Self {
            index,
            timestamp: now_millis(),
            transactions,
            previous_hash: previous_hash.into(),
            hash: String::new(),
            nonce: 0,
        }
    }

    pub fn compute_hash(&self) -> String {
        hash::hash_block(
            self.index,
            self.timestamp,
            &self.transactions,
            &self.previous_hash,
            self.nonce,
        )
    }

    pub fn summary(&self) -> BlockSummary {
        BlockSummary {
            index: self.index,
            hash: self.hash.clone(),
            previous_hash: self.previous_hash.clone(),
            timestamp: self.timestamp,
            nonce: self.nonce,
            transaction_count: self.transactions.len(),
        }
    }
}

/// Block header fields without the transaction bodies.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockSummary {
    pub index: u64,
    pub hash: String,
    pub previous_hash: String,
    pub timestamp: u64,
    pub nonce: u64,
    pub transaction_count: usize,
}
