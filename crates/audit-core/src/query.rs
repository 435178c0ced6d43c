//! Read-side views over sealed blocks and pending transactions: filtered
//! history, single-transaction verification, statistics and export.

use crate::snapshot::Snapshot;
use crate::types::{Block, OperationType, Transaction};
use crate::{LedgerError, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Sealed,
}

/// All supplied fields must match. `since`/`until` are inclusive millisecond bounds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryFilter {
    /// Parsed like submissions: trimmed and case-insensitive.
    #[serde(default, deserialize_with = "operation_type_from_str")]
    pub operation_type: Option<OperationType>,
    pub actor_id: Option<String>,
    pub subject_id: Option<String>,
    pub since: Option<u64>,
    pub until: Option<u64>,
    pub limit: Option<usize>,
}

fn operation_type_from_str<'de, D>(deserializer: D) -> std::result::Result<Option<OperationType>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer)?
        .map(|raw| raw.parse().map_err(serde::de::Error::custom))
        .transpose()
}

impl HistoryFilter {
    pub fn matches(&self, tx: &Transaction) -> bool {
        self.operation_type.map_or(true, |op| tx.operation_type == op)
            && self.actor_id.as_deref().map_or(true, |a| tx.actor_id == a)
            && self
                .subject_id
                .as_deref()
                .map_or(true, |s| tx.subject_id.as_deref() == Some(s))
            && self.since.map_or(true, |since| tx.timestamp >= since)
            && self.until.map_or(true, |until| tx.timestamp <= until)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    #[serde(flatten)]
    pub transaction: Transaction,
    pub status: TransactionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_index: Option<u64>,
}

/// `total` counts every match before `limit` is applied.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPage {
    pub total: usize,
    pub operations: Vec<HistoryEntry>,
}

pub fn history(
    blocks: &[Block],
    pending: &[Transaction],
    filter: &HistoryFilter,
    default_limit: usize,
) -> HistoryPage {
    let sealed = blocks.iter().flat_map(|block| {
        block.transactions.iter().map(move |tx| HistoryEntry {
            transaction: tx.clone(),
            status: TransactionStatus::Sealed,
            block_index: Some(block.index),
        })
    });
    let unsealed = pending.iter().map(|tx| HistoryEntry {
        transaction: tx.clone(),
        status: TransactionStatus::Pending,
        block_index: None,
    });

    let mut operations: Vec<HistoryEntry> = sealed
        .chain(unsealed)
        .filter(|entry| filter.matches(&entry.transaction))
        .collect();
    operations.sort_by(|a, b| b.transaction.timestamp.cmp(&a.transaction.timestamp));
    let total = operations.len();
    operations.truncate(filter.limit.unwrap_or(default_limit));
    HistoryPage { total, operations }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationReport {
    pub found: bool,
    pub is_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TransactionStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_index: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_hash: Option<String>,
}

impl VerificationReport {
    pub fn not_found() -> Self {
        Self {
            found: false,
            is_valid: false,
            status: None,
            block_index: None,
            block_hash: None,
        }
    }
}

/// Look in sealed blocks first, then the pending pool. Validity is the
/// transaction's own hash check, independent of whole-chain integrity.
pub fn verify(blocks: &[Block], pending: &[Transaction], id: &str) -> VerificationReport {
    for block in blocks {
        if let Some(tx) = block.transactions.iter().find(|tx| tx.id == id) {
            return VerificationReport {
                found: true,
                is_valid: tx.is_hash_valid(),
                status: Some(TransactionStatus::Sealed),
                block_index: Some(block.index),
                block_hash: Some(block.hash.clone()),
            };
        }
    }
    match pending.iter().find(|tx| tx.id == id) {
        Some(tx) => VerificationReport {
            found: true,
            is_valid: tx.is_hash_valid(),
            status: Some(TransactionStatus::Pending),
            block_index: None,
            block_hash: None,
        },
        None => VerificationReport::not_found(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainStats {
    pub total_blocks: usize,
    /// Sealed plus pending.
    pub total_transactions: usize,
    pub pending_count: usize,
    pub difficulty: usize,
    pub chain_size_bytes: usize,
    pub last_block_hash: Option<String>,
    pub last_block_timestamp: Option<u64>,
    pub counts_by_operation_type: BTreeMap<String, usize>,
    pub chain_integrity: bool,
    pub unpersisted_blocks: usize,
}

pub fn stats(
    blocks: &[Block],
    pending: &[Transaction],
    difficulty: usize,
    chain_integrity: bool,
    unpersisted_blocks: usize,
) -> ChainStats {
    let mut counts_by_operation_type = BTreeMap::new();
    let sealed = blocks.iter().flat_map(|b| b.transactions.iter());
    for tx in sealed.chain(pending.iter()) {
        *counts_by_operation_type
            .entry(tx.operation_type.as_str().to_string())
            .or_insert(0) += 1;
    }
    let sealed_count: usize = blocks.iter().map(|b| b.transactions.len()).sum();
    let tip = blocks.last();
    ChainStats {
        total_blocks: blocks.len(),
        total_transactions: sealed_count + pending.len(),
        pending_count: pending.len(),
        difficulty,
        chain_size_bytes: serde_json::to_vec(blocks).map_or(0, |bytes| bytes.len()),
        last_block_hash: tip.map(|b| b.hash.clone()),
        last_block_timestamp: tip.map(|b| b.timestamp),
        counts_by_operation_type,
        chain_integrity,
        unpersisted_blocks,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Json,
    Csv,
}

impl ExportFormat {
    pub fn mime_type(&self) -> &'static str {
        match self {
            ExportFormat::Json => "application/json",
            ExportFormat::Csv => "text/csv",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ExportFormat {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "csv" => Ok(ExportFormat::Csv),
            other => Err(LedgerError::Serialization(format!(
                "unsupported export format: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportBundle {
    pub data: String,
    pub mime_type: String,
    pub filename: String,
}

const CSV_COLUMNS: [&str; 10] = [
    "status",
    "blockIndex",
    "blockHash",
    "id",
    "timestamp",
    "operationType",
    "actorId",
    "subjectId",
    "payload",
    "hash",
];

pub fn export(snapshot: &Snapshot, format: ExportFormat) -> Result<ExportBundle> {
    let data = match format {
        ExportFormat::Json => serde_json::to_string_pretty(snapshot)?,
        ExportFormat::Csv => render_csv(snapshot)?,
    };
    Ok(ExportBundle {
        data,
        mime_type: format.mime_type().to_string(),
        filename: format!(
            "audit-ledger-{}.{}",
            snapshot.metadata.saved_at,
            format.extension()
        ),
    })
}

fn render_csv(snapshot: &Snapshot) -> Result<String> {
    let meta = &snapshot.metadata;
    let mut out = format!(
        "# version: {}\n# savedAt: {}\n# length: {}\n# pending: {}\n# difficulty: {}\n",
        meta.version, meta.saved_at, meta.length, meta.pending, meta.difficulty
    );

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(CSV_COLUMNS)?;
    for block in &snapshot.chain {
        for tx in &block.transactions {
            write_csv_row(&mut writer, tx, TransactionStatus::Sealed, Some(block))?;
        }
    }
    for tx in &snapshot.pool {
        write_csv_row(&mut writer, tx, TransactionStatus::Pending, None)?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| LedgerError::Serialization(e.to_string()))?;
    let body = String::from_utf8(bytes).map_err(|e| LedgerError::Serialization(e.to_string()))?;
    out.push_str(&body);
    Ok(out)
}

fn write_csv_row(
    writer: &mut csv::Writer<Vec<u8>>,
    tx: &Transaction,
    status: TransactionStatus,
    block: Option<&Block>,
) -> Result<()> {
    let status = match status {
        TransactionStatus::Pending => "pending",
        TransactionStatus::Sealed => "sealed",
    };
    let payload = serde_json::to_string(&tx.payload)?;
    writer.write_record([
        status.to_string(),
        block.map(|b| b.index.to_string()).unwrap_or_default(),
        block.map(|b| b.hash.clone()).unwrap_or_default(),
        tx.id.clone(),
        tx.timestamp.to_string(),
        tx.operation_type.as_str().to_string(),
        tx.actor_id.clone(),
        tx.subject_id.clone().unwrap_or_default(),
        payload,
        tx.hash.clone(),
    ])?;
    Ok(())
}
