//! The ledger handle callers hold: admission, sealing, durability and reads.
//!
//! Locks: `chain` is always taken before `pool` when both are needed, and no
//! lock is held across an `.await` or a storage write. Admission only touches
//! `pool`; sealing is serialized by the `state` watch channel.

use crate::chain::Chain;
use crate::config::LedgerConfig;
use crate::constants::EVENT_CHANNEL_CAPACITY;
use crate::events::{EventBus, LedgerEvent};
use crate::pool::TransactionPool;
use crate::pow::mine_block;
use crate::query::{self, ChainStats, ExportBundle, ExportFormat, HistoryFilter, HistoryPage, VerificationReport};
use crate::sanitize::{normalize_payload, Sanitizer};
use crate::sealer::{SealTrigger, SealerState};
use crate::snapshot::{LoadOutcome, Persistence, Snapshot, SnapshotMetadata, SnapshotStore};
use crate::types::{Block, BlockSummary, OperationType, Transaction};
use crate::validation::ValidationReport;
use crate::{LedgerError, Result};
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

/// Result of `log_operation`. Never an `Err`: failures are reported in-band.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationReceipt {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Set when the payload could not be serialized and a fallback was recorded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl OperationReceipt {
    fn accepted(submission: &Submission) -> Self {
        Self {
            success: true,
            transaction_id: Some(submission.transaction.id.clone()),
            hash: Some(submission.transaction.hash.clone()),
            error: None,
            warning: submission.warning.clone(),
        }
    }

    fn rejected(err: &LedgerError) -> Self {
        Self {
            success: false,
            transaction_id: None,
            hash: None,
            error: Some(err.to_string()),
            warning: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Submission {
    pub transaction: Transaction,
    /// Serialization failure that forced a fallback payload.
    pub warning: Option<String>,
    /// Pool size right after admission.
    pub pending: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SealReport {
    pub block: BlockSummary,
    pub trigger: SealTrigger,
    /// False when the snapshot write failed; the block is sealed in memory only.
    pub durable: bool,
}

#[derive(Debug, Default)]
struct PoolState {
    pool: TransactionPool,
    /// Drained for the seal in progress; still reported as pending.
    in_flight: Vec<Transaction>,
}

impl PoolState {
    fn pending(&self) -> Vec<Transaction> {
        self.in_flight
            .iter()
            .chain(self.pool.transactions())
            .cloned()
            .collect()
    }
}

struct Inner {
    config: LedgerConfig,
    sanitizer: Sanitizer,
    chain: RwLock<Chain>,
    pool: Mutex<PoolState>,
    persistence: Persistence,
    persist_lock: Mutex<()>,
    persisted_len: AtomicUsize,
    state: watch::Sender<SealerState>,
    events: EventBus,
}

/// Cheaply cloneable handle to one ledger instance.
#[derive(Clone)]
pub struct Ledger {
    inner: Arc<Inner>,
}

impl Ledger {
    /// Restore from `store`, or create and persist a genesis block when the
    /// store is empty. A corrupt snapshot is an error unless
    /// `reset_on_corruption` is set, in which case a fresh genesis replaces it.
    pub fn open(config: LedgerConfig, store: Arc<dyn SnapshotStore>) -> Result<Self> {
        config.validate()?;
        let persistence = Persistence::new(store, config.difficulty);

        let mut reset_reason = None;
        let (chain, pending, restored) = match persistence.load() {
            Ok(LoadOutcome::Restored(snapshot)) => {
                (Chain::from_blocks(snapshot.chain), snapshot.pool, true)
            }
            Ok(LoadOutcome::Absent) => {
                info!(location = %persistence.describe(), "no snapshot found, creating genesis block");
                (
                    Chain::with_genesis(config.difficulty, config.max_seal_iterations)?,
                    Vec::new(),
                    false,
                )
            }
            Err(err) if err.is_corruption() && config.reset_on_corruption => {
                // The reset overwrites the stored snapshot, so copy it aside first.
                let preserved_at = persistence.preserve_current()?;
                error!(
                    %err,
                    location = %persistence.describe(),
                    preserved_at = preserved_at.as_deref().unwrap_or("not preserved"),
                    "snapshot is corrupt; reset_on_corruption is set, overwriting it with a fresh genesis block"
                );
                reset_reason = Some((err.to_string(), preserved_at));
                (
                    Chain::with_genesis(config.difficulty, config.max_seal_iterations)?,
                    Vec::new(),
                    false,
                )
            }
            Err(err) => return Err(err),
        };

        let restored_len = if restored { chain.len() } else { 0 };
        let (state, _) = watch::channel(SealerState::Idle);
        let ledger = Self {
            inner: Arc::new(Inner {
                sanitizer: Sanitizer::from_config(&config),
                config,
                chain: RwLock::new(chain),
                pool: Mutex::new(PoolState {
                    pool: TransactionPool::from_transactions(pending),
                    in_flight: Vec::new(),
                }),
                persistence,
                persist_lock: Mutex::new(()),
                persisted_len: AtomicUsize::new(restored_len),
                state,
                events: EventBus::new(EVENT_CHANNEL_CAPACITY),
            }),
        };

        if !restored {
            ledger.persist()?;
        }
        if let Some((reason, preserved_at)) = reset_reason {
            ledger
                .inner
                .events
                .publish(LedgerEvent::ChainReset { reason, preserved_at });
        }
        Ok(ledger)
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.inner.config
    }

    fn chain(&self) -> RwLockReadGuard<'_, Chain> {
        self.inner.chain.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn chain_mut(&self) -> RwLockWriteGuard<'_, Chain> {
        self.inner.chain.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn pool(&self) -> MutexGuard<'_, PoolState> {
        self.inner.pool.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ---------------------------------------------------------------------
    // admission
    // ---------------------------------------------------------------------

    /// Validate, sanitize, hash and admit one operation to the pending pool.
    /// Hashing happens before the pool lock is taken.
    pub fn submit<P: Serialize + ?Sized>(
        &self,
        operation_type: &str,
        payload: &P,
        actor_id: &str,
        subject_id: Option<&str>,
    ) -> Result<Submission> {
        let operation_type = OperationType::parse_submittable(operation_type)?;
        let (payload, warning) = normalize_payload(payload);
        if let Some(reason) = &warning {
            warn!(%operation_type, actor_id, reason = %reason, "payload not serializable, recorded fallback");
        }
        let payload = self.inner.sanitizer.sanitize(payload);
        let transaction = Transaction::record(
            operation_type,
            actor_id,
            subject_id.map(str::to_string),
            payload,
        );

        let pending = self.pool().pool.append(transaction.clone());
        debug!(id = %transaction.id, %operation_type, pending, "operation admitted");
        self.inner.events.publish(LedgerEvent::TransactionAccepted {
            transaction_id: transaction.id.clone(),
            operation_type,
            pending,
        });
        Ok(Submission {
            transaction,
            warning,
            pending,
        })
    }

    /// Submit and, once the pool reaches the threshold, start a background
    /// seal. Returns without waiting for the seal.
    pub async fn log_operation<P: Serialize + ?Sized>(
        &self,
        operation_type: &str,
        payload: &P,
        actor_id: &str,
        subject_id: Option<&str>,
    ) -> OperationReceipt {
        match self.submit(operation_type, payload, actor_id, subject_id) {
            Ok(submission) => {
                if submission.pending >= self.inner.config.seal_threshold {
                    self.trigger_seal(SealTrigger::Threshold);
                }
                OperationReceipt::accepted(&submission)
            }
            Err(err) => {
                warn!(%err, operation_type, actor_id, "operation rejected");
                OperationReceipt::rejected(&err)
            }
        }
    }

    // ---------------------------------------------------------------------
    // sealing
    // ---------------------------------------------------------------------

    pub fn sealer_state(&self) -> SealerState {
        *self.inner.state.borrow()
    }

    /// Wait until no seal is running.
    pub async fn wait_idle(&self) {
        let mut rx = self.inner.state.subscribe();
        let _ = rx.wait_for(|state| *state == SealerState::Idle).await;
    }

    /// Start a seal on a background task if the trigger's minimum is met and
    /// no seal is running. Returns whether a seal was started. Must be called
    /// from within a Tokio runtime.
    pub fn trigger_seal(&self, trigger: SealTrigger) -> bool {
        if self.begin_seal(trigger).is_none() {
            return false;
        }
        let ledger = self.clone();
        tokio::spawn(async move {
            // Failures are logged and published inside `complete_seal`.
            let _ = ledger.complete_seal(trigger).await;
        });
        true
    }

    /// Seal everything pending now and wait for the result. Waits for any
    /// running seal first, retrying if another trigger claims the sealer in
    /// between. `Ok(None)` only when nothing is pending.
    pub async fn seal_now(&self) -> Result<Option<SealReport>> {
        loop {
            self.wait_idle().await;
            if self.begin_seal(SealTrigger::Manual).is_some() {
                return self.complete_seal(SealTrigger::Manual).await.map(Some);
            }
            if self.sealer_state() == SealerState::Idle && self.pool_size() == 0 {
                return Ok(None);
            }
        }
    }

    /// Like [`Ledger::seal_now`] but fails with `SealInProgress` instead of
    /// waiting for a running seal.
    pub async fn try_seal_now(&self) -> Result<Option<SealReport>> {
        if self.sealer_state() == SealerState::Sealing {
            return Err(LedgerError::SealInProgress);
        }
        self.seal_now().await
    }

    /// Claim the sealer and drain the pool into the in-flight batch. The
    /// drained set is fixed here, so later submissions wait for the next seal.
    fn begin_seal(&self, trigger: SealTrigger) -> Option<usize> {
        let claimed = self.inner.state.send_if_modified(|state| {
            if *state == SealerState::Idle {
                *state = SealerState::Sealing;
                true
            } else {
                false
            }
        });
        if !claimed {
            debug!(?trigger, "seal already in progress, trigger dropped");
            return None;
        }

        let min_pending = trigger.min_pending(&self.inner.config);
        let mut pool = self.pool();
        if pool.pool.size() < min_pending {
            drop(pool);
            self.inner.state.send_replace(SealerState::Idle);
            return None;
        }
        pool.in_flight = pool.pool.drain();
        debug!(?trigger, batch = pool.in_flight.len(), "seal started");
        Some(pool.in_flight.len())
    }

    async fn complete_seal(&self, trigger: SealTrigger) -> Result<SealReport> {
        let outcome = match self.seal_in_flight().await {
            Ok(summary) => {
                let durable = match self.persist_in_background().await {
                    Ok(_) => true,
                    Err(err) => {
                        error!(
                            %err,
                            index = summary.index,
                            "sealed block is not durable; snapshot write failed"
                        );
                        self.inner.events.publish(LedgerEvent::PersistenceFailed {
                            length: summary.index as usize + 1,
                            reason: err.to_string(),
                        });
                        false
                    }
                };
                info!(
                    index = summary.index,
                    hash = %summary.hash,
                    nonce = summary.nonce,
                    transactions = summary.transaction_count,
                    durable,
                    ?trigger,
                    "block sealed"
                );
                self.inner.events.publish(LedgerEvent::BlockSealed {
                    block: summary.clone(),
                    durable,
                });
                Ok(SealReport {
                    block: summary,
                    trigger,
                    durable,
                })
            }
            Err(err) => {
                let requeued = self.requeue_in_flight();
                warn!(%err, requeued, ?trigger, "seal failed, batch returned to pool");
                self.inner.events.publish(LedgerEvent::SealFailed {
                    reason: err.to_string(),
                    requeued,
                });
                Err(err)
            }
        };
        self.inner.state.send_replace(SealerState::Idle);
        outcome
    }

    /// Proof-of-work on a blocking thread, then an all-or-nothing append that
    /// also retires the in-flight batch.
    async fn seal_in_flight(&self) -> Result<BlockSummary> {
        let template = {
            let chain = self.chain();
            let pool = self.pool();
            chain.next_template(pool.in_flight.clone())
        };
        let difficulty = self.inner.config.difficulty;
        let max_iterations = self.inner.config.max_seal_iterations;
        let sealed: Block =
            tokio::task::spawn_blocking(move || mine_block(template, difficulty, max_iterations))
                .await
                .map_err(|e| LedgerError::SealWorker(e.to_string()))??;

        let mut chain = self.chain_mut();
        let mut pool = self.pool();
        let summary = chain.append(sealed, difficulty)?.summary();
        pool.in_flight.clear();
        Ok(summary)
    }

    fn requeue_in_flight(&self) -> usize {
        let mut pool = self.pool();
        let batch = std::mem::take(&mut pool.in_flight);
        let requeued = batch.len();
        pool.pool.requeue_front(batch);
        requeued
    }

    // ---------------------------------------------------------------------
    // durability
    // ---------------------------------------------------------------------

    /// Write a snapshot of the current chain and pending transactions. Also
    /// the retry path after a failed write.
    pub fn persist(&self) -> Result<SnapshotMetadata> {
        let _guard = self
            .inner
            .persist_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let (blocks, pending) = {
            let chain = self.chain();
            let pool = self.pool();
            (chain.blocks().to_vec(), pool.pending())
        };
        let metadata = self.inner.persistence.save(&blocks, &pending)?;
        self.inner
            .persisted_len
            .fetch_max(metadata.length, Ordering::SeqCst);
        Ok(metadata)
    }

    async fn persist_in_background(&self) -> Result<SnapshotMetadata> {
        let ledger = self.clone();
        tokio::task::spawn_blocking(move || ledger.persist())
            .await
            .map_err(|e| LedgerError::PersistenceWrite(e.to_string()))?
    }

    /// Blocks sealed in memory but not yet in a successful snapshot.
    pub fn unpersisted_blocks(&self) -> usize {
        let len = self.chain().len();
        len.saturating_sub(self.inner.persisted_len.load(Ordering::SeqCst))
    }

    // ---------------------------------------------------------------------
    // reads
    // ---------------------------------------------------------------------

    pub fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.inner.events.subscribe()
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub fn chain_length(&self) -> usize {
        self.chain().len()
    }

    /// Transactions waiting in the pool, excluding a batch being sealed.
    pub fn pool_size(&self) -> usize {
        self.pool().pool.size()
    }

    /// Everything not yet sealed, in admission order.
    pub fn pending(&self) -> Vec<Transaction> {
        self.pool().pending()
    }

    pub fn blocks(&self) -> Vec<Block> {
        self.chain().blocks().to_vec()
    }

    pub fn block(&self, index: u64) -> Option<Block> {
        self.chain().blocks().get(index as usize).cloned()
    }

    pub fn tip(&self) -> Option<BlockSummary> {
        self.chain().tip().map(Block::summary)
    }

    pub fn validate(&self) -> ValidationReport {
        self.chain().validate(self.inner.config.difficulty)
    }

    pub fn is_chain_valid(&self) -> bool {
        self.validate().valid
    }

    pub fn first_invalid_index(&self) -> Option<u64> {
        self.validate().first_invalid_index
    }

    pub fn history(&self, filter: &HistoryFilter) -> HistoryPage {
        let chain = self.chain();
        let pending = self.pool().pending();
        query::history(
            chain.blocks(),
            &pending,
            filter,
            self.inner.config.history_default_limit,
        )
    }

    pub fn verify(&self, transaction_id: &str) -> VerificationReport {
        let chain = self.chain();
        let pending = self.pool().pending();
        query::verify(chain.blocks(), &pending, transaction_id)
    }

    pub fn stats(&self) -> ChainStats {
        let unpersisted = self.unpersisted_blocks();
        let chain = self.chain();
        let pending = self.pool().pending();
        let integrity = chain.validate(self.inner.config.difficulty).valid;
        query::stats(
            chain.blocks(),
            &pending,
            self.inner.config.difficulty,
            integrity,
            unpersisted,
        )
    }

    pub fn snapshot(&self) -> Snapshot {
        let chain = self.chain();
        let pending = self.pool().pending();
        Snapshot::new(chain.blocks().to_vec(), pending, self.inner.config.difficulty)
    }

    pub fn export(&self, format: ExportFormat) -> Result<ExportBundle> {
        query::export(&self.snapshot(), format)
    }

    /// Test hook: mutate a stored block in place to simulate tampering.
    #[cfg(test)]
    pub(crate) fn tamper<F: FnOnce(&mut Vec<Block>)>(&self, edit: F) {
        let mut chain = self.chain_mut();
        let mut blocks = chain.blocks().to_vec();
        edit(&mut blocks);
        *chain = Chain::from_blocks(blocks);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::MemoryStore;
    use serde_json::json;

    fn config() -> LedgerConfig {
        LedgerConfig {
            difficulty: 1,
            ..LedgerConfig::default()
        }
    }

    fn open() -> (Arc<MemoryStore>, Ledger) {
        let store = Arc::new(MemoryStore::new());
        let ledger = Ledger::open(config(), store.clone()).unwrap();
        (store, ledger)
    }

    #[test]
    fn fresh_ledger_has_persisted_genesis() {
        let (store, ledger) = open();
        assert_eq!(ledger.chain_length(), 1);
        let genesis = ledger.block(0).unwrap();
        assert_eq!(genesis.index, 0);
        assert_eq!(genesis.previous_hash, "0");
        assert!(store.contents().is_some());
        assert_eq!(ledger.unpersisted_blocks(), 0);
    }

    #[test]
    fn submit_rejects_unknown_type() {
        let (_, ledger) = open();
        let err = ledger
            .submit("TASK_TELEPORTED", &json!({}), "u1", None)
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidOperationType(_)));
        assert_eq!(ledger.pool_size(), 0);
    }

    #[test]
    fn submit_sanitizes_payload() {
        let (_, ledger) = open();
        let submission = ledger
            .submit(
                "USER_LOGIN",
                &json!({ "user": "dana", "password": "pw", "meta": { "refreshToken": "r" } }),
                "dana",
                None,
            )
            .unwrap();
        let payload = &submission.transaction.payload;
        assert_eq!(payload["password"], "[REDACTED]");
        assert_eq!(payload["meta"]["refreshToken"], "[REDACTED]");
        assert_eq!(payload["user"], "dana");
        assert!(submission.transaction.is_hash_valid());
    }

    #[tokio::test]
    async fn receipts_report_rejection_in_band() {
        let (_, ledger) = open();
        let receipt = ledger.log_operation("NOT_A_TYPE", &json!({}), "u", None).await;
        assert!(!receipt.success);
        assert!(receipt.error.unwrap().contains("NOT_A_TYPE"));
    }

    #[tokio::test]
    async fn seal_now_moves_pool_into_one_block() {
        let (_, ledger) = open();
        let mut ids = Vec::new();
        for i in 0..3 {
            let s = ledger
                .submit("TASK_CREATED", &json!({ "n": i }), "planner", None)
                .unwrap();
            ids.push(s.transaction.id);
        }
        let report = ledger.seal_now().await.unwrap().unwrap();
        assert!(report.durable);
        assert_eq!(report.block.index, 1);
        assert_eq!(ledger.pool_size(), 0);
        assert_eq!(ledger.chain_length(), 2);
        let block = ledger.block(1).unwrap();
        let sealed: Vec<_> = block.transactions.iter().map(|t| t.id.clone()).collect();
        assert_eq!(sealed, ids);
        assert!(ledger.is_chain_valid());
    }

    #[tokio::test]
    async fn seal_now_with_empty_pool_is_noop() {
        let (_, ledger) = open();
        assert!(ledger.seal_now().await.unwrap().is_none());
        assert_eq!(ledger.chain_length(), 1);
        assert_eq!(ledger.sealer_state(), SealerState::Idle);
    }

    #[tokio::test]
    async fn second_trigger_while_sealing_is_dropped() {
        let (_, ledger) = open();
        ledger.submit("USER_ACTION", &json!({}), "u", None).unwrap();
        assert!(ledger.begin_seal(SealTrigger::Manual).is_some());
        ledger.submit("USER_ACTION", &json!({}), "u", None).unwrap();
        assert!(!ledger.trigger_seal(SealTrigger::Interval));
        assert_eq!(ledger.sealer_state(), SealerState::Sealing);
        assert!(matches!(
            ledger.try_seal_now().await,
            Err(LedgerError::SealInProgress)
        ));
        // In-flight transactions still count as pending.
        assert_eq!(ledger.pending().len(), 2);
        assert_eq!(ledger.pool_size(), 1);
        ledger.complete_seal(SealTrigger::Manual).await.unwrap();
        assert_eq!(ledger.sealer_state(), SealerState::Idle);
        assert_eq!(ledger.pool_size(), 1);
    }

    #[tokio::test]
    async fn exhausted_seal_requeues_batch() {
        let store = Arc::new(MemoryStore::new());
        let ledger = Ledger::open(
            LedgerConfig {
                difficulty: 1,
                max_seal_iterations: 1_000_000,
                ..LedgerConfig::default()
            },
            store,
        )
        .unwrap();
        let mut tight = ledger.config().clone();
        tight.max_seal_iterations = 1;
        tight.difficulty = 64;
        let starved = Ledger {
            inner: Arc::new(Inner {
                config: tight,
                sanitizer: Sanitizer::default(),
                chain: RwLock::new(Chain::from_blocks(ledger.blocks())),
                pool: Mutex::new(PoolState::default()),
                persistence: ledger.inner.persistence.clone(),
                persist_lock: Mutex::new(()),
                persisted_len: AtomicUsize::new(1),
                state: watch::channel(SealerState::Idle).0,
                events: EventBus::new(8),
            }),
        };
        let first = starved.submit("ALERT_RAISED", &json!({}), "m", None).unwrap();
        let mut events = starved.subscribe();
        let err = starved.seal_now().await.unwrap_err();
        assert!(matches!(err, LedgerError::SealExhausted { .. }));
        assert_eq!(starved.chain_length(), 1);
        assert_eq!(starved.pool_size(), 1);
        assert_eq!(starved.pending()[0].id, first.transaction.id);
        assert_eq!(starved.sealer_state(), SealerState::Idle);
        assert!(matches!(
            events.recv().await.unwrap(),
            LedgerEvent::SealFailed { requeued: 1, .. }
        ));
    }

    #[tokio::test]
    async fn failed_persistence_keeps_block_and_retries() {
        let (store, ledger) = open();
        ledger.submit("CASH_COLLECTED", &json!({ "amount": 10 }), "c", None).unwrap();
        store.set_fail_writes(true);
        let report = ledger.seal_now().await.unwrap().unwrap();
        assert!(!report.durable);
        assert_eq!(ledger.chain_length(), 2);
        assert_eq!(ledger.unpersisted_blocks(), 1);
        assert_eq!(ledger.stats().unpersisted_blocks, 1);

        store.set_fail_writes(false);
        let meta = ledger.persist().unwrap();
        assert_eq!(meta.length, 2);
        assert_eq!(ledger.unpersisted_blocks(), 0);
    }

    #[test]
    fn tampering_is_visible_through_validate() {
        let (_, ledger) = open();
        ledger.tamper(|blocks| blocks[0].nonce += 1);
        assert!(!ledger.is_chain_valid());
        assert_eq!(ledger.first_invalid_index(), Some(0));
        assert!(!ledger.stats().chain_integrity);
    }
}
