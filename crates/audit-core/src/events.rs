//! Typed ledger notifications.
//!
//! Subscribers either hold a `broadcast::Receiver` or register a handler that
//! runs on its own task. Publishing never blocks and never fails when nobody
//! is listening.

use crate::types::{BlockSummary, OperationType};
use serde::Serialize;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum LedgerEvent {
    #[serde(rename_all = "camelCase")]
    TransactionAccepted {
        transaction_id: String,
        operation_type: OperationType,
        pending: usize,
    },
    #[serde(rename_all = "camelCase")]
    BlockSealed { block: BlockSummary, durable: bool },
    #[serde(rename_all = "camelCase")]
    SealFailed { reason: String, requeued: usize },
    #[serde(rename_all = "camelCase")]
    PersistenceFailed { length: usize, reason: String },
    /// The stored snapshot was corrupt and has been replaced by a fresh
    /// genesis. `preserved_at` names where the discarded bytes were kept.
    #[serde(rename_all = "camelCase")]
    ChainReset {
        reason: String,
        preserved_at: Option<String>,
    },
}

#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<LedgerEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: LedgerEvent) {
        // No receivers is not an error.
        let _ = self.sender.send(event);
    }

    /// Run `handler` for every event until the bus is dropped. Must be called
    /// from within a Tokio runtime.
    pub fn register<F>(&self, mut handler: F) -> JoinHandle<()>
    where
        F: FnMut(LedgerEvent) + Send + 'static,
    {
        let mut receiver = self.subscribe();
        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => handler(event),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "event handler lagged, events dropped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}
