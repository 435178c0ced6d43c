use crate::types::Transaction;

/// Ordered buffer of accepted transactions awaiting sealing.
#[derive(Debug, Default, Clone)]
pub struct TransactionPool {
    pending: Vec<Transaction>,
}

impl TransactionPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_transactions(pending: Vec<Transaction>) -> Self {
        Self { pending }
    }

    pub fn append(&mut self, tx: Transaction) -> usize {
        self.pending.push(tx);
        self.pending.len()
    }

    pub fn size(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Empty the pool, returning its contents in admission order.
    pub fn drain(&mut self) -> Vec<Transaction> {
        std::mem::take(&mut self.pending)
    }

    /// Put a batch back ahead of anything admitted since it was drained.
    pub fn requeue_front(&mut self, mut batch: Vec<Transaction>) {
        batch.append(&mut self.pending);
        self.pending = batch;
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.pending
    }

    pub fn find(&self, id: &str) -> Option<&Transaction> {
        self.pending.iter().find(|tx| tx.id == id)
    }
}
