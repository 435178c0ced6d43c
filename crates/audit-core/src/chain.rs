use crate::constants::{GENESIS_ACTOR, GENESIS_PREVIOUS_HASH, SNAPSHOT_VERSION};
use crate::pow::{meets_difficulty, mine_block};
use crate::types::{Block, OperationType, Payload, Transaction};
use crate::validation::{validate_chain, ValidationReport};
use crate::{LedgerError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Append-only sequence of sealed blocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Chain {
    blocks: Vec<Block>,
}

impl Chain {
    /// New chain holding only a freshly sealed genesis block.
    pub fn with_genesis(difficulty: usize, max_iterations: u64) -> Result<Self> {
        Ok(Self {
            blocks: vec![genesis_block(difficulty, max_iterations)?],
        })
    }

    /// Wrap stored blocks without checking them; call `validate` before trusting the result.
    pub fn from_blocks(blocks: Vec<Block>) -> Self {
        Self { blocks }
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn tip(&self) -> Option<&Block> {
        self.blocks.last()
    }

    /// Unsealed successor of the current tip.
    pub fn next_template(&self, transactions: Vec<Transaction>) -> Block {
        match self.tip() {
            Some(tip) => Block::template(tip.index + 1, tip.hash.clone(), transactions),
            None => Block::template(0, GENESIS_PREVIOUS_HASH, transactions),
        }
    }

    /// Append a sealed block. The chain is unchanged unless every check passes.
    pub fn append(&mut self, block: Block, difficulty: usize) -> Result<&Block> {
        let (expected_index, expected_previous) = match self.tip() {
            Some(tip) => (tip.index + 1, tip.hash.as_str()),
            None => (0, GENESIS_PREVIOUS_HASH),
        };
        if block.index != expected_index {
            return Err(LedgerError::BlockRejected(format!(
                "expected index {expected_index}, got {}",
                block.index
            )));
        }
        if block.previous_hash != expected_previous {
            return Err(LedgerError::BlockRejected(
                "previous hash does not match chain tip".into(),
            ));
        }
        if block.compute_hash() != block.hash || !meets_difficulty(&block.hash, difficulty) {
            return Err(LedgerError::BlockRejected(format!(
                "block {} is not sealed at difficulty {difficulty}",
                block.index
            )));
        }
        self.blocks.push(block);
        Ok(&self.blocks[self.blocks.len() - 1])
    }

    pub fn find_transaction(&self, id: &str) -> Option<(&Block, &Transaction)> {
        self.blocks.iter().find_map(|block| {
            block
                .transactions
                .iter()
                .find(|tx| tx.id == id)
                .map(|tx| (block, tx))
        })
    }

    pub fn transaction_count(&self) -> usize {
        self.blocks.iter().map(|b| b.transactions.len()).sum()
    }

    pub fn validate(&self, difficulty: usize) -> ValidationReport {
        validate_chain(&self.blocks, difficulty)
    }
}

/// Block 0: one `SYSTEM_INIT` bootstrap transaction, linked to the `"0"` sentinel.
pub fn genesis_block(difficulty: usize, max_iterations: u64) -> Result<Block> {
    let mut payload = Payload::new();
    payload.insert("message".into(), Value::from("audit ledger initialized"));
    payload.insert("snapshotVersion".into(), Value::from(SNAPSHOT_VERSION));
    let bootstrap = Transaction::record(OperationType::SystemInit, GENESIS_ACTOR, None, payload);
    let template = Block::template(0, GENESIS_PREVIOUS_HASH, vec![bootstrap]);
    mine_block(template, difficulty, max_iterations)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIFFICULTY: usize = 2;
    const MAX: u64 = 5_000_000;

    fn tx(actor: &str) -> Transaction {
        Transaction::record(OperationType::TaskCompleted, actor, None, Payload::new())
    }

    #[test]
    fn genesis_block_example() {
        let genesis = genesis_block(DIFFICULTY, MAX).unwrap();
        assert_eq!(genesis.index, 0);
        assert_eq!(genesis.previous_hash, "0");
        assert_eq!(genesis.transactions.len(), 1);
        assert_eq!(genesis.transactions[0].operation_type, OperationType::SystemInit);
        assert!(genesis.hash.starts_with("00"));
    }

    #[test]
    fn appended_blocks_link_to_tip() {
        let mut chain = Chain::with_genesis(DIFFICULTY, MAX).unwrap();
        let block = mine_block(chain.next_template(vec![tx("a")]), DIFFICULTY, MAX).unwrap();
        let genesis_hash = chain.tip().unwrap().hash.clone();
        let appended = chain.append(block, DIFFICULTY).unwrap();
        assert_eq!(appended.index, 1);
        assert_eq!(appended.previous_hash, genesis_hash);
        assert_eq!(chain.len(), 2);
        assert!(chain.validate(DIFFICULTY).valid);
    }

    #[test]
    fn append_rejects_unsealed_block() {
        let mut chain = Chain::with_genesis(DIFFICULTY, MAX).unwrap();
        let template = chain.next_template(vec![tx("a")]);
        assert!(matches!(
            chain.append(template, DIFFICULTY),
            Err(LedgerError::BlockRejected(_))
        ));
        assert_eq!(chain.len(), 1);
    }

    #[test]
    fn append_rejects_stale_parent() {
        let mut chain = Chain::with_genesis(DIFFICULTY, MAX).unwrap();
        let first = mine_block(chain.next_template(vec![tx("a")]), DIFFICULTY, MAX).unwrap();
        let competing = mine_block(chain.next_template(vec![tx("b")]), DIFFICULTY, MAX).unwrap();
        chain.append(first, DIFFICULTY).unwrap();
        assert!(chain.append(competing, DIFFICULTY).is_err());
        assert_eq!(chain.len(), 2);
    }

    #[test]
    fn finds_sealed_transactions() {
        let mut chain = Chain::with_genesis(DIFFICULTY, MAX).unwrap();
        let t = tx("finder");
        let id = t.id.clone();
        let block = mine_block(chain.next_template(vec![t]), DIFFICULTY, MAX).unwrap();
        chain.append(block, DIFFICULTY).unwrap();
        let (block, found) = chain.find_transaction(&id).unwrap();
        assert_eq!(block.index, 1);
        assert_eq!(found.actor_id, "finder");
        assert_eq!(chain.transaction_count(), 2);
    }

    #[test]
    fn serializes_as_plain_block_array() {
        let chain = Chain::with_genesis(DIFFICULTY, MAX).unwrap();
        let value = serde_json::to_value(&chain).unwrap();
        assert!(value.is_array());
        assert_eq!(value[0]["previousHash"], "0");
    }
}
