//! Whole-chain integrity checks.
//!
//! Each block is checked for, in order: link to its predecessor, recomputed
//! hash, difficulty prefix, then every transaction's content hash. The genesis
//! block must additionally carry index 0 and the `"0"` sentinel link. Blocks
//! are checked in parallel; the lowest failing index is reported.

use crate::constants::GENESIS_PREVIOUS_HASH;
use crate::pow::meets_difficulty;
use crate::types::Block;
use rayon::prelude::*;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub valid: bool,
    pub first_invalid_index: Option<u64>,
    pub reason: Option<String>,
    pub blocks_checked: usize,
}

impl ValidationReport {
    fn ok(blocks_checked: usize) -> Self {
        Self {
            valid: true,
            first_invalid_index: None,
            reason: None,
            blocks_checked,
        }
    }

    fn failed(index: u64, reason: String, blocks_checked: usize) -> Self {
        Self {
            valid: false,
            first_invalid_index: Some(index),
            reason: Some(reason),
            blocks_checked,
        }
    }
}

pub fn validate_chain(blocks: &[Block], difficulty: usize) -> ValidationReport {
    if blocks.is_empty() {
        return ValidationReport::failed(0, "chain has no genesis block".into(), 0);
    }

    let first_failure = blocks
        .par_iter()
        .enumerate()
        .map(|(position, block)| (position, check_block(blocks, position, block, difficulty)))
        .find_first(|(_, outcome)| outcome.is_err());

    match first_failure {
        Some((position, Err(reason))) => {
            ValidationReport::failed(position as u64, reason, position + 1)
        }
        _ => ValidationReport::ok(blocks.len()),
    }
}

pub fn is_chain_valid(blocks: &[Block], difficulty: usize) -> bool {
    validate_chain(blocks, difficulty).valid
}

pub fn first_invalid_index(blocks: &[Block], difficulty: usize) -> Option<u64> {
    validate_chain(blocks, difficulty).first_invalid_index
}

fn check_block(
    blocks: &[Block],
    position: usize,
    block: &Block,
    difficulty: usize,
) -> Result<(), String> {
    if block.index != position as u64 {
        return Err(format!(
            "block at position {position} carries index {}",
            block.index
        ));
    }

    if position == 0 {
        if block.previous_hash != GENESIS_PREVIOUS_HASH {
            return Err("genesis block does not carry the sentinel previous hash".into());
        }
    } else if block.previous_hash != blocks[position - 1].hash {
        return Err(format!(
            "previous hash does not match block {}",
            position - 1
        ));
    }

    if block.compute_hash() != block.hash {
        return Err("stored hash does not match recomputed hash".into());
    }

    if !meets_difficulty(&block.hash, difficulty) {
        return Err(format!(
            "hash does not have {difficulty} leading zero characters"
        ));
    }

    if let Some(tx) = block.transactions.iter().find(|tx| !tx.is_hash_valid()) {
        return Err(format!("transaction {} hash mismatch", tx.id));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::Chain;
    use crate::types::{OperationType, Payload, Transaction};

    const DIFFICULTY: usize = 1;

    fn chain_with_blocks(extra: usize) -> Vec<Block> {
        let mut chain = Chain::with_genesis(DIFFICULTY, 1_000_000).unwrap();
        for i in 0..extra {
            let tx = Transaction::record(
                OperationType::TaskCompleted,
                format!("actor-{i}"),
                None,
                Payload::new(),
            );
            let template = chain.next_template(vec![tx]);
            let block = crate::pow::mine_block(template, DIFFICULTY, 1_000_000).unwrap();
            chain.append(block, DIFFICULTY).unwrap();
        }
        chain.blocks().to_vec()
    }

    fn flip_char(s: &mut String, at: usize) {
        let mut chars: Vec<char> = s.chars().collect();
        chars[at] = if chars[at] == 'a' { 'b' } else { 'a' };
        *s = chars.into_iter().collect();
    }

    #[test]
    fn untouched_chain_is_valid() {
        let blocks = chain_with_blocks(3);
        let report = validate_chain(&blocks, DIFFICULTY);
        assert!(report.valid);
        assert_eq!(report.blocks_checked, 4);
        assert_eq!(first_invalid_index(&blocks, DIFFICULTY), None);
    }

    #[test]
    fn empty_chain_is_invalid() {
        assert!(!is_chain_valid(&[], DIFFICULTY));
    }

    #[test]
    fn flipped_block_hash_reports_that_block() {
        for target in 0..4 {
            let mut blocks = chain_with_blocks(3);
            flip_char(&mut blocks[target].hash, 10);
            assert!(!is_chain_valid(&blocks, DIFFICULTY));
            assert_eq!(first_invalid_index(&blocks, DIFFICULTY), Some(target as u64));
        }
    }

    #[test]
    fn flipped_transaction_hash_reports_its_block() {
        for target in 0..4 {
            let mut blocks = chain_with_blocks(3);
            flip_char(&mut blocks[target].transactions[0].hash, 5);
            assert_eq!(first_invalid_index(&blocks, DIFFICULTY), Some(target as u64));
        }
    }

    #[test]
    fn edited_payload_is_detected() {
        let mut blocks = chain_with_blocks(2);
        blocks[2].transactions[0]
            .payload
            .insert("note".into(), serde_json::json!("inserted later"));
        let report = validate_chain(&blocks, DIFFICULTY);
        assert_eq!(report.first_invalid_index, Some(2));
    }

    #[test]
    fn broken_link_is_reported() {
        let mut blocks = chain_with_blocks(2);
        blocks[2].previous_hash = "0".repeat(64);
        let report = validate_chain(&blocks, DIFFICULTY);
        assert_eq!(report.first_invalid_index, Some(2));
        assert!(report.reason.unwrap().contains("previous hash"));
    }

    #[test]
    fn higher_difficulty_rejects_weak_blocks() {
        let blocks = chain_with_blocks(1);
        // Blocks sealed at difficulty 1 will almost never satisfy 8.
        assert!(!is_chain_valid(&blocks, 8));
    }

    #[test]
    fn removed_block_breaks_indices() {
        let mut blocks = chain_with_blocks(3);
        blocks.remove(1);
        assert_eq!(first_invalid_index(&blocks, DIFFICULTY), Some(1));
    }
}
