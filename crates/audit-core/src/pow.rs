use crate::hash::{BlockHasher, Hash};
use crate::types::Block;
use crate::{LedgerError, Result};
use tracing::debug;

/// Number of leading `'0'` characters in a hex digest.
pub fn count_leading_zero_nibbles(hex_digest: &str) -> usize {
    hex_digest.bytes().take_while(|b| *b == b'0').count()
}

pub fn count_leading_zero_bits(hash: &Hash) -> u32 {
    let mut total = 0u32;
    for b in hash {
        if *b == 0 {
            total += 8;
        } else {
            total += b.leading_zeros();
            break;
        }
    }
    total
}

pub fn meets_difficulty(hex_digest: &str, difficulty: usize) -> bool {
    count_leading_zero_nibbles(hex_digest) >= difficulty
}

/// Search nonces upward from 0 until the block hash has `difficulty` leading
/// zero hex characters. Gives up after `max_iterations` attempts.
pub fn seal(block: &Block, difficulty: usize, max_iterations: u64) -> Result<(String, u64)> {
    let hasher = BlockHasher::new(
        block.index,
        block.timestamp,
        &block.transactions,
        &block.previous_hash,
    );
    // A zero nibble is four zero bits.
    let target_bits = (difficulty as u32) * 4;
    for nonce in 0..max_iterations {
        let digest = hasher.digest(nonce);
        if count_leading_zero_bits(&digest) >= target_bits {
            debug!(index = block.index, nonce, "found nonce");
            return Ok((hex::encode(digest), nonce));
        }
    }
    Err(LedgerError::SealExhausted {
        iterations: max_iterations,
    })
}

/// Seal `block` in place, setting its nonce and hash.
pub fn mine_block(mut block: Block, difficulty: usize, max_iterations: u64) -> Result<Block> {
    let (hash, nonce) = seal(&block, difficulty, max_iterations)?;
    block.nonce = nonce;
    block.hash = hash;
    Ok(block)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{OperationType, Payload, Transaction};

    fn sample_block() -> Block {
        let txs = vec![
            Transaction::with_fields("a", 1_600_000_000_000, OperationType::TaskCreated, "alice", None, Payload::new()),
            Transaction::with_fields("b", 1_600_000_000_100, OperationType::TaskAssigned, "bob", Some("a".into()), Payload::new()),
        ];
        let mut block = Block::template(1, "0".repeat(64), txs);
        block.timestamp = 1_600_000_000_200;
        block
    }

    #[test]
    fn leading_zero_nibble_examples() {
        assert_eq!(count_leading_zero_nibbles("00ab"), 2);
        assert_eq!(count_leading_zero_nibbles("a000"), 0);
        assert_eq!(count_leading_zero_nibbles("0000"), 4);
        assert_eq!(count_leading_zero_nibbles(""), 0);
    }

    #[test]
    fn leading_zero_bits_examples() {
        let mut h = [0u8; 32];
        assert_eq!(count_leading_zero_bits(&h), 256);
        h[0] = 0x0F; // 00001111
        assert_eq!(count_leading_zero_bits(&h), 4);
        h = [0u8; 32];
        h[1] = 0x80; // 00000000 10000000
        assert_eq!(count_leading_zero_bits(&h), 8);
        h[1] = 0x40; // 01000000
        assert_eq!(count_leading_zero_bits(&h), 9);
    }

    #[test]
    fn bits_and_nibbles_agree() {
        let mut h = [0xFFu8; 32];
        h[0] = 0x00;
        h[1] = 0x0A;
        assert_eq!(count_leading_zero_bits(&h) / 4, count_leading_zero_nibbles(&hex::encode(h)) as u32);
    }

    #[test]
    fn seal_finds_prefix() {
        let block = sample_block();
        let (hash, nonce) = seal(&block, 2, 1_000_000).unwrap();
        assert!(hash.starts_with("00"));
        let mut sealed = block;
        sealed.nonce = nonce;
        assert_eq!(sealed.compute_hash(), hash);
    }

    #[test]
    fn seal_returns_first_valid_nonce() {
        let block = sample_block();
        let (_, nonce) = seal(&block, 1, 1_000_000).unwrap();
        let hasher = BlockHasher::new(block.index, block.timestamp, &block.transactions, &block.previous_hash);
        for earlier in 0..nonce {
            assert!(!meets_difficulty(&hasher.hex_digest(earlier), 1));
        }
    }

    #[test]
    fn difficulty_zero_takes_nonce_zero() {
        let (hash, nonce) = seal(&sample_block(), 0, 1).unwrap();
        assert_eq!(nonce, 0);
        assert_eq!(hash.len(), 64);
    }

    #[test]
    fn seal_is_bounded() {
        let err = seal(&sample_block(), 64, 500).unwrap_err();
        assert!(matches!(err, LedgerError::SealExhausted { iterations: 500 }));
    }

    #[test]
    fn mine_block_sets_hash_and_nonce() {
        let mined = mine_block(sample_block(), 2, 1_000_000).unwrap();
        assert_eq!(mined.compute_hash(), mined.hash);
        assert!(meets_difficulty(&mined.hash, 2));
    }
}
