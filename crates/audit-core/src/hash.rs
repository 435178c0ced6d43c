//! Canonical encoding and SHA-256 digests for transactions and blocks.
//!
//! Canonical form is compact JSON with object keys sorted at every depth, so
//! logically equal payloads hash identically whatever order their keys were
//! inserted in.

use crate::types::{OperationType, Payload, Transaction};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

pub type Hash = [u8; 32];

pub fn sha256(bytes: &[u8]) -> Hash {
    Sha256::digest(bytes).into()
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(sha256(bytes))
}

/// Compact JSON with recursively sorted object keys.
pub fn to_canonical_string(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (key, val)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(val, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

fn transaction_content(
    id: &str,
    timestamp: u64,
    operation_type: OperationType,
    actor_id: &str,
    subject_id: Option<&str>,
    payload: &Payload,
) -> Map<String, Value> {
    let mut doc = Map::new();
    doc.insert("id".into(), Value::from(id));
    doc.insert("timestamp".into(), Value::from(timestamp));
    doc.insert("operationType".into(), Value::from(operation_type.as_str()));
    doc.insert("actorId".into(), Value::from(actor_id));
    doc.insert(
        "subjectId".into(),
        subject_id.map(Value::from).unwrap_or(Value::Null),
    );
    doc.insert("payload".into(), Value::Object(payload.clone()));
    doc
}

/// Digest over `{id, timestamp, operationType, actorId, subjectId, payload}`.
pub fn hash_transaction(
    id: &str,
    timestamp: u64,
    operation_type: OperationType,
    actor_id: &str,
    subject_id: Option<&str>,
    payload: &Payload,
) -> String {
    let doc = transaction_content(id, timestamp, operation_type, actor_id, subject_id, payload);
    sha256_hex(to_canonical_string(&Value::Object(doc)).as_bytes())
}

/// Full transaction (content plus stored hash) as it participates in a block digest.
fn sealed_transaction_value(tx: &Transaction) -> Value {
    let mut doc = transaction_content(
        &tx.id,
        tx.timestamp,
        tx.operation_type,
        &tx.actor_id,
        tx.subject_id.as_deref(),
        &tx.payload,
    );
    doc.insert("hash".into(), Value::from(tx.hash.as_str()));
    Value::Object(doc)
}

/// Incremental block hasher. The nonce-independent part of the preimage is
/// absorbed once; each nonce only hashes a short suffix.
#[derive(Clone)]
pub struct BlockHasher {
    prefix: Sha256,
}

impl BlockHasher {
    pub fn new(index: u64, timestamp: u64, transactions: &[Transaction], previous_hash: &str) -> Self {
        let mut doc = Map::new();
        doc.insert("index".into(), Value::from(index));
        doc.insert("timestamp".into(), Value::from(timestamp));
        doc.insert(
            "transactions".into(),
            Value::Array(transactions.iter().map(sealed_transaction_value).collect()),
        );
        doc.insert("previousHash".into(), Value::from(previous_hash));
        let mut prefix = Sha256::new();
        prefix.update(to_canonical_string(&Value::Object(doc)).as_bytes());
        Self { prefix }
    }

    pub fn digest(&self, nonce: u64) -> Hash {
        let mut hasher = self.prefix.clone();
        hasher.update(b"|nonce:");
        hasher.update(nonce.to_string().as_bytes());
        hasher.finalize().into()
    }

    pub fn hex_digest(&self, nonce: u64) -> String {
        hex::encode(self.digest(nonce))
    }
}

/// Digest over `{index, timestamp, transactions, previousHash}` followed by the nonce.
pub fn hash_block(
    index: u64,
    timestamp: u64,
    transactions: &[Transaction],
    previous_hash: &str,
    nonce: u64,
) -> String {
    BlockHasher::new(index, timestamp, transactions, previous_hash).hex_digest(nonce)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(value: Value) -> Payload {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn canonical_string_sorts_nested_keys() {
        let value = json!({ "b": 1, "a": { "z": [ { "y": 2, "x": 1 } ], "m": null } });
        assert_eq!(
            to_canonical_string(&value),
            r#"{"a":{"m":null,"z":[{"x":1,"y":2}]},"b":1}"#
        );
    }

    #[test]
    fn canonical_string_escapes_keys_and_strings() {
        let value = json!({ "quote\"key": "line\nbreak" });
        assert_eq!(to_canonical_string(&value), r#"{"quote\"key":"line\nbreak"}"#);
    }

    #[test]
    fn sha256_hex_known_vector() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn transaction_hash_ignores_key_order() {
        let mut first = Payload::new();
        first.insert("amount".into(), json!(50));
        first.insert("currency".into(), json!("EUR"));
        let mut second = Payload::new();
        second.insert("currency".into(), json!("EUR"));
        second.insert("amount".into(), json!(50));

        let a = hash_transaction("id-1", 10, OperationType::CashCollected, "c1", None, &first);
        let b = hash_transaction("id-1", 10, OperationType::CashCollected, "c1", None, &second);
        assert_eq!(a, b);
    }

    #[test]
    fn transaction_hash_covers_every_field() {
        let p = payload(json!({ "qty": 3 }));
        let base = hash_transaction("id-1", 10, OperationType::InventoryAdjusted, "a", Some("s"), &p);
        let variants = [
            hash_transaction("id-2", 10, OperationType::InventoryAdjusted, "a", Some("s"), &p),
            hash_transaction("id-1", 11, OperationType::InventoryAdjusted, "a", Some("s"), &p),
            hash_transaction("id-1", 10, OperationType::InventoryIssued, "a", Some("s"), &p),
            hash_transaction("id-1", 10, OperationType::InventoryAdjusted, "b", Some("s"), &p),
            hash_transaction("id-1", 10, OperationType::InventoryAdjusted, "a", None, &p),
            hash_transaction(
                "id-1",
                10,
                OperationType::InventoryAdjusted,
                "a",
                Some("s"),
                &payload(json!({ "qty": 4 })),
            ),
        ];
        for variant in variants {
            assert_ne!(base, variant);
        }
    }

    #[test]
    fn block_hash_changes_with_nonce() {
        let hasher = BlockHasher::new(1, 1_600_000_000_000, &[], "00ff");
        assert_ne!(hasher.hex_digest(0), hasher.hex_digest(1));
        assert_eq!(hasher.hex_digest(7), hash_block(1, 1_600_000_000_000, &[], "00ff", 7));
    }

    #[test]
    fn block_hash_covers_transaction_hashes() {
        let tx = Transaction::with_fields("t", 5, OperationType::UserLogin, "u", None, Payload::new());
        let mut tampered = tx.clone();
        tampered.hash = "f".repeat(64);
        let a = hash_block(1, 5, &[tx], "0", 0);
        let b = hash_block(1, 5, &[tampered], "0", 0);
        assert_ne!(a, b);
    }

    #[test]
    fn block_hash_is_deterministic() {
        let tx = Transaction::with_fields("t", 5, OperationType::UserLogin, "u", None, Payload::new());
        let txs = vec![tx];
        assert_eq!(hash_block(2, 9, &txs, "abc", 3), hash_block(2, 9, &txs, "abc", 3));
        assert_eq!(hash_block(2, 9, &txs, "abc", 3).len(), 64);
    }
}
