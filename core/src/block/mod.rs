use crate::config::{GENESIS_PREVIOUS_HASH, GENESIS_TIMESTAMP};
use crate::crypto::sha256_hex;
use crate::transaction::Transaction;
use serde::{Deserialize, Serialize};

/// block header
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct BlockHeader {
    pub index: u64,
    pub previous_hash: String, // hex
    pub merkle_root: String,   // hex
    pub timestamp: i64,        // unix millis
    pub nonce: u64,
    pub difficulty: u32,
    pub hash: String, // hex, computed from the other fields
}

/// Header fields that feed the block hash, in key order.
#[derive(Serialize)]
struct HeaderPreimage<'a> {
    difficulty: u32,
    index: u64,
    merkle_root: &'a str,
    nonce: u64,
    previous_hash: &'a str,
    timestamp: i64,
}

/// Lightweight header view exchanged during fork choice (no bodies).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct HeaderSummary {
    pub index: u64,
    pub previous_hash: String,
    pub hash: String,
    pub nonce: u64,
    pub difficulty: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

/// Deterministic serialization: sorted-key compact JSON without the `hash` field.
pub fn serialize_header(header: &BlockHeader) -> Vec<u8> {
    let preimage = HeaderPreimage {
        difficulty: header.difficulty,
        index: header.index,
        merkle_root: &header.merkle_root,
        nonce: header.nonce,
        previous_hash: &header.previous_hash,
        timestamp: header.timestamp,
    };
    serde_json::to_vec(&preimage).unwrap_or_default()
}

/// Compute hash from the header (sha256, hex)
pub fn compute_header_hash(header: &BlockHeader) -> String {
    sha256_hex(&serialize_header(header))
}

/// True when `hash` starts with `difficulty` '0' hex digits.
pub fn meets_difficulty(hash: &str, difficulty: u32) -> bool {
    let required = difficulty as usize;
    hash.len() >= required && hash.bytes().take(required).all(|b| b == b'0')
}

/// Merkle root over the transactions, hashing hex-string concatenations.
/// An empty set hashes to sha256("").
pub fn compute_merkle_root(transactions: &[Transaction]) -> String {
    if transactions.is_empty() {
        return sha256_hex(b"");
    }

    let mut level: Vec<String> = transactions.iter().map(Transaction::hash).collect();

    while level.len() > 1 {
        if level.len() % 2 == 1 {
            let last = level[level.len() - 1].clone();
            level.push(last);
        }

        level = level
            .chunks(2)
            .map(|pair| sha256_hex(format!("{}{}", pair[0], pair[1]).as_bytes()))
            .collect();
    }

    level.swap_remove(0)
}

impl BlockHeader {
    pub fn compute_hash(&self) -> String {
        compute_header_hash(self)
    }

    pub fn summary(&self) -> HeaderSummary {
        HeaderSummary {
            index: self.index,
            previous_hash: self.previous_hash.clone(),
            hash: self.hash.clone(),
            nonce: self.nonce,
            difficulty: self.difficulty,
        }
    }
}

impl Block {
    /// Genesis is identical on every node: fixed timestamp, no transactions, nonce 0.
    /// Its hash is computed from the header but never searched for.
    pub fn genesis(difficulty: u32) -> Self {
        let mut header = BlockHeader {
            index: 0,
            previous_hash: GENESIS_PREVIOUS_HASH.to_string(),
            merkle_root: compute_merkle_root(&[]),
            timestamp: GENESIS_TIMESTAMP,
            nonce: 0,
            difficulty,
            hash: String::new(),
        };
        header.hash = header.compute_hash();
        Block {
            header,
            transactions: vec![],
        }
    }

    pub fn hash(&self) -> &str {
        &self.header.hash
    }

    pub fn index(&self) -> u64 {
        self.header.index
    }
}
