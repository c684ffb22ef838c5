use crate::block::{Block, BlockHeader, compute_header_hash, compute_merkle_root, meets_difficulty};
use crate::config::CANCEL_CHECK_INTERVAL;
use crate::error::{LedgerError, Result};
use crate::transaction::Transaction;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Prepends a coinbase paying `reward` to `miner_addr`, computes the merkle root and runs PoW
/// on top of `previous`.
///
/// The cancel flag is polled every [`CANCEL_CHECK_INTERVAL`] nonces; once raised the search
/// stops with [`LedgerError::MiningCancelled`]. Callers run this off the async runtime.
pub fn mine_block_with_coinbase(
    previous: &BlockHeader,
    difficulty: u32,
    txs: Vec<Transaction>,
    miner_addr: &str,
    reward: f64,
    cancel_flag: &AtomicBool,
) -> Result<Block> {
    let coinbase = Transaction::coinbase(miner_addr, reward);
    let mut all_txs = Vec::with_capacity(txs.len() + 1);
    all_txs.push(coinbase);
    all_txs.extend(txs);

    let mut header = BlockHeader {
        index: previous.index + 1,
        previous_hash: previous.hash.clone(),
        merkle_root: compute_merkle_root(&all_txs),
        timestamp: Utc::now().timestamp_millis(),
        nonce: 0,
        difficulty,
        hash: String::new(),
    };

    let mining_start = std::time::Instant::now();
    let mut nonce: u64 = 0;

    loop {
        if nonce % CANCEL_CHECK_INTERVAL == 0 {
            if cancel_flag.load(Ordering::Relaxed) {
                log::info!(
                    "Mining of block {} cancelled after {} attempts",
                    header.index,
                    nonce
                );
                return Err(LedgerError::MiningCancelled);
            }

            if nonce > 0 && nonce % (CANCEL_CHECK_INTERVAL * 1_000) == 0 {
                let secs = mining_start.elapsed().as_secs_f64();
                let rate = if secs > 0.0 { nonce as f64 / secs } else { 0.0 };
                log::debug!(
                    "Mining progress: {} hashes tried, avg {:.2} H/s (difficulty: {})",
                    nonce,
                    rate,
                    difficulty
                );
            }
        }

        header.nonce = nonce;
        let hash = compute_header_hash(&header);
        if meets_difficulty(&hash, difficulty) {
            header.hash = hash;
            log::debug!(
                "Found nonce {} for block {} in {:.2?}",
                nonce,
                header.index,
                mining_start.elapsed()
            );
            return Ok(Block {
                header,
                transactions: all_txs,
            });
        }

        nonce = nonce.wrapping_add(1);
    }
}
