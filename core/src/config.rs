// Ledger constants shared by every node on the network

/// Reward minted to the miner by the coinbase transaction of each block.
pub const BLOCK_REWARD: f64 = 50.0;

/// Leading zero hex digits required of a block hash unless configured otherwise.
pub const DEFAULT_DIFFICULTY: u32 = 2;

/// A SHA-256 hex digest has 64 characters, so no difficulty can exceed it.
pub const MAX_DIFFICULTY: u32 = 64;

/// Reserved sender used by coinbase transactions.
pub const COINBASE_SENDER: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Alternate reserved sender used by faucet-style issuance.
pub const NETWORK_SENDER: &str = "NETWORK";

/// Signature placeholder carried by coinbase transactions.
pub const COINBASE_SIGNATURE: &str = "COINBASE";

/// `previous_hash` of the genesis block.
pub const GENESIS_PREVIOUS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Fixed genesis timestamp (2024-01-01T00:00:00Z, unix millis) so every node
/// derives the same genesis hash.
pub const GENESIS_TIMESTAMP: i64 = 1_704_067_200_000;

/// How many nonces are tried between checks of the mining cancel flag.
pub const CANCEL_CHECK_INTERVAL: u64 = 1_000;

/// Default timeout for `GET /chain/headers` on a peer.
pub const HEADER_FETCH_TIMEOUT_MS: u64 = 3_000;

/// Default timeout for `GET /chain` on a peer.
pub const CHAIN_FETCH_TIMEOUT_MS: u64 = 5_000;

/// Returns true for the reserved senders that bypass signature and balance checks.
pub fn is_sentinel_sender(sender: &str) -> bool {
    sender == COINBASE_SENDER || sender == NETWORK_SENDER
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_senders() {
        assert!(is_sentinel_sender(&"0".repeat(64)));
        assert!(is_sentinel_sender("NETWORK"));
        assert!(!is_sentinel_sender("network"));
        assert!(!is_sentinel_sender(&"0".repeat(63)));
    }

    #[test]
    fn genesis_previous_hash_is_all_zero() {
        assert_eq!(GENESIS_PREVIOUS_HASH.len(), 64);
        assert!(GENESIS_PREVIOUS_HASH.chars().all(|c| c == '0'));
    }
}
