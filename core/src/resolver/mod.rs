//! Longest-valid-chain fork choice across peers.
//!
//! Peers are asked for their header list first; only a peer that claims a chain longer
//! than the best candidate so far is asked for full blocks, which must then pass
//! [`Blockchain::validate_chain`]. A failing peer is logged and skipped.

use crate::block::{Block, HeaderSummary};
use crate::blockchain::Blockchain;
use crate::config::{CHAIN_FETCH_TIMEOUT_MS, HEADER_FETCH_TIMEOUT_MS};
use crate::error::{LedgerError, Result};
use std::time::Duration;

/// Source of peer chains. `HttpPeerClient` is the network implementation.
pub trait PeerClient {
    fn fetch_headers(&self, peer: &str) -> Result<Vec<HeaderSummary>>;
    fn fetch_chain(&self, peer: &str) -> Result<Vec<Block>>;
}

/// Outcome of one resolution pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Replaced { new_length: usize },
    /// No strictly longer valid chain was found.
    Unchanged { length: usize },
}

impl Resolution {
    pub fn replaced(&self) -> bool {
        matches!(self, Resolution::Replaced { .. })
    }

    pub fn length(&self) -> usize {
        match *self {
            Resolution::Replaced { new_length } => new_length,
            Resolution::Unchanged { length } => length,
        }
    }

    /// `{"replaced": true, "new_length": n}` or `{"replaced": false, "length": n}`.
    pub fn to_json(&self) -> serde_json::Value {
        match *self {
            Resolution::Replaced { new_length } => {
                serde_json::json!({ "replaced": true, "new_length": new_length })
            }
            Resolution::Unchanged { length } => {
                serde_json::json!({ "replaced": false, "length": length })
            }
        }
    }
}

/// Ask every peer and return the longest valid chain strictly longer than `local_len`.
pub fn find_longest_valid_chain(
    client: &dyn PeerClient,
    peers: &[String],
    local_len: usize,
) -> Option<Vec<Block>> {
    let mut best_len = local_len;
    let mut best: Option<Vec<Block>> = None;

    for peer in peers {
        let headers = match client.fetch_headers(peer) {
            Ok(h) => h,
            Err(e) => {
                log::warn!("Skipping peer {}: {}", peer, e);
                continue;
            }
        };
        if headers.len() <= best_len {
            log::debug!(
                "Peer {} reports {} blocks, best is {}",
                peer,
                headers.len(),
                best_len
            );
            continue;
        }

        let chain = match client.fetch_chain(peer) {
            Ok(c) => c,
            Err(e) => {
                log::warn!("Skipping peer {}: {}", peer, e);
                continue;
            }
        };
        if chain.len() <= best_len {
            log::warn!(
                "Peer {} advertised {} headers but served {} blocks",
                peer,
                headers.len(),
                chain.len()
            );
            continue;
        }
        if let Err(e) = Blockchain::validate_chain(&chain) {
            log::warn!("Rejecting chain from peer {}: {}", peer, e);
            continue;
        }

        log::info!("Peer {} offers a valid chain of {} blocks", peer, chain.len());
        best_len = chain.len();
        best = Some(chain);
    }

    best
}

/// Blocking HTTP implementation of the peer wire contract.
pub struct HttpPeerClient {
    client: reqwest::blocking::Client,
    header_timeout: Duration,
    chain_timeout: Duration,
}

impl HttpPeerClient {
    pub fn new(header_timeout: Duration, chain_timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .build()
            .map_err(|e| LedgerError::PeerUnreachable {
                peer: "-".to_string(),
                reason: format!("failed to build http client: {}", e),
            })?;
        Ok(HttpPeerClient {
            client,
            header_timeout,
            chain_timeout,
        })
    }

    pub fn with_default_timeouts() -> Result<Self> {
        Self::new(
            Duration::from_millis(HEADER_FETCH_TIMEOUT_MS),
            Duration::from_millis(CHAIN_FETCH_TIMEOUT_MS),
        )
    }

    fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        peer: &str,
        path: &str,
        timeout: Duration,
    ) -> Result<T> {
        let url = format!("{}{}", peer_base_url(peer), path);
        let unreachable = |e: reqwest::Error| LedgerError::PeerUnreachable {
            peer: peer.to_string(),
            reason: e.to_string(),
        };
        self.client
            .get(&url)
            .timeout(timeout)
            .send()
            .and_then(|resp| resp.error_for_status())
            .map_err(unreachable)?
            .json::<T>()
            .map_err(unreachable)
    }
}

impl PeerClient for HttpPeerClient {
    fn fetch_headers(&self, peer: &str) -> Result<Vec<HeaderSummary>> {
        self.get_json(peer, "/chain/headers", self.header_timeout)
    }

    fn fetch_chain(&self, peer: &str) -> Result<Vec<Block>> {
        self.get_json(peer, "/chain", self.chain_timeout)
    }
}

/// `host:port` gets an `http://` prefix; a trailing slash is dropped.
pub fn peer_base_url(peer: &str) -> String {
    let trimmed = peer.trim().trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{}", trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BLOCK_REWARD;
    use crate::consensus::mine_block_with_coinbase;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicBool;

    /// Serves canned chains; unknown peers are unreachable.
    #[derive(Default)]
    struct StaticPeers {
        chains: HashMap<String, Vec<Block>>,
        /// Peers whose header list claims more blocks than they serve.
        inflated: HashMap<String, usize>,
    }

    impl PeerClient for StaticPeers {
        fn fetch_headers(&self, peer: &str) -> Result<Vec<HeaderSummary>> {
            let chain = self.chains.get(peer).ok_or_else(|| LedgerError::PeerUnreachable {
                peer: peer.to_string(),
                reason: "timed out".to_string(),
            })?;
            let mut headers: Vec<HeaderSummary> =
                chain.iter().map(|b| b.header.summary()).collect();
            if let Some(extra) = self.inflated.get(peer) {
                for _ in 0..*extra {
                    headers.push(chain[0].header.summary());
                }
            }
            Ok(headers)
        }

        fn fetch_chain(&self, peer: &str) -> Result<Vec<Block>> {
            self.chains
                .get(peer)
                .cloned()
                .ok_or_else(|| LedgerError::PeerUnreachable {
                    peer: peer.to_string(),
                    reason: "timed out".to_string(),
                })
        }
    }

    fn mined_chain(len: usize, miner: &str) -> Vec<Block> {
        let mut bc = Blockchain::new(1);
        let cancel = AtomicBool::new(false);
        while bc.len() < len {
            let block = mine_block_with_coinbase(
                &bc.last_block().header,
                1,
                vec![],
                miner,
                BLOCK_REWARD,
                &cancel,
            )
            .unwrap();
            bc.append_block(block).unwrap();
        }
        bc.chain().to_vec()
    }

    fn peers(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn picks_longest_valid_chain() {
        let mut client = StaticPeers::default();
        client.chains.insert("a".into(), mined_chain(3, "a"));
        client.chains.insert("b".into(), mined_chain(5, "b"));
        client.chains.insert("c".into(), mined_chain(4, "c"));

        let best = find_longest_valid_chain(&client, &peers(&["a", "b", "c"]), 2).unwrap();
        assert_eq!(best.len(), 5);
        assert_eq!(best[1].transactions[0].receiver, "b");
    }

    #[test]
    fn none_when_nothing_longer() {
        let mut client = StaticPeers::default();
        client.chains.insert("a".into(), mined_chain(2, "a"));
        assert!(find_longest_valid_chain(&client, &peers(&["a"]), 2).is_none());
        assert!(find_longest_valid_chain(&client, &[], 1).is_none());
    }

    #[test]
    fn skips_tampered_chain() {
        let mut tampered = mined_chain(3, "evil");
        tampered[2].header.hash = format!("0{}", "f".repeat(63));
        let mut client = StaticPeers::default();
        client.chains.insert("evil".into(), tampered);

        assert!(find_longest_valid_chain(&client, &peers(&["evil"]), 2).is_none());
    }

    #[test]
    fn unreachable_peer_does_not_abort_others() {
        let mut client = StaticPeers::default();
        client.chains.insert("good".into(), mined_chain(4, "good"));

        let best = find_longest_valid_chain(&client, &peers(&["down", "good"]), 2).unwrap();
        assert_eq!(best.len(), 4);
    }

    #[test]
    fn invalid_longer_chain_does_not_hide_valid_shorter_one() {
        let mut bad = mined_chain(6, "bad");
        bad[3].transactions[0].amount = 1e9;
        let mut client = StaticPeers::default();
        client.chains.insert("bad".into(), bad);
        client.chains.insert("ok".into(), mined_chain(3, "ok"));

        let best = find_longest_valid_chain(&client, &peers(&["bad", "ok"]), 2).unwrap();
        assert_eq!(best.len(), 3);
    }

    #[test]
    fn inflated_header_count_is_not_trusted() {
        let mut client = StaticPeers::default();
        client.chains.insert("liar".into(), mined_chain(2, "liar"));
        client.inflated.insert("liar".into(), 5);
        assert!(find_longest_valid_chain(&client, &peers(&["liar"]), 2).is_none());
    }

    #[test]
    fn resolution_json_shapes() {
        assert_eq!(
            Resolution::Replaced { new_length: 3 }.to_json(),
            serde_json::json!({"replaced": true, "new_length": 3})
        );
        assert_eq!(
            Resolution::Unchanged { length: 2 }.to_json(),
            serde_json::json!({"replaced": false, "length": 2})
        );
        assert!(!Resolution::Unchanged { length: 2 }.replaced());
        assert_eq!(Resolution::Replaced { new_length: 9 }.length(), 9);
    }

    #[test]
    fn peer_urls() {
        assert_eq!(peer_base_url("127.0.0.1:8000"), "http://127.0.0.1:8000");
        assert_eq!(peer_base_url("http://node:1/"), "http://node:1");
        assert_eq!(peer_base_url("https://node"), "https://node");
    }

    #[test]
    fn http_client_reports_unreachable_peer() {
        let client =
            HttpPeerClient::new(Duration::from_millis(200), Duration::from_millis(200)).unwrap();
        // port 9 (discard) on localhost is closed in test environments
        let err = client.fetch_headers("127.0.0.1:9").unwrap_err();
        assert!(matches!(err, LedgerError::PeerUnreachable { .. }));
    }
}
