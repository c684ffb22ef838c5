pub mod server;

pub use server::run_server;

use minichain_core::block::{Block, HeaderSummary};
use minichain_core::config::BLOCK_REWARD;
use minichain_core::consensus;
use minichain_core::error::{LedgerError, Result};
use minichain_core::resolver::{PeerClient, Resolution, find_longest_valid_chain};
use minichain_core::store::ChainStore;
use minichain_core::transaction::Transaction;
use minichain_core::{Blockchain, HttpPeerClient, Mempool};
use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

// Lock order: state only. Mining never holds it while searching.

pub struct ChainState {
    pub blockchain: Blockchain,
    pub mempool: Mempool,
}

pub struct MiningState {
    /// Raised when the tip is replaced so an in-flight search gives up.
    pub cancel_flag: Arc<AtomicBool>,
    pub active: AtomicBool,
    pub blocks_mined: AtomicU64,
}

impl Default for MiningState {
    fn default() -> Self {
        Self {
            cancel_flag: Arc::new(AtomicBool::new(false)),
            active: AtomicBool::new(false),
            blocks_mined: AtomicU64::new(0),
        }
    }
}

/// Peer-facing settings the node needs at runtime.
#[derive(Debug, Clone)]
pub struct NodeSettings {
    pub miner_address: String,
    pub difficulty: u32,
    pub peers: Vec<String>,
    pub header_timeout: Duration,
    pub chain_timeout: Duration,
}

/// The one shared state object of a running node.
///
/// Writers (submission, append, replacement) serialize on the state lock; readers
/// see the chain either before or after a mutation, never in between.
pub struct Node {
    state: RwLock<ChainState>,
    mining: MiningState,
    store: Box<dyn ChainStore + Send + Sync>,
    settings: NodeSettings,
}

pub type NodeHandle = Arc<Node>;

impl Node {
    /// Restore the chain from `store`, or start from genesis when nothing usable is stored.
    pub fn open(store: Box<dyn ChainStore + Send + Sync>, settings: NodeSettings) -> Result<Self> {
        let blockchain = match store.load()? {
            Some(chain) => match Blockchain::from_chain(chain, settings.difficulty) {
                Ok(bc) => {
                    log::info!("Restored chain with {} blocks", bc.len());
                    bc
                }
                Err(e) => {
                    log::warn!("Stored chain rejected, starting from genesis: {}", e);
                    Blockchain::new(settings.difficulty)
                }
            },
            None => {
                log::info!("No stored chain, starting from genesis");
                Blockchain::new(settings.difficulty)
            }
        };
        store.save(blockchain.chain())?;

        Ok(Node {
            state: RwLock::new(ChainState {
                blockchain,
                mempool: Mempool::new(),
            }),
            mining: MiningState::default(),
            store,
            settings,
        })
    }

    pub fn settings(&self) -> &NodeSettings {
        &self.settings
    }

    pub fn submit_transaction(&self, tx: Transaction) -> Result<bool> {
        let mut guard = self.state.write();
        let state = &mut *guard;
        state.mempool.submit(tx, &state.blockchain)
    }

    /// Mine coinbase plus the current mempool on top of the current tip.
    ///
    /// Fails with [`LedgerError::MiningCancelled`] when the chain is replaced during the
    /// search or the tip moved before the result could be appended, and with
    /// [`LedgerError::MiningInProgress`] while another round is running.
    pub fn mine(&self) -> Result<Block> {
        let _round = MiningRound::start(&self.mining.active)?;
        // cleared only by the round that owns the miner, before the tip is read
        self.mining.cancel_flag.store(false, Ordering::SeqCst);
        self.mine_on_current_tip()
    }

    fn mine_on_current_tip(&self) -> Result<Block> {
        let (previous, difficulty, pending) = {
            let state = self.state.read();
            (
                state.blockchain.last_block().header.clone(),
                state.blockchain.difficulty(),
                state.mempool.transactions().to_vec(),
            )
        };

        log::info!(
            "Mining block {} with {} pending transaction(s) at difficulty {}",
            previous.index + 1,
            pending.len(),
            difficulty
        );
        let block = consensus::mine_block_with_coinbase(
            &previous,
            difficulty,
            pending,
            &self.settings.miner_address,
            BLOCK_REWARD,
            &self.mining.cancel_flag,
        )?;

        self.commit_mined_block(block.clone())?;
        Ok(block)
    }

    /// Append a locally mined block if it still extends the tip.
    pub fn commit_mined_block(&self, block: Block) -> Result<()> {
        let mut guard = self.state.write();
        let state = &mut *guard;

        if block.header.previous_hash != state.blockchain.last_block().header.hash {
            log::info!(
                "Discarding stale block {}: tip moved to {}",
                block.header.index,
                state.blockchain.last_block().header.hash
            );
            return Err(LedgerError::MiningCancelled);
        }

        state.blockchain.append_block(block.clone())?;
        state.mempool.remove_confirmed(&block.transactions);
        state.mempool.revalidate(&state.blockchain);
        self.mining.blocks_mined.fetch_add(1, Ordering::SeqCst);
        self.persist(&state.blockchain);
        Ok(())
    }

    /// One reconciliation pass against the configured peers.
    pub fn resolve(&self, client: &dyn PeerClient) -> Resolution {
        let local_len = self.state.read().blockchain.len();
        let candidate = find_longest_valid_chain(client, &self.settings.peers, local_len);

        let mut guard = self.state.write();
        let state = &mut *guard;
        let Some(chain) = candidate else {
            return Resolution::Unchanged {
                length: state.blockchain.len(),
            };
        };

        let fork = common_prefix_len(state.blockchain.chain(), &chain);
        let adopted: Vec<Transaction> = chain[fork..]
            .iter()
            .flat_map(|b| b.transactions.iter().cloned())
            .collect();

        match state.blockchain.replace_chain(chain) {
            Ok(true) => {
                self.mining.cancel_flag.store(true, Ordering::SeqCst);
                state.mempool.remove_confirmed(&adopted);
                state.mempool.revalidate(&state.blockchain);
                self.persist(&state.blockchain);
                Resolution::Replaced {
                    new_length: state.blockchain.len(),
                }
            }
            Ok(false) => Resolution::Unchanged {
                length: state.blockchain.len(),
            },
            Err(e) => {
                log::warn!("Candidate chain rejected on replacement: {}", e);
                Resolution::Unchanged {
                    length: state.blockchain.len(),
                }
            }
        }
    }

    /// Resolve over HTTP using the configured timeouts.
    pub fn resolve_with_http(&self) -> Resolution {
        match HttpPeerClient::new(self.settings.header_timeout, self.settings.chain_timeout) {
            Ok(client) => self.resolve(&client),
            Err(e) => {
                log::error!("Cannot build peer client: {}", e);
                Resolution::Unchanged {
                    length: self.chain_len(),
                }
            }
        }
    }

    fn persist(&self, blockchain: &Blockchain) {
        if let Err(e) = self.store.save(blockchain.chain()) {
            log::error!("Failed to save chain of {} blocks: {}", blockchain.len(), e);
        }
    }

    pub fn balance(&self, address: &str) -> f64 {
        self.state.read().blockchain.balance(address)
    }

    pub fn balances(&self) -> std::collections::HashMap<String, f64> {
        self.state.read().blockchain.balances()
    }

    pub fn chain(&self) -> Vec<Block> {
        self.state.read().blockchain.chain().to_vec()
    }

    pub fn chain_len(&self) -> usize {
        self.state.read().blockchain.len()
    }

    pub fn headers(&self) -> Vec<HeaderSummary> {
        self.state.read().blockchain.headers()
    }

    pub fn mempool(&self) -> Vec<Transaction> {
        self.state.read().mempool.transactions().to_vec()
    }

    pub fn is_mining(&self) -> bool {
        self.mining.active.load(Ordering::SeqCst)
    }

    pub fn blocks_mined(&self) -> u64 {
        self.mining.blocks_mined.load(Ordering::SeqCst)
    }
}

/// Holds the miner's `active` flag for one round and releases it on drop.
struct MiningRound<'a> {
    active: &'a AtomicBool,
}

impl<'a> MiningRound<'a> {
    fn start(active: &'a AtomicBool) -> Result<Self> {
        active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| LedgerError::MiningInProgress)?;
        Ok(MiningRound { active })
    }
}

impl Drop for MiningRound<'_> {
    fn drop(&mut self) {
        self.active.store(false, Ordering::SeqCst);
    }
}

/// Number of leading blocks two chains share.
fn common_prefix_len(a: &[Block], b: &[Block]) -> usize {
    a.iter()
        .zip(b)
        .take_while(|(x, y)| x.header.hash == y.header.hash)
        .count()
}
