use crate::block::{
    Block, HeaderSummary, compute_header_hash, compute_merkle_root, meets_difficulty,
};
use crate::config::{GENESIS_PREVIOUS_HASH, MAX_DIFFICULTY, is_sentinel_sender};
use crate::error::{LedgerError, Result};
use crate::transaction::Transaction;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};

/// Balances and confirmed transaction hashes folded over `chain[..height]`.
#[derive(Default)]
struct BalanceCache {
    height: usize,
    balances: HashMap<String, f64>,
    confirmed: HashSet<String>,
}

impl BalanceCache {
    fn apply(&mut self, tx: &Transaction) {
        *self.balances.entry(tx.sender.clone()).or_insert(0.0) -= tx.amount;
        *self.balances.entry(tx.receiver.clone()).or_insert(0.0) += tx.amount;
        self.confirmed.insert(tx.hash());
    }

    fn catch_up(&mut self, chain: &[Block]) {
        for block in &chain[self.height..] {
            for tx in &block.transactions {
                self.apply(tx);
            }
        }
        self.height = chain.len();
    }
}

/// In-memory ledger: the chain itself plus balances derived from it.
///
/// Balances are never stored independently; they are replayed from the chain and
/// cached per chain length. Any replacement of the chain resets the cache.
pub struct Blockchain {
    chain: Vec<Block>,
    difficulty: u32,
    cache: Mutex<BalanceCache>,
}

impl Blockchain {
    /// Fresh chain holding only the genesis block.
    pub fn new(difficulty: u32) -> Self {
        let difficulty = difficulty.min(MAX_DIFFICULTY);
        Blockchain {
            chain: vec![Block::genesis(difficulty)],
            difficulty,
            cache: Mutex::new(BalanceCache::default()),
        }
    }

    /// Adopt a chain loaded from storage. It must pass full validation.
    pub fn from_chain(chain: Vec<Block>, difficulty: u32) -> Result<Self> {
        Self::validate_chain(&chain)?;
        Ok(Blockchain {
            chain,
            difficulty: difficulty.min(MAX_DIFFICULTY),
            cache: Mutex::new(BalanceCache::default()),
        })
    }

    pub fn chain(&self) -> &[Block] {
        &self.chain
    }

    pub fn len(&self) -> usize {
        self.chain.len()
    }

    /// Never true: a ledger always holds at least the genesis block.
    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }

    pub fn difficulty(&self) -> u32 {
        self.difficulty
    }

    pub fn last_block(&self) -> &Block {
        // the constructors guarantee a genesis block
        &self.chain[self.chain.len() - 1]
    }

    pub fn headers(&self) -> Vec<HeaderSummary> {
        self.chain.iter().map(|b| b.header.summary()).collect()
    }

    /// Net of everything `address` received minus everything it sent, across the chain.
    pub fn balance(&self, address: &str) -> f64 {
        let mut cache = self.cache.lock();
        cache.catch_up(&self.chain);
        cache.balances.get(address).copied().unwrap_or(0.0)
    }

    /// All derived balances, sentinel senders included.
    pub fn balances(&self) -> HashMap<String, f64> {
        let mut cache = self.cache.lock();
        cache.catch_up(&self.chain);
        cache.balances.clone()
    }

    /// True when an identical transaction is already part of the chain.
    pub fn contains_tx(&self, tx: &Transaction) -> bool {
        let mut cache = self.cache.lock();
        cache.catch_up(&self.chain);
        cache.confirmed.contains(&tx.hash())
    }

    /// Admission rule for new transactions. Sentinel senders are the faucet/coinbase
    /// path and are admitted unconditionally.
    pub fn admit(&self, tx: &Transaction) -> Result<()> {
        if !(tx.amount > 0.0) || !tx.amount.is_finite() {
            return Err(LedgerError::InvalidAmount(tx.amount));
        }
        if is_sentinel_sender(&tx.sender) {
            return Ok(());
        }
        let balance = self.balance(&tx.sender);
        if balance < tx.amount {
            return Err(LedgerError::InsufficientFunds {
                balance,
                required: tx.amount,
            });
        }
        Ok(())
    }

    /// Validate `block` as the direct successor of `previous`.
    pub fn validate_block(block: &Block, previous: &Block) -> Result<()> {
        let header = &block.header;

        if header.previous_hash != previous.header.hash {
            log::warn!(
                "Block {} rejected [previous_hash]: expected {} got {}",
                header.index,
                previous.header.hash,
                header.previous_hash
            );
            return Err(LedgerError::InvalidBlock(format!(
                "block {} does not link to previous hash {}",
                header.index, previous.header.hash
            )));
        }

        if header.index != previous.header.index + 1 {
            return Err(LedgerError::InvalidBlock(format!(
                "index {} does not follow {}",
                header.index, previous.header.index
            )));
        }

        if header.difficulty > MAX_DIFFICULTY || !meets_difficulty(&header.hash, header.difficulty)
        {
            log::warn!(
                "Block {} rejected [invalid_pow]: hash={} difficulty={}",
                header.index,
                header.hash,
                header.difficulty
            );
            return Err(LedgerError::InvalidBlock(format!(
                "hash {} lacks {} leading zeros",
                header.hash, header.difficulty
            )));
        }

        let computed = compute_header_hash(header);
        if computed != header.hash {
            log::warn!(
                "Block {} rejected [hash_mismatch]: computed={} actual={}",
                header.index,
                computed,
                header.hash
            );
            return Err(LedgerError::InvalidBlock(format!(
                "header hash mismatch: computed {} != {}",
                computed, header.hash
            )));
        }

        let merkle = compute_merkle_root(&block.transactions);
        if merkle != header.merkle_root {
            log::warn!(
                "Block {} rejected [merkle_mismatch]: computed={} header={}",
                header.index,
                merkle,
                header.merkle_root
            );
            return Err(LedgerError::InvalidBlock(format!(
                "merkle root mismatch: computed {} != {}",
                merkle, header.merkle_root
            )));
        }

        for (i, tx) in block.transactions.iter().enumerate() {
            if !(tx.amount > 0.0) || !tx.amount.is_finite() {
                return Err(LedgerError::InvalidBlock(format!(
                    "transaction {} has non-positive amount {}",
                    i, tx.amount
                )));
            }
            tx.verify().map_err(|e| {
                LedgerError::InvalidBlock(format!("transaction {}: {}", i, e))
            })?;
        }

        Ok(())
    }

    /// Genesis is exempt from proof of work but must still be structurally exact.
    pub fn validate_genesis(block: &Block) -> Result<()> {
        let header = &block.header;
        if header.index != 0 {
            return Err(LedgerError::InvalidBlock(format!(
                "genesis has index {}",
                header.index
            )));
        }
        if header.previous_hash != GENESIS_PREVIOUS_HASH {
            return Err(LedgerError::InvalidBlock(
                "genesis previous_hash must be all zeros".to_string(),
            ));
        }
        if compute_merkle_root(&block.transactions) != header.merkle_root {
            return Err(LedgerError::InvalidBlock(
                "genesis merkle root mismatch".to_string(),
            ));
        }
        if compute_header_hash(header) != header.hash {
            return Err(LedgerError::InvalidBlock(
                "genesis hash mismatch".to_string(),
            ));
        }
        Ok(())
    }

    /// All-or-nothing validation of a complete chain.
    pub fn validate_chain(chain: &[Block]) -> Result<()> {
        let genesis = chain
            .first()
            .ok_or_else(|| LedgerError::InvalidChain("empty chain".to_string()))?;
        Self::validate_genesis(genesis)
            .map_err(|e| LedgerError::InvalidChain(format!("block 0: {}", e)))?;

        for (i, pair) in chain.windows(2).enumerate() {
            Self::validate_block(&pair[1], &pair[0])
                .map_err(|e| LedgerError::InvalidChain(format!("block {}: {}", i + 1, e)))?;
        }
        Ok(())
    }

    /// Validate against the current tip and append.
    pub fn append_block(&mut self, block: Block) -> Result<()> {
        Self::validate_block(&block, self.last_block())?;
        log::info!(
            "Appended block index={} hash={} txs={}",
            block.header.index,
            block.header.hash,
            block.transactions.len()
        );
        self.chain.push(block);
        Ok(())
    }

    /// Replace the chain with a strictly longer valid one. Returns whether it was replaced.
    pub fn replace_chain(&mut self, new_chain: Vec<Block>) -> Result<bool> {
        if new_chain.len() <= self.chain.len() {
            return Ok(false);
        }
        Self::validate_chain(&new_chain)?;

        log::info!(
            "Replacing chain: {} -> {} blocks",
            self.chain.len(),
            new_chain.len()
        );
        self.chain = new_chain;
        *self.cache.lock() = BalanceCache::default();
        Ok(true)
    }
}
