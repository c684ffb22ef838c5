use crate::blockchain::Blockchain;
use crate::error::Result;
use crate::transaction::Transaction;

/// Admitted, unconfirmed transactions in admission order.
#[derive(Debug, Default, Clone)]
pub struct Mempool {
    pending: Vec<Transaction>,
}

impl Mempool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Verify the signature, run ledger admission, then append.
    ///
    /// Returns `Ok(false)` when an identical transaction is already pending or already
    /// confirmed in `ledger`, so a re-broadcast never gets counted twice.
    pub fn submit(&mut self, tx: Transaction, ledger: &Blockchain) -> Result<bool> {
        tx.verify()?;
        ledger.admit(&tx)?;

        if self.pending.iter().any(|p| p.same_as(&tx)) {
            log::debug!("Ignoring duplicate transaction {}", tx.hash());
            return Ok(false);
        }
        if ledger.contains_tx(&tx) {
            log::debug!("Ignoring already confirmed transaction {}", tx.hash());
            return Ok(false);
        }

        log::info!(
            "Admitted transaction {} -> {} amount={}",
            short(&tx.sender),
            short(&tx.receiver),
            tx.amount
        );
        self.pending.push(tx);
        Ok(true)
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }

    /// Drop every pending entry that appears in `confirmed`.
    pub fn remove_confirmed(&mut self, confirmed: &[Transaction]) {
        self.pending
            .retain(|p| !confirmed.iter().any(|c| c.same_as(p)));
    }

    /// Re-run admission for every entry against `ledger`. Failures and entries the
    /// ledger already confirmed are dropped.
    pub fn revalidate(&mut self, ledger: &Blockchain) {
        let previous = std::mem::take(&mut self.pending);
        let before = previous.len();
        for tx in previous {
            if let Err(e) = self.submit(tx, ledger) {
                log::debug!("Dropping pending transaction after revalidation: {}", e);
            }
        }
        if self.pending.len() != before {
            log::info!(
                "Mempool revalidated: kept {} of {} transactions",
                self.pending.len(),
                before
            );
        }
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.pending
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

fn short(addr: &str) -> &str {
    addr.get(..8).unwrap_or(addr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BLOCK_REWARD, NETWORK_SENDER};
    use crate::consensus::mine_block_with_coinbase;
    use crate::crypto::WalletKeypair;
    use crate::error::LedgerError;
    use std::sync::atomic::AtomicBool;

    fn faucet(receiver: &str, amount: f64) -> Transaction {
        Transaction {
            sender: NETWORK_SENDER.to_string(),
            receiver: receiver.to_string(),
            amount,
            timestamp: 42,
            signature: String::new(),
        }
    }

    fn funded(miner: &str) -> Blockchain {
        let mut bc = Blockchain::new(1);
        let cancel = AtomicBool::new(false);
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
        bc
    }

    #[test]
    fn sentinel_submission_is_admitted() {
        let bc = Blockchain::new(1);
        let mut pool = Mempool::new();
        assert!(pool.submit(faucet("B", 10.0), &bc).unwrap());
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn duplicates_are_not_double_counted() {
        let bc = Blockchain::new(1);
        let mut pool = Mempool::new();
        assert!(pool.submit(faucet("B", 10.0), &bc).unwrap());
        assert!(!pool.submit(faucet("B", 10.0), &bc).unwrap());
        assert_eq!(pool.len(), 1);

        let mut later = faucet("B", 10.0);
        later.timestamp += 1;
        assert!(pool.submit(later, &bc).unwrap());
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn rejects_invalid_submissions() {
        let kp = WalletKeypair::new();
        let bc = funded(&kp.address());
        let mut pool = Mempool::new();

        let unsigned = Transaction::new(&kp.address(), "bob", 1.0);
        assert!(matches!(
            pool.submit(unsigned, &bc),
            Err(LedgerError::InvalidSignature(_))
        ));

        let mut broke = Transaction::new(&kp.address(), "bob", 51.0);
        broke.sign(&kp).unwrap();
        assert!(matches!(
            pool.submit(broke, &bc),
            Err(LedgerError::InsufficientFunds { .. })
        ));

        assert!(matches!(
            pool.submit(faucet("bob", -3.0), &bc),
            Err(LedgerError::InvalidAmount(_))
        ));
        assert!(pool.is_empty());
    }

    #[test]
    fn keeps_admission_order() {
        let bc = Blockchain::new(1);
        let mut pool = Mempool::new();
        for (i, who) in ["a", "b", "c"].iter().enumerate() {
            pool.submit(faucet(who, (i + 1) as f64), &bc).unwrap();
        }
        let receivers: Vec<&str> = pool.transactions().iter().map(|t| t.receiver.as_str()).collect();
        assert_eq!(receivers, ["a", "b", "c"]);
    }

    #[test]
    fn clear_empties_pool() {
        let bc = Blockchain::new(1);
        let mut pool = Mempool::new();
        pool.submit(faucet("a", 1.0), &bc).unwrap();
        pool.submit(faucet("b", 1.0), &bc).unwrap();
        pool.clear();
        assert!(pool.is_empty());
    }

    #[test]
    fn remove_confirmed_keeps_newcomers() {
        let bc = Blockchain::new(1);
        let mut pool = Mempool::new();
        let mined = faucet("a", 1.0);
        pool.submit(mined.clone(), &bc).unwrap();
        pool.submit(faucet("late", 2.0), &bc).unwrap();
        pool.remove_confirmed(&[Transaction::coinbase("m", 50.0), mined]);
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.transactions()[0].receiver, "late");
    }

    #[test]
    fn resubmitting_a_mined_transaction_is_ignored() {
        let mut bc = Blockchain::new(1);
        let gift = faucet("B", 10.0);
        let cancel = AtomicBool::new(false);
        let block = mine_block_with_coinbase(
            &bc.last_block().header,
            1,
            vec![gift.clone()],
            "miner",
            BLOCK_REWARD,
            &cancel,
        )
        .unwrap();
        bc.append_block(block).unwrap();

        let mut pool = Mempool::new();
        assert!(!pool.submit(gift, &bc).unwrap());
        assert!(pool.is_empty());
    }

    #[test]
    fn revalidate_drops_entries_the_ledger_confirmed() {
        let kp = WalletKeypair::new();
        let base = funded(&kp.address());
        let mut pool = Mempool::new();

        let mut spend = Transaction::new(&kp.address(), "bob", 5.0);
        spend.sign(&kp).unwrap();
        pool.submit(spend.clone(), &base).unwrap();
        pool.submit(faucet("carol", 1.0), &base).unwrap();

        // another node mined the spend on top of the same funding block
        let mut adopted = Blockchain::from_chain(base.chain().to_vec(), 1).unwrap();
        let cancel = AtomicBool::new(false);
        let block = mine_block_with_coinbase(
            &adopted.last_block().header,
            1,
            vec![spend],
            "peer-miner",
            BLOCK_REWARD,
            &cancel,
        )
        .unwrap();
        adopted.append_block(block).unwrap();

        pool.revalidate(&adopted);
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.transactions()[0].receiver, "carol");
    }

    #[test]
    fn revalidate_drops_unaffordable_entries() {
        let kp = WalletKeypair::new();
        let rich = funded(&kp.address());
        let mut pool = Mempool::new();

        let mut spend = Transaction::new(&kp.address(), "bob", 30.0);
        spend.sign(&kp).unwrap();
        pool.submit(spend, &rich).unwrap();
        pool.submit(faucet("carol", 5.0), &rich).unwrap();

        // a ledger where the sender owns nothing
        let poor = funded("someone-else");
        pool.revalidate(&poor);

        assert_eq!(pool.len(), 1);
        assert_eq!(pool.transactions()[0].receiver, "carol");
    }
}
