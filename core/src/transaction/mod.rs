use crate::config::{COINBASE_SENDER, COINBASE_SIGNATURE, is_sentinel_sender};
use crate::crypto::{WalletKeypair, sha256_hex, verify_signature};
use crate::error::{LedgerError, Result};
use serde::{Deserialize, Serialize};

/// Value transfer between two addresses.
///
/// `timestamp` is unix millis; peers that omit it on the wire get 0.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Transaction {
    pub sender: String,
    pub receiver: String,
    pub amount: f64,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub signature: String,
}

/// The signed fields, declared in key order so the compact JSON is canonical.
#[derive(Serialize)]
struct SignPayload<'a> {
    amount: f64,
    receiver: &'a str,
    sender: &'a str,
}

impl Transaction {
    /// Unsigned transfer stamped with the current time.
    pub fn new(sender: &str, receiver: &str, amount: f64) -> Self {
        Transaction {
            sender: sender.to_string(),
            receiver: receiver.to_string(),
            amount,
            timestamp: chrono::Utc::now().timestamp_millis(),
            signature: String::new(),
        }
    }

    pub fn coinbase(receiver: &str, amount: f64) -> Self {
        Transaction {
            sender: COINBASE_SENDER.to_string(),
            receiver: receiver.to_string(),
            amount,
            timestamp: chrono::Utc::now().timestamp_millis(),
            signature: COINBASE_SIGNATURE.to_string(),
        }
    }

    pub fn is_sentinel(&self) -> bool {
        is_sentinel_sender(&self.sender)
    }

    /// `{"amount":..,"receiver":..,"sender":..}`; timestamp and signature are excluded.
    pub fn sign_payload(&self) -> Vec<u8> {
        let payload = SignPayload {
            amount: self.amount,
            receiver: &self.receiver,
            sender: &self.sender,
        };
        // a struct of plain strings and a float cannot fail to serialize
        serde_json::to_vec(&payload).unwrap_or_default()
    }

    /// Whole transaction as JSON with sorted keys; leaf input of the Merkle tree.
    pub fn canonical_json(&self) -> String {
        // serde_json::Map is ordered by key unless `preserve_order` is enabled
        serde_json::to_value(self)
            .map(|v| v.to_string())
            .unwrap_or_default()
    }

    pub fn hash(&self) -> String {
        sha256_hex(self.canonical_json().as_bytes())
    }

    pub fn sign(&mut self, key: &WalletKeypair) -> Result<()> {
        if key.address() != self.sender {
            return Err(LedgerError::InvalidSignature(
                "signing key does not match sender".to_string(),
            ));
        }
        self.signature = hex::encode(key.sign(&self.sign_payload()));
        Ok(())
    }

    /// Sentinel senders always pass; everyone else needs a DER signature by `sender`.
    pub fn verify(&self) -> Result<()> {
        if self.is_sentinel() {
            return Ok(());
        }
        if self.signature.is_empty() {
            return Err(LedgerError::InvalidSignature("missing signature".to_string()));
        }
        let sig_bytes = hex::decode(&self.signature)
            .map_err(|e| LedgerError::InvalidSignature(format!("signature is not hex: {}", e)))?;
        verify_signature(&self.sender, &self.sign_payload(), &sig_bytes)
    }

    pub fn is_signature_valid(&self) -> bool {
        self.verify().is_ok()
    }

    /// Identity used for mempool de-duplication.
    pub fn same_as(&self, other: &Transaction) -> bool {
        self.sender == other.sender
            && self.receiver == other.receiver
            && self.amount.to_bits() == other.amount.to_bits()
            && self.timestamp == other.timestamp
            && self.signature == other.signature
    }
}
