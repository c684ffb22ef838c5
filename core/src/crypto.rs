use crate::error::{LedgerError, Result};
use once_cell::sync::Lazy;
use secp256k1::{All, Message, PublicKey, Secp256k1, SecretKey, ecdsa::Signature};
use sha2::{Digest, Sha256};

/// Shared secp256k1 context; building one is expensive.
pub static SECP: Lazy<Secp256k1<All>> = Lazy::new(Secp256k1::new);

/// Length in bytes of an uncompressed SEC1 public key (0x04 || X || Y).
pub const UNCOMPRESSED_PUBKEY_LEN: usize = 65;

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn digest_message(data: &[u8]) -> Message {
    let digest: [u8; 32] = Sha256::digest(data).into();
    Message::from_digest(digest)
}

/// secp256k1 key pair. The address of a wallet is its uncompressed public key in hex.
#[derive(Debug, Clone)]
pub struct WalletKeypair {
    secret: SecretKey,
    public: PublicKey,
}

impl WalletKeypair {
    pub fn new() -> Self {
        let (secret, public) = SECP.generate_keypair(&mut rand::thread_rng());
        WalletKeypair { secret, public }
    }

    pub fn from_hex(secret_hex: &str) -> Result<Self> {
        let bytes = hex::decode(secret_hex.trim())
            .map_err(|e| LedgerError::InvalidSignature(format!("bad secret key hex: {}", e)))?;
        let secret = SecretKey::from_slice(&bytes)
            .map_err(|e| LedgerError::InvalidSignature(format!("bad secret key: {}", e)))?;
        let public = PublicKey::from_secret_key(&SECP, &secret);
        Ok(WalletKeypair { secret, public })
    }

    pub fn secret_hex(&self) -> String {
        hex::encode(self.secret.secret_bytes())
    }

    /// 130 hex chars, always starting with `04`.
    pub fn address(&self) -> String {
        hex::encode(self.public.serialize_uncompressed())
    }

    /// Deterministic (RFC6979) ECDSA over SHA-256(data), DER encoded.
    pub fn sign(&self, data: &[u8]) -> Vec<u8> {
        let msg = digest_message(data);
        SECP.sign_ecdsa(&msg, &self.secret).serialize_der().to_vec()
    }
}

impl Default for WalletKeypair {
    fn default() -> Self {
        Self::new()
    }
}

/// Verify a DER signature over SHA-256(data) against an uncompressed public key in hex.
pub fn verify_signature(pubkey_hex: &str, data: &[u8], signature_der: &[u8]) -> Result<()> {
    let pubkey_bytes = hex::decode(pubkey_hex)
        .map_err(|e| LedgerError::InvalidSignature(format!("sender is not hex: {}", e)))?;
    if pubkey_bytes.len() != UNCOMPRESSED_PUBKEY_LEN {
        return Err(LedgerError::InvalidSignature(format!(
            "sender must be a {}-byte uncompressed public key, got {} bytes",
            UNCOMPRESSED_PUBKEY_LEN,
            pubkey_bytes.len()
        )));
    }
    let public = PublicKey::from_slice(&pubkey_bytes)
        .map_err(|e| LedgerError::InvalidSignature(format!("invalid public key point: {}", e)))?;

    let mut signature = Signature::from_der(signature_der)
        .map_err(|e| LedgerError::InvalidSignature(format!("malformed DER signature: {}", e)))?;
    // signers other than libsecp256k1 may emit high-S values
    signature.normalize_s();

    SECP.verify_ecdsa(&digest_message(data), &signature, &public)
        .map_err(|_| LedgerError::InvalidSignature("verification failed".to_string()))
}
