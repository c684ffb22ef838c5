use thiserror::Error;

/// Failures raised by admission, validation, mining and peer access.
///
/// The transport layer maps these onto client-error responses using the
/// `Display` text as the reason string.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LedgerError {
    #[error("amount must be positive, got {0}")]
    InvalidAmount(f64),

    #[error("insufficient funds: balance {balance}, required {required}")]
    InsufficientFunds { balance: f64, required: f64 },

    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    #[error("invalid block: {0}")]
    InvalidBlock(String),

    #[error("invalid chain: {0}")]
    InvalidChain(String),

    #[error("peer {peer} unreachable: {reason}")]
    PeerUnreachable { peer: String, reason: String },

    #[error("mining cancelled")]
    MiningCancelled,

    #[error("a mining round is already running")]
    MiningInProgress,

    #[error("storage error: {0}")]
    Storage(String),
}

impl From<std::io::Error> for LedgerError {
    fn from(err: std::io::Error) -> Self {
        LedgerError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(err: serde_json::Error) -> Self {
        LedgerError::Storage(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;
