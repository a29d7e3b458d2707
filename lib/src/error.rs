use alloy_primitives::U256;
use thiserror::Error;

use crate::types::{Commitment, Nullifier, Root};

/// Every caller-visible failure of the pool, the note codec and the bridge
/// ledger. A failed operation never leaves partial state behind.
#[derive(Error, Debug)]
pub enum PoolError {
    #[error("commitment tree is full ({capacity} leaves)")]
    TreeFull { capacity: u64 },

    #[error("unknown merkle root {0}")]
    InvalidRoot(Root),

    #[error("nullifier {0} already spent")]
    NullifierAlreadySpent(Nullifier),

    #[error("proof rejected by oracle")]
    InvalidProof,

    #[error("value mismatch: expected {expected}, got {actual}")]
    ValueMismatch { expected: U256, actual: U256 },

    #[error("commitment {0} already in the pool")]
    DuplicateCommitment(Commitment),

    #[error("secure random source unavailable: {0}")]
    RandomSourceUnavailable(String),

    #[error("note commitment does not match its opening (stored {stored}, derived {derived})")]
    CommitmentMismatch { stored: Commitment, derived: Commitment },

    #[error("unsupported note format version {0}")]
    UnsupportedNoteVersion(u8),

    #[error("malformed note: {0}")]
    MalformedNote(String),

    #[error("invalid fee: {0}")]
    InvalidFee(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("no leaf at index {0}")]
    UnknownLeaf(u64),

    #[error("unknown chain id {0}")]
    UnknownChain(u64),

    #[error("chain {0} does not support shielded notes")]
    ShieldingUnsupported(String),

    #[error("no bridge route: {0}")]
    BridgingUnsupported(String),

    #[error("proof oracle unavailable: {0}")]
    Oracle(String),

    #[error("proof generation failed: {0}")]
    Prover(String),

    #[error("bridge is paused")]
    BridgePaused,

    #[error("bridge amount {amount} outside [{min}, {max}]")]
    AmountOutOfBounds { amount: U256, min: U256, max: U256 },

    #[error("no bridge transfer for commitment {0}")]
    UnknownTransfer(Commitment),

    #[error("bridge transfer cannot move from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("bridge transfer {0} already claimed")]
    AlreadyClaimed(Commitment),

    #[error("insufficient guardian approvals: {got} of {required}")]
    InsufficientApprovals { got: usize, required: usize },

    #[error("guardian already registered")]
    GuardianExists,

    #[error("unknown guardian")]
    UnknownGuardian,

    #[error("invalid guardian threshold: {0}")]
    InvalidThreshold(String),

    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("corrupt persisted state: {0}")]
    CorruptState(String),
}

impl PoolError {
    /// Only transient oracle failures are worth retrying, and the retry belongs
    /// to the caller.
    pub fn is_retriable(&self) -> bool {
        matches!(self, PoolError::Oracle(_))
    }
}

pub type Result<T> = std::result::Result<T, PoolError>;
