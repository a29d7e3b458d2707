//! Shielded pool core.
//!
//! Notes commit to `(secret, blinding, amount)` and land as leaves of an
//! append-only keccak Merkle tree. Spending a note reveals its nullifier and a
//! proof that some leaf under a known root opens to it; the pool checks the
//! nullifier was never seen and asks an external oracle about the proof.
//!
//! Commitment (keccak256, domain separated):
//!   commitment = keccak256("cashio.note.commitment.v1" || secret || blinding || amount_be32)
//!   nullifier  = keccak256("cashio.note.nullifier.v1" || secret || leaf_index_be32)
//! Tree nodes: keccak256(left || right), matching the verifier circuit.

pub mod bridge;
pub mod chain;
pub mod circuit;
pub mod config;
pub mod error;
pub mod hash;
pub mod merkle;
pub mod note;
pub mod oracle;
pub mod pool;
pub mod prover;
pub mod service;
pub mod store;
pub mod types;

pub use bridge::{bridged_note, Bridge, BridgeStats, BridgeStatus, BridgeTransfer};
pub use chain::ChainId;
pub use circuit::{CircuitError, TransferWitness, WithdrawWitness};
pub use config::{BridgeConfig, PoolConfig, RootValidity};
pub use error::{PoolError, Result};
pub use merkle::{verify_path, CommitmentTree, MerklePath, TreeSnapshot};
pub use note::{create_note, nullifier_of, Note, NoteFile};
pub use oracle::{
    CircuitId, CircuitKind, MockOracle, ProofOracle, PublicInputs, TransferPublicInputs,
    WithdrawPublicInputs,
};
pub use pool::{
    PoolEvent, PoolSnapshot, PoolState, ShieldedPool, TransferAmounts, TransferReceipt,
    TransferRequest, WithdrawReceipt, WithdrawRequest,
};
pub use prover::{GeneratedProof, MockProver, ProofHandle, ProofRequest, ProofStatus, Prover};
pub use service::PoolService;
pub use store::PoolStore;
pub use types::{Bytes32, Commitment, Nullifier, Root};
