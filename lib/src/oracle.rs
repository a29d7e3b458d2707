//! Proof oracle boundary.
//!
//! The pool never checks a proof itself. It encodes the public inputs of an
//! operation in a fixed slot order, tags them with the circuit they were
//! compiled for, and asks a [`ProofOracle`] for a verdict.
//!
//! Withdraw public inputs (160 bytes = 5 × 32-byte slots):
//!   [root, nullifier, recipient (left-padded), relayer (left-padded), fee (uint256 BE)]
//! Transfer public inputs (160 bytes = 5 × 32-byte slots):
//!   [root, nullifier1, nullifier2, newCommitment1, newCommitment2]
//!
//! Changing the slot order is a circuit change and must bump
//! [`CIRCUIT_VERSION`].

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};

use crate::hash::{keccak256, TREE_HASH_ID};
use crate::types::{Commitment, Nullifier, Root};

/// Version of the public-input layout both circuits are compiled against.
pub const CIRCUIT_VERSION: u16 = 1;

/// Bytes in an encoded public-input tuple.
pub const PUBLIC_INPUTS_LEN: usize = 160;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CircuitKind {
    Withdraw,
    Transfer,
}

/// Identifies the exact circuit a proof was produced for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CircuitId {
    pub kind: CircuitKind,
    pub version: u16,
    pub tree_hash: u8,
}

impl CircuitId {
    pub const fn current(kind: CircuitKind) -> Self {
        Self {
            kind,
            version: CIRCUIT_VERSION,
            tree_hash: TREE_HASH_ID,
        }
    }

    /// Stable 4-byte tag: kind, version (BE), tree hash.
    pub fn tag(&self) -> [u8; 4] {
        let kind = match self.kind {
            CircuitKind::Withdraw => 1u8,
            CircuitKind::Transfer => 2u8,
        };
        let v = self.version.to_be_bytes();
        [kind, v[0], v[1], self.tree_hash]
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawPublicInputs {
    pub root: Root,
    pub nullifier: Nullifier,
    pub recipient: Address,
    /// `Address::ZERO` when no relayer is used.
    pub relayer: Address,
    pub fee: U256,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferPublicInputs {
    pub root: Root,
    pub nullifiers: [Nullifier; 2],
    pub new_commitments: [Commitment; 2],
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PublicInputs {
    Withdraw(WithdrawPublicInputs),
    Transfer(TransferPublicInputs),
}

impl PublicInputs {
    pub fn circuit(&self) -> CircuitId {
        match self {
            PublicInputs::Withdraw(_) => CircuitId::current(CircuitKind::Withdraw),
            PublicInputs::Transfer(_) => CircuitId::current(CircuitKind::Transfer),
        }
    }

    /// ABI-style encoding: each field occupies one 32-byte slot.
    pub fn encode(&self) -> Vec<u8> {
        let mut pv = Vec::with_capacity(PUBLIC_INPUTS_LEN);
        match self {
            PublicInputs::Withdraw(w) => {
                pv.extend_from_slice(w.root.as_bytes());
                pv.extend_from_slice(w.nullifier.as_bytes());
                pv.extend_from_slice(&address_slot(&w.recipient));
                pv.extend_from_slice(&address_slot(&w.relayer));
                pv.extend_from_slice(&w.fee.to_be_bytes::<32>());
            }
            PublicInputs::Transfer(t) => {
                pv.extend_from_slice(t.root.as_bytes());
                pv.extend_from_slice(t.nullifiers[0].as_bytes());
                pv.extend_from_slice(t.nullifiers[1].as_bytes());
                pv.extend_from_slice(t.new_commitments[0].as_bytes());
                pv.extend_from_slice(t.new_commitments[1].as_bytes());
            }
        }
        pv
    }
}

/// ABI encoding of `address`: 12 zero bytes + 20 address bytes.
fn address_slot(address: &Address) -> [u8; 32] {
    let mut slot = [0u8; 32];
    slot[12..].copy_from_slice(address.as_slice());
    slot
}

/// External verifier. Implementations may be slow; the pool calls them outside
/// its critical section.
pub trait ProofOracle: Send + Sync {
    /// `Ok(false)` is a verdict (the proof is bad). `Err` means no verdict
    /// could be obtained and the caller may retry.
    fn verify(&self, circuit: CircuitId, proof: &[u8], public_inputs: &[u8])
        -> Result<bool, String>;
}

impl<T: ProofOracle + ?Sized> ProofOracle for std::sync::Arc<T> {
    fn verify(
        &self,
        circuit: CircuitId,
        proof: &[u8],
        public_inputs: &[u8],
    ) -> Result<bool, String> {
        (**self).verify(circuit, proof, public_inputs)
    }
}

/// Domain tag for mock proofs.
const DS_MOCK_PROOF: &[u8] = b"cashio.mock-proof.v1";

/// Bytes in a mock proof.
pub const MOCK_PROOF_LEN: usize = 32;

/// Mock proof: a hash binding the circuit id to the encoded public inputs.
pub fn mock_proof(circuit: CircuitId, public_inputs: &[u8]) -> Vec<u8> {
    let mut data = Vec::with_capacity(DS_MOCK_PROOF.len() + 4 + public_inputs.len());
    data.extend_from_slice(DS_MOCK_PROOF);
    data.extend_from_slice(&circuit.tag());
    data.extend_from_slice(public_inputs);
    keccak256(&data).to_vec()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MockMode {
    /// Accept only proofs produced by [`mock_proof`] for these exact inputs.
    Binding,
    /// Accept any proof of the right shape.
    AcceptShape,
    /// Reject everything.
    RejectAll,
    /// Fail to answer, as an unreachable remote verifier would.
    Unavailable,
}

/// In-process oracle for tests and local runs.
#[derive(Clone, Debug)]
pub struct MockOracle {
    mode: MockMode,
}

impl MockOracle {
    pub fn new(mode: MockMode) -> Self {
        Self { mode }
    }

    pub fn binding() -> Self {
        Self::new(MockMode::Binding)
    }

    pub fn accept_shape() -> Self {
        Self::new(MockMode::AcceptShape)
    }

    pub fn reject_all() -> Self {
        Self::new(MockMode::RejectAll)
    }
}

impl Default for MockOracle {
    fn default() -> Self {
        Self::binding()
    }
}

impl ProofOracle for MockOracle {
    fn verify(
        &self,
        circuit: CircuitId,
        proof: &[u8],
        public_inputs: &[u8],
    ) -> Result<bool, String> {
        let shape_ok = proof.len() == MOCK_PROOF_LEN
            && public_inputs.len() == PUBLIC_INPUTS_LEN
            && circuit.version == CIRCUIT_VERSION
            && circuit.tree_hash == TREE_HASH_ID;
        match self.mode {
            MockMode::Binding => Ok(shape_ok && proof == mock_proof(circuit, public_inputs)),
            MockMode::AcceptShape => Ok(shape_ok),
            MockMode::RejectAll => Ok(false),
            MockMode::Unavailable => Err("mock oracle offline".into()),
        }
    }
}
