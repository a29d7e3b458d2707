//! Statements the proving circuits attest to.
//!
//! A real prover runs these checks inside the circuit; the mock prover runs
//! them natively and only emits a proof when they all hold. Each check either
//! fails with a [`CircuitError`] or yields the public inputs the pool will see.

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::merkle::{verify_path, MerklePath};
use crate::note::Note;
use crate::oracle::{PublicInputs, TransferPublicInputs, WithdrawPublicInputs};
use crate::types::Root;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CircuitError {
    #[error("commitment does not match opening for {0}")]
    CommitmentMismatch(&'static str),
    #[error("merkle inclusion failed for {0}")]
    MerkleInclusion(&'static str),
    #[error("note amount {actual} does not match denomination {expected}")]
    Denomination { expected: U256, actual: U256 },
    #[error("fee {fee} exceeds note amount {amount}")]
    FeeTooHigh { fee: U256, amount: U256 },
    #[error("amounts don't balance: inputs {inputs}, outputs {outputs}")]
    Unbalanced { inputs: U256, outputs: U256 },
    #[error("amount overflow")]
    Overflow,
    #[error("both inputs spend the same leaf")]
    SameInput,
    #[error("malformed merkle path for {0}")]
    MalformedPath(&'static str),
}

/// Shape check before any bit of the path is interpreted.
fn leaf_index_of(path: &MerklePath, what: &'static str) -> Result<u64, CircuitError> {
    if !path.is_well_formed() {
        return Err(CircuitError::MalformedPath(what));
    }
    path.leaf_index().ok_or(CircuitError::MalformedPath(what))
}

/// Private inputs of the withdrawal circuit.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WithdrawWitness {
    #[serde(with = "note_serde")]
    pub note: Note,
    pub path: MerklePath,
    pub root: Root,
    pub recipient: Address,
    pub relayer: Option<Address>,
    pub fee: U256,
}

impl WithdrawWitness {
    /// Proves: the note is in the tree under `root`, its amount is the pool
    /// denomination, `fee <= amount`, and the nullifier is bound to its leaf.
    pub fn statement(&self, denomination: U256) -> Result<PublicInputs, CircuitError> {
        let leaf_index = leaf_index_of(&self.path, "withdraw input")?;
        let commitment = self.note.derive_commitment();
        if commitment != self.note.commitment {
            return Err(CircuitError::CommitmentMismatch("withdraw input"));
        }
        if !verify_path(&commitment, &self.path.siblings, &self.path.indices, &self.root) {
            return Err(CircuitError::MerkleInclusion("withdraw input"));
        }
        if self.note.amount != denomination {
            return Err(CircuitError::Denomination {
                expected: denomination,
                actual: self.note.amount,
            });
        }
        if self.fee > self.note.amount {
            return Err(CircuitError::FeeTooHigh {
                fee: self.fee,
                amount: self.note.amount,
            });
        }

        let nullifier = self.note.nullifier(Some(leaf_index));
        Ok(PublicInputs::Withdraw(WithdrawPublicInputs {
            root: self.root,
            nullifier,
            recipient: self.recipient,
            relayer: self.relayer.unwrap_or(Address::ZERO),
            fee: self.fee,
        }))
    }
}

/// Private inputs of the 2-in-2-out transfer circuit.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransferWitness {
    /// Two input notes to spend
    #[serde(with = "note_pair_serde")]
    pub inputs: [Note; 2],
    /// Merkle paths for each input note
    pub paths: [MerklePath; 2],
    /// Two output notes to create
    #[serde(with = "note_pair_serde")]
    pub outputs: [Note; 2],
    /// The Merkle root both paths verify against
    pub root: Root,
}

impl TransferWitness {
    /// Proves: both inputs are in the tree under `root`, outputs commit to
    /// their openings, and sum(inputs) == sum(outputs).
    pub fn statement(&self) -> Result<PublicInputs, CircuitError> {
        const INPUT: [&str; 2] = ["input note 0", "input note 1"];
        const OUTPUT: [&str; 2] = ["output note 0", "output note 1"];

        let leaf_indices = [
            leaf_index_of(&self.paths[0], INPUT[0])?,
            leaf_index_of(&self.paths[1], INPUT[1])?,
        ];
        if leaf_indices[0] == leaf_indices[1] {
            return Err(CircuitError::SameInput);
        }

        let mut nullifiers = [crate::types::Nullifier::ZERO; 2];
        for i in 0..2 {
            let note = &self.inputs[i];
            let commitment = note.derive_commitment();
            if commitment != note.commitment {
                return Err(CircuitError::CommitmentMismatch(INPUT[i]));
            }
            let path = &self.paths[i];
            if !verify_path(&commitment, &path.siblings, &path.indices, &self.root) {
                return Err(CircuitError::MerkleInclusion(INPUT[i]));
            }
            nullifiers[i] = note.nullifier(Some(leaf_indices[i]));
        }

        let mut new_commitments = [crate::types::Commitment::ZERO; 2];
        for i in 0..2 {
            let note = &self.outputs[i];
            let commitment = note.derive_commitment();
            if commitment != note.commitment {
                return Err(CircuitError::CommitmentMismatch(OUTPUT[i]));
            }
            new_commitments[i] = commitment;
        }

        let inputs = self.inputs[0]
            .amount
            .checked_add(self.inputs[1].amount)
            .ok_or(CircuitError::Overflow)?;
        let outputs = self.outputs[0]
            .amount
            .checked_add(self.outputs[1].amount)
            .ok_or(CircuitError::Overflow)?;
        if inputs != outputs {
            return Err(CircuitError::Unbalanced { inputs, outputs });
        }

        Ok(PublicInputs::Transfer(TransferPublicInputs {
            root: self.root,
            nullifiers,
            new_commitments,
        }))
    }
}

/// Notes travel inside witnesses in their versioned export form.
mod note_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use crate::note::{Note, NoteFile};

    pub fn serialize<S: Serializer>(note: &Note, serializer: S) -> Result<S::Ok, S::Error> {
        note.to_file().serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Note, D::Error> {
        let file = NoteFile::deserialize(deserializer)?;
        Note::from_file(file).map_err(serde::de::Error::custom)
    }
}

mod note_pair_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use crate::note::{Note, NoteFile};

    pub fn serialize<S: Serializer>(notes: &[Note; 2], serializer: S) -> Result<S::Ok, S::Error> {
        [notes[0].to_file(), notes[1].to_file()].serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[Note; 2], D::Error> {
        let [a, b] = <[NoteFile; 2]>::deserialize(deserializer)?;
        Ok([
            Note::from_file(a).map_err(serde::de::Error::custom)?,
            Note::from_file(b).map_err(serde::de::Error::custom)?,
        ])
    }
}
