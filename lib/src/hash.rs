//! Hash primitives.
//!
//! Tree nodes are combined with plain `keccak256(left || right)`, which is what
//! the on-chain `MerkleTree` and the proving circuit compute. Swapping the tree
//! hash means recompiling the circuit, so it is pinned here and advertised
//! through [`TREE_HASH_ID`].
//!
//! Commitments and nullifiers use the same keccak sponge with a domain tag in
//! front of fixed-width 32-byte parts.

use tiny_keccak::{Hasher, Keccak};

use crate::types::Bytes32;

/// Identifier folded into the circuit id so a verifier built for another tree
/// hash is never consulted by mistake.
pub const TREE_HASH_ID: u8 = 1;

/// Domain tag for note commitments.
pub const DS_COMMITMENT: &[u8] = b"cashio.note.commitment.v1";
/// Domain tag for nullifiers.
pub const DS_NULLIFIER: &[u8] = b"cashio.note.nullifier.v1";

/// Compute keccak256 hash. This matches Solidity's keccak256() opcode.
/// Note: tiny_keccak::Keccak is the original Keccak-256 (NOT SHA3-256).
pub fn keccak256(data: &[u8]) -> Bytes32 {
    let mut hasher = Keccak::v256();
    hasher.update(data);
    let mut output = [0u8; 32];
    hasher.finalize(&mut output);
    output
}

/// Combine two tree nodes: `keccak256(abi.encodePacked(left, right))`.
pub fn combine(left: &Bytes32, right: &Bytes32) -> Bytes32 {
    let mut data = [0u8; 64];
    data[..32].copy_from_slice(left);
    data[32..].copy_from_slice(right);
    keccak256(&data)
}

/// Domain-separated derivation over 32-byte parts:
/// `keccak256(domain || parts[0] || parts[1] || ...)`.
pub fn derive(domain: &[u8], parts: &[&Bytes32]) -> Bytes32 {
    let mut hasher = Keccak::v256();
    hasher.update(domain);
    for part in parts {
        hasher.update(&part[..]);
    }
    let mut output = [0u8; 32];
    hasher.finalize(&mut output);
    output
}

/// Leaf value of an empty slot: `keccak256(bytes32(0))`.
pub fn zero_value() -> Bytes32 {
    keccak256(&[0u8; 32])
}

/// Empty-subtree hash for each level, seeded from [`zero_value`]:
///   zeros[0] = keccak256(bytes32(0))
///   zeros[i] = combine(zeros[i-1], zeros[i-1])
pub fn compute_zeros(levels: usize) -> Vec<Bytes32> {
    let mut zeros = Vec::with_capacity(levels);
    let mut current = zero_value();
    for _ in 0..levels {
        zeros.push(current);
        current = combine(&current, &current);
    }
    zeros
}

/// Root of a tree with no insertions: `combine(zeros[levels-1], zeros[levels-1])`.
pub fn compute_empty_root(levels: usize) -> Bytes32 {
    match compute_zeros(levels).last() {
        Some(top) => combine(top, top),
        None => zero_value(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keccak_of_zero_word() {
        // zeros[0] in MerkleTree.sol
        let expected =
            hex::decode("290decd9548b62a8d60345a988386fc84ba6bc95484008f6362f93160ef3e563")
                .unwrap();
        assert_eq!(zero_value().to_vec(), expected);
    }

    #[test]
    fn test_zeros_chain() {
        let zeros = compute_zeros(5);
        assert_eq!(zeros.len(), 5);
        assert_eq!(zeros[0], keccak256(&[0u8; 32]));
        for i in 1..5 {
            assert_eq!(zeros[i], combine(&zeros[i - 1], &zeros[i - 1]));
        }
    }

    #[test]
    fn test_empty_root_is_one_level_above_zeros() {
        let zeros = compute_zeros(4);
        assert_eq!(compute_empty_root(4), combine(&zeros[3], &zeros[3]));
    }

    #[test]
    fn test_derive_is_domain_separated() {
        let a = [7u8; 32];
        assert_ne!(derive(DS_COMMITMENT, &[&a]), derive(DS_NULLIFIER, &[&a]));
        assert_eq!(derive(DS_NULLIFIER, &[&a]), derive(DS_NULLIFIER, &[&a]));
    }

    #[test]
    fn test_combine_is_ordered() {
        let a = [1u8; 32];
        let b = [2u8; 32];
        assert_ne!(combine(&a, &b), combine(&b, &a));
    }
}
