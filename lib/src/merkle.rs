//! Append-only commitment tree.
//!
//! Mirrors the on-chain incremental Merkle tree: O(depth) insertion through
//! `filled_subtrees`, a bounded ring buffer of recent roots, and an unbounded
//! set of every root ever produced.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{PoolError, Result};
use crate::hash::{combine, compute_zeros};
use crate::types::{Bytes32, Commitment, Root};

/// Maximum supported depth; capacity must fit a `u64` leaf index.
pub const MAX_DEPTH: usize = 32;

/// Sibling path of one leaf.
///
/// `indices[i]` is the position bit at level `i`: `false` when the running
/// node is the left child, `true` when it is the right child.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerklePath {
    pub siblings: Vec<Root>,
    pub indices: Vec<bool>,
}

impl MerklePath {
    /// Leaf position encoded by the index bits; `None` for a path deeper
    /// than [`MAX_DEPTH`].
    pub fn leaf_index(&self) -> Option<u64> {
        if self.indices.len() > MAX_DEPTH {
            return None;
        }
        Some(
            self.indices
                .iter()
                .enumerate()
                .fold(0u64, |acc, (level, bit)| acc | ((*bit as u64) << level)),
        )
    }

    pub fn depth(&self) -> usize {
        self.siblings.len()
    }

    /// One index bit per sibling, and between 1 and [`MAX_DEPTH`] levels.
    pub fn is_well_formed(&self) -> bool {
        self.siblings.len() == self.indices.len() && (1..=MAX_DEPTH).contains(&self.depth())
    }
}

/// Recompute a root from a leaf and its claimed path and compare.
///
/// Pure: works without a live tree, e.g. on a wallet building a proof offline.
pub fn verify_path(leaf: &Commitment, siblings: &[Root], indices: &[bool], root: &Root) -> bool {
    if siblings.len() != indices.len() || siblings.is_empty() {
        return false;
    }
    let mut current = leaf.to_bytes();
    for (sibling, is_right) in siblings.iter().zip(indices) {
        current = if *is_right {
            combine(sibling.as_bytes(), &current)
        } else {
            combine(&current, sibling.as_bytes())
        };
    }
    current == root.to_bytes()
}

/// Incremental Merkle tree of note commitments.
#[derive(Clone, Debug)]
pub struct CommitmentTree {
    depth: usize,
    zeros: Vec<Bytes32>,
    filled_subtrees: Vec<Bytes32>,
    next_index: u64,
    /// Circular buffer of recent roots.
    roots: Vec<Root>,
    current_root_index: usize,
    known_roots: HashSet<Root>,
    /// All inserted leaves in order
    leaves: Vec<Commitment>,
}

/// Persisted form of [`CommitmentTree`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TreeSnapshot {
    pub depth: usize,
    pub next_index: u64,
    pub filled_subtrees: Vec<Root>,
    pub root_history: Vec<Root>,
    pub current_root_index: usize,
    pub known_roots: Vec<Root>,
    pub leaves: Vec<Commitment>,
}

impl CommitmentTree {
    /// Create an empty tree of `depth` levels keeping `history` recent roots.
    pub fn new(depth: usize, history: usize) -> Result<Self> {
        if depth == 0 || depth > MAX_DEPTH {
            return Err(PoolError::InvalidConfig(format!(
                "tree depth {depth} outside 1..={MAX_DEPTH}"
            )));
        }
        if history == 0 {
            return Err(PoolError::InvalidConfig("root history must hold at least one root".into()));
        }

        let zeros = compute_zeros(depth);
        let filled_subtrees = zeros.clone();
        let top = zeros[depth - 1];
        let empty_root = Root(combine(&top, &top));

        let mut roots = vec![Root::ZERO; history];
        roots[0] = empty_root;
        let mut known_roots = HashSet::new();
        known_roots.insert(empty_root);

        Ok(Self {
            depth,
            zeros,
            filled_subtrees,
            next_index: 0,
            roots,
            current_root_index: 0,
            known_roots,
            leaves: Vec::new(),
        })
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn capacity(&self) -> u64 {
        1u64 << self.depth
    }

    /// Next insertion position, equal to the number of leaves.
    pub fn next_index(&self) -> u64 {
        self.next_index
    }

    pub fn remaining(&self) -> u64 {
        self.capacity() - self.next_index
    }

    pub fn leaves(&self) -> &[Commitment] {
        &self.leaves
    }

    /// Insert a leaf, returning its index and the new root.
    ///
    /// Fails with `TreeFull` at capacity without touching any state.
    pub fn insert(&mut self, leaf: Commitment) -> Result<(u64, Root)> {
        let index = self.next_index;
        if index >= self.capacity() {
            return Err(PoolError::TreeFull {
                capacity: self.capacity(),
            });
        }

        let mut current_index = index;
        let mut current_hash = leaf.to_bytes();

        for level in 0..self.depth {
            if current_index % 2 == 0 {
                // Left child: pair with the empty subtree on the right
                self.filled_subtrees[level] = current_hash;
                current_hash = combine(&current_hash, &self.zeros[level]);
            } else {
                // Right child: pair with the stored left sibling
                current_hash = combine(&self.filled_subtrees[level], &current_hash);
            }
            current_index /= 2;
        }

        let root = Root(current_hash);
        self.current_root_index = (self.current_root_index + 1) % self.roots.len();
        self.roots[self.current_root_index] = root;
        self.known_roots.insert(root);

        self.next_index = index + 1;
        self.leaves.push(leaf);

        debug!(leaf_index = index, %root, "commitment inserted");
        Ok((index, root))
    }

    /// Most recent root; the empty-tree root before any insertion.
    pub fn current_root(&self) -> Root {
        self.roots[self.current_root_index]
    }

    /// Whether `root` was ever produced by this tree.
    pub fn is_known_root(&self, root: &Root) -> bool {
        !root.is_zero() && self.known_roots.contains(root)
    }

    /// Whether `root` is still inside the bounded recent-root window.
    pub fn is_recent_root(&self, root: &Root) -> bool {
        if root.is_zero() {
            return false;
        }
        let len = self.roots.len();
        let mut i = self.current_root_index;
        loop {
            if self.roots[i] == *root {
                return true;
            }
            i = if i == 0 { len - 1 } else { i - 1 };
            if i == self.current_root_index {
                break;
            }
        }
        false
    }

    /// Recent roots, newest first.
    pub fn recent_roots(&self) -> Vec<Root> {
        let len = self.roots.len();
        (0..len)
            .map(|back| self.roots[(self.current_root_index + len - back) % len])
            .filter(|r| !r.is_zero())
            .collect()
    }

    pub fn known_root_count(&self) -> usize {
        self.known_roots.len()
    }

    /// Verify a path against `root`, also requiring the path to span the full
    /// depth of this tree.
    pub fn verify_path(&self, leaf: &Commitment, path: &MerklePath, root: &Root) -> bool {
        path.depth() == self.depth && verify_path(leaf, &path.siblings, &path.indices, root)
    }

    /// Sibling path for the leaf at `leaf_index` against the current root.
    ///
    /// Builds each level only as wide as the occupied leaves, padding with the
    /// level's empty-subtree hash.
    pub fn path(&self, leaf_index: u64) -> Result<MerklePath> {
        if leaf_index >= self.next_index {
            return Err(PoolError::UnknownLeaf(leaf_index));
        }

        let mut level: Vec<Bytes32> = self.leaves.iter().map(|c| c.to_bytes()).collect();
        let mut idx = leaf_index as usize;
        let mut siblings = Vec::with_capacity(self.depth);
        let mut indices = Vec::with_capacity(self.depth);

        for depth in 0..self.depth {
            let zero = self.zeros[depth];
            let sibling = level.get(idx ^ 1).copied().unwrap_or(zero);
            siblings.push(Root(sibling));
            indices.push(idx % 2 == 1);

            level = level
                .chunks(2)
                .map(|pair| combine(&pair[0], pair.get(1).unwrap_or(&zero)))
                .collect();
            idx /= 2;
        }

        Ok(MerklePath { siblings, indices })
    }

    pub fn snapshot(&self) -> TreeSnapshot {
        let mut known_roots: Vec<Root> = self.known_roots.iter().copied().collect();
        known_roots.sort();
        TreeSnapshot {
            depth: self.depth,
            next_index: self.next_index,
            filled_subtrees: self.filled_subtrees.iter().copied().map(Root).collect(),
            root_history: self.roots.clone(),
            current_root_index: self.current_root_index,
            known_roots,
            leaves: self.leaves.clone(),
        }
    }

    /// Rebuild from a snapshot by replaying its leaves, then check the replay
    /// reproduces the persisted frontier, root ring and known-root set.
    pub fn restore(snapshot: TreeSnapshot) -> Result<Self> {
        let history = snapshot.root_history.len();
        let mut tree = Self::new(snapshot.depth, history)?;

        if snapshot.next_index != snapshot.leaves.len() as u64 {
            return Err(PoolError::CorruptState(format!(
                "next_index {} but {} leaves",
                snapshot.next_index,
                snapshot.leaves.len()
            )));
        }
        if snapshot.current_root_index >= history {
            return Err(PoolError::CorruptState("root cursor outside history".into()));
        }

        for leaf in &snapshot.leaves {
            tree.insert(*leaf)
                .map_err(|e| PoolError::CorruptState(format!("replay failed: {e}")))?;
        }

        let persisted_frontier: Vec<Bytes32> =
            snapshot.filled_subtrees.iter().map(|r| r.to_bytes()).collect();
        if persisted_frontier != tree.filled_subtrees {
            return Err(PoolError::CorruptState("filled subtrees do not match leaves".into()));
        }
        let persisted_root = snapshot.root_history[snapshot.current_root_index];
        if persisted_root != tree.current_root() {
            return Err(PoolError::CorruptState(format!(
                "persisted root {persisted_root} but leaves give {}",
                tree.current_root()
            )));
        }
        // The replay reproduces every root the tree produced, so the persisted
        // history has to match it exactly.
        if snapshot.current_root_index != tree.current_root_index
            || snapshot.root_history != tree.roots
        {
            return Err(PoolError::CorruptState("root history does not match leaves".into()));
        }
        let persisted_known: HashSet<Root> = snapshot.known_roots.into_iter().collect();
        if persisted_known != tree.known_roots {
            return Err(PoolError::CorruptState(format!(
                "{} known roots persisted but leaves give {}",
                persisted_known.len(),
                tree.known_roots.len()
            )));
        }

        Ok(tree)
    }
}
