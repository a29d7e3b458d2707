//! Shielded pool state machine.
//!
//! [`PoolState`] owns the commitment tree and the spent-nullifier set and
//! splits every spend into a read-only `check_*` and a mutating `apply_*`. The
//! proof oracle is consulted between the two, so callers can run it without
//! holding any lock. `apply_*` repeats the check, which makes a spend that
//! raced another one fail cleanly instead of applying twice.
//!
//! [`ShieldedPool`] wires a state and an oracle together for single-threaded
//! callers; [`crate::service::PoolService`] does the same behind a lock.

use std::collections::{HashSet, VecDeque};

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{PoolConfig, RootValidity};
use crate::error::{PoolError, Result};
use crate::merkle::{CommitmentTree, TreeSnapshot};
use crate::note::Note;
use crate::oracle::{ProofOracle, PublicInputs, TransferPublicInputs, WithdrawPublicInputs};
use crate::prover::GeneratedProof;
use crate::types::{unix_now, Commitment, Nullifier, Root};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawRequest {
    #[serde(with = "hex_bytes")]
    pub proof: Vec<u8>,
    pub root: Root,
    pub nullifier: Nullifier,
    pub recipient: Address,
    pub relayer: Option<Address>,
    pub fee: U256,
}

impl WithdrawRequest {
    /// Request carrying a proof from a [`crate::prover::Prover`].
    pub fn from_proof(generated: GeneratedProof) -> Result<Self> {
        match generated.public_inputs {
            PublicInputs::Withdraw(pi) => Ok(Self {
                proof: generated.proof,
                root: pi.root,
                nullifier: pi.nullifier,
                recipient: pi.recipient,
                relayer: (pi.relayer != Address::ZERO).then_some(pi.relayer),
                fee: pi.fee,
            }),
            PublicInputs::Transfer(_) => {
                Err(PoolError::Prover("expected a withdraw proof, got a transfer proof".into()))
            }
        }
    }

    pub fn public_inputs(&self) -> PublicInputs {
        PublicInputs::Withdraw(WithdrawPublicInputs {
            root: self.root,
            nullifier: self.nullifier,
            recipient: self.recipient,
            relayer: self.relayer.unwrap_or(Address::ZERO),
            fee: self.fee,
        })
    }
}

/// Plaintext amounts for pools that check conservation outside the circuit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferAmounts {
    pub inputs: [U256; 2],
    pub outputs: [U256; 2],
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    #[serde(with = "hex_bytes")]
    pub proof: Vec<u8>,
    pub root: Root,
    pub nullifiers: [Nullifier; 2],
    pub new_commitments: [Commitment; 2],
    #[serde(default)]
    pub amounts: Option<TransferAmounts>,
}

impl TransferRequest {
    pub fn from_proof(generated: GeneratedProof) -> Result<Self> {
        match generated.public_inputs {
            PublicInputs::Transfer(pi) => Ok(Self {
                proof: generated.proof,
                root: pi.root,
                nullifiers: pi.nullifiers,
                new_commitments: pi.new_commitments,
                amounts: None,
            }),
            PublicInputs::Withdraw(_) => {
                Err(PoolError::Prover("expected a transfer proof, got a withdraw proof".into()))
            }
        }
    }

    pub fn public_inputs(&self) -> PublicInputs {
        PublicInputs::Transfer(TransferPublicInputs {
            root: self.root,
            nullifiers: self.nullifiers,
            new_commitments: self.new_commitments,
        })
    }
}

/// Value released by an accepted withdrawal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawReceipt {
    pub nullifier: Nullifier,
    pub recipient: Address,
    /// `denomination - fee`
    pub amount: U256,
    pub relayer: Option<Address>,
    pub fee: U256,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferReceipt {
    pub nullifiers: [Nullifier; 2],
    pub leaf_indices: [u64; 2],
    /// Root after the second insertion.
    pub root: Root,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PoolEvent {
    Deposited {
        commitment: Commitment,
        leaf_index: u64,
        timestamp: u64,
    },
    Withdrawn {
        nullifier: Nullifier,
        recipient: Address,
        relayer: Option<Address>,
        fee: U256,
        timestamp: u64,
    },
    PrivateTransfer {
        nullifiers: [Nullifier; 2],
        commitments: [Commitment; 2],
        leaf_indices: [u64; 2],
        timestamp: u64,
    },
}

/// Everything that has to survive a restart.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PoolSnapshot {
    pub config: PoolConfig,
    pub tree: TreeSnapshot,
    pub spent_nullifiers: Vec<Nullifier>,
}

/// Undrained events kept per pool; older ones are dropped first.
pub const EVENT_BUFFER: usize = 4096;

#[derive(Clone, Debug)]
pub struct PoolState {
    config: PoolConfig,
    tree: CommitmentTree,
    spent: HashSet<Nullifier>,
    commitments: HashSet<Commitment>,
    events: VecDeque<PoolEvent>,
}

impl PoolState {
    pub fn new(config: PoolConfig) -> Result<Self> {
        config.validate()?;
        let tree = CommitmentTree::new(config.depth, config.root_history_size)?;
        info!(
            depth = config.depth,
            denomination = %config.denomination,
            validity = ?config.root_validity,
            "pool created"
        );
        Ok(Self {
            config,
            tree,
            spent: HashSet::new(),
            commitments: HashSet::new(),
            events: VecDeque::new(),
        })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn tree(&self) -> &CommitmentTree {
        &self.tree
    }

    pub fn current_root(&self) -> Root {
        self.tree.current_root()
    }

    pub fn next_index(&self) -> u64 {
        self.tree.next_index()
    }

    pub fn is_spent(&self, nullifier: &Nullifier) -> bool {
        self.spent.contains(nullifier)
    }

    pub fn spent_count(&self) -> usize {
        self.spent.len()
    }

    pub fn has_commitment(&self, commitment: &Commitment) -> bool {
        self.commitments.contains(commitment)
    }

    /// Whether a spend may reference `root` under the configured policy.
    pub fn is_known_root(&self, root: &Root) -> bool {
        match self.config.root_validity {
            RootValidity::AllHistorical => self.tree.is_known_root(root),
            RootValidity::RecentWindow => self.tree.is_recent_root(root),
        }
    }

    /// Events recorded since the last drain, oldest first.
    pub fn drain_events(&mut self) -> Vec<PoolEvent> {
        self.events.drain(..).collect()
    }

    fn record(&mut self, event: PoolEvent) {
        if self.events.len() == EVENT_BUFFER {
            self.events.pop_front();
            debug!("event buffer full, dropping oldest");
        }
        self.events.push_back(event);
    }

    pub fn deposit(&mut self, commitment: Commitment, value: U256) -> Result<u64> {
        if value != self.config.denomination {
            warn!(%value, "deposit rejected: wrong denomination");
            return Err(PoolError::ValueMismatch {
                expected: self.config.denomination,
                actual: value,
            });
        }
        if self.commitments.contains(&commitment) {
            warn!(%commitment, "deposit rejected: duplicate commitment");
            return Err(PoolError::DuplicateCommitment(commitment));
        }

        let (leaf_index, root) = self.tree.insert(commitment)?;
        self.commitments.insert(commitment);
        self.record(PoolEvent::Deposited {
            commitment,
            leaf_index,
            timestamp: unix_now(),
        });
        info!(%commitment, leaf_index, %root, "deposit accepted");
        Ok(leaf_index)
    }

    /// Deposit a note owned by the caller and record where it landed.
    pub fn deposit_note(&mut self, note: &mut Note) -> Result<u64> {
        note.check_commitment()?;
        if note.chain_tag != self.config.hub_chain {
            return Err(PoolError::MalformedNote(format!(
                "note tagged for {} cannot enter the {} pool",
                note.chain_tag, self.config.hub_chain
            )));
        }
        let leaf_index = self.deposit(note.commitment, note.amount)?;
        note.mark_inserted(leaf_index, self.tree.current_root());
        Ok(leaf_index)
    }

    fn check_root(&self, root: &Root) -> Result<()> {
        if !self.is_known_root(root) {
            warn!(%root, "spend rejected: unknown root");
            return Err(PoolError::InvalidRoot(*root));
        }
        Ok(())
    }

    fn check_unspent(&self, nullifier: &Nullifier) -> Result<()> {
        if self.spent.contains(nullifier) {
            warn!(%nullifier, "spend rejected: nullifier already spent");
            return Err(PoolError::NullifierAlreadySpent(*nullifier));
        }
        Ok(())
    }

    /// Validate a withdrawal against the current state and return the public
    /// inputs its proof must verify against.
    pub fn check_withdraw(&self, req: &WithdrawRequest) -> Result<PublicInputs> {
        self.check_root(&req.root)?;
        self.check_unspent(&req.nullifier)?;
        if req.fee > self.config.denomination {
            return Err(PoolError::InvalidFee(format!(
                "fee {} exceeds denomination {}",
                req.fee, self.config.denomination
            )));
        }
        if !req.fee.is_zero() && req.relayer.is_none() {
            return Err(PoolError::InvalidFee("non-zero fee without a relayer".into()));
        }
        Ok(req.public_inputs())
    }

    /// Record the nullifier and release the value. Call only after the proof
    /// verified.
    pub fn apply_withdraw(&mut self, req: &WithdrawRequest) -> Result<WithdrawReceipt> {
        self.check_withdraw(req)?;
        self.spent.insert(req.nullifier);

        let amount = self.config.denomination - req.fee;
        self.record(PoolEvent::Withdrawn {
            nullifier: req.nullifier,
            recipient: req.recipient,
            relayer: req.relayer,
            fee: req.fee,
            timestamp: unix_now(),
        });
        info!(
            nullifier = %req.nullifier,
            recipient = %req.recipient,
            %amount,
            fee = %req.fee,
            "withdrawal accepted"
        );
        Ok(WithdrawReceipt {
            nullifier: req.nullifier,
            recipient: req.recipient,
            amount,
            relayer: req.relayer,
            fee: req.fee,
        })
    }

    pub fn check_transfer(&self, req: &TransferRequest) -> Result<PublicInputs> {
        self.check_root(&req.root)?;
        let [nf1, nf2] = req.nullifiers;
        self.check_unspent(&nf1)?;
        self.check_unspent(&nf2)?;
        if nf1 == nf2 {
            // Spending one note twice in the same transfer.
            warn!(nullifier = %nf1, "transfer rejected: repeated nullifier");
            return Err(PoolError::NullifierAlreadySpent(nf1));
        }

        let [c1, c2] = req.new_commitments;
        if c1 == c2 {
            return Err(PoolError::DuplicateCommitment(c1));
        }
        for c in [c1, c2] {
            if self.commitments.contains(&c) {
                return Err(PoolError::DuplicateCommitment(c));
            }
        }

        if self.tree.remaining() < 2 {
            return Err(PoolError::TreeFull {
                capacity: self.tree.capacity(),
            });
        }

        if let Some(amounts) = &req.amounts {
            check_conservation(amounts)?;
        }
        Ok(req.public_inputs())
    }

    pub fn apply_transfer(&mut self, req: &TransferRequest) -> Result<TransferReceipt> {
        self.check_transfer(req)?;

        // Capacity was checked above, so neither insert can fail part way.
        let (i1, _) = self.tree.insert(req.new_commitments[0])?;
        let (i2, root) = self.tree.insert(req.new_commitments[1])?;
        for c in req.new_commitments {
            self.commitments.insert(c);
        }
        for nf in req.nullifiers {
            self.spent.insert(nf);
        }

        self.record(PoolEvent::PrivateTransfer {
            nullifiers: req.nullifiers,
            commitments: req.new_commitments,
            leaf_indices: [i1, i2],
            timestamp: unix_now(),
        });
        info!(leaf_indices = ?[i1, i2], %root, "private transfer accepted");
        Ok(TransferReceipt {
            nullifiers: req.nullifiers,
            leaf_indices: [i1, i2],
            root,
        })
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        let mut spent_nullifiers: Vec<Nullifier> = self.spent.iter().copied().collect();
        spent_nullifiers.sort();
        PoolSnapshot {
            config: self.config.clone(),
            tree: self.tree.snapshot(),
            spent_nullifiers,
        }
    }

    pub fn restore(snapshot: PoolSnapshot) -> Result<Self> {
        snapshot.config.validate()?;
        if snapshot.tree.depth != snapshot.config.depth {
            return Err(PoolError::CorruptState(format!(
                "tree depth {} but config depth {}",
                snapshot.tree.depth, snapshot.config.depth
            )));
        }
        let tree = CommitmentTree::restore(snapshot.tree)?;
        let commitments: HashSet<Commitment> = tree.leaves().iter().copied().collect();
        if commitments.len() != tree.leaves().len() {
            return Err(PoolError::CorruptState("duplicate commitments in tree".into()));
        }
        let spent: HashSet<Nullifier> = snapshot.spent_nullifiers.into_iter().collect();
        debug!(
            leaves = tree.next_index(),
            spent = spent.len(),
            "pool state restored"
        );
        Ok(Self {
            config: snapshot.config,
            tree,
            spent,
            commitments,
            events: VecDeque::new(),
        })
    }
}

fn check_conservation(amounts: &TransferAmounts) -> Result<()> {
    let inputs = amounts.inputs[0].checked_add(amounts.inputs[1]);
    let outputs = amounts.outputs[0].checked_add(amounts.outputs[1]);
    match (inputs, outputs) {
        (Some(i), Some(o)) if i == o => Ok(()),
        _ => {
            warn!("transfer rejected: amounts do not balance");
            Err(PoolError::ValueMismatch {
                expected: amounts.inputs[0].saturating_add(amounts.inputs[1]),
                actual: amounts.outputs[0].saturating_add(amounts.outputs[1]),
            })
        }
    }
}

/// Map an oracle answer onto the pool's error taxonomy.
pub(crate) fn check_proof<O: ProofOracle + ?Sized>(
    oracle: &O,
    inputs: &PublicInputs,
    proof: &[u8],
) -> Result<()> {
    let circuit = inputs.circuit();
    debug!(?circuit, proof_len = proof.len(), "consulting proof oracle");
    match oracle.verify(circuit, proof, &inputs.encode()) {
        Ok(true) => Ok(()),
        Ok(false) => {
            warn!(?circuit, "proof rejected");
            Err(PoolError::InvalidProof)
        }
        Err(reason) => {
            warn!(?circuit, %reason, "proof oracle unavailable");
            Err(PoolError::Oracle(reason))
        }
    }
}

/// A pool instance owned by one caller.
pub struct ShieldedPool<O> {
    state: PoolState,
    oracle: O,
}

impl<O: ProofOracle> ShieldedPool<O> {
    pub fn new(config: PoolConfig, oracle: O) -> Result<Self> {
        Ok(Self {
            state: PoolState::new(config)?,
            oracle,
        })
    }

    pub fn from_state(state: PoolState, oracle: O) -> Self {
        Self { state, oracle }
    }

    pub fn state(&self) -> &PoolState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut PoolState {
        &mut self.state
    }

    pub fn into_state(self) -> PoolState {
        self.state
    }

    pub fn deposit(&mut self, commitment: Commitment, value: U256) -> Result<u64> {
        self.state.deposit(commitment, value)
    }

    pub fn withdraw(&mut self, req: &WithdrawRequest) -> Result<WithdrawReceipt> {
        let inputs = self.state.check_withdraw(req)?;
        check_proof(&self.oracle, &inputs, &req.proof)?;
        self.state.apply_withdraw(req)
    }

    pub fn private_transfer(&mut self, req: &TransferRequest) -> Result<TransferReceipt> {
        let inputs = self.state.check_transfer(req)?;
        check_proof(&self.oracle, &inputs, &req.proof)?;
        self.state.apply_transfer(req)
    }

    pub fn is_spent(&self, nullifier: &Nullifier) -> bool {
        self.state.is_spent(nullifier)
    }

    pub fn is_known_root(&self, root: &Root) -> bool {
        self.state.is_known_root(root)
    }

    pub fn current_root(&self) -> Root {
        self.state.current_root()
    }
}

/// Proof bytes as a hex string in JSON.
mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(bytes)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s.trim_start_matches("0x")).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::ChainId;
    use crate::hash::keccak256;
    use crate::oracle::{mock_proof, MockMode, MockOracle};

    const DENOM: u64 = 1_000;

    fn config(depth: usize) -> PoolConfig {
        PoolConfig::default()
            .with_depth(depth)
            .with_denomination(U256::from(DENOM))
    }

    fn commitment(tag: &str) -> Commitment {
        Commitment(keccak256(tag.as_bytes()))
    }

    fn nullifier(tag: &str) -> Nullifier {
        Nullifier(keccak256(tag.as_bytes()))
    }

    fn pool(depth: usize) -> ShieldedPool<MockOracle> {
        ShieldedPool::new(config(depth), MockOracle::binding()).unwrap()
    }

    fn withdraw_req(root: Root, nf: Nullifier) -> WithdrawRequest {
        let mut req = WithdrawRequest {
            proof: Vec::new(),
            root,
            nullifier: nf,
            recipient: Address::repeat_byte(0xAA),
            relayer: None,
            fee: U256::ZERO,
        };
        req.proof = prove(&req.public_inputs());
        req
    }

    fn transfer_req(root: Root, nfs: [Nullifier; 2], cms: [Commitment; 2]) -> TransferRequest {
        let mut req = TransferRequest {
            proof: Vec::new(),
            root,
            nullifiers: nfs,
            new_commitments: cms,
            amounts: None,
        };
        req.proof = prove(&req.public_inputs());
        req
    }

    fn prove(inputs: &PublicInputs) -> Vec<u8> {
        mock_proof(inputs.circuit(), &inputs.encode())
    }

    #[test]
    fn test_deposit_requires_denomination() {
        let mut p = pool(4);
        let err = p.deposit(commitment("a"), U256::from(DENOM - 1)).unwrap_err();
        assert!(matches!(err, PoolError::ValueMismatch { .. }));
        assert_eq!(p.state().next_index(), 0);
        assert_eq!(p.deposit(commitment("a"), U256::from(DENOM)).unwrap(), 0);
        assert_eq!(p.deposit(commitment("b"), U256::from(DENOM)).unwrap(), 1);
    }

    #[test]
    fn test_duplicate_deposit_rejected() {
        let mut p = pool(4);
        p.deposit(commitment("a"), U256::from(DENOM)).unwrap();
        let root = p.current_root();
        let err = p.deposit(commitment("a"), U256::from(DENOM)).unwrap_err();
        assert!(matches!(err, PoolError::DuplicateCommitment(_)));
        assert_eq!(p.current_root(), root);
    }

    #[test]
    fn test_deposit_emits_event() {
        let mut p = pool(4);
        p.deposit(commitment("a"), U256::from(DENOM)).unwrap();
        let events = p.state_mut().drain_events();
        assert!(matches!(
            events.as_slice(),
            [PoolEvent::Deposited { leaf_index: 0, .. }]
        ));
        assert!(p.state_mut().drain_events().is_empty());
    }

    #[test]
    fn test_withdraw_then_replay() {
        let mut p = pool(4);
        p.deposit(commitment("a"), U256::from(DENOM)).unwrap();
        let req = withdraw_req(p.current_root(), nullifier("n"));
        let receipt = p.withdraw(&req).unwrap();
        assert_eq!(receipt.amount, U256::from(DENOM));
        assert!(p.is_spent(&nullifier("n")));

        // Same nullifier with every other field changed.
        p.deposit(commitment("b"), U256::from(DENOM)).unwrap();
        let mut again = withdraw_req(p.current_root(), nullifier("n"));
        again.recipient = Address::repeat_byte(0xBB);
        again.proof = prove(&again.public_inputs());
        assert!(matches!(
            p.withdraw(&again),
            Err(PoolError::NullifierAlreadySpent(_))
        ));
    }

    #[test]
    fn test_withdraw_with_relayer_fee() {
        let mut p = pool(4);
        p.deposit(commitment("a"), U256::from(DENOM)).unwrap();
        let mut req = withdraw_req(p.current_root(), nullifier("n"));
        req.relayer = Some(Address::repeat_byte(0x11));
        req.fee = U256::from(30u64);
        req.proof = prove(&req.public_inputs());
        let receipt = p.withdraw(&req).unwrap();
        assert_eq!(receipt.amount, U256::from(DENOM - 30));
        assert_eq!(receipt.fee, U256::from(30u64));
    }

    #[test]
    fn test_fee_rules() {
        let mut p = pool(4);
        p.deposit(commitment("a"), U256::from(DENOM)).unwrap();
        let mut req = withdraw_req(p.current_root(), nullifier("n"));
        req.fee = U256::from(1u64);
        assert!(matches!(p.withdraw(&req), Err(PoolError::InvalidFee(_))));

        req.relayer = Some(Address::repeat_byte(0x11));
        req.fee = U256::from(DENOM + 1);
        assert!(matches!(p.withdraw(&req), Err(PoolError::InvalidFee(_))));
        assert!(!p.is_spent(&nullifier("n")));
    }

    #[test]
    fn test_unknown_root_rejected() {
        let mut p = pool(4);
        p.deposit(commitment("a"), U256::from(DENOM)).unwrap();
        let req = withdraw_req(Root([9; 32]), nullifier("n"));
        assert!(matches!(p.withdraw(&req), Err(PoolError::InvalidRoot(_))));
    }

    #[test]
    fn test_rejected_proof_leaves_no_trace() {
        let mut p = pool(4);
        p.deposit(commitment("a"), U256::from(DENOM)).unwrap();
        let mut req = withdraw_req(p.current_root(), nullifier("n"));
        req.proof[0] ^= 1;
        assert!(matches!(p.withdraw(&req), Err(PoolError::InvalidProof)));
        assert!(!p.is_spent(&nullifier("n")));
        assert_eq!(p.state().spent_count(), 0);
    }

    #[test]
    fn test_oracle_rejection_is_final() {
        let mut p = ShieldedPool::new(config(4), MockOracle::reject_all()).unwrap();
        p.deposit(commitment("a"), U256::from(DENOM)).unwrap();
        let err = p.withdraw(&withdraw_req(p.current_root(), nullifier("n"))).unwrap_err();
        assert!(matches!(err, PoolError::InvalidProof));
        assert!(!err.is_retriable());
        assert!(!p.is_spent(&nullifier("n")));
    }

    #[test]
    fn test_event_buffer_drops_oldest() {
        let mut p = pool(13);
        for i in 0..=EVENT_BUFFER {
            p.deposit(commitment(&format!("{i}")), U256::from(DENOM)).unwrap();
        }
        let events = p.state_mut().drain_events();
        assert_eq!(events.len(), EVENT_BUFFER);
        assert!(matches!(events[0], PoolEvent::Deposited { leaf_index: 1, .. }));
        assert!(p.state_mut().drain_events().is_empty());
    }

    #[test]
    fn test_oracle_outage_is_retriable() {
        let mut p = ShieldedPool::new(config(4), MockOracle::new(MockMode::Unavailable)).unwrap();
        p.deposit(commitment("a"), U256::from(DENOM)).unwrap();
        let err = p.withdraw(&withdraw_req(p.current_root(), nullifier("n"))).unwrap_err();
        assert!(err.is_retriable());
        assert!(!p.is_spent(&nullifier("n")));
    }

    #[test]
    fn test_transfer_inserts_both_outputs() {
        let mut p = pool(4);
        p.deposit(commitment("a"), U256::from(DENOM)).unwrap();
        p.deposit(commitment("b"), U256::from(DENOM)).unwrap();
        let req = transfer_req(
            p.current_root(),
            [nullifier("n1"), nullifier("n2")],
            [commitment("c"), commitment("d")],
        );
        let receipt = p.private_transfer(&req).unwrap();
        assert_eq!(receipt.leaf_indices, [2, 3]);
        assert_eq!(receipt.root, p.current_root());
        assert!(p.is_spent(&nullifier("n1")) && p.is_spent(&nullifier("n2")));
        assert!(p.state().has_commitment(&commitment("d")));
    }

    #[test]
    fn test_transfer_with_one_spent_input() {
        let mut p = pool(4);
        p.deposit(commitment("a"), U256::from(DENOM)).unwrap();
        let w = withdraw_req(p.current_root(), nullifier("n1"));
        p.withdraw(&w).unwrap();

        let req = transfer_req(
            p.current_root(),
            [nullifier("fresh"), nullifier("n1")],
            [commitment("c"), commitment("d")],
        );
        assert!(matches!(
            p.private_transfer(&req),
            Err(PoolError::NullifierAlreadySpent(nf)) if nf == nullifier("n1")
        ));
        assert!(!p.is_spent(&nullifier("fresh")));
        assert_eq!(p.state().next_index(), 1);
    }

    #[test]
    fn test_transfer_repeated_nullifier() {
        let mut p = pool(4);
        p.deposit(commitment("a"), U256::from(DENOM)).unwrap();
        let req = transfer_req(
            p.current_root(),
            [nullifier("n"), nullifier("n")],
            [commitment("c"), commitment("d")],
        );
        assert!(matches!(
            p.private_transfer(&req),
            Err(PoolError::NullifierAlreadySpent(_))
        ));
    }

    #[test]
    fn test_transfer_amounts_must_balance() {
        let mut p = pool(4);
        p.deposit(commitment("a"), U256::from(DENOM)).unwrap();
        let root = p.current_root();
        let mut req = transfer_req(
            root,
            [nullifier("n1"), nullifier("n2")],
            [commitment("c"), commitment("d")],
        );
        req.amounts = Some(TransferAmounts {
            inputs: [U256::from(600u64), U256::from(400u64)],
            outputs: [U256::from(500u64), U256::from(501u64)],
        });
        assert!(matches!(
            p.private_transfer(&req),
            Err(PoolError::ValueMismatch { .. })
        ));
        assert_eq!(p.current_root(), root);
        assert_eq!(p.state().spent_count(), 0);

        req.amounts = Some(TransferAmounts {
            inputs: [U256::MAX, U256::from(1u64)],
            outputs: [U256::MAX, U256::from(1u64)],
        });
        assert!(matches!(
            p.private_transfer(&req),
            Err(PoolError::ValueMismatch { .. })
        ));
    }

    #[test]
    fn test_transfer_needs_room_for_both() {
        let mut p = pool(1);
        p.deposit(commitment("a"), U256::from(DENOM)).unwrap();
        let req = transfer_req(
            p.current_root(),
            [nullifier("n1"), nullifier("n2")],
            [commitment("c"), commitment("d")],
        );
        assert!(matches!(p.private_transfer(&req), Err(PoolError::TreeFull { .. })));
        assert_eq!(p.state().next_index(), 1);
        assert_eq!(p.state().spent_count(), 0);
    }

    #[test]
    fn test_recent_window_expires_roots() {
        let cfg = config(4)
            .with_root_history(2)
            .with_root_validity(RootValidity::RecentWindow);
        let mut p = ShieldedPool::new(cfg, MockOracle::binding()).unwrap();
        p.deposit(commitment("a"), U256::from(DENOM)).unwrap();
        let old = p.current_root();
        p.deposit(commitment("b"), U256::from(DENOM)).unwrap();
        p.deposit(commitment("c"), U256::from(DENOM)).unwrap();
        assert!(!p.is_known_root(&old));
        assert!(p.state().tree().is_known_root(&old));
        let req = withdraw_req(old, nullifier("n"));
        assert!(matches!(p.withdraw(&req), Err(PoolError::InvalidRoot(_))));
    }

    #[test]
    fn test_historical_roots_stay_valid() {
        let cfg = config(4).with_root_history(2);
        let mut p = ShieldedPool::new(cfg, MockOracle::binding()).unwrap();
        p.deposit(commitment("a"), U256::from(DENOM)).unwrap();
        let old = p.current_root();
        for tag in ["b", "c", "d"] {
            p.deposit(commitment(tag), U256::from(DENOM)).unwrap();
        }
        p.withdraw(&withdraw_req(old, nullifier("n"))).unwrap();
    }

    #[test]
    fn test_deposit_note_marks_insertion() {
        let mut p = pool(4);
        let mut note =
            Note::from_opening(U256::from(DENOM), [1; 32], [2; 32], ChainId::Hub);
        let idx = p.state_mut().deposit_note(&mut note).unwrap();
        assert_eq!(note.leaf_index, Some(idx));
        assert_eq!(note.merkle_root_at_insertion, Some(p.current_root()));

        let mut foreign =
            Note::from_opening(U256::from(DENOM), [3; 32], [4; 32], ChainId::Polygon);
        assert!(p.state_mut().deposit_note(&mut foreign).is_err());
    }

    #[test]
    fn test_snapshot_restore() {
        let mut p = pool(4);
        p.deposit(commitment("a"), U256::from(DENOM)).unwrap();
        p.withdraw(&withdraw_req(p.current_root(), nullifier("n"))).unwrap();
        let snap = p.state().snapshot();
        let restored = PoolState::restore(snap).unwrap();
        assert_eq!(restored.current_root(), p.current_root());
        assert!(restored.is_spent(&nullifier("n")));
        assert!(restored.has_commitment(&commitment("a")));
    }

    #[test]
    fn test_request_json_uses_hex_proof() {
        let req = withdraw_req(Root([1; 32]), nullifier("n"));
        let json = serde_json::to_value(&req).unwrap();
        assert!(json["proof"].as_str().unwrap().starts_with("0x"));
        let back: WithdrawRequest = serde_json::from_value(json).unwrap();
        assert_eq!(back, req);
    }
}
