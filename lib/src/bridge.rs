//! Cross-chain note tagging.
//!
//! The relay and finality logic of a bridge lives elsewhere. This ledger only
//! records which notes are in flight between which chains and moves each one
//! through `Pending -> Deposited -> Claimed` exactly once. Claims need
//! approvals from a threshold of distinct guardians.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use alloy_primitives::{Address, U256};
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::chain::ChainId;
use crate::config::BridgeConfig;
use crate::error::{PoolError, Result};
use crate::note::Note;
use crate::types::{unix_now, Commitment};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgeStatus {
    /// Locked on the source chain, not yet seen by the destination.
    Pending,
    /// Relayed to the destination pool.
    Deposited,
    /// Released on the destination chain. Terminal.
    Claimed,
}

impl fmt::Display for BridgeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BridgeStatus::Pending => "pending",
            BridgeStatus::Deposited => "deposited",
            BridgeStatus::Claimed => "claimed",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeTransfer {
    pub commitment: Commitment,
    pub source: ChainId,
    pub destination: ChainId,
    pub amount: U256,
    pub status: BridgeStatus,
    pub nonce: u64,
    pub created_at: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeStats {
    pub total_deposited: U256,
    pub total_claimed: U256,
    pub deposit_nonce: u64,
    pub guardians: usize,
    pub paused: bool,
}

/// Create a note tagged for `destination`, so proofs for it are built
/// against that chain's pool.
pub fn bridged_note<R: RngCore + CryptoRng>(
    rng: &mut R,
    amount: U256,
    destination: ChainId,
) -> Result<Note> {
    if !destination.supports_shielding() {
        return Err(PoolError::ShieldingUnsupported(destination.to_string()));
    }
    Note::random(rng, amount, destination)
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Bridge {
    hub: ChainId,
    config: BridgeConfig,
    guardians: BTreeSet<Address>,
    paused: bool,
    transfers: BTreeMap<Commitment, BridgeTransfer>,
    deposit_nonce: u64,
    total_deposited: U256,
    total_claimed: U256,
}

impl Bridge {
    pub fn new(hub: ChainId, config: BridgeConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            hub,
            config,
            guardians: BTreeSet::new(),
            paused: false,
            transfers: BTreeMap::new(),
            deposit_nonce: 0,
            total_deposited: U256::ZERO,
            total_claimed: U256::ZERO,
        })
    }

    pub fn hub(&self) -> ChainId {
        self.hub
    }

    pub fn threshold(&self) -> usize {
        self.config.guardian_threshold
    }

    pub fn is_guardian(&self, who: &Address) -> bool {
        self.guardians.contains(who)
    }

    pub fn guardians(&self) -> impl Iterator<Item = &Address> {
        self.guardians.iter()
    }

    pub fn add_guardian(&mut self, guardian: Address) -> Result<()> {
        if !self.guardians.insert(guardian) {
            return Err(PoolError::GuardianExists);
        }
        info!(%guardian, count = self.guardians.len(), "guardian added");
        Ok(())
    }

    /// The set may not shrink below the approval threshold.
    pub fn remove_guardian(&mut self, guardian: &Address) -> Result<()> {
        if !self.guardians.contains(guardian) {
            return Err(PoolError::UnknownGuardian);
        }
        if self.guardians.len() <= self.config.guardian_threshold {
            return Err(PoolError::InvalidThreshold(format!(
                "removing would leave {} guardians for threshold {}",
                self.guardians.len() - 1,
                self.config.guardian_threshold
            )));
        }
        self.guardians.remove(guardian);
        info!(%guardian, count = self.guardians.len(), "guardian removed");
        Ok(())
    }

    pub fn set_threshold(&mut self, threshold: usize) -> Result<()> {
        if threshold == 0 || threshold > self.guardians.len() {
            return Err(PoolError::InvalidThreshold(format!(
                "{threshold} with {} guardians",
                self.guardians.len()
            )));
        }
        self.config.guardian_threshold = threshold;
        info!(threshold, "guardian threshold updated");
        Ok(())
    }

    pub fn pause(&mut self) {
        self.paused = true;
        warn!("bridge paused");
    }

    pub fn unpause(&mut self) {
        self.paused = false;
        info!("bridge unpaused");
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Register `note` as leaving `source` for the chain it is tagged with.
    /// Returns the deposit nonce.
    pub fn open(&mut self, note: &Note, source: ChainId) -> Result<u64> {
        if self.paused {
            return Err(PoolError::BridgePaused);
        }
        note.check_commitment()?;

        let destination = note.chain_tag;
        if source == destination {
            return Err(PoolError::BridgingUnsupported(format!("{source} to itself")));
        }
        if source != self.hub && destination != self.hub {
            return Err(PoolError::BridgingUnsupported(format!(
                "{source} to {destination} does not touch the hub"
            )));
        }
        for chain in [source, destination] {
            if !chain.supports_bridging() {
                return Err(PoolError::BridgingUnsupported(chain.to_string()));
            }
        }
        if !destination.supports_shielding() {
            return Err(PoolError::ShieldingUnsupported(destination.to_string()));
        }
        if note.amount < self.config.min_deposit || note.amount > self.config.max_deposit {
            return Err(PoolError::AmountOutOfBounds {
                amount: note.amount,
                min: self.config.min_deposit,
                max: self.config.max_deposit,
            });
        }
        if self.transfers.contains_key(&note.commitment) {
            return Err(PoolError::DuplicateCommitment(note.commitment));
        }

        let nonce = self.deposit_nonce;
        self.deposit_nonce += 1;
        self.total_deposited += note.amount;
        self.transfers.insert(
            note.commitment,
            BridgeTransfer {
                commitment: note.commitment,
                source,
                destination,
                amount: note.amount,
                status: BridgeStatus::Pending,
                nonce,
                created_at: unix_now(),
            },
        );
        info!(
            commitment = %note.commitment,
            %source,
            %destination,
            nonce,
            "bridge transfer opened"
        );
        Ok(nonce)
    }

    pub fn mark_deposited(&mut self, commitment: &Commitment) -> Result<()> {
        let transfer = self
            .transfers
            .get_mut(commitment)
            .ok_or(PoolError::UnknownTransfer(*commitment))?;
        match transfer.status {
            BridgeStatus::Pending => {
                transfer.status = BridgeStatus::Deposited;
                info!(%commitment, "bridge transfer deposited");
                Ok(())
            }
            BridgeStatus::Claimed => Err(PoolError::AlreadyClaimed(*commitment)),
            from => Err(PoolError::InvalidTransition {
                from: from.to_string(),
                to: BridgeStatus::Deposited.to_string(),
            }),
        }
    }

    /// Release a deposited transfer. Replays fail with `AlreadyClaimed` and
    /// change nothing.
    pub fn claim(&mut self, commitment: &Commitment, approvals: &[Address]) -> Result<U256> {
        if self.paused {
            return Err(PoolError::BridgePaused);
        }
        let transfer = self
            .transfers
            .get(commitment)
            .ok_or(PoolError::UnknownTransfer(*commitment))?;
        match transfer.status {
            BridgeStatus::Deposited => {}
            BridgeStatus::Claimed => {
                warn!(%commitment, "claim replay rejected");
                return Err(PoolError::AlreadyClaimed(*commitment));
            }
            from => {
                return Err(PoolError::InvalidTransition {
                    from: from.to_string(),
                    to: BridgeStatus::Claimed.to_string(),
                })
            }
        }

        let mut signers = BTreeSet::new();
        for approver in approvals {
            if !self.guardians.contains(approver) {
                return Err(PoolError::UnknownGuardian);
            }
            signers.insert(*approver);
        }
        let required = self.config.guardian_threshold;
        if signers.len() < required {
            return Err(PoolError::InsufficientApprovals {
                got: signers.len(),
                required,
            });
        }

        let amount = transfer.amount;
        if let Some(transfer) = self.transfers.get_mut(commitment) {
            transfer.status = BridgeStatus::Claimed;
        }
        self.total_claimed += amount;
        info!(%commitment, %amount, approvals = signers.len(), "bridge transfer claimed");
        Ok(amount)
    }

    pub fn status(&self, commitment: &Commitment) -> Option<BridgeStatus> {
        self.transfers.get(commitment).map(|t| t.status)
    }

    pub fn transfer(&self, commitment: &Commitment) -> Option<&BridgeTransfer> {
        self.transfers.get(commitment)
    }

    pub fn transfer_by_nonce(&self, nonce: u64) -> Option<&BridgeTransfer> {
        self.transfers.values().find(|t| t.nonce == nonce)
    }

    pub fn stats(&self) -> BridgeStats {
        BridgeStats {
            total_deposited: self.total_deposited,
            total_claimed: self.total_claimed,
            deposit_nonce: self.deposit_nonce,
            guardians: self.guardians.len(),
            paused: self.paused,
        }
    }
}
