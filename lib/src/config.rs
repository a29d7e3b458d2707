use alloy_primitives::U256;
use serde::{Deserialize, Serialize};

use crate::chain::ChainId;
use crate::error::{PoolError, Result};
use crate::merkle::MAX_DEPTH;

pub const DEFAULT_TREE_DEPTH: usize = 20;
pub const DEFAULT_ROOT_HISTORY: usize = 100;
/// 1 unit at 18 decimals.
pub const DEFAULT_DENOMINATION: u64 = 1_000_000_000_000_000_000;

/// Which roots a withdrawal or transfer may reference.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RootValidity {
    /// Every root the tree has ever produced. Old proofs never go stale.
    #[default]
    AllHistorical,
    /// Only the last `root_history_size` roots.
    RecentWindow,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    pub depth: usize,
    pub root_history_size: usize,
    pub denomination: U256,
    #[serde(default)]
    pub root_validity: RootValidity,
    #[serde(default)]
    pub hub_chain: ChainId,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            depth: DEFAULT_TREE_DEPTH,
            root_history_size: DEFAULT_ROOT_HISTORY,
            denomination: U256::from(DEFAULT_DENOMINATION),
            root_validity: RootValidity::default(),
            hub_chain: ChainId::Hub,
        }
    }
}

impl PoolConfig {
    pub fn with_depth(mut self, depth: usize) -> Self {
        self.depth = depth;
        self
    }

    pub fn with_denomination(mut self, denomination: U256) -> Self {
        self.denomination = denomination;
        self
    }

    pub fn with_root_validity(mut self, root_validity: RootValidity) -> Self {
        self.root_validity = root_validity;
        self
    }

    pub fn with_root_history(mut self, size: usize) -> Self {
        self.root_history_size = size;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.depth == 0 || self.depth > MAX_DEPTH {
            return Err(PoolError::InvalidConfig(format!(
                "depth {} outside 1..={MAX_DEPTH}",
                self.depth
            )));
        }
        if self.root_history_size == 0 {
            return Err(PoolError::InvalidConfig("root history size is zero".into()));
        }
        if self.denomination.is_zero() {
            return Err(PoolError::InvalidConfig("denomination is zero".into()));
        }
        if !self.hub_chain.supports_shielding() {
            return Err(PoolError::ShieldingUnsupported(self.hub_chain.to_string()));
        }
        Ok(())
    }
}

/// Limits of the bridge ledger.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeConfig {
    pub min_deposit: U256,
    pub max_deposit: U256,
    /// Distinct guardian approvals needed to claim.
    pub guardian_threshold: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            // 0.001 and 1000 units at 18 decimals
            min_deposit: U256::from(1_000_000_000_000_000u64),
            max_deposit: U256::from(1_000u64) * U256::from(DEFAULT_DENOMINATION),
            guardian_threshold: 1,
        }
    }
}

impl BridgeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.min_deposit > self.max_deposit {
            return Err(PoolError::InvalidConfig(format!(
                "min deposit {} above max deposit {}",
                self.min_deposit, self.max_deposit
            )));
        }
        if self.guardian_threshold == 0 {
            return Err(PoolError::InvalidThreshold("threshold is zero".into()));
        }
        Ok(())
    }
}
