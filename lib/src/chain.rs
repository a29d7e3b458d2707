//! Chain identities.
//!
//! A closed table: adding a chain means adding a variant, and every match on
//! shielding/bridging support has to account for it.

use core::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::PoolError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChainId {
    /// The hub subnet that hosts the shielded pool.
    Hub,
    Ethereum,
    Polygon,
    Arbitrum,
    Optimism,
    Base,
    BnbChain,
    Avalanche,
    Solana,
    Near,
}

impl ChainId {
    pub const ALL: [ChainId; 10] = [
        ChainId::Hub,
        ChainId::Ethereum,
        ChainId::Polygon,
        ChainId::Arbitrum,
        ChainId::Optimism,
        ChainId::Base,
        ChainId::BnbChain,
        ChainId::Avalanche,
        ChainId::Solana,
        ChainId::Near,
    ];

    /// Numeric tag carried in notes. EVM chains use their EIP-155 id; the
    /// non-EVM chains use fixed ids outside the EVM range in use.
    pub fn id(self) -> u64 {
        match self {
            ChainId::Hub => 999_888_777,
            ChainId::Ethereum => 1,
            ChainId::Polygon => 137,
            ChainId::Arbitrum => 42_161,
            ChainId::Optimism => 10,
            ChainId::Base => 8_453,
            ChainId::BnbChain => 56,
            ChainId::Avalanche => 43_114,
            ChainId::Solana => 1_399_811_149,
            ChainId::Near => 397,
        }
    }

    pub fn from_id(id: u64) -> Result<Self, PoolError> {
        Self::ALL
            .iter()
            .copied()
            .find(|c| c.id() == id)
            .ok_or(PoolError::UnknownChain(id))
    }

    pub fn name(self) -> &'static str {
        match self {
            ChainId::Hub => "hub",
            ChainId::Ethereum => "ethereum",
            ChainId::Polygon => "polygon",
            ChainId::Arbitrum => "arbitrum",
            ChainId::Optimism => "optimism",
            ChainId::Base => "base",
            ChainId::BnbChain => "bnb",
            ChainId::Avalanche => "avalanche",
            ChainId::Solana => "solana",
            ChainId::Near => "near",
        }
    }

    /// Chains whose pool context can hold shielded notes.
    pub fn supports_shielding(self) -> bool {
        match self {
            ChainId::Hub => true,
            ChainId::Ethereum
            | ChainId::Polygon
            | ChainId::Arbitrum
            | ChainId::Optimism
            | ChainId::Base
            | ChainId::BnbChain
            | ChainId::Avalanche => true,
            ChainId::Solana | ChainId::Near => false,
        }
    }

    /// Chains with a bridge into the hub.
    pub fn supports_bridging(self) -> bool {
        match self {
            ChainId::Hub => true,
            ChainId::Ethereum
            | ChainId::Polygon
            | ChainId::Arbitrum
            | ChainId::Optimism
            | ChainId::Base
            | ChainId::Avalanche
            | ChainId::Solana
            | ChainId::Near => true,
            ChainId::BnbChain => false,
        }
    }
}

impl Default for ChainId {
    fn default() -> Self {
        ChainId::Hub
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), self.id())
    }
}

impl core::str::FromStr for ChainId {
    type Err = PoolError;

    /// Accepts either the chain name or its numeric id.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(id) = s.parse::<u64>() {
            return Self::from_id(id);
        }
        Self::ALL
            .iter()
            .copied()
            .find(|c| c.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| PoolError::MalformedNote(format!("unknown chain name {s}")))
    }
}

impl Serialize for ChainId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.id())
    }
}

impl<'de> Deserialize<'de> for ChainId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let id = u64::deserialize(deserializer)?;
        ChainId::from_id(id).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique_and_roundtrip() {
        for chain in ChainId::ALL {
            assert_eq!(ChainId::from_id(chain.id()).unwrap(), chain);
            assert_eq!(chain.name().parse::<ChainId>().unwrap(), chain);
        }
    }

    #[test]
    fn test_unknown_id() {
        assert!(matches!(ChainId::from_id(12345), Err(PoolError::UnknownChain(12345))));
    }

    #[test]
    fn test_serde_as_number() {
        assert_eq!(serde_json::to_string(&ChainId::Polygon).unwrap(), "137");
        let c: ChainId = serde_json::from_str("999888777").unwrap();
        assert_eq!(c, ChainId::Hub);
    }

    #[test]
    fn test_hub_supports_everything() {
        assert!(ChainId::Hub.supports_shielding());
        assert!(ChainId::Hub.supports_bridging());
        assert!(!ChainId::Solana.supports_shielding());
    }
}
