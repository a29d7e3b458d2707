//! 32-byte protocol values.
//!
//! Commitments, nullifiers and roots are all bare 32-byte words on the wire;
//! the newtypes only keep them from being mixed up. Serde renders them as
//! `0x`-prefixed hex, matching how the wallet files carry them.

use core::fmt;
use core::str::FromStr;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::error::PoolError;

pub type Bytes32 = [u8; 32];

macro_rules! bytes32_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
        pub struct $name(pub Bytes32);

        impl $name {
            pub const ZERO: Self = Self([0u8; 32]);

            pub fn to_bytes(&self) -> Bytes32 {
                self.0
            }

            pub fn from_bytes(bytes: Bytes32) -> Self {
                Self(bytes)
            }

            pub fn as_bytes(&self) -> &Bytes32 {
                &self.0
            }

            pub fn is_zero(&self) -> bool {
                self.0 == [0u8; 32]
            }
        }

        impl From<Bytes32> for $name {
            fn from(bytes: Bytes32) -> Self {
                Self(bytes)
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "0x{}", hex::encode(self.0))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}(0x{}..)", stringify!($name), hex::encode(&self.0[..6]))
            }
        }

        impl FromStr for $name {
            type Err = PoolError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                decode_hex_32(s).map(Self)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_string())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(de::Error::custom)
            }
        }
    };
}

bytes32_newtype!(
    /// Hash binding a note's hidden fields; the tree's leaf value.
    Commitment
);
bytes32_newtype!(
    /// One-time tag revealed when a note is spent.
    Nullifier
);
bytes32_newtype!(
    /// Merkle root of the commitment tree at some point in time.
    Root
);

/// Decode a 32-byte hex string, with or without `0x`.
pub fn decode_hex_32(s: &str) -> Result<Bytes32, PoolError> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(s).map_err(|e| PoolError::MalformedNote(format!("invalid hex: {e}")))?;
    if bytes.len() != 32 {
        return Err(PoolError::MalformedNote(format!(
            "expected 32 bytes, got {}",
            bytes.len()
        )));
    }
    let mut arr = [0u8; 32];
    arr.copy_from_slice(&bytes);
    Ok(arr)
}

/// Seconds since the unix epoch, saturating to zero if the clock is before it.
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_serde_roundtrip() {
        let root = Root([0xAB; 32]);
        let json = serde_json::to_string(&root).unwrap();
        assert_eq!(json, format!("\"0x{}\"", "ab".repeat(32)));
        let back: Root = serde_json::from_str(&json).unwrap();
        assert_eq!(back, root);
    }

    #[test]
    fn test_parse_without_prefix() {
        let n: Nullifier = "01".repeat(32).parse().unwrap();
        assert_eq!(n, Nullifier([1u8; 32]));
    }

    #[test]
    fn test_rejects_wrong_length() {
        assert!("0xdead".parse::<Commitment>().is_err());
        assert!("zz".repeat(32).parse::<Commitment>().is_err());
    }
}
