//! Shielded notes.
//!
//!   commitment = keccak256(DS_COMMITMENT || secret || blinding || amount_be32)
//!   nullifier  = keccak256(DS_NULLIFIER || secret)                 (unbound)
//!   nullifier  = keccak256(DS_NULLIFIER || secret || index_be32)   (index-bound)
//!
//! Export formats carry a version tag and always re-derive the commitment on
//! import; a stored commitment is never trusted.

use alloy_primitives::U256;
use rand::rngs::OsRng;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};

use crate::chain::ChainId;
use crate::error::{PoolError, Result};
use crate::hash::{derive, DS_COMMITMENT, DS_NULLIFIER};
use crate::types::{unix_now, Bytes32, Commitment, Nullifier, Root};

/// Current note export format.
pub const NOTE_FORMAT_VERSION: u8 = 1;

/// Prefix of the compact text encoding.
pub const NOTE_STRING_PREFIX: &str = "cashio-note-v1-";

const FLAG_ROOT: u8 = 0b01;
const FLAG_LEAF: u8 = 0b10;
const FIXED_LEN: usize = 1 + 32 * 4 + 8 + 8 + 1;

/// A private value record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Note {
    /// Value in the smallest currency unit.
    pub amount: U256,
    pub secret: Bytes32,
    pub blinding: Bytes32,
    pub commitment: Commitment,
    /// Pool context the note belongs to.
    pub chain_tag: ChainId,
    /// Informational only; not part of any derivation.
    pub created_at: u64,
    /// Root observed right after this note's commitment was inserted.
    pub merkle_root_at_insertion: Option<Root>,
    /// Leaf position once inserted.
    pub leaf_index: Option<u64>,
}

/// Derive a commitment from a note opening.
pub fn commitment_of(secret: &Bytes32, blinding: &Bytes32, amount: U256) -> Commitment {
    let amount_be = amount.to_be_bytes::<32>();
    Commitment(derive(DS_COMMITMENT, &[secret, blinding, &amount_be]))
}

/// Nullifier of a secret, optionally bound to the leaf it was inserted at.
pub fn nullifier_of_secret(secret: &Bytes32, leaf_index: Option<u64>) -> Nullifier {
    match leaf_index {
        Some(index) => {
            let index_be = U256::from(index).to_be_bytes::<32>();
            Nullifier(derive(DS_NULLIFIER, &[secret, &index_be]))
        }
        None => Nullifier(derive(DS_NULLIFIER, &[secret])),
    }
}

/// Same as [`Note::nullifier`], as a free function.
pub fn nullifier_of(note: &Note, leaf_index: Option<u64>) -> Nullifier {
    note.nullifier(leaf_index)
}

/// Draw a fresh note from the operating system's secure random source.
pub fn create_note(amount: U256, chain_tag: ChainId) -> Result<Note> {
    Note::random(&mut OsRng, amount, chain_tag)
}

impl Note {
    /// Build a note from an explicit opening.
    pub fn from_opening(
        amount: U256,
        secret: Bytes32,
        blinding: Bytes32,
        chain_tag: ChainId,
    ) -> Self {
        Self {
            amount,
            secret,
            blinding,
            commitment: commitment_of(&secret, &blinding, amount),
            chain_tag,
            created_at: unix_now(),
            merkle_root_at_insertion: None,
            leaf_index: None,
        }
    }

    /// Draw `secret` and `blinding` independently from `rng`. A failing source
    /// is reported, never replaced.
    pub fn random<R: RngCore + CryptoRng>(
        rng: &mut R,
        amount: U256,
        chain_tag: ChainId,
    ) -> Result<Self> {
        let mut secret = [0u8; 32];
        let mut blinding = [0u8; 32];
        rng.try_fill_bytes(&mut secret)
            .map_err(|e| PoolError::RandomSourceUnavailable(e.to_string()))?;
        rng.try_fill_bytes(&mut blinding)
            .map_err(|e| PoolError::RandomSourceUnavailable(e.to_string()))?;
        Ok(Self::from_opening(amount, secret, blinding, chain_tag))
    }

    pub fn derive_commitment(&self) -> Commitment {
        commitment_of(&self.secret, &self.blinding, self.amount)
    }

    /// Check the stored commitment against the opening.
    pub fn check_commitment(&self) -> Result<()> {
        let derived = self.derive_commitment();
        if derived != self.commitment {
            return Err(PoolError::CommitmentMismatch {
                stored: self.commitment,
                derived,
            });
        }
        Ok(())
    }

    pub fn nullifier(&self, leaf_index: Option<u64>) -> Nullifier {
        nullifier_of_secret(&self.secret, leaf_index)
    }

    /// Nullifier bound to the recorded leaf, if the note has been inserted.
    pub fn spend_nullifier(&self) -> Option<Nullifier> {
        self.leaf_index.map(|i| self.nullifier(Some(i)))
    }

    /// Record where the commitment landed in the tree.
    pub fn mark_inserted(&mut self, leaf_index: u64, root: Root) {
        self.leaf_index = Some(leaf_index);
        self.merkle_root_at_insertion = Some(root);
    }

    // =========================================================================
    //                              JSON EXPORT
    // =========================================================================

    pub fn to_file(&self) -> NoteFile {
        NoteFile {
            version: NOTE_FORMAT_VERSION,
            amount: self.amount.to_string(),
            secret: format!("0x{}", hex::encode(self.secret)),
            blinding: format!("0x{}", hex::encode(self.blinding)),
            commitment: self.commitment,
            chain_tag: self.chain_tag,
            created_at: self.created_at,
            merkle_root_at_insertion: self.merkle_root_at_insertion,
            leaf_index: self.leaf_index,
        }
    }

    pub fn from_file(file: NoteFile) -> Result<Self> {
        if file.version != NOTE_FORMAT_VERSION {
            return Err(PoolError::UnsupportedNoteVersion(file.version));
        }
        let amount = U256::from_str_radix(&file.amount, 10)
            .map_err(|e| PoolError::MalformedNote(format!("amount: {e}")))?;
        let note = Self {
            amount,
            secret: crate::types::decode_hex_32(&file.secret)?,
            blinding: crate::types::decode_hex_32(&file.blinding)?,
            commitment: file.commitment,
            chain_tag: file.chain_tag,
            created_at: file.created_at,
            merkle_root_at_insertion: file.merkle_root_at_insertion,
            leaf_index: file.leaf_index,
        };
        note.check_commitment()?;
        Ok(note)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.to_file())?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let file: NoteFile = serde_json::from_str(json)
            .map_err(|e| PoolError::MalformedNote(e.to_string()))?;
        Self::from_file(file)
    }

    // =========================================================================
    //                             BINARY EXPORT
    // =========================================================================

    /// Fixed-width binary layout:
    /// version(1) amount(32) secret(32) blinding(32) commitment(32)
    /// chain(8) created_at(8) flags(1) [root(32)] [leaf_index(8)]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(FIXED_LEN + 40);
        out.push(NOTE_FORMAT_VERSION);
        out.extend_from_slice(&self.amount.to_be_bytes::<32>());
        out.extend_from_slice(&self.secret);
        out.extend_from_slice(&self.blinding);
        out.extend_from_slice(self.commitment.as_bytes());
        out.extend_from_slice(&self.chain_tag.id().to_be_bytes());
        out.extend_from_slice(&self.created_at.to_be_bytes());

        let mut flags = 0u8;
        if self.merkle_root_at_insertion.is_some() {
            flags |= FLAG_ROOT;
        }
        if self.leaf_index.is_some() {
            flags |= FLAG_LEAF;
        }
        out.push(flags);
        if let Some(root) = self.merkle_root_at_insertion {
            out.extend_from_slice(root.as_bytes());
        }
        if let Some(index) = self.leaf_index {
            out.extend_from_slice(&index.to_be_bytes());
        }
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut reader = Reader { bytes, pos: 0 };
        let version = reader.u8()?;
        if version != NOTE_FORMAT_VERSION {
            return Err(PoolError::UnsupportedNoteVersion(version));
        }
        let amount = U256::from_be_bytes(reader.word()?);
        let secret = reader.word()?;
        let blinding = reader.word()?;
        let commitment = Commitment(reader.word()?);
        let chain_tag = ChainId::from_id(reader.u64()?)?;
        let created_at = reader.u64()?;
        let flags = reader.u8()?;
        if flags & !(FLAG_ROOT | FLAG_LEAF) != 0 {
            return Err(PoolError::MalformedNote(format!("unknown flags {flags:#04x}")));
        }
        let merkle_root_at_insertion = if flags & FLAG_ROOT != 0 {
            Some(Root(reader.word()?))
        } else {
            None
        };
        let leaf_index = if flags & FLAG_LEAF != 0 {
            Some(reader.u64()?)
        } else {
            None
        };
        if reader.pos != bytes.len() {
            return Err(PoolError::MalformedNote("trailing bytes".into()));
        }

        let note = Self {
            amount,
            secret,
            blinding,
            commitment,
            chain_tag,
            created_at,
            merkle_root_at_insertion,
            leaf_index,
        };
        note.check_commitment()?;
        Ok(note)
    }

    /// `cashio-note-v1-<hex>` text form for copy/paste backups.
    pub fn to_note_string(&self) -> String {
        format!("{NOTE_STRING_PREFIX}{}", hex::encode(self.to_bytes()))
    }

    pub fn from_note_string(s: &str) -> Result<Self> {
        let body = s
            .trim()
            .strip_prefix(NOTE_STRING_PREFIX)
            .ok_or_else(|| PoolError::MalformedNote("missing note prefix".into()))?;
        let bytes =
            hex::decode(body).map_err(|e| PoolError::MalformedNote(format!("invalid hex: {e}")))?;
        Self::from_bytes(&bytes)
    }
}

/// Versioned JSON form of a note.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteFile {
    pub version: u8,
    /// Decimal string; JSON numbers cannot hold 256 bits.
    pub amount: String,
    pub secret: String,
    pub blinding: String,
    pub commitment: Commitment,
    pub chain_tag: ChainId,
    pub created_at: u64,
    #[serde(default)]
    pub merkle_root_at_insertion: Option<Root>,
    #[serde(default)]
    pub leaf_index: Option<u64>,
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl Reader<'_> {
    fn take(&mut self, n: usize) -> Result<&[u8]> {
        let end = self.pos + n;
        let slice = self
            .bytes
            .get(self.pos..end)
            .ok_or_else(|| PoolError::MalformedNote("truncated note".into()))?;
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u64(&mut self) -> Result<u64> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.take(8)?);
        Ok(u64::from_be_bytes(buf))
    }

    fn word(&mut self) -> Result<Bytes32> {
        let mut buf = [0u8; 32];
        buf.copy_from_slice(self.take(32)?);
        Ok(buf)
    }
}
