//! Off-chain accountability wire message.
//!
//! Frame format: `[len: u32-le][bincode(OffChainMessage)]`.

use {
    crate::error::{FaultDetectorError, Result},
    serde::{Deserialize, Serialize},
    solana_hash::Hash,
    solana_sha256_hasher::hash,
    trv1_accountability::AccountabilityProof,
};

/// Size of the frame length prefix.
pub const FRAME_HEADER_LEN: usize = 4;

/// A proof exchanged directly between validators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OffChainMessage {
    /// bincode-encoded [`AccountabilityProof`].
    pub payload: Vec<u8>,
}

impl OffChainMessage {
    pub fn from_proof(proof: &AccountabilityProof) -> Result<Self> {
        Ok(Self {
            payload: proof.encode()?,
        })
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(FaultDetectorError::Serialization)
    }

    pub fn deserialize(data: &[u8]) -> Result<Self> {
        bincode::deserialize(data).map_err(FaultDetectorError::Serialization)
    }

    /// Serialize with a 4-byte little-endian length prefix.
    pub fn serialize_framed(&self, max_size: usize) -> Result<Vec<u8>> {
        let payload = self.serialize()?;
        let len = u32::try_from(payload.len())
            .ok()
            .filter(|_| payload.len() <= max_size)
            .ok_or(FaultDetectorError::PayloadTooLarge {
                size: payload.len(),
                max: max_size,
            })?;
        let mut buf = Vec::with_capacity(FRAME_HEADER_LEN.saturating_add(payload.len()));
        buf.extend_from_slice(&len.to_le_bytes());
        buf.extend_from_slice(&payload);
        Ok(buf)
    }

    /// Read the length prefix from a 4-byte buffer.
    pub fn read_frame_len(header: &[u8; FRAME_HEADER_LEN]) -> usize {
        u32::from_le_bytes(*header) as usize
    }

    /// Digest used for duplicate suppression.
    pub fn digest(&self) -> Hash {
        hash(&self.payload)
    }
}
