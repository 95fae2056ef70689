//! Error types for the accountability crate.

use {solana_pubkey::Pubkey, thiserror::Error};

/// Errors raised while building, encoding or checking accountability proofs.
#[derive(Error, Debug)]
pub enum AccountabilityError {
    /// Failed to encode or decode a proof.
    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// A message is signed correctly but its content is malformed.
    #[error("garbage message: {0}")]
    Garbage(&'static str),

    /// Unknown proof type or rule identifier on the wire.
    #[error("unknown {kind} identifier: {id}")]
    UnknownIdentifier {
        /// Which enumeration failed to decode.
        kind: &'static str,
        /// The offending byte.
        id: u8,
    },

    /// No committee is known for the parent of the given height.
    #[error("no committee for parent of height {0}")]
    NoParentCommittee(u64),

    /// The subject message is too far behind the block being executed.
    #[error("proof for height {height} is stale at block {block}")]
    StaleProof { height: u64, block: u64 },

    /// The sender is not a member of the relevant committee.
    #[error("sender {0} is not a committee member")]
    NotCommitteeMember(Pubkey),

    /// A message signature failed verification.
    #[error("invalid signature from {0}")]
    InvalidSignature(Pubkey),

    /// A proof could not be split or reassembled.
    #[error("invalid chunking: {0}")]
    InvalidChunks(String),

    /// No innocence proof can be derived for this accusation.
    #[error("no innocence evidence available for rule {0}")]
    NoInnocenceEvidence(crate::proof::Rule),
}

/// Convenience result type for accountability operations.
pub type Result<T> = std::result::Result<T, AccountabilityError>;
