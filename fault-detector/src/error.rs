//! Error types for the fault detector.

use {solana_pubkey::Pubkey, thiserror::Error, trv1_accountability::AccountabilityError};

/// Errors raised by the fault detector loops and its collaborators.
#[derive(Error, Debug)]
pub enum FaultDetectorError {
    /// Proof construction, encoding or checking failed.
    #[error(transparent)]
    Accountability(#[from] AccountabilityError),

    /// Failed to serialize a transaction or wire message.
    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// A loop could not be spawned.
    #[error("failed to spawn thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// The detector is already running.
    #[error("fault detector already started")]
    AlreadyStarted,

    /// An internal channel was closed.
    #[error("channel closed")]
    ChannelClosed,

    /// An outgoing payload exceeds its size limit.
    #[error("payload too large: {size} bytes (max {max} bytes)")]
    PayloadTooLarge {
        /// Actual size.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// No chunk size between the default and the floor fits the chain limits.
    #[error("no chunk size fits proof of {0} bytes")]
    NoFittingChunkSize(usize),

    /// The transaction pool, chain or peer layer reported a failure.
    #[error("{0}")]
    Collaborator(String),
}

/// Reasons to reject an off-chain message. Every variant means the caller
/// should disconnect the peer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OffChainError {
    #[error("accusation rate exceeded by {0}")]
    RateLimitExceeded(Pubkey),

    #[error("duplicate off-chain message from {0}")]
    Duplicate(Pubkey),

    #[error("garbage off-chain message: {0}")]
    Garbage(String),

    #[error("no parent committee for height {0}")]
    NoParentHeader(u64),

    #[error("{0} is not a validator")]
    NotValidator(Pubkey),

    #[error("invalid signature in off-chain proof")]
    InvalidSignature,

    #[error("invalid accusation: {0}")]
    InvalidAccusation(&'static str),

    #[error("invalid innocence proof: {0}")]
    InvalidInnocence(&'static str),

    #[error("unexpected proof type")]
    UnexpectedProofType,
}

/// Convenience result type for fault detector operations.
pub type Result<T> = std::result::Result<T, FaultDetectorError>;
