//! Consensus messages as seen by the accountability engine.
//!
//! Defines the signed message variants (Proposal, LiteProposal, Prevote,
//! Precommit), the proposed block they commit to, and the canonical
//! signing/hashing rules shared by the rule engine and the verifiers.

use {
    crate::error::{AccountabilityError, Result},
    serde::{Deserialize, Serialize},
    solana_hash::Hash,
    solana_keypair::Keypair,
    solana_pubkey::Pubkey,
    solana_signature::Signature,
    solana_signer::Signer,
    std::fmt,
};

const PROPOSAL_TAG: &[u8] = b"trv1-accountability/proposal";
const PREVOTE_TAG: &[u8] = b"trv1-accountability/prevote";
const PRECOMMIT_TAG: &[u8] = b"trv1-accountability/precommit";

// ---------------------------------------------------------------------------
// Message codes
// ---------------------------------------------------------------------------

/// Message type tag. Part of the equivocation slot key.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum MessageCode {
    Proposal,
    LiteProposal,
    Prevote,
    Precommit,
}

impl MessageCode {
    /// Full and lite proposals occupy the same store slot.
    pub fn slot_code(self) -> Self {
        match self {
            MessageCode::LiteProposal => MessageCode::Proposal,
            code => code,
        }
    }

    pub fn is_proposal(self) -> bool {
        self.slot_code() == MessageCode::Proposal
    }
}

impl fmt::Display for MessageCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageCode::Proposal => write!(f, "Proposal"),
            MessageCode::LiteProposal => write!(f, "LiteProposal"),
            MessageCode::Prevote => write!(f, "Prevote"),
            MessageCode::Precommit => write!(f, "Precommit"),
        }
    }
}

// ---------------------------------------------------------------------------
// Block types
// ---------------------------------------------------------------------------

/// A block proposed by a leader. Only its hash matters for accountability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposedBlock {
    /// Hash of the parent (previous committed) block.
    pub parent_hash: Hash,
    /// Block height.
    pub height: u64,
    /// Unix timestamp in milliseconds when the block was proposed.
    pub timestamp: i64,
    /// Merkle root of the post-execution state.
    pub state_root: Hash,
    /// Public key of the proposer.
    pub proposer: Pubkey,
    /// Opaque transaction payload.
    pub payload: Vec<u8>,
}

impl ProposedBlock {
    /// Deterministic block hash, the "value" proposals and votes commit to.
    pub fn hash(&self) -> Hash {
        solana_sha256_hasher::hashv(&[
            self.parent_hash.as_ref(),
            &self.height.to_le_bytes(),
            &self.timestamp.to_le_bytes(),
            self.state_root.as_ref(),
            self.proposer.as_ref(),
            &self.payload,
        ])
    }
}

/// Marks a proposal as invalid inside a nil prevote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlaggedProposal {
    pub proposer: Pubkey,
    pub value: Hash,
}

// ---------------------------------------------------------------------------
// Consensus messages
// ---------------------------------------------------------------------------

/// A signed consensus message.
///
/// `valid_round == None` marks a new proposal; `value == None` marks a nil
/// vote. A full `Proposal` signs exactly the body of its `LiteProposal`, so
/// [`ConsensusMessage::to_lite`] preserves the signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsensusMessage {
    Proposal {
        height: u64,
        round: u32,
        valid_round: Option<u32>,
        block: ProposedBlock,
        proposer: Pubkey,
        signature: Signature,
    },

    /// A proposal stripped of its block, as embedded in proofs.
    LiteProposal {
        height: u64,
        round: u32,
        valid_round: Option<u32>,
        value: Hash,
        proposer: Pubkey,
        signature: Signature,
    },

    /// A prevote. A nil prevote may carry a flag against a proposal.
    Prevote {
        height: u64,
        round: u32,
        value: Option<Hash>,
        flagged: Option<FlaggedProposal>,
        voter: Pubkey,
        signature: Signature,
    },

    Precommit {
        height: u64,
        round: u32,
        value: Option<Hash>,
        voter: Pubkey,
        signature: Signature,
    },
}

impl ConsensusMessage {
    /// Build and sign a proposal.
    pub fn new_proposal(
        keypair: &Keypair,
        height: u64,
        round: u32,
        valid_round: Option<u32>,
        block: ProposedBlock,
    ) -> Self {
        let mut msg = ConsensusMessage::Proposal {
            height,
            round,
            valid_round,
            block,
            proposer: keypair.pubkey(),
            signature: Signature::default(),
        };
        msg.sign(keypair);
        msg
    }

    /// Build and sign a prevote.
    pub fn new_prevote(
        keypair: &Keypair,
        height: u64,
        round: u32,
        value: Option<Hash>,
    ) -> Self {
        let mut msg = ConsensusMessage::Prevote {
            height,
            round,
            value,
            flagged: None,
            voter: keypair.pubkey(),
            signature: Signature::default(),
        };
        msg.sign(keypair);
        msg
    }

    /// Build and sign a nil prevote flagging `flagged` as an invalid proposal.
    pub fn new_flagged_prevote(
        keypair: &Keypair,
        height: u64,
        round: u32,
        flagged: FlaggedProposal,
    ) -> Self {
        let mut msg = ConsensusMessage::Prevote {
            height,
            round,
            value: None,
            flagged: Some(flagged),
            voter: keypair.pubkey(),
            signature: Signature::default(),
        };
        msg.sign(keypair);
        msg
    }

    /// Build and sign a precommit.
    pub fn new_precommit(
        keypair: &Keypair,
        height: u64,
        round: u32,
        value: Option<Hash>,
    ) -> Self {
        let mut msg = ConsensusMessage::Precommit {
            height,
            round,
            value,
            voter: keypair.pubkey(),
            signature: Signature::default(),
        };
        msg.sign(keypair);
        msg
    }

    /// Replace the signature with one from `keypair` over [`Self::signing_bytes`].
    pub fn sign(&mut self, keypair: &Keypair) {
        let signature = keypair.sign_message(&self.signing_bytes());
        match self {
            ConsensusMessage::Proposal { signature: s, .. }
            | ConsensusMessage::LiteProposal { signature: s, .. }
            | ConsensusMessage::Prevote { signature: s, .. }
            | ConsensusMessage::Precommit { signature: s, .. } => *s = signature,
        }
    }

    pub fn code(&self) -> MessageCode {
        match self {
            ConsensusMessage::Proposal { .. } => MessageCode::Proposal,
            ConsensusMessage::LiteProposal { .. } => MessageCode::LiteProposal,
            ConsensusMessage::Prevote { .. } => MessageCode::Prevote,
            ConsensusMessage::Precommit { .. } => MessageCode::Precommit,
        }
    }

    pub fn height(&self) -> u64 {
        match self {
            ConsensusMessage::Proposal { height, .. }
            | ConsensusMessage::LiteProposal { height, .. }
            | ConsensusMessage::Prevote { height, .. }
            | ConsensusMessage::Precommit { height, .. } => *height,
        }
    }

    pub fn round(&self) -> u32 {
        match self {
            ConsensusMessage::Proposal { round, .. }
            | ConsensusMessage::LiteProposal { round, .. }
            | ConsensusMessage::Prevote { round, .. }
            | ConsensusMessage::Precommit { round, .. } => *round,
        }
    }

    /// Returns the pubkey of the message sender.
    pub fn sender(&self) -> &Pubkey {
        match self {
            ConsensusMessage::Proposal { proposer, .. }
            | ConsensusMessage::LiteProposal { proposer, .. } => proposer,
            ConsensusMessage::Prevote { voter, .. }
            | ConsensusMessage::Precommit { voter, .. } => voter,
        }
    }

    pub fn signature(&self) -> &Signature {
        match self {
            ConsensusMessage::Proposal { signature, .. }
            | ConsensusMessage::LiteProposal { signature, .. }
            | ConsensusMessage::Prevote { signature, .. }
            | ConsensusMessage::Precommit { signature, .. } => signature,
        }
    }

    /// The committed value. Proposals always carry one; `None` is a nil vote.
    pub fn value(&self) -> Option<Hash> {
        match self {
            ConsensusMessage::Proposal { block, .. } => Some(block.hash()),
            ConsensusMessage::LiteProposal { value, .. } => Some(*value),
            ConsensusMessage::Prevote { value, .. }
            | ConsensusMessage::Precommit { value, .. } => *value,
        }
    }

    /// Valid round of a proposal. Always `None` for votes.
    pub fn valid_round(&self) -> Option<u32> {
        match self {
            ConsensusMessage::Proposal { valid_round, .. }
            | ConsensusMessage::LiteProposal { valid_round, .. } => *valid_round,
            _ => None,
        }
    }

    pub fn flagged(&self) -> Option<&FlaggedProposal> {
        match self {
            ConsensusMessage::Prevote { flagged, .. } => flagged.as_ref(),
            _ => None,
        }
    }

    /// True for a proposal without a valid round.
    pub fn is_new_proposal(&self) -> bool {
        self.code().is_proposal() && self.valid_round().is_none()
    }

    /// Strip the block from a proposal. Other messages are returned as-is.
    pub fn to_lite(&self) -> ConsensusMessage {
        match self {
            ConsensusMessage::Proposal {
                height,
                round,
                valid_round,
                block,
                proposer,
                signature,
            } => ConsensusMessage::LiteProposal {
                height: *height,
                round: *round,
                valid_round: *valid_round,
                value: block.hash(),
                proposer: *proposer,
                signature: *signature,
            },
            other => other.clone(),
        }
    }

    /// Canonical bytes covered by the sender's signature.
    pub fn signing_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(128);
        match self {
            ConsensusMessage::Proposal { .. } | ConsensusMessage::LiteProposal { .. } => {
                buf.extend_from_slice(PROPOSAL_TAG);
                buf.extend_from_slice(&self.height().to_le_bytes());
                buf.extend_from_slice(&self.round().to_le_bytes());
                match self.valid_round() {
                    Some(vr) => {
                        buf.push(1);
                        buf.extend_from_slice(&vr.to_le_bytes());
                    }
                    None => buf.push(0),
                }
                push_value(&mut buf, self.value());
            }
            ConsensusMessage::Prevote {
                height,
                round,
                value,
                flagged,
                ..
            } => {
                buf.extend_from_slice(PREVOTE_TAG);
                buf.extend_from_slice(&height.to_le_bytes());
                buf.extend_from_slice(&round.to_le_bytes());
                push_value(&mut buf, *value);
                match flagged {
                    Some(flag) => {
                        buf.push(1);
                        buf.extend_from_slice(flag.proposer.as_ref());
                        buf.extend_from_slice(flag.value.as_ref());
                    }
                    None => buf.push(0),
                }
            }
            ConsensusMessage::Precommit {
                height,
                round,
                value,
                ..
            } => {
                buf.extend_from_slice(PRECOMMIT_TAG);
                buf.extend_from_slice(&height.to_le_bytes());
                buf.extend_from_slice(&round.to_le_bytes());
                push_value(&mut buf, *value);
            }
        }
        buf
    }

    /// Message hash used on-chain. A proposal and its lite form hash equally.
    pub fn hash(&self) -> Hash {
        solana_sha256_hasher::hashv(&[&self.signing_bytes(), self.signature().as_ref()])
    }

    /// Checks that do not need the committee: malformed content from a
    /// correctly signed sender is accountable garbage.
    pub fn validate_structure(&self) -> Result<()> {
        match self {
            ConsensusMessage::Proposal {
                height,
                block,
                proposer,
                ..
            } => {
                if block.height != *height {
                    return Err(AccountabilityError::Garbage(
                        "proposal block height does not match message height",
                    ));
                }
                if block.proposer != *proposer {
                    return Err(AccountabilityError::Garbage(
                        "proposal block proposer does not match sender",
                    ));
                }
            }
            ConsensusMessage::Prevote {
                value: Some(_),
                flagged: Some(_),
                ..
            } => {
                return Err(AccountabilityError::Garbage(
                    "flagged prevote carries a value",
                ));
            }
            _ => {}
        }
        Ok(())
    }
}

fn push_value(buf: &mut Vec<u8>, value: Option<Hash>) {
    match value {
        Some(hash) => {
            buf.push(1);
            buf.extend_from_slice(hash.as_ref());
        }
        None => buf.push(0),
    }
}

impl fmt::Display for ConsensusMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{{h: {}, r: {}, sender: {}",
            self.code(),
            self.height(),
            self.round(),
            self.sender()
        )?;
        if let Some(vr) = self.valid_round() {
            write!(f, ", vr: {vr}")?;
        }
        match self.value() {
            Some(value) => write!(f, ", value: {value}}}"),
            None => write!(f, ", value: nil}}"),
        }
    }
}
