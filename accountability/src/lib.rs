//! TRv1 BFT Accountability
//!
//! Detects protocol violations in the Tendermint-style consensus stream
//! and turns them into compact, independently re-verifiable proofs that
//! the slashing contract can act on:
//!
//! - **Misbehaviour**: contradictory evidence proves a rule was broken.
//! - **Accusation**: the justification for a message is missing; the
//!   suspect may answer with an innocence proof.
//! - **Innocence**: the missing justification, supplied by the suspect.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │                 MessageStore                     │
//! │   height → (round, code, sender) → [messages]    │
//! └───────────────┬──────────────────────┬───────────┘
//!                 │                      │
//!        ┌────────▼────────┐    ┌────────▼────────┐
//!        │   RuleEngine    │    │ innocence_proof │
//!        │ PN PO PVN PVO   │    │  PO PVN PVO C1  │
//!        │ PVO12 PVO3 C C1 │    └────────┬────────┘
//!        └────────┬────────┘             │
//!                 ▼                      ▼
//!        ┌──────────────────────────────────────┐
//!        │ AccountabilityProof → Event (chunks) │
//!        └──────────────────┬───────────────────┘
//!                           ▼
//!        ┌──────────────────────────────────────┐
//!        │ VerifierRegistry: accusation /       │
//!        │ misbehaviour / innocence verifiers   │
//!        └──────────────────────────────────────┘
//! ```

pub mod committee;
pub mod config;
pub mod error;
pub mod innocence;
pub mod message_store;
pub mod proof;
pub mod proposer;
pub mod rules;
pub mod signature;
pub mod types;
pub mod verifier;

// Re-exports for convenience
pub use committee::{Committee, CommitteeMember};
pub use config::AccountabilityConfig;
pub use error::{AccountabilityError, Result};
pub use innocence::innocence_proof;
pub use message_store::MessageStore;
pub use proof::{AccountabilityEvent, AccountabilityProof, ProofType, Rule};
pub use proposer::{is_proposer, proposer_for_round};
pub use rules::{over_quorum_votes, run_rule_engine, RuleEngine};
pub use signature::{verify_message, verify_proof_signatures, Ed25519Verifier, SignatureVerifier};
pub use types::{ConsensusMessage, FlaggedProposal, MessageCode, ProposedBlock};
pub use verifier::{
    encode_verifier_input, is_success, valid_accusation, valid_innocence, valid_misbehaviour,
    within_height_range, AccountabilityVerifier, CommitteeProvider, PrecompiledVerifier,
    VerifierRegistry, ACCUSATION_VERIFIER_ADDRESS, INNOCENCE_VERIFIER_ADDRESS, MISBEHAVIOUR_VERIFIER_ADDRESS,
};
