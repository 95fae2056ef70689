//! Signature verification capability.
//!
//! The engine never implements signature primitives itself. The node
//! supplies a [`SignatureVerifier`]; [`Ed25519Verifier`] is the default
//! backed by `solana-signature`.

use {
    crate::{
        committee::Committee,
        error::{AccountabilityError, Result},
        proof::AccountabilityProof,
        types::ConsensusMessage,
    },
    solana_pubkey::Pubkey,
    solana_signature::Signature,
};

/// Checks a signature over arbitrary bytes.
pub trait SignatureVerifier: Send + Sync {
    fn verify(&self, signer: &Pubkey, message: &[u8], signature: &Signature) -> bool;
}

/// Ed25519 verification of validator identity keys.
#[derive(Debug, Default, Clone, Copy)]
pub struct Ed25519Verifier;

impl SignatureVerifier for Ed25519Verifier {
    fn verify(&self, signer: &Pubkey, message: &[u8], signature: &Signature) -> bool {
        signature.verify(signer.as_ref(), message)
    }
}

/// Check committee membership and the signature of one message.
pub fn verify_message(
    verifier: &dyn SignatureVerifier,
    committee: &Committee,
    msg: &ConsensusMessage,
) -> Result<()> {
    let sender = msg.sender();
    if !committee.contains(sender) {
        return Err(AccountabilityError::NotCommitteeMember(*sender));
    }
    if !verifier.verify(sender, &msg.signing_bytes(), msg.signature()) {
        return Err(AccountabilityError::InvalidSignature(*sender));
    }
    Ok(())
}

/// Check the subject message and every evidence message of a proof. All of
/// them belong to the subject's height, so one committee covers them.
pub fn verify_proof_signatures(
    verifier: &dyn SignatureVerifier,
    committee: &Committee,
    proof: &AccountabilityProof,
) -> Result<()> {
    verify_message(verifier, committee, &proof.message)?;
    for msg in &proof.evidence {
        if msg.height() != proof.message.height() {
            return Err(AccountabilityError::Garbage(
                "evidence height differs from subject height",
            ));
        }
        verify_message(verifier, committee, msg)?;
    }
    Ok(())
}
