//! Innocence proofs answering accusations against this node.
//!
//! Only PO, PVN, PVO and C1 accusations can be rebutted; the evidence is
//! pulled from the local [`MessageStore`].

use {
    crate::{
        committee::Committee,
        error::{AccountabilityError, Result},
        message_store::MessageStore,
        proof::{AccountabilityProof, Rule},
        types::{ConsensusMessage, MessageCode},
    },
    solana_hash::Hash,
};

/// Build the innocence proof rebutting `accusation`.
pub fn innocence_proof(
    store: &MessageStore,
    committee: &Committee,
    accusation: &AccountabilityProof,
) -> Result<AccountabilityProof> {
    let message = &accusation.message;
    let missing = || AccountabilityError::NoInnocenceEvidence(accusation.rule);
    let value = message.value().ok_or_else(missing)?;

    let evidence = match accusation.rule {
        Rule::PO => {
            let valid_round = message.valid_round().ok_or_else(missing)?;
            quorum_prevotes(store, committee, message.height(), valid_round, value)
                .ok_or_else(missing)?
        }
        Rule::PVN => {
            let proposal = store
                .get_proposals(message.height(), message.round(), value)
                .into_iter()
                .find(|p| p.is_new_proposal())
                .ok_or_else(missing)?;
            vec![proposal.to_lite()]
        }
        Rule::PVO => {
            let lite = accusation
                .evidence
                .first()
                .filter(|m| m.code() == MessageCode::LiteProposal)
                .ok_or_else(missing)?;
            let valid_round = lite.valid_round().ok_or_else(missing)?;
            let votes = quorum_prevotes(store, committee, message.height(), valid_round, value)
                .ok_or_else(missing)?;
            let mut evidence = vec![lite.clone()];
            evidence.extend(votes);
            evidence
        }
        Rule::C1 => quorum_prevotes(store, committee, message.height(), message.round(), value)
            .ok_or_else(missing)?,
        rule => return Err(AccountabilityError::NoInnocenceEvidence(rule)),
    };

    Ok(AccountabilityProof::innocence(
        accusation.rule,
        message.clone(),
        evidence,
    ))
}

fn quorum_prevotes(
    store: &MessageStore,
    committee: &Committee,
    height: u64,
    round: u32,
    value: Hash,
) -> Option<Vec<ConsensusMessage>> {
    store.search_quorum(height, round, MessageCode::Prevote, Some(value), committee)
}
