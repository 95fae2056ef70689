//! Accountability rule engine.
//!
//! Scans one height of the [`MessageStore`] and emits proofs. The engine
//! distinguishes *contradictory* evidence (a Misbehaviour) from *missing*
//! justification (an Accusation the suspect can rebut with an innocence
//! proof).
//!
//! Rules are evaluated in a fixed order: InvalidProposal, PN, PO, prevote
//! rules (PVN, PVO, PVO12, PVO3) and precommit rules (C, C1). Messages from
//! equivocating slots are skipped; equivocation is proven at intake.
//!
//! Every predicate here has a mirror in [`crate::verifier`] and the two
//! must stay in lock-step.

use {
    crate::{
        committee::Committee,
        message_store::MessageStore,
        proof::{AccountabilityProof, ProofType, Rule},
        types::{ConsensusMessage, FlaggedProposal, MessageCode},
    },
    log::trace,
    solana_hash::Hash,
    solana_pubkey::Pubkey,
    std::collections::{BTreeMap, HashSet},
};

// ---------------------------------------------------------------------------
// Quorum helpers
// ---------------------------------------------------------------------------

/// Voting power of the distinct senders in `votes`.
pub fn voting_power<'a, I>(votes: I, committee: &Committee) -> u128
where
    I: IntoIterator<Item = &'a ConsensusMessage>,
{
    let mut seen = HashSet::new();
    votes
        .into_iter()
        .filter(|v| seen.insert(*v.sender()))
        .map(|v| u128::from(committee.power_of(v.sender())))
        .sum()
}

/// Walk `votes` in order, accumulating the power of distinct senders, and
/// return the prefix that first reaches quorum.
pub fn over_quorum_votes(
    votes: &[&ConsensusMessage],
    committee: &Committee,
) -> Option<Vec<ConsensusMessage>> {
    let quorum = committee.quorum();
    let mut seen: HashSet<Pubkey> = HashSet::new();
    let mut power: u128 = 0;
    let mut out = Vec::new();
    for vote in votes {
        if !seen.insert(*vote.sender()) {
            continue;
        }
        power = power.saturating_add(u128::from(committee.power_of(vote.sender())));
        out.push((*vote).clone());
        if power >= quorum {
            return Some(out);
        }
    }
    None
}

/// True if `votes` carry at least a quorum of distinct-sender power.
pub fn has_quorum<'a, I>(votes: I, committee: &Committee) -> bool
where
    I: IntoIterator<Item = &'a ConsensusMessage>,
{
    voting_power(votes, committee) >= committee.quorum()
}

// ---------------------------------------------------------------------------
// Rule engine
// ---------------------------------------------------------------------------

/// Read-only view of one height plus its committee.
pub struct RuleEngine<'a> {
    store: &'a MessageStore,
    committee: &'a Committee,
    height: u64,
}

/// Run every rule over `height`.
pub fn run_rule_engine(
    store: &MessageStore,
    committee: &Committee,
    height: u64,
) -> Vec<AccountabilityProof> {
    RuleEngine::new(store, committee, height).run()
}

impl<'a> RuleEngine<'a> {
    pub fn new(store: &'a MessageStore, committee: &'a Committee, height: u64) -> Self {
        Self {
            store,
            committee,
            height,
        }
    }

    pub fn run(&self) -> Vec<AccountabilityProof> {
        let mut proofs = self.invalid_proposals();
        proofs.extend(self.new_proposals());
        proofs.extend(self.old_proposals());
        proofs.extend(self.prevotes());
        proofs.extend(self.precommits());
        trace!(
            "RuleEngine: height {} produced {} proofs",
            self.height,
            proofs.len()
        );
        proofs
    }

    // ── Proposals ──

    /// A quorum of nil prevotes flagging a proposal proves it invalid.
    fn invalid_proposals(&self) -> Vec<AccountabilityProof> {
        let mut proofs = Vec::new();
        for proposal in self.unequivocated(|m| m.code() == MessageCode::Proposal) {
            let Some(value) = proposal.value() else {
                continue;
            };
            let flag = FlaggedProposal {
                proposer: *proposal.sender(),
                value,
            };
            let flagged = self.store.get(self.height, |m| {
                m.code() == MessageCode::Prevote
                    && m.round() == proposal.round()
                    && m.value().is_none()
                    && m.flagged() == Some(&flag)
            });
            if let Some(votes) = over_quorum_votes(&flagged, self.committee) {
                proofs.push(AccountabilityProof::misbehaviour(
                    Rule::InvalidProposal,
                    proposal.to_lite(),
                    votes,
                ));
            }
        }
        proofs
    }

    /// PN: a new proposal after the proposer precommitted a value.
    fn new_proposals(&self) -> Vec<AccountabilityProof> {
        let mut proofs = Vec::new();
        for proposal in self.unequivocated(|m| m.code() == MessageCode::Proposal && m.is_new_proposal()) {
            let prior = self.store.get(self.height, |m| {
                m.code() == MessageCode::Precommit
                    && m.sender() == proposal.sender()
                    && m.round() < proposal.round()
                    && m.value().is_some()
            });
            if let Some(precommit) = prior.first() {
                proofs.push(AccountabilityProof::misbehaviour(
                    Rule::PN,
                    proposal.to_lite(),
                    vec![(*precommit).clone()],
                ));
            }
        }
        proofs
    }

    /// PO: an old proposal whose valid round is contradicted.
    fn old_proposals(&self) -> Vec<AccountabilityProof> {
        let mut proofs = Vec::new();
        for proposal in self.unequivocated(|m| {
            m.code() == MessageCode::Proposal && m.valid_round().is_some()
        }) {
            if let Some(proof) = self.check_old_proposal(proposal) {
                proofs.push(proof);
            }
        }
        proofs
    }

    fn check_old_proposal(&self, proposal: &ConsensusMessage) -> Option<AccountabilityProof> {
        let round = proposal.round();
        let valid_round = proposal.valid_round()?;
        let value = proposal.value()?;
        if valid_round >= round {
            return None;
        }
        let lite = proposal.to_lite();

        let conflicting_lock = self.store.get(self.height, |m| {
            m.code() == MessageCode::Precommit
                && m.sender() == proposal.sender()
                && m.round() == valid_round
                && m.value().is_some()
                && m.value() != Some(value)
        });
        if let Some(precommit) = conflicting_lock.first() {
            return Some(AccountabilityProof::misbehaviour(
                Rule::PO,
                lite,
                vec![(*precommit).clone()],
            ));
        }

        let later_lock = self.store.get(self.height, |m| {
            m.code() == MessageCode::Precommit
                && m.sender() == proposal.sender()
                && m.round() > valid_round
                && m.round() < round
                && m.value().is_some()
        });
        if let Some(precommit) = later_lock.first() {
            return Some(AccountabilityProof::misbehaviour(
                Rule::PO,
                lite,
                vec![(*precommit).clone()],
            ));
        }

        let prevotes = self.prevotes_at(valid_round);
        if let Some(votes) = self.contradicting_quorum(&prevotes, value) {
            return Some(AccountabilityProof::misbehaviour(Rule::PO, lite, votes));
        }

        if !has_quorum(votes_for(&prevotes, value), self.committee) {
            return Some(AccountabilityProof::accusation(Rule::PO, lite, Vec::new()));
        }
        None
    }

    // ── Prevotes ──

    fn prevotes(&self) -> Vec<AccountabilityProof> {
        let mut proofs = Vec::new();
        for prevote in self.unequivocated(|m| m.code() == MessageCode::Prevote && m.value().is_some()) {
            if let Some(proof) = self.check_prevote(prevote) {
                proofs.push(proof);
            }
        }
        proofs
    }

    fn check_prevote(&self, prevote: &ConsensusMessage) -> Option<AccountabilityProof> {
        let value = prevote.value()?;
        let round = prevote.round();
        let proposals = self.store.get_proposals(self.height, round, value);

        if proposals.is_empty() {
            return Some(AccountabilityProof::accusation(
                Rule::PVN,
                prevote.clone(),
                Vec::new(),
            ));
        }

        let mut candidates = Vec::new();
        for proposal in proposals {
            let outcome = if proposal.is_new_proposal() {
                self.check_prevote_new(prevote, proposal)
            } else {
                self.check_prevote_old(prevote, proposal)
            };
            match outcome {
                // Justified by at least one of the proposals.
                None => return None,
                Some(proof) => candidates.push(proof),
            }
        }

        let first_misbehaviour = candidates
            .iter()
            .position(|p| p.proof_type == ProofType::Misbehaviour)
            .unwrap_or(0);
        candidates.into_iter().nth(first_misbehaviour)
    }

    /// PVN: the voter's latest lock before this round, followed only by nil
    /// precommits without gaps, is for another value.
    fn check_prevote_new(
        &self,
        prevote: &ConsensusMessage,
        proposal: &ConsensusMessage,
    ) -> Option<AccountabilityProof> {
        let value = prevote.value()?;
        let precommits = self.store.get(self.height, |m| {
            m.code() == MessageCode::Precommit
                && m.sender() == prevote.sender()
                && m.round() < prevote.round()
        });

        let mut next_round = prevote.round();
        for (i, precommit) in precommits.iter().enumerate().rev() {
            if next_round.saturating_sub(precommit.round()) > 1 {
                return None;
            }
            if let Some(locked) = precommit.value() {
                let same_round = precommits
                    .iter()
                    .filter(|m| m.round() == precommit.round())
                    .count();
                if locked != value && same_round == 1 {
                    let mut evidence = vec![proposal.to_lite()];
                    evidence.extend(precommits[i..].iter().map(|m| (*m).clone()));
                    return Some(AccountabilityProof::misbehaviour(
                        Rule::PVN,
                        prevote.clone(),
                        evidence,
                    ));
                }
                return None;
            }
            next_round = precommit.round();
        }
        None
    }

    /// PVO, PVO12 and PVO3 for a prevote on a re-proposed value.
    fn check_prevote_old(
        &self,
        prevote: &ConsensusMessage,
        proposal: &ConsensusMessage,
    ) -> Option<AccountabilityProof> {
        let value = prevote.value()?;
        let round = prevote.round();
        let valid_round = proposal.valid_round()?;
        let lite = proposal.to_lite();

        if valid_round >= proposal.round() {
            return Some(AccountabilityProof::misbehaviour(
                Rule::PVO3,
                prevote.clone(),
                vec![lite],
            ));
        }

        let prevotes = self.prevotes_at(valid_round);
        if let Some(votes) = self.contradicting_quorum(&prevotes, value) {
            let mut evidence = vec![lite];
            evidence.extend(votes);
            return Some(AccountabilityProof::misbehaviour(
                Rule::PVO,
                prevote.clone(),
                evidence,
            ));
        }

        if !has_quorum(votes_for(&prevotes, value), self.committee) {
            return Some(AccountabilityProof::accusation(
                Rule::PVO,
                prevote.clone(),
                vec![lite],
            ));
        }

        let precommits = self.store.get(self.height, |m| {
            m.code() == MessageCode::Precommit
                && m.sender() == prevote.sender()
                && m.round() > valid_round
                && m.round() < round
        });
        if !covers_rounds(&precommits, valid_round, round) {
            return None;
        }
        let last_v = precommits
            .iter()
            .filter(|m| m.value() == Some(value))
            .map(|m| m.round())
            .max();
        let last_not_v = precommits
            .iter()
            .filter(|m| m.value().is_some() && m.value() != Some(value))
            .map(|m| m.round())
            .max();
        if last_not_v > last_v {
            let mut evidence = vec![lite];
            evidence.extend(precommits.iter().map(|m| (*m).clone()));
            return Some(AccountabilityProof::misbehaviour(
                Rule::PVO12,
                prevote.clone(),
                evidence,
            ));
        }
        None
    }

    // ── Precommits ──

    /// C / C1: a precommit needs a visible quorum of matching prevotes.
    fn precommits(&self) -> Vec<AccountabilityProof> {
        let mut proofs = Vec::new();
        for precommit in self.unequivocated(|m| m.code() == MessageCode::Precommit && m.value().is_some()) {
            let Some(value) = precommit.value() else {
                continue;
            };
            let prevotes = self.prevotes_at(precommit.round());
            // Nil and any other value all count against V.
            let not_v: Vec<&ConsensusMessage> = prevotes
                .iter()
                .copied()
                .filter(|m| m.value() != Some(value))
                .collect();
            if let Some(votes) = over_quorum_votes(&not_v, self.committee) {
                proofs.push(AccountabilityProof::misbehaviour(
                    Rule::C,
                    precommit.clone(),
                    votes,
                ));
            } else if !has_quorum(votes_for(&prevotes, value), self.committee) {
                proofs.push(AccountabilityProof::accusation(
                    Rule::C1,
                    precommit.clone(),
                    Vec::new(),
                ));
            }
        }
        proofs
    }

    // ── Helpers ──

    fn unequivocated<F>(&self, predicate: F) -> Vec<&'a ConsensusMessage>
    where
        F: Fn(&ConsensusMessage) -> bool,
    {
        let store = self.store;
        store
            .get(self.height, predicate)
            .into_iter()
            .filter(|m| !store.is_equivocated(m))
            .collect()
    }

    fn prevotes_at(&self, round: u32) -> Vec<&'a ConsensusMessage> {
        self.store.get(self.height, |m| {
            m.code() == MessageCode::Prevote && m.round() == round
        })
    }

    /// First value other than `value` whose prevotes reach quorum, grouped
    /// by value in ascending hash order.
    fn contradicting_quorum(
        &self,
        prevotes: &[&ConsensusMessage],
        value: Hash,
    ) -> Option<Vec<ConsensusMessage>> {
        let mut groups: BTreeMap<Hash, Vec<&ConsensusMessage>> = BTreeMap::new();
        for &vote in prevotes {
            if let Some(other) = vote.value() {
                if other != value {
                    groups.entry(other).or_default().push(vote);
                }
            }
        }
        groups
            .values()
            .find_map(|votes| over_quorum_votes(votes, self.committee))
    }
}

fn votes_for<'b>(
    votes: &'b [&'b ConsensusMessage],
    value: Hash,
) -> impl Iterator<Item = &'b ConsensusMessage> + 'b {
    votes
        .iter()
        .copied()
        .filter(move |m| m.value() == Some(value))
}

/// True if `precommits`, sorted by round, hold exactly one message per
/// round for every round strictly between `from` and `to`.
pub(crate) fn covers_rounds(precommits: &[&ConsensusMessage], from: u32, to: u32) -> bool {
    let Some(expected) = to.checked_sub(from).and_then(|d| d.checked_sub(1)) else {
        return false;
    };
    if expected == 0 || precommits.len() != expected as usize {
        return false;
    }
    precommits
        .iter()
        .zip(from.saturating_add(1)..to)
        .all(|(m, round)| m.round() == round)
}
