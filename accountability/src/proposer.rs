//! Proposer schedule.
//!
//! Every node and the misbehaviour verifier must agree on the proposer of
//! any (height, round) pair, otherwise InvalidProposer proofs could not be
//! re-derived on-chain.

use {crate::committee::Committee, solana_pubkey::Pubkey};

/// Deterministic proposer selection weighted by voting power.
///
/// `seed = height + round`, `target = seed % total_power`; walk the
/// committee in schedule order accumulating power and return the first
/// member whose cumulative power exceeds `target`.
pub fn proposer_for_round(committee: &Committee, height: u64, round: u32) -> Option<Pubkey> {
    let total = committee.total_power();
    if committee.is_empty() || total == 0 {
        return None;
    }

    let seed = u128::from(height.wrapping_add(u64::from(round)));
    let target = seed.checked_rem(total)?;

    let mut accumulated: u128 = 0;
    for member in committee.iter() {
        accumulated = accumulated.saturating_add(u128::from(member.voting_power));
        if accumulated > target {
            return Some(member.address);
        }
    }

    committee.get(0).map(|m| m.address)
}

/// Check whether `address` is the proposer for (height, round).
pub fn is_proposer(committee: &Committee, address: &Pubkey, height: u64, round: u32) -> bool {
    proposer_for_round(committee, height, round)
        .map(|p| p == *address)
        .unwrap_or(false)
}
