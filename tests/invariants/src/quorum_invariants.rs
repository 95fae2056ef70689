//! Property-based tests for quorum arithmetic.
//!
//! Properties tested:
//! 1. Quorum is `floor(2 * total / 3) + 1` for any power distribution.
//! 2. `over_quorum_votes` returns the shortest distinct-sender prefix
//!    reaching quorum, or nothing.
//! 3. Proposer selection is deterministic and always picks a member.

#[cfg(test)]
mod tests {
    use {
        proptest::prelude::*,
        solana_hash::Hash,
        solana_keypair::Keypair,
        solana_pubkey::Pubkey,
        solana_signer::Signer,
        std::collections::HashSet,
        trv1_accountability::{
            over_quorum_votes, proposer_for_round, rules::voting_power, Committee,
            ConsensusMessage,
        },
    };

    fn committee_of(keys: &[Keypair], powers: &[u64]) -> Committee {
        Committee::new(
            keys.iter()
                .zip(powers)
                .map(|(k, p)| (k.pubkey(), *p))
                .collect(),
        )
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // 1. Quorum formula
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(500))]

        #[test]
        fn quorum_matches_formula(powers in prop::collection::vec(1..=u64::MAX / 64, 1..=64)) {
            let committee = Committee::new(
                powers.iter().map(|p| (Pubkey::new_unique(), *p)).collect(),
            );
            let total: u128 = powers.iter().map(|p| u128::from(*p)).sum();
            prop_assert_eq!(committee.total_power(), total);
            prop_assert_eq!(committee.quorum(), total * 2 / 3 + 1);
            // Any two quorums overlap in more than a third of the power.
            prop_assert!(committee.quorum() * 2 > total + total / 3);
        }
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // 2. Over-quorum prefix
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn over_quorum_prefix_is_minimal(
            powers in prop::collection::vec(1..=1_000u64, 1..=10),
            order in prop::collection::vec(0..10usize, 0..=20),
        ) {
            let keys: Vec<Keypair> = powers.iter().map(|_| Keypair::new()).collect();
            let committee = committee_of(&keys, &powers);
            let value = Some(Hash::new_unique());
            let votes: Vec<ConsensusMessage> = order
                .iter()
                .map(|i| ConsensusMessage::new_prevote(&keys[i % keys.len()], 1, 0, value))
                .collect();
            let refs: Vec<&ConsensusMessage> = votes.iter().collect();

            match over_quorum_votes(&refs, &committee) {
                Some(prefix) => {
                    let senders: HashSet<Pubkey> = prefix.iter().map(|v| *v.sender()).collect();
                    prop_assert_eq!(senders.len(), prefix.len(), "duplicate sender in quorum");
                    prop_assert!(voting_power(&prefix, &committee) >= committee.quorum());
                    let without_last = &prefix[..prefix.len() - 1];
                    prop_assert!(voting_power(without_last, &committee) < committee.quorum());
                }
                None => {
                    prop_assert!(voting_power(refs.iter().copied(), &committee) < committee.quorum());
                }
            }
        }
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // 3. Proposer selection
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(500))]

        #[test]
        fn proposer_is_deterministic_member(
            powers in prop::collection::vec(1..=10_000u64, 1..=32),
            height in 1..=1_000_000u64,
            round in 0..=99u32,
        ) {
            let committee = Committee::new(
                powers.iter().map(|p| (Pubkey::new_unique(), *p)).collect(),
            );
            let p1 = proposer_for_round(&committee, height, round);
            let p2 = proposer_for_round(&committee.clone(), height, round);
            prop_assert_eq!(p1, p2, "Proposer selection is non-deterministic");
            prop_assert!(p1.is_some_and(|pk| committee.contains(&pk)), "Proposer not in committee");
        }
    }
}
