//! Property-based tests for proof encoding and event chunking.
//!
//! Properties tested:
//! 1. Splitting an event and reassembling the parts in any order yields
//!    the original proof bytes.
//! 2. Every chunk carries the identity of the whole proof.

#[cfg(test)]
mod tests {
    use {
        proptest::prelude::*,
        solana_hash::Hash,
        solana_keypair::Keypair,
        solana_pubkey::Pubkey,
        trv1_accountability::{AccountabilityEvent, AccountabilityProof, ConsensusMessage, Rule},
    };

    fn c1_accusation(evidence_len: usize) -> AccountabilityProof {
        let value = Some(Hash::new_unique());
        let msg = ConsensusMessage::new_precommit(&Keypair::new(), 7, 1, value);
        let evidence = (0..evidence_len)
            .map(|_| ConsensusMessage::new_prevote(&Keypair::new(), 7, 1, value))
            .collect();
        AccountabilityProof::accusation(Rule::C1, msg, evidence)
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn split_then_reassemble_in_any_order(
            evidence_len in 0..=8usize,
            chunk_size in 16..=256usize,
            seed in any::<u64>(),
        ) {
            let proof = c1_accusation(evidence_len);
            let event = proof.to_event(Pubkey::new_unique()).unwrap();
            prop_assume!(event.raw_proof.len() > chunk_size);

            let mut parts = event.split(chunk_size).unwrap();
            prop_assert_eq!(parts.len(), event.raw_proof.len().div_ceil(chunk_size));
            for part in &parts {
                prop_assert_eq!(usize::from(part.chunks), parts.len());
                prop_assert_eq!(part.msg_hash, event.msg_hash);
                prop_assert_eq!(part.sender, event.sender);
                prop_assert_eq!(part.rule, event.rule);
                prop_assert!(part.raw_proof.len() <= chunk_size);
            }

            let len = parts.len();
            parts.rotate_left((seed % len as u64) as usize);
            if seed % 2 == 1 {
                parts.reverse();
            }
            let raw = AccountabilityEvent::reassemble(&parts).unwrap();
            prop_assert_eq!(&raw, &event.raw_proof);
            prop_assert_eq!(AccountabilityProof::decode(&raw).unwrap(), proof);
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn missing_chunk_is_rejected(chunk_size in 16..=64usize, drop in any::<prop::sample::Index>()) {
            let event = c1_accusation(2).to_event(Pubkey::new_unique()).unwrap();
            let mut parts = event.split(chunk_size).unwrap();
            parts.remove(drop.index(parts.len()));
            prop_assert!(AccountabilityEvent::reassemble(&parts).is_err());
        }
    }
}
