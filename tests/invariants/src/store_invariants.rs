//! Property-based tests for the message store.
//!
//! Properties tested:
//! 1. Saving the same message twice is a no-op.
//! 2. Garbage collection keeps exactly the heights at or above the cut.
//! 3. A slot holding two values is always reported as equivocated.

#[cfg(test)]
mod tests {
    use {
        proptest::prelude::*,
        solana_hash::Hash,
        solana_keypair::Keypair,
        trv1_accountability::{ConsensusMessage, MessageStore},
    };

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn save_is_idempotent(
            heights in prop::collection::vec(1..=50u64, 1..=30),
            round in 0..=5u32,
        ) {
            let kp = Keypair::new();
            let value = Some(Hash::new_unique());
            let mut store = MessageStore::new();
            for h in &heights {
                let msg = ConsensusMessage::new_prevote(&kp, *h, round, value);
                store.save(msg.clone());
                let len = store.len();
                prop_assert!(!store.save(msg.clone()), "duplicate accepted at h={}", h);
                prop_assert_eq!(store.len(), len);
                prop_assert!(store.contains_value(&msg));
            }
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn gc_keeps_heights_at_or_above_cut(
            heights in prop::collection::btree_set(1..=500u64, 1..=40),
            cut in 0..=600u64,
        ) {
            let kp = Keypair::new();
            let mut store = MessageStore::new();
            for h in &heights {
                store.save(ConsensusMessage::new_precommit(&kp, *h, 0, None));
            }
            store.delete_msgs_before_height(cut);

            let kept: Vec<u64> = store.heights().collect();
            let expected: Vec<u64> = heights.iter().copied().filter(|h| *h >= cut).collect();
            prop_assert_eq!(&kept, &expected);
            prop_assert_eq!(store.len(), expected.len());
            prop_assert_eq!(store.first_height_buffered(), expected.first().copied().unwrap_or(0));
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn two_values_in_slot_equivocate(height in 1..=1_000u64, round in 0..=99u32) {
            let kp = Keypair::new();
            let mut store = MessageStore::new();
            let first = ConsensusMessage::new_prevote(&kp, height, round, Some(Hash::new_unique()));
            let second = ConsensusMessage::new_prevote(&kp, height, round, None);
            prop_assert!(store.save(first.clone()));
            prop_assert!(!store.is_equivocated(&first));
            prop_assert!(store.save(second.clone()));
            prop_assert!(store.is_equivocated(&first));
            prop_assert_eq!(store.get_equivocated(&second), vec![&first]);
        }
    }
}
