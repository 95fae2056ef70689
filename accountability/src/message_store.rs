//! Append-only evidentiary log of consensus messages.
//!
//! Messages are bucketed by height and keyed by their equivocation slot
//! `(round, code, sender)`. A slot never loses a message: a conflicting
//! value is appended next to the original so equivocation stays provable.
//! Proposals are told apart by message hash, so a re-proposal of the same
//! value with another valid round is kept too.

use {
    crate::{
        committee::Committee,
        rules::over_quorum_votes,
        types::{ConsensusMessage, MessageCode},
    },
    solana_hash::Hash,
    solana_pubkey::Pubkey,
    std::collections::{BTreeMap, HashMap},
};

/// Key identifying one sender's message slot at a height.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct SlotKey {
    round: u32,
    code: MessageCode,
    sender: Pubkey,
}

impl SlotKey {
    fn of(msg: &ConsensusMessage) -> Self {
        Self {
            round: msg.round(),
            code: msg.code().slot_code(),
            sender: *msg.sender(),
        }
    }
}

/// Message log keyed by height.
#[derive(Debug, Default)]
pub struct MessageStore {
    heights: BTreeMap<u64, HashMap<SlotKey, Vec<ConsensusMessage>>>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `msg` into its slot. Returns `false` when the slot already
    /// holds the same vote value or the same proposal.
    pub fn save(&mut self, msg: ConsensusMessage) -> bool {
        let slot = self
            .heights
            .entry(msg.height())
            .or_default()
            .entry(SlotKey::of(&msg))
            .or_default();
        if slot.iter().any(|m| same_entry(m, &msg)) {
            return false;
        }
        slot.push(msg);
        true
    }

    /// All messages at `height` matching `predicate`, in canonical order:
    /// round, code, sender, then message hash.
    pub fn get<F>(&self, height: u64, predicate: F) -> Vec<&ConsensusMessage>
    where
        F: Fn(&ConsensusMessage) -> bool,
    {
        let Some(slots) = self.heights.get(&height) else {
            return Vec::new();
        };
        let mut out: Vec<&ConsensusMessage> = slots
            .values()
            .flatten()
            .filter(|m| predicate(m))
            .collect();
        out.sort_by_cached_key(|m| (m.round(), m.code(), *m.sender(), m.hash().to_bytes()));
        out
    }

    /// True if `save(msg)` would be a no-op.
    pub fn contains_value(&self, msg: &ConsensusMessage) -> bool {
        self.slot(msg)
            .map(|slot| slot.iter().any(|m| same_entry(m, msg)))
            .unwrap_or(false)
    }

    /// Messages in the slot of `msg` carrying a different value.
    pub fn get_equivocated(&self, msg: &ConsensusMessage) -> Vec<&ConsensusMessage> {
        let value = msg.value();
        self.slot(msg)
            .map(|slot| slot.iter().filter(|m| m.value() != value).collect())
            .unwrap_or_default()
    }

    /// True if the sender's slot for `msg` holds more than one value.
    pub fn is_equivocated(&self, msg: &ConsensusMessage) -> bool {
        self.slot(msg)
            .is_some_and(|slot| slot.iter().any(|m| m.value() != msg.value()))
    }

    /// Full proposals at (height, round) for `value`.
    pub fn get_proposals(&self, height: u64, round: u32, value: Hash) -> Vec<&ConsensusMessage> {
        self.get(height, |m| {
            m.code() == MessageCode::Proposal && m.round() == round && m.value() == Some(value)
        })
    }

    /// Votes of `code` at (height, round) for `value`, trimmed to the prefix
    /// that first reaches the committee's quorum.
    pub fn search_quorum(
        &self,
        height: u64,
        round: u32,
        code: MessageCode,
        value: Option<Hash>,
        committee: &Committee,
    ) -> Option<Vec<ConsensusMessage>> {
        let votes = self.get(height, |m| {
            m.code() == code && m.round() == round && m.value() == value
        });
        over_quorum_votes(&votes, committee)
    }

    /// Heights currently held, ascending.
    pub fn heights(&self) -> impl Iterator<Item = u64> + '_ {
        self.heights.keys().copied()
    }

    /// Purge every height below `height`.
    pub fn delete_msgs_before_height(&mut self, height: u64) {
        self.heights = self.heights.split_off(&height);
    }

    /// Oldest height still present, or 0 for an empty store.
    pub fn first_height_buffered(&self) -> u64 {
        self.heights.keys().next().copied().unwrap_or(0)
    }

    /// Number of stored messages across all heights.
    pub fn len(&self) -> usize {
        self.heights
            .values()
            .flat_map(|slots| slots.values())
            .map(Vec::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.heights.is_empty()
    }

    fn slot(&self, msg: &ConsensusMessage) -> Option<&Vec<ConsensusMessage>> {
        self.heights.get(&msg.height())?.get(&SlotKey::of(msg))
    }
}

fn same_entry(stored: &ConsensusMessage, msg: &ConsensusMessage) -> bool {
    if msg.code().is_proposal() {
        stored.hash() == msg.hash()
    } else {
        stored.value() == msg.value()
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::types::ProposedBlock,
        solana_keypair::Keypair,
        solana_signer::Signer,
    };

    #[test]
    fn test_save_identical_is_noop() {
        let kp = Keypair::new();
        let value = Some(Hash::new_unique());
        let mut store = MessageStore::new();
        assert!(store.save(ConsensusMessage::new_prevote(&kp, 1, 0, value)));
        assert!(!store.save(ConsensusMessage::new_prevote(&kp, 1, 0, value)));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_conflicting_values_are_retained() {
        let kp = Keypair::new();
        let a = ConsensusMessage::new_prevote(&kp, 1, 0, Some(Hash::new_unique()));
        let b = ConsensusMessage::new_prevote(&kp, 1, 0, Some(Hash::new_unique()));
        let mut store = MessageStore::new();
        assert!(store.save(a.clone()));
        assert!(store.save(b.clone()));
        assert_eq!(store.len(), 2);
        assert!(store.is_equivocated(&a));
        assert_eq!(store.get_equivocated(&a), vec![&b]);
        assert_eq!(store.get_equivocated(&b), vec![&a]);
    }

    #[test]
    fn test_reproposal_with_other_valid_round_is_kept() {
        let kp = Keypair::new();
        let block = ProposedBlock {
            parent_hash: Hash::default(),
            height: 1,
            timestamp: 0,
            state_root: Hash::new_unique(),
            proposer: kp.pubkey(),
            payload: Vec::new(),
        };
        let fresh = ConsensusMessage::new_proposal(&kp, 1, 2, None, block.clone());
        let old = ConsensusMessage::new_proposal(&kp, 1, 2, Some(1), block);
        let mut store = MessageStore::new();
        assert!(store.save(fresh.clone()));
        assert!(!store.save(fresh.to_lite()));
        assert!(!store.contains_value(&old.to_lite()));
        assert!(store.save(old.clone()));
        assert!(store.contains_value(&old));
        assert!(!store.is_equivocated(&old));
        assert!(store.get_equivocated(&old).is_empty());
        assert_eq!(store.get_proposals(1, 2, fresh.value().unwrap()).len(), 2);
    }

    #[test]
    fn test_different_codes_do_not_collide() {
        let kp = Keypair::new();
        let value = Some(Hash::new_unique());
        let mut store = MessageStore::new();
        store.save(ConsensusMessage::new_prevote(&kp, 1, 0, value));
        store.save(ConsensusMessage::new_precommit(&kp, 1, 0, None));
        let prevote = ConsensusMessage::new_prevote(&kp, 1, 0, value);
        assert!(!store.is_equivocated(&prevote));
        assert!(store.contains_value(&prevote));
    }

    #[test]
    fn test_get_filters_by_height_and_predicate() {
        let kp = Keypair::new();
        let mut store = MessageStore::new();
        store.save(ConsensusMessage::new_precommit(&kp, 1, 2, None));
        store.save(ConsensusMessage::new_precommit(&kp, 1, 0, None));
        store.save(ConsensusMessage::new_prevote(&kp, 1, 1, None));
        store.save(ConsensusMessage::new_precommit(&kp, 2, 0, None));

        let precommits = store.get(1, |m| m.code() == MessageCode::Precommit);
        let rounds: Vec<u32> = precommits.iter().map(|m| m.round()).collect();
        assert_eq!(rounds, vec![0, 2]);
        assert!(store.get(7, |_| true).is_empty());
    }

    #[test]
    fn test_delete_before_height() {
        let kp = Keypair::new();
        let mut store = MessageStore::new();
        for h in 1..=5 {
            store.save(ConsensusMessage::new_precommit(&kp, h, 0, None));
        }
        assert_eq!(store.first_height_buffered(), 1);
        store.delete_msgs_before_height(4);
        assert_eq!(store.first_height_buffered(), 4);
        assert_eq!(store.len(), 2);
        store.delete_msgs_before_height(100);
        assert!(store.is_empty());
        assert_eq!(store.first_height_buffered(), 0);
    }

    #[test]
    fn test_search_quorum() {
        let keys: Vec<Keypair> = (0..4).map(|_| Keypair::new()).collect();
        let committee = Committee::new(keys.iter().map(|k| (k.pubkey(), 1)).collect());
        let value = Some(Hash::new_unique());
        let mut store = MessageStore::new();
        for kp in &keys[..2] {
            store.save(ConsensusMessage::new_prevote(kp, 3, 1, value));
        }
        assert!(store
            .search_quorum(3, 1, MessageCode::Prevote, value, &committee)
            .is_none());

        store.save(ConsensusMessage::new_prevote(&keys[2], 3, 1, value));
        store.save(ConsensusMessage::new_prevote(&keys[3], 3, 1, value));
        let quorum = store
            .search_quorum(3, 1, MessageCode::Prevote, value, &committee)
            .unwrap();
        assert_eq!(quorum.len(), 3);
        assert_eq!(store.heights().collect::<Vec<_>>(), vec![3]);
    }
}
