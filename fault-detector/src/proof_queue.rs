//! Bounded, de-duplicating FIFO of proofs.

use {
    solana_hash::Hash,
    std::collections::{HashSet, VecDeque},
    trv1_accountability::{within_height_range, AccountabilityProof},
};

type ProofKey = (u8, u8, Hash);

fn key_of(proof: &AccountabilityProof) -> ProofKey {
    (proof.proof_type as u8, proof.rule as u8, proof.msg_hash())
}

/// Proofs in arrival order, at most one per (type, rule, message hash).
/// When full, the oldest proof is evicted.
#[derive(Debug)]
pub struct ProofQueue {
    capacity: usize,
    proofs: VecDeque<AccountabilityProof>,
    keys: HashSet<ProofKey>,
}

impl ProofQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            proofs: VecDeque::new(),
            keys: HashSet::new(),
        }
    }

    /// Append `proof`. Returns `false` if an equal proof is already queued.
    pub fn push(&mut self, proof: AccountabilityProof) -> bool {
        if self.capacity == 0 || !self.keys.insert(key_of(&proof)) {
            return false;
        }
        while self.proofs.len() >= self.capacity {
            if let Some(evicted) = self.proofs.pop_front() {
                self.keys.remove(&key_of(&evicted));
            }
        }
        self.proofs.push_back(proof);
        true
    }

    /// Remove every proof matching `predicate`, returning them in order.
    pub fn extract<F>(&mut self, mut predicate: F) -> Vec<AccountabilityProof>
    where
        F: FnMut(&AccountabilityProof) -> bool,
    {
        let (taken, kept): (Vec<_>, Vec<_>) =
            std::mem::take(&mut self.proofs).into_iter().partition(|p| predicate(p));
        for proof in &taken {
            self.keys.remove(&key_of(proof));
        }
        self.proofs = kept.into();
        taken
    }

    /// Take all proofs whose subject is still within the height range at
    /// `head`; stale ones are discarded.
    pub fn drain_fresh(&mut self, head: u64) -> Vec<AccountabilityProof> {
        self.keys.clear();
        std::mem::take(&mut self.proofs)
            .into_iter()
            .filter(|p| within_height_range(p.message.height(), head))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AccountabilityProof> {
        self.proofs.iter()
    }

    pub fn len(&self) -> usize {
        self.proofs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proofs.is_empty()
    }
}
