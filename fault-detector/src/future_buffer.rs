//! Bounded buffer for messages whose parent committee is not known yet.

use {
    std::collections::{BTreeMap, VecDeque},
    trv1_accountability::ConsensusMessage,
};

/// Messages from heights above the local head, keyed by height.
///
/// When full, a message at the furthest height is evicted to make room.
/// Messages further out than everything buffered are dropped instead.
#[derive(Debug)]
pub struct FutureBuffer {
    capacity: usize,
    len: usize,
    heights: BTreeMap<u64, VecDeque<ConsensusMessage>>,
}

impl FutureBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            len: 0,
            heights: BTreeMap::new(),
        }
    }

    /// Buffer `msg`. Returns `false` if it was dropped.
    pub fn push(&mut self, msg: ConsensusMessage) -> bool {
        if self.capacity == 0 {
            return false;
        }
        if self.len >= self.capacity {
            let furthest = self.heights.keys().next_back().copied();
            match furthest {
                Some(furthest) if furthest > msg.height() => self.evict_from(furthest),
                _ => return false,
            }
        }
        self.heights.entry(msg.height()).or_default().push_back(msg);
        self.len = self.len.saturating_add(1);
        true
    }

    /// Remove and return every message at heights `<= head + 1`, oldest
    /// height first.
    pub fn pop_ready(&mut self, head: u64) -> Vec<ConsensusMessage> {
        let later = self.heights.split_off(&head.saturating_add(2));
        let ready = std::mem::replace(&mut self.heights, later);
        let out: Vec<ConsensusMessage> = ready.into_values().flatten().collect();
        self.len = self.len.saturating_sub(out.len());
        out
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn evict_from(&mut self, height: u64) {
        if let Some(queue) = self.heights.get_mut(&height) {
            queue.pop_back();
            self.len = self.len.saturating_sub(1);
            if queue.is_empty() {
                self.heights.remove(&height);
            }
        }
    }
}
