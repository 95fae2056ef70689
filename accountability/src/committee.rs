//! Weighted consensus committee.
//!
//! The committee active at `height - 1` decides membership, voting power
//! and quorum for every message at `height`.

use {solana_pubkey::Pubkey, std::collections::HashMap};

/// A committee member with its voting power.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitteeMember {
    pub address: Pubkey,
    pub voting_power: u64,
}

/// An ordered, weighted committee.
///
/// Members are sorted by (voting power descending, address ascending) so
/// every node derives the same reporter and proposer schedule.
#[derive(Debug, Clone, Default)]
pub struct Committee {
    members: Vec<CommitteeMember>,
    /// Fast lookup from address to index in `members`.
    index: HashMap<Pubkey, usize>,
    total_power: u128,
}

impl Committee {
    /// Create a committee from `(address, voting_power)` pairs. Zero-power
    /// entries are dropped.
    pub fn new(members: Vec<(Pubkey, u64)>) -> Self {
        let mut members: Vec<CommitteeMember> = members
            .into_iter()
            .filter(|(_, power)| *power > 0)
            .map(|(address, voting_power)| CommitteeMember {
                address,
                voting_power,
            })
            .collect();

        members.sort_by(|a, b| {
            b.voting_power
                .cmp(&a.voting_power)
                .then_with(|| a.address.cmp(&b.address))
        });
        members.dedup_by(|a, b| a.address == b.address);

        let total_power = members.iter().map(|m| u128::from(m.voting_power)).sum();
        let index = members
            .iter()
            .enumerate()
            .map(|(i, m)| (m.address, i))
            .collect();

        Self {
            members,
            index,
            total_power,
        }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn total_power(&self) -> u128 {
        self.total_power
    }

    /// Returns the member at the given schedule index.
    pub fn get(&self, index: usize) -> Option<&CommitteeMember> {
        self.members.get(index)
    }

    pub fn member(&self, address: &Pubkey) -> Option<&CommitteeMember> {
        self.index.get(address).and_then(|&i| self.members.get(i))
    }

    /// Returns the voting power of a member, or 0 if not in the committee.
    pub fn power_of(&self, address: &Pubkey) -> u64 {
        self.member(address).map(|m| m.voting_power).unwrap_or(0)
    }

    pub fn contains(&self, address: &Pubkey) -> bool {
        self.index.contains_key(address)
    }

    /// Byzantine quorum: `floor(2 * total / 3) + 1`.
    pub fn quorum(&self) -> u128 {
        self.total_power
            .saturating_mul(2)
            .checked_div(3)
            .unwrap_or(0)
            .saturating_add(1)
    }

    /// Members in schedule order.
    pub fn iter(&self) -> impl Iterator<Item = &CommitteeMember> {
        self.members.iter()
    }

    pub fn addresses(&self) -> Vec<Pubkey> {
        self.members.iter().map(|m| m.address).collect()
    }
}

#[cfg(test)]
mod tests {
    use {super::*, test_case::test_case};

    fn make_pubkeys(n: usize) -> Vec<Pubkey> {
        (0..n).map(|_| Pubkey::new_unique()).collect()
    }

    #[test]
    fn test_new_committee_sorted_by_power_desc() {
        let pks = make_pubkeys(3);
        let committee = Committee::new(vec![(pks[0], 100), (pks[1], 300), (pks[2], 200)]);
        assert_eq!(committee.len(), 3);
        assert_eq!(committee.get(0).unwrap().voting_power, 300);
        assert_eq!(committee.get(1).unwrap().voting_power, 200);
        assert_eq!(committee.get(2).unwrap().voting_power, 100);
        assert_eq!(committee.total_power(), 600);
    }

    #[test]
    fn test_ties_broken_by_address() {
        let mut pks = make_pubkeys(3);
        let committee = Committee::new(pks.iter().map(|pk| (*pk, 10)).collect());
        pks.sort();
        assert_eq!(committee.addresses(), pks);
    }

    #[test]
    fn test_zero_power_and_duplicates_dropped() {
        let pks = make_pubkeys(2);
        let committee = Committee::new(vec![(pks[0], 0), (pks[1], 5), (pks[1], 5)]);
        assert_eq!(committee.len(), 1);
        assert!(!committee.contains(&pks[0]));
        assert_eq!(committee.power_of(&pks[1]), 5);
        assert_eq!(committee.total_power(), 5);
    }

    #[test]
    fn test_member_lookup() {
        let pks = make_pubkeys(2);
        let committee = Committee::new(vec![(pks[0], 7), (pks[1], 9)]);
        assert_eq!(committee.member(&pks[0]).unwrap().voting_power, 7);
        assert_eq!(committee.power_of(&Pubkey::new_unique()), 0);
    }

    #[test_case(&[1], 1 ; "single member")]
    #[test_case(&[1, 1, 1], 3 ; "three equal")]
    #[test_case(&[1, 1, 1, 1], 3 ; "four equal")]
    #[test_case(&[100, 100, 100, 100], 267 ; "four hundreds")]
    #[test_case(&[10, 20, 30], 41 ; "uneven")]
    fn test_quorum(powers: &[u64], expected: u128) {
        let committee = Committee::new(
            powers
                .iter()
                .map(|p| (Pubkey::new_unique(), *p))
                .collect(),
        );
        assert_eq!(committee.quorum(), expected);
    }

    #[test]
    fn test_quorum_does_not_overflow() {
        let committee = Committee::new(vec![
            (Pubkey::new_unique(), u64::MAX),
            (Pubkey::new_unique(), u64::MAX),
        ]);
        let total = u128::from(u64::MAX) * 2;
        assert_eq!(committee.quorum(), total * 2 / 3 + 1);
    }

    #[test]
    fn test_empty_committee() {
        let committee = Committee::default();
        assert!(committee.is_empty());
        assert_eq!(committee.quorum(), 1);
    }
}
