//! TRv1 Property-Based Invariant Tests
//!
//! Uses proptest to check the accountability invariants across:
//! - Quorum arithmetic and proposer selection
//! - Message store retention and slot semantics
//! - Proof encoding and event chunking

pub mod chunk_invariants;
pub mod quorum_invariants;
pub mod store_invariants;
