//! TRv1 Accountability Integration Tests
//!
//! End-to-end tests for the accountability engine and the fault detector
//! service running against in-memory chain fakes.
//!
//! # Areas Tested
//!
//! 1. **Rules and verifiers**: every rule produces proofs that the matching
//!    on-chain verifier accepts, and innocence proofs rebut accusations.
//! 2. **Fault detector**: message intake, reporting slots, chunked events,
//!    and verifier registration across the service lifecycle.
//! 3. **Off-chain protocol**: accusation and innocence exchange between two
//!    running detectors, and escalation when the accused stays silent.

pub mod harness;


#[cfg(test)]
mod detector_tests;
