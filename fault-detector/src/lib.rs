//! TRv1 Accountability Fault Detector
//!
//! Watches the consensus message stream of one validator, stores it as
//! evidence, and reports provable faults of other committee members:
//!
//! 1. **Message handler** runs the auto-incriminating checks on every
//!    consensus message and stores admissible ones.
//! 2. **Rule engine** scans each height `DELTA_BLOCKS` after it was
//!    committed, answers accusations against this validator, sends new
//!    accusations off chain first, and reports during its reporting slot.
//! 3. **Tx issuance** wraps every event in a transaction, chunking proofs
//!    that exceed the gas or size limit.
//!
//! The chain, transaction pool and peer layer are reached only through the
//! traits in [`chain`].

pub mod chain;
pub mod config;
pub mod detector;
pub mod error;
pub mod future_buffer;
pub mod intake;
pub mod offchain;
pub mod proof_queue;
pub mod reporter;
#[cfg(any(test, feature = "dev-context-only-utils"))]
pub mod testing;
pub mod wire;

pub use chain::{AccountabilityTransaction, Broadcaster, ChainContext, TxPool};
pub use config::FaultDetectorConfig;
pub use detector::FaultDetector;
pub use error::{FaultDetectorError, OffChainError, Result};
pub use intake::{DropReason, IntakeOutcome, MessageIntake};
pub use offchain::OffChainProtocol;
pub use wire::OffChainMessage;
