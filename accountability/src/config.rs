//! Accountability protocol constants and verifier configuration.
//!
//! The constants are consensus-critical: every node and every on-chain
//! verifier must agree on them, so they are not part of the runtime
//! configuration. [`AccountabilityConfig`] only carries the knobs that
//! affect local resource usage and gas pricing.

/// Highest round a consensus message may carry.
pub const MAX_ROUND: u32 = 99;

/// Number of heights behind the chain head for which proofs are accepted.
pub const HEIGHT_RANGE: u64 = 256;

/// Blocks the rule engine waits before scanning a height.
pub const DELTA_BLOCKS: u64 = 10;

/// Blocks per reporting slot in the round-robin reporter schedule.
pub const REPORTING_SLOT_PERIOD: u64 = 20;

/// Interval, in blocks, between message store garbage collections.
pub const MSG_GC_INTERVAL: u64 = 60;

/// Blocks a suspect has to answer an off-chain accusation.
pub const OFFCHAIN_WINDOW: u64 = 10;

/// Accusations accepted from, or raised against, one peer per height.
pub const MAX_ACCUSATION_RATE_PER_HEIGHT: usize = 4;

/// Off-chain interactions accepted from one peer per second.
pub const MAX_ACCUSATION_RATE_PER_SECOND: usize = MAX_ACCUSATION_RATE_PER_HEIGHT * 2;

/// Verifier output width in bytes.
pub const VERIFIER_OUTPUT_LEN: usize = 128;

/// Length of the big-endian size prefix in verifier input.
pub const VERIFIER_INPUT_PREFIX_LEN: usize = 32;

/// Runtime configuration for proof verification and sizing.
#[derive(Debug, Clone)]
pub struct AccountabilityConfig {
    /// Gas charged per started KiB of verifier input.
    /// Default: 1_000.
    pub verifier_gas_per_kb: u64,

    /// Largest encoded proof accepted by the verifiers and the off-chain
    /// channel, in bytes.
    /// Default: 512 KiB.
    pub max_proof_size: usize,
}

impl Default for AccountabilityConfig {
    fn default() -> Self {
        Self {
            verifier_gas_per_kb: 1_000,
            max_proof_size: 512 * 1024,
        }
    }
}

impl AccountabilityConfig {
    /// Validate configuration parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.verifier_gas_per_kb == 0 {
            return Err(ConfigError::InvalidGasPerKb);
        }
        if self.max_proof_size <= VERIFIER_INPUT_PREFIX_LEN {
            return Err(ConfigError::InvalidMaxProofSize(self.max_proof_size));
        }
        Ok(())
    }
}

/// Errors in accountability configuration.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("verifier_gas_per_kb must be > 0")]
    InvalidGasPerKb,
    #[error("max_proof_size must exceed the input prefix, got {0}")]
    InvalidMaxProofSize(usize),
}
