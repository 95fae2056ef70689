//! Configuration for the fault detector.

use trv1_accountability::{config::ConfigError as AccountabilityConfigError, AccountabilityConfig};

/// Configuration for the fault detector service.
///
/// Protocol constants (rule delay, reporting period, height range) live in
/// `trv1_accountability::config`; this struct only holds local resource
/// limits and transaction sizing.
#[derive(Debug, Clone)]
pub struct FaultDetectorConfig {
    /// Verifier and proof-size settings shared with the accountability crate.
    pub accountability: AccountabilityConfig,

    /// Capacity of the future-height message buffer.
    /// Default: 1000.
    pub future_msg_capacity: usize,

    /// Capacity of the innocence-proof cache (FIFO).
    /// Default: 480.
    pub innocence_cache_capacity: usize,

    /// Capacity of the off-chain duplicate-payload cache (LRU).
    /// Default: 1024.
    pub duplicate_cache_capacity: usize,

    /// Capacity of the rule engine's queue of proofs awaiting the
    /// reporting slot. The oldest proof is evicted when full.
    /// Default: 1024.
    pub pending_event_capacity: usize,

    /// Capacity of the queue of off-chain accusations awaiting an answer.
    /// Default: 1024.
    pub pending_accusation_capacity: usize,

    /// Size of the bounded channels between loops.
    /// Default: 1024.
    pub channel_capacity: usize,

    /// Length of the off-chain per-peer interaction window (ms).
    /// Default: 1000.
    pub rate_window_ms: u64,

    /// Initial candidate chunk size when a proof must be split (bytes).
    /// Default: 32 KiB.
    pub default_chunk_size: usize,

    /// Smallest chunk size tried before giving up (bytes).
    /// Default: 16 KiB.
    pub min_chunk_size: usize,

    /// Amount the candidate chunk size shrinks per attempt (bytes).
    /// Default: 1 KiB.
    pub chunk_size_step: usize,

    /// Maximum encoded transaction size (bytes).
    /// Default: 512 KiB.
    pub max_tx_size: usize,

    /// Maximum framed off-chain message size (bytes).
    /// Default: 10 MiB.
    pub max_offchain_msg_size: usize,
}

impl Default for FaultDetectorConfig {
    fn default() -> Self {
        Self {
            accountability: AccountabilityConfig::default(),
            future_msg_capacity: 1000,
            innocence_cache_capacity: 480,
            duplicate_cache_capacity: 1024,
            pending_event_capacity: 1024,
            pending_accusation_capacity: 1024,
            channel_capacity: 1024,
            rate_window_ms: 1000,
            default_chunk_size: 32 * 1024,
            min_chunk_size: 16 * 1024,
            chunk_size_step: 1024,
            max_tx_size: 512 * 1024,
            max_offchain_msg_size: 10 * 1024 * 1024,
        }
    }
}

impl FaultDetectorConfig {
    /// Small buffers and chunks for local testing.
    #[cfg(any(test, feature = "dev-context-only-utils"))]
    pub fn dev_default() -> Self {
        Self {
            accountability: AccountabilityConfig::default(),
            future_msg_capacity: 16,
            innocence_cache_capacity: 8,
            duplicate_cache_capacity: 16,
            pending_event_capacity: 32,
            pending_accusation_capacity: 32,
            channel_capacity: 64,
            rate_window_ms: 50,
            default_chunk_size: 2 * 1024,
            min_chunk_size: 1024,
            chunk_size_step: 256,
            max_tx_size: 8 * 1024,
            max_offchain_msg_size: 64 * 1024,
        }
    }

    /// Validate configuration parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.accountability.validate()?;
        if self.future_msg_capacity == 0
            || self.innocence_cache_capacity == 0
            || self.duplicate_cache_capacity == 0
            || self.pending_event_capacity == 0
            || self.pending_accusation_capacity == 0
            || self.channel_capacity == 0
        {
            return Err(ConfigError::ZeroCapacity);
        }
        if self.max_offchain_msg_size == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if self.rate_window_ms == 0 {
            return Err(ConfigError::InvalidRateWindow);
        }
        if self.chunk_size_step == 0
            || self.min_chunk_size == 0
            || self.min_chunk_size > self.default_chunk_size
        {
            return Err(ConfigError::InvalidChunkSizes {
                min: self.min_chunk_size,
                default: self.default_chunk_size,
                step: self.chunk_size_step,
            });
        }
        if self.default_chunk_size >= self.max_tx_size {
            return Err(ConfigError::ChunkExceedsTxSize {
                chunk: self.default_chunk_size,
                max_tx: self.max_tx_size,
            });
        }
        Ok(())
    }
}

/// Errors in fault detector configuration.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error(transparent)]
    Accountability(#[from] AccountabilityConfigError),
    #[error("buffer and cache capacities must be > 0")]
    ZeroCapacity,
    #[error("rate_window_ms must be > 0")]
    InvalidRateWindow,
    #[error("invalid chunk sizes: min {min}, default {default}, step {step}")]
    InvalidChunkSizes {
        min: usize,
        default: usize,
        step: usize,
    },
    #[error("default chunk size {chunk} must be below max tx size {max_tx}")]
    ChunkExceedsTxSize { chunk: usize, max_tx: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = FaultDetectorConfig::default();
        assert_eq!(config.future_msg_capacity, 1000);
        assert_eq!(config.innocence_cache_capacity, 480);
        assert_eq!(config.pending_event_capacity, 1024);
        assert_eq!(config.default_chunk_size, 32 * 1024);
        assert_eq!(config.min_chunk_size, 16 * 1024);
        assert_eq!(config.max_tx_size, 512 * 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_dev_default_is_valid() {
        assert!(FaultDetectorConfig::dev_default().validate().is_ok());
    }

    #[test]
    fn test_zero_capacity() {
        let config = FaultDetectorConfig {
            future_msg_capacity: 0,
            ..FaultDetectorConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::ZeroCapacity)));
    }

    #[test]
    fn test_zero_pending_capacity() {
        for config in [
            FaultDetectorConfig {
                pending_event_capacity: 0,
                ..FaultDetectorConfig::default()
            },
            FaultDetectorConfig {
                pending_accusation_capacity: 0,
                ..FaultDetectorConfig::default()
            },
        ] {
            assert!(matches!(config.validate(), Err(ConfigError::ZeroCapacity)));
        }
    }

    #[test]
    fn test_min_chunk_above_default() {
        let config = FaultDetectorConfig {
            min_chunk_size: 64 * 1024,
            ..FaultDetectorConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidChunkSizes { .. })
        ));
    }

    #[test]
    fn test_nested_accountability_error() {
        let mut config = FaultDetectorConfig::default();
        config.accountability.verifier_gas_per_kb = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Accountability(_))
        ));
    }
}
