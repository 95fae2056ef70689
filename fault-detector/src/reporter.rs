//! Transaction issuance for accountability events.
//!
//! Each event travels in its own transaction. Events too large for one
//! transaction (by gas or by encoded size) are split into chunk events,
//! shrinking the chunk size step by step until every chunk fits.

use {
    crate::{
        chain::{AccountabilityTransaction, ChainContext, TxPool},
        config::FaultDetectorConfig,
        error::{FaultDetectorError, Result},
    },
    log::*,
    solana_pubkey::Pubkey,
    std::sync::Arc,
    trv1_accountability::AccountabilityEvent,
};

pub struct Reporter {
    address: Pubkey,
    chain: Arc<dyn ChainContext>,
    pool: Arc<dyn TxPool>,
    default_chunk_size: usize,
    min_chunk_size: usize,
    chunk_size_step: usize,
    max_tx_size: usize,
}

impl Reporter {
    pub fn new(
        address: Pubkey,
        chain: Arc<dyn ChainContext>,
        pool: Arc<dyn TxPool>,
        config: &FaultDetectorConfig,
    ) -> Self {
        Self {
            address,
            chain,
            pool,
            default_chunk_size: config.default_chunk_size,
            min_chunk_size: config.min_chunk_size,
            chunk_size_step: config.chunk_size_step,
            max_tx_size: config.max_tx_size,
        }
    }

    /// Split `event` into transaction-sized pieces. An event that already
    /// fits is returned unchanged.
    pub fn prepare(&self, event: AccountabilityEvent) -> Result<Vec<AccountabilityEvent>> {
        if self.fits(&event)? {
            return Ok(vec![event]);
        }

        let mut chunk_size = self.default_chunk_size;
        while chunk_size >= self.min_chunk_size {
            let parts = event.split(chunk_size)?;
            let mut all_fit = true;
            for part in &parts {
                if !self.fits(part)? {
                    all_fit = false;
                    break;
                }
            }
            if all_fit {
                debug!(
                    "FaultDetector: split {} byte proof into {} chunks of {chunk_size}",
                    event.raw_proof.len(),
                    parts.len()
                );
                return Ok(parts);
            }
            if chunk_size == 0 || self.chunk_size_step == 0 {
                break;
            }
            chunk_size = chunk_size.saturating_sub(self.chunk_size_step);
        }
        Err(FaultDetectorError::NoFittingChunkSize(event.raw_proof.len()))
    }

    /// Submit every event, one transaction per (chunk) event, with
    /// consecutive nonces. Returns the number of transactions submitted.
    pub fn submit_events(&self, events: Vec<AccountabilityEvent>) -> usize {
        let mut nonce = self.pool.nonce(&self.address);
        let mut submitted = 0usize;
        for event in events {
            let parts = match self.prepare(event) {
                Ok(parts) => parts,
                Err(err) => {
                    warn!("FaultDetector: dropping event that cannot be submitted: {err}");
                    continue;
                }
            };
            for part in parts {
                let tx = AccountabilityTransaction {
                    nonce,
                    sender: self.address,
                    gas: self.chain.estimate_gas(&part),
                    event: part,
                };
                match self.pool.submit(tx) {
                    Ok(()) => {
                        nonce = nonce.saturating_add(1);
                        submitted = submitted.saturating_add(1);
                    }
                    Err(err) => {
                        error!("FaultDetector: failed to submit accountability tx: {err}");
                    }
                }
            }
        }
        submitted
    }

    fn fits(&self, event: &AccountabilityEvent) -> Result<bool> {
        if self.chain.estimate_gas(event) > self.chain.block_gas_limit() {
            return Ok(false);
        }
        let tx = AccountabilityTransaction {
            nonce: 0,
            sender: self.address,
            gas: 0,
            event: event.clone(),
        };
        let size = tx.encoded_len()?;
        Ok(usize::try_from(size).map_or(false, |size| size <= self.max_tx_size))
    }
}
