//! Collaborator seams: chain state, transaction pool, peer broadcast.
//!
//! The detector never talks to a concrete node; everything it needs from
//! the outside world comes through these traits.

use {
    serde::{Deserialize, Serialize},
    solana_pubkey::Pubkey,
    trv1_accountability::{AccountabilityEvent, CommitteeProvider},
};

/// Read access to chain state and the accountability contract.
pub trait ChainContext: CommitteeProvider {
    /// Height of the latest committed block.
    fn current_height(&self) -> u64;

    /// Accusation events on chain that target `validator` and are still
    /// awaiting an innocence proof. Chunked accusations are returned as
    /// their individual chunk events.
    fn pending_accusations_against(&self, validator: &Pubkey) -> Vec<AccountabilityEvent>;

    /// True if the contract already processed an event for the same
    /// (type, rule, sender, message hash).
    fn is_processed(&self, event: &AccountabilityEvent) -> bool;

    fn block_gas_limit(&self) -> u64;

    /// Gas the contract would charge for handling `event`.
    fn estimate_gas(&self, event: &AccountabilityEvent) -> u64;
}

/// Sink for signed accountability transactions.
pub trait TxPool: Send + Sync {
    /// Next nonce expected for `sender`.
    fn nonce(&self, sender: &Pubkey) -> u64;

    fn submit(&self, tx: AccountabilityTransaction) -> Result<(), String>;
}

/// Point-to-point delivery to another validator.
pub trait Broadcaster: Send + Sync {
    fn send_to(&self, validator: &Pubkey, payload: Vec<u8>) -> Result<(), String>;
}

/// One transaction carrying a single (possibly chunked) event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountabilityTransaction {
    pub nonce: u64,
    pub sender: Pubkey,
    pub gas: u64,
    pub event: AccountabilityEvent,
}

impl AccountabilityTransaction {
    pub fn encoded_len(&self) -> Result<u64, bincode::Error> {
        bincode::serialized_size(self)
    }
}
