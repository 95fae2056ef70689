//! In-memory collaborators for tests.

use {
    crate::chain::{AccountabilityTransaction, Broadcaster, ChainContext, TxPool},
    parking_lot::{Mutex, RwLock},
    solana_pubkey::Pubkey,
    std::{
        collections::{HashMap, HashSet},
        sync::{
            atomic::{AtomicU64, Ordering},
            Arc,
        },
    },
    trv1_accountability::{AccountabilityEvent, Committee, CommitteeProvider},
};

/// Chain state held in memory. Every height shares one committee unless
/// overridden with [`FakeChain::set_committee`].
pub struct FakeChain {
    head: AtomicU64,
    committee: RwLock<Arc<Committee>>,
    overrides: RwLock<HashMap<u64, Option<Arc<Committee>>>>,
    accusations: RwLock<Vec<AccountabilityEvent>>,
    processed: RwLock<HashSet<(u8, u8, Pubkey, [u8; 32])>>,
    gas_limit: AtomicU64,
    gas_per_byte: AtomicU64,
}

impl FakeChain {
    pub fn new(committee: Committee, head: u64) -> Self {
        Self {
            head: AtomicU64::new(head),
            committee: RwLock::new(Arc::new(committee)),
            overrides: RwLock::new(HashMap::new()),
            accusations: RwLock::new(Vec::new()),
            processed: RwLock::new(HashSet::new()),
            gas_limit: AtomicU64::new(u64::MAX),
            gas_per_byte: AtomicU64::new(1),
        }
    }

    pub fn set_head(&self, head: u64) {
        self.head.store(head, Ordering::SeqCst);
    }

    /// Override the committee at `height`; `None` makes it unknown.
    pub fn set_committee(&self, height: u64, committee: Option<Committee>) {
        self.overrides
            .write()
            .insert(height, committee.map(Arc::new));
    }

    /// Committees above `height` become unknown.
    pub fn hide_committees_above(&self, height: u64, up_to: u64) {
        let mut overrides = self.overrides.write();
        for h in height.saturating_add(1)..=up_to {
            overrides.insert(h, None);
        }
    }

    pub fn reveal_committee(&self, height: u64) {
        self.overrides.write().remove(&height);
    }

    pub fn add_accusation(&self, event: AccountabilityEvent) {
        self.accusations.write().push(event);
    }

    pub fn mark_processed(&self, event: &AccountabilityEvent) {
        self.processed.write().insert(Self::key(event));
    }

    pub fn set_block_gas_limit(&self, limit: u64) {
        self.gas_limit.store(limit, Ordering::SeqCst);
    }

    pub fn set_gas_per_byte(&self, gas: u64) {
        self.gas_per_byte.store(gas, Ordering::SeqCst);
    }

    fn key(event: &AccountabilityEvent) -> (u8, u8, Pubkey, [u8; 32]) {
        (
            event.event_type,
            event.rule,
            event.sender,
            event.msg_hash.to_bytes(),
        )
    }
}

impl CommitteeProvider for FakeChain {
    fn committee_at(&self, height: u64) -> Option<Arc<Committee>> {
        if let Some(entry) = self.overrides.read().get(&height) {
            return entry.clone();
        }
        Some(self.committee.read().clone())
    }
}

impl ChainContext for FakeChain {
    fn current_height(&self) -> u64 {
        self.head.load(Ordering::SeqCst)
    }

    fn pending_accusations_against(&self, validator: &Pubkey) -> Vec<AccountabilityEvent> {
        let processed = self.processed.read();
        self.accusations
            .read()
            .iter()
            .filter(|e| e.sender == *validator && !processed.contains(&Self::key(e)))
            .cloned()
            .collect()
    }

    fn is_processed(&self, event: &AccountabilityEvent) -> bool {
        self.processed.read().contains(&Self::key(event))
    }

    fn block_gas_limit(&self) -> u64 {
        self.gas_limit.load(Ordering::SeqCst)
    }

    fn estimate_gas(&self, event: &AccountabilityEvent) -> u64 {
        let len = u64::try_from(event.raw_proof.len()).unwrap_or(u64::MAX);
        len.saturating_mul(self.gas_per_byte.load(Ordering::SeqCst))
    }
}

/// Transaction pool that records submissions.
#[derive(Default)]
pub struct FakeTxPool {
    submitted: Mutex<Vec<AccountabilityTransaction>>,
}

impl FakeTxPool {
    pub fn submitted(&self) -> Vec<AccountabilityTransaction> {
        self.submitted.lock().clone()
    }
}

impl TxPool for FakeTxPool {
    fn nonce(&self, sender: &Pubkey) -> u64 {
        let count = self
            .submitted
            .lock()
            .iter()
            .filter(|tx| tx.sender == *sender)
            .count();
        u64::try_from(count).unwrap_or(u64::MAX)
    }

    fn submit(&self, tx: AccountabilityTransaction) -> Result<(), String> {
        self.submitted.lock().push(tx);
        Ok(())
    }
}

/// Broadcaster that records outgoing payloads.
#[derive(Default)]
pub struct FakeBroadcaster {
    sent: Mutex<Vec<(Pubkey, Vec<u8>)>>,
}

impl FakeBroadcaster {
    pub fn sent(&self) -> Vec<(Pubkey, Vec<u8>)> {
        self.sent.lock().clone()
    }

    pub fn take(&self) -> Vec<(Pubkey, Vec<u8>)> {
        std::mem::take(&mut *self.sent.lock())
    }
}

impl Broadcaster for FakeBroadcaster {
    fn send_to(&self, validator: &Pubkey, payload: Vec<u8>) -> Result<(), String> {
        self.sent.lock().push((*validator, payload));
        Ok(())
    }
}
