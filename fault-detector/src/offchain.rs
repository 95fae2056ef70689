//! Off-chain accusation protocol.
//!
//! Before an accusation goes on chain it is sent straight to the accused
//! validator, which can answer with an innocence proof and spare both sides
//! the on-chain round trip. Accusations that stay unanswered for
//! `DELTA_BLOCKS + OFFCHAIN_WINDOW` blocks are escalated.
//!
//! ```text
//!   accuser                                   accused
//!   ───────                                   ───────
//!   PendingAccusations.add ── Accusation ──▶  rate limit, cached reply,
//!                                             dedup, signature, valid_accusation
//!                                             innocence_proof(store)
//!   PendingAccusations.remove ◀─ Innocence ── InnocenceCache
//! ```
//!
//! Every [`OffChainError`] returned by [`OffChainProtocol::handle_message`]
//! means the caller should disconnect the peer.

use {
    crate::{
        chain::{Broadcaster, ChainContext},
        error::{FaultDetectorError, OffChainError, Result},
        proof_queue::ProofQueue,
        wire::OffChainMessage,
    },
    log::*,
    lru::LruCache,
    parking_lot::{Mutex, RwLock},
    solana_hash::Hash,
    solana_pubkey::Pubkey,
    std::{
        collections::{HashMap, VecDeque},
        sync::Arc,
    },
    trv1_accountability::{
        config::{
            DELTA_BLOCKS, HEIGHT_RANGE, MAX_ACCUSATION_RATE_PER_HEIGHT,
            MAX_ACCUSATION_RATE_PER_SECOND, OFFCHAIN_WINDOW,
        },
        innocence_proof, valid_accusation, valid_innocence, verify_proof_signatures,
        AccountabilityError, AccountabilityProof, MessageStore, ProofType, Rule,
        SignatureVerifier,
    },
};

// ---------------------------------------------------------------------------
// Rate limiting
// ---------------------------------------------------------------------------

/// Per-peer counters for inbound off-chain proofs.
#[derive(Debug, Default)]
pub struct RateLimiter {
    per_second: Mutex<HashMap<Pubkey, usize>>,
    per_height: Mutex<HashMap<(Pubkey, u64), usize>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one interaction from `peer` in the current window. Returns
    /// `false` once the peer exceeds the per-window cap.
    pub fn check_window(&self, peer: &Pubkey) -> bool {
        let mut counts = self.per_second.lock();
        let count = counts.entry(*peer).or_insert(0);
        *count = count.saturating_add(1);
        *count <= MAX_ACCUSATION_RATE_PER_SECOND
    }

    /// Count one accusation from `peer` about `height`. Returns `false` once
    /// the peer exceeds the per-height cap.
    pub fn check_height(&self, peer: &Pubkey, height: u64) -> bool {
        let mut counts = self.per_height.lock();
        let count = counts.entry((*peer, height)).or_insert(0);
        *count = count.saturating_add(1);
        *count <= MAX_ACCUSATION_RATE_PER_HEIGHT
    }

    pub fn reset_window(&self) {
        self.per_second.lock().clear();
    }

    pub fn reset_heights(&self) {
        self.per_height.lock().clear();
    }
}

// ---------------------------------------------------------------------------
// Caches
// ---------------------------------------------------------------------------

/// Recently seen payload digests.
pub struct DuplicateCache {
    seen: Mutex<LruCache<Hash, ()>>,
}

impl DuplicateCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            seen: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Record `digest`; returns `true` if it was already present.
    pub fn check_and_insert(&self, digest: Hash) -> bool {
        let mut seen = self.seen.lock();
        if seen.contains(&digest) {
            return true;
        }
        seen.put(digest, ());
        false
    }

    pub fn clear(&self) {
        self.seen.lock().clear();
    }
}

#[derive(Default)]
struct InnocenceEntries {
    order: VecDeque<Hash>,
    proofs: HashMap<Hash, Vec<u8>>,
}

/// Innocence replies keyed by the digest of the accusation they answer,
/// evicted first-in first-out.
pub struct InnocenceCache {
    capacity: usize,
    entries: Mutex<InnocenceEntries>,
}

impl InnocenceCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(InnocenceEntries::default()),
        }
    }

    pub fn get(&self, accusation: &Hash) -> Option<Vec<u8>> {
        self.entries.lock().proofs.get(accusation).cloned()
    }

    pub fn insert(&self, accusation: Hash, reply: Vec<u8>) {
        let mut entries = self.entries.lock();
        if entries.proofs.insert(accusation, reply).is_some() {
            return;
        }
        entries.order.push_back(accusation);
        while entries.order.len() > self.capacity {
            if let Some(oldest) = entries.order.pop_front() {
                entries.proofs.remove(&oldest);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ---------------------------------------------------------------------------
// Sending side
// ---------------------------------------------------------------------------

/// Accusations sent off chain and still waiting for an answer. Bounded;
/// the oldest accusation is dropped when full.
#[derive(Debug)]
pub struct PendingAccusations {
    proofs: Mutex<ProofQueue>,
}

impl PendingAccusations {
    pub fn new(capacity: usize) -> Self {
        Self {
            proofs: Mutex::new(ProofQueue::new(capacity)),
        }
    }

    pub fn add(&self, proof: AccountabilityProof) {
        self.proofs.lock().push(proof);
    }

    /// Drop the accusation answered by an innocence proof.
    pub fn remove(&self, rule: Rule, msg_hash: &Hash) -> bool {
        !self
            .proofs
            .lock()
            .extract(|p| p.rule == rule && p.msg_hash() == *msg_hash)
            .is_empty()
    }

    /// Remove and return accusations left unanswered for longer than
    /// `DELTA_BLOCKS + OFFCHAIN_WINDOW` blocks at `head`.
    pub fn drain_expired(&self, head: u64) -> Vec<AccountabilityProof> {
        let deadline = DELTA_BLOCKS.saturating_add(OFFCHAIN_WINDOW);
        self.proofs
            .lock()
            .extract(|p| head.saturating_sub(p.message.height()) > deadline)
    }

    pub fn len(&self) -> usize {
        self.proofs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ---------------------------------------------------------------------------
// Protocol
// ---------------------------------------------------------------------------

/// Both sides of the off-chain protocol for one validator.
pub struct OffChainProtocol {
    address: Pubkey,
    chain: Arc<dyn ChainContext>,
    signatures: Arc<dyn SignatureVerifier>,
    store: Arc<RwLock<MessageStore>>,
    broadcaster: Arc<dyn Broadcaster>,
    max_msg_size: usize,
    limiter: RateLimiter,
    duplicates: DuplicateCache,
    innocence: InnocenceCache,
    pending: PendingAccusations,
}

impl OffChainProtocol {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        address: Pubkey,
        chain: Arc<dyn ChainContext>,
        signatures: Arc<dyn SignatureVerifier>,
        store: Arc<RwLock<MessageStore>>,
        broadcaster: Arc<dyn Broadcaster>,
        max_msg_size: usize,
        duplicate_capacity: usize,
        innocence_capacity: usize,
        pending_capacity: usize,
    ) -> Self {
        Self {
            address,
            chain,
            signatures,
            store,
            broadcaster,
            max_msg_size,
            limiter: RateLimiter::new(),
            duplicates: DuplicateCache::new(duplicate_capacity),
            innocence: InnocenceCache::new(innocence_capacity),
            pending: PendingAccusations::new(pending_capacity),
        }
    }

    pub fn pending(&self) -> &PendingAccusations {
        &self.pending
    }

    pub fn innocence_cache(&self) -> &InnocenceCache {
        &self.innocence
    }

    /// Send `accusation` to the accused validator and track it until it is
    /// answered or expires.
    pub fn send_accusation(&self, accusation: AccountabilityProof) -> Result<()> {
        let target = *accusation.sender();
        let framed = OffChainMessage::from_proof(&accusation)?.serialize_framed(self.max_msg_size)?;
        self.broadcaster
            .send_to(&target, framed)
            .map_err(FaultDetectorError::Collaborator)?;
        debug!(
            "FaultDetector: sent off-chain {} accusation to {target}",
            accusation.rule
        );
        self.pending.add(accusation);
        Ok(())
    }

    /// Handle one inbound message from `peer`.
    pub fn handle_message(
        &self,
        peer: &Pubkey,
        msg: &OffChainMessage,
    ) -> std::result::Result<(), OffChainError> {
        if !self.limiter.check_window(peer) {
            return Err(OffChainError::RateLimitExceeded(*peer));
        }

        let digest = msg.digest();
        if let Some(reply) = self.innocence.get(&digest) {
            self.reply(peer, reply);
            return Ok(());
        }

        if self.duplicates.check_and_insert(digest) {
            return Err(OffChainError::Duplicate(*peer));
        }

        let proof = AccountabilityProof::decode(&msg.payload)
            .map_err(|err| OffChainError::Garbage(err.to_string()))?;
        let height = proof.message.height();

        let committee = self
            .chain
            .committee_at(height.saturating_sub(1))
            .filter(|_| height > 0)
            .ok_or(OffChainError::NoParentHeader(height))?;
        if !committee.contains(peer) {
            return Err(OffChainError::NotValidator(*peer));
        }

        if !self.limiter.check_height(peer, height) {
            return Err(OffChainError::RateLimitExceeded(*peer));
        }

        verify_proof_signatures(self.signatures.as_ref(), &committee, &proof).map_err(
            |err| match err {
                AccountabilityError::Garbage(reason) => OffChainError::Garbage(reason.to_string()),
                _ => OffChainError::InvalidSignature,
            },
        )?;

        match proof.proof_type {
            ProofType::Accusation => self.handle_accusation(peer, digest, proof),
            ProofType::Innocence => {
                if proof.sender() != peer {
                    return Err(OffChainError::InvalidInnocence("sender is not the accused"));
                }
                if !valid_innocence(&proof, &committee) {
                    return Err(OffChainError::InvalidInnocence("proof does not verify"));
                }
                if self.pending.remove(proof.rule, &proof.msg_hash()) {
                    info!(
                        "FaultDetector: {peer} answered {} accusation off chain",
                        proof.rule
                    );
                }
                Ok(())
            }
            ProofType::Misbehaviour => Err(OffChainError::UnexpectedProofType),
        }
    }

    /// Reset the per-window counters. Called on every tick.
    pub fn reset_rate_window(&self) {
        self.limiter.reset_window();
    }

    /// Reset the per-height counters and the duplicate cache.
    pub fn reset_height_state(&self) {
        self.limiter.reset_heights();
        self.duplicates.clear();
    }

    fn handle_accusation(
        &self,
        peer: &Pubkey,
        digest: Hash,
        accusation: AccountabilityProof,
    ) -> std::result::Result<(), OffChainError> {
        if *accusation.sender() != self.address {
            return Err(OffChainError::InvalidAccusation("not addressed to this validator"));
        }
        let head = self.chain.current_height();
        let height = accusation.message.height();
        if head > HEIGHT_RANGE && height < head.saturating_sub(HEIGHT_RANGE) {
            return Err(OffChainError::InvalidAccusation("height out of range"));
        }
        if !valid_accusation(&accusation, head) {
            return Err(OffChainError::InvalidAccusation("accusation does not verify"));
        }

        let committee = self
            .chain
            .committee_at(height.saturating_sub(1))
            .ok_or(OffChainError::NoParentHeader(height))?;
        let innocence = {
            let store = self.store.read();
            innocence_proof(&store, &committee, &accusation)
        };
        let innocence = match innocence {
            Ok(proof) => proof,
            Err(err) => {
                warn!("FaultDetector: cannot answer {} accusation from {peer}: {err}", accusation.rule);
                return Ok(());
            }
        };

        let framed = OffChainMessage::from_proof(&innocence)
            .and_then(|msg| msg.serialize_framed(self.max_msg_size));
        match framed {
            Ok(reply) => {
                self.innocence.insert(digest, reply.clone());
                self.reply(peer, reply);
            }
            Err(err) => {
                warn!("FaultDetector: innocence proof for {} not sent off chain: {err}", accusation.rule);
            }
        }
        Ok(())
    }

    fn reply(&self, peer: &Pubkey, payload: Vec<u8>) {
        if let Err(err) = self.broadcaster.send_to(peer, payload) {
            warn!("FaultDetector: failed to send innocence proof to {peer}: {err}");
        }
    }
}
