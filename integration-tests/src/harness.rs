//! TRv1 Accountability Test Harness
//!
//! A lightweight cluster for integration-testing the accountability engine
//! and the fault detector:
//!
//! - A committee of test validators with signing keys
//! - Builders for signed proposals, prevotes and precommits
//! - In-memory chain, transaction pool and broadcaster (from
//!   `trv1_fault_detector::testing`)
//! - A running [`FaultDetector`] wired to channels the test drives
//!
//! No node is started; heads and consensus messages are pushed by hand.

use {
    crossbeam_channel::{unbounded, Sender},
    solana_hash::Hash,
    solana_keypair::Keypair,
    solana_pubkey::Pubkey,
    solana_signer::Signer,
    std::{
        sync::Arc,
        thread,
        time::{Duration, Instant},
    },
    trv1_accountability::{
        encode_verifier_input, is_success, proposer_for_round, AccountabilityConfig,
        AccountabilityProof, Committee,
        ConsensusMessage, Ed25519Verifier, ProofType, ProposedBlock, VerifierRegistry,
        ACCUSATION_VERIFIER_ADDRESS, INNOCENCE_VERIFIER_ADDRESS, MISBEHAVIOUR_VERIFIER_ADDRESS,
    },
    trv1_fault_detector::{
        testing::{FakeBroadcaster, FakeChain, FakeTxPool},
        FaultDetector, FaultDetectorConfig, OffChainMessage,
    },
};

// ─── Constants ───────────────────────────────────────────────────────────────

/// Default number of validators in a test committee.
pub const DEFAULT_VALIDATOR_COUNT: usize = 4;

/// Voting power given to each validator unless stated otherwise.
pub const DEFAULT_POWER: u64 = 100;

/// How long to wait for a background loop to make progress.
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(10);

// ─── Test validator ──────────────────────────────────────────────────────────

/// A committee member with its signing key.
#[derive(Debug)]
pub struct TestValidator {
    pub keypair: Keypair,
    pub power: u64,
}

impl TestValidator {
    pub fn new(power: u64) -> Self {
        Self {
            keypair: Keypair::new(),
            power,
        }
    }

    pub fn pubkey(&self) -> Pubkey {
        self.keypair.pubkey()
    }

    pub fn prevote(&self, height: u64, round: u32, value: Option<Hash>) -> ConsensusMessage {
        ConsensusMessage::new_prevote(&self.keypair, height, round, value)
    }

    pub fn precommit(&self, height: u64, round: u32, value: Option<Hash>) -> ConsensusMessage {
        ConsensusMessage::new_precommit(&self.keypair, height, round, value)
    }

    /// A proposal signed by this validator, whether or not it is the
    /// round's proposer.
    pub fn proposal(&self, height: u64, round: u32, valid_round: Option<u32>) -> ConsensusMessage {
        ConsensusMessage::new_proposal(
            &self.keypair,
            height,
            round,
            valid_round,
            test_block(height, self.pubkey()),
        )
    }
}

/// A block with a random state root, so every call yields a new value.
pub fn test_block(height: u64, proposer: Pubkey) -> ProposedBlock {
    ProposedBlock {
        parent_hash: Hash::default(),
        height,
        timestamp: i64::try_from(height)
            .unwrap_or(i64::MAX)
            .saturating_mul(1_000),
        state_root: Hash::new_unique(),
        proposer,
        payload: Vec::new(),
    }
}

// ─── Test cluster ────────────────────────────────────────────────────────────

/// A fixed committee of test validators, ordered like the [`Committee`].
pub struct TestCluster {
    pub validators: Vec<TestValidator>,
    pub committee: Committee,
}

impl Default for TestCluster {
    fn default() -> Self {
        Self::new(DEFAULT_VALIDATOR_COUNT)
    }
}

impl TestCluster {
    /// Create `n` validators with equal power.
    pub fn new(n: usize) -> Self {
        Self::with_powers(&vec![DEFAULT_POWER; n])
    }

    pub fn with_powers(powers: &[u64]) -> Self {
        let validators: Vec<TestValidator> =
            powers.iter().map(|p| TestValidator::new(*p)).collect();
        let committee = Committee::new(validators.iter().map(|v| (v.pubkey(), v.power)).collect());
        let mut validators = validators;
        validators.sort_by_key(|v| {
            committee
                .iter()
                .position(|m| m.address == v.pubkey())
                .unwrap_or(usize::MAX)
        });
        Self {
            validators,
            committee,
        }
    }

    /// Validator at committee index `i`.
    pub fn validator(&self, i: usize) -> &TestValidator {
        &self.validators[i]
    }

    pub fn by_address(&self, address: &Pubkey) -> &TestValidator {
        self.validators
            .iter()
            .find(|v| v.pubkey() == *address)
            .expect("address is a cluster member")
    }

    pub fn proposer(&self, height: u64, round: u32) -> &TestValidator {
        let address = proposer_for_round(&self.committee, height, round).expect("non-empty committee");
        self.by_address(&address)
    }

    /// Any validator that is not the proposer of (height, round).
    pub fn non_proposer(&self, height: u64, round: u32) -> &TestValidator {
        let proposer = self.proposer(height, round).pubkey();
        self.validators
            .iter()
            .find(|v| v.pubkey() != proposer)
            .expect("committee has more than one member")
    }

    /// A proposal from the legitimate proposer of (height, round).
    pub fn proposal(&self, height: u64, round: u32, valid_round: Option<u32>) -> ConsensusMessage {
        self.proposer(height, round).proposal(height, round, valid_round)
    }

    /// Prevotes for `value` from the first `count` validators.
    pub fn prevotes(
        &self,
        count: usize,
        height: u64,
        round: u32,
        value: Option<Hash>,
    ) -> Vec<ConsensusMessage> {
        self.validators[..count]
            .iter()
            .map(|v| v.prevote(height, round, value))
            .collect()
    }

    /// Fake chain sharing this cluster's committee at every height.
    pub fn chain(&self, head: u64) -> Arc<FakeChain> {
        Arc::new(FakeChain::new(self.committee.clone(), head))
    }
}

// ─── Verifier helpers ────────────────────────────────────────────────────────

/// Run `proof` through the registered verifier for its type.
pub fn verify_on_chain(registry: &VerifierRegistry, proof: &AccountabilityProof, block: u64) -> bool {
    let address = match proof.proof_type {
        ProofType::Accusation => ACCUSATION_VERIFIER_ADDRESS,
        ProofType::Misbehaviour => MISBEHAVIOUR_VERIFIER_ADDRESS,
        ProofType::Innocence => INNOCENCE_VERIFIER_ADDRESS,
    };
    let Some(verifier) = registry.get(&address) else {
        return false;
    };
    let input = encode_verifier_input(proof).expect("proof encodes");
    is_success(&verifier.run(&input, block))
}

/// A registry with the accountability verifiers installed over `chain`.
pub fn verifier_registry(chain: Arc<FakeChain>) -> VerifierRegistry {
    let registry = VerifierRegistry::new();
    registry.register_accountability_verifiers(
        chain,
        Arc::new(Ed25519Verifier),
        &AccountabilityConfig::default(),
    );
    registry
}

// ─── Detector node ───────────────────────────────────────────────────────────

/// A running fault detector with the fakes it talks to.
pub struct DetectorNode {
    pub address: Pubkey,
    pub chain: Arc<FakeChain>,
    pub pool: Arc<FakeTxPool>,
    pub broadcaster: Arc<FakeBroadcaster>,
    pub registry: Arc<VerifierRegistry>,
    pub detector: FaultDetector,
    pub msgs: Sender<Vec<u8>>,
    pub heads: Sender<u64>,
}

impl DetectorNode {
    /// Start a detector for `address` over `chain`.
    pub fn start(address: Pubkey, chain: Arc<FakeChain>, config: FaultDetectorConfig) -> Self {
        let pool = Arc::new(FakeTxPool::default());
        let broadcaster = Arc::new(FakeBroadcaster::default());
        let registry = Arc::new(VerifierRegistry::new());
        let mut detector = FaultDetector::new(
            address,
            config,
            chain.clone(),
            pool.clone(),
            broadcaster.clone(),
            Arc::new(Ed25519Verifier),
            registry.clone(),
        )
        .expect("valid detector config");
        let (msgs, msg_rx) = unbounded();
        let (heads, head_rx) = unbounded();
        detector.start(msg_rx, head_rx).expect("detector starts");
        Self {
            address,
            chain,
            pool,
            broadcaster,
            registry,
            detector,
            msgs,
            heads,
        }
    }

    /// Feed a consensus message as raw bytes.
    pub fn deliver(&self, msg: &ConsensusMessage) {
        self.msgs
            .send(bincode::serialize(msg).expect("message encodes"))
            .expect("detector is running");
    }

    /// Advance the chain head through every height in `heights`.
    pub fn advance(&self, heights: impl IntoIterator<Item = u64>) {
        for head in heights {
            self.chain.set_head(head);
            self.heads.send(head).expect("detector is running");
        }
    }

    /// Block until the store holds `count` messages.
    pub fn wait_for_store_len(&self, count: usize) -> bool {
        let store = self.detector.store();
        wait_until(|| store.read().len() >= count)
    }
}

impl Drop for DetectorNode {
    fn drop(&mut self) {
        self.detector.stop();
    }
}

// ─── Misc ────────────────────────────────────────────────────────────────────

/// Poll `cond` until it holds or [`WAIT_TIMEOUT`] expires.
pub fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT_TIMEOUT;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    cond()
}

/// Strip the frame header from a payload sent by a [`FakeBroadcaster`].
pub fn unframe(payload: &[u8]) -> OffChainMessage {
    let header: [u8; 4] = payload[..4].try_into().expect("framed payload");
    let len = OffChainMessage::read_frame_len(&header);
    let body = &payload[4..];
    assert_eq!(body.len(), len, "frame length mismatch");
    OffChainMessage::deserialize(body).expect("valid off-chain message")
}

/// Initialize env_logger once for test output.
pub fn init_logging() {
    let _ = env_logger::builder()
        .is_test(true)
        .filter_level(log::LevelFilter::Info)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_timestamps_follow_height() {
        let proposer = Pubkey::new_unique();
        assert_eq!(test_block(7, proposer).timestamp, 7_000);
        assert_eq!(test_block(u64::MAX, proposer).timestamp, i64::MAX);
        assert_ne!(
            test_block(7, proposer).hash(),
            test_block(7, proposer).hash()
        );
    }
}
