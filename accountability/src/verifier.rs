//! On-chain proof verifiers.
//!
//! Three stateless verifiers re-check a submitted proof with the same
//! predicates the rule engine uses:
//!
//! ```text
//!   input = len (32 bytes, big-endian) ‖ bincode(AccountabilityProof)
//!
//!   ┌──────────────┐   ┌───────────────────┐   ┌───────────────────┐
//!   │  Accusation  │   │   Misbehaviour    │   │     Innocence     │
//!   │  0x…fc       │   │   0x…fd           │   │     0x…fe         │
//!   └──────┬───────┘   └─────────┬─────────┘   └─────────┬─────────┘
//!          └─────────────────────┼───────────────────────┘
//!                                ▼
//!   output = sender ‖ msg_hash ‖ 0…01 ‖ 0…rule   (128 bytes)
//!          | 128 zero bytes on any failure
//! ```
//!
//! Verifiers never return errors; the calling contract only looks at the
//! validity word. They are published through an explicit
//! [`VerifierRegistry`] instead of a process-wide table.

use {
    crate::{
        committee::Committee,
        config::{
            AccountabilityConfig, HEIGHT_RANGE, MAX_ROUND, VERIFIER_INPUT_PREFIX_LEN,
            VERIFIER_OUTPUT_LEN,
        },
        error::{AccountabilityError, Result},
        proof::{AccountabilityProof, ProofType, Rule},
        proposer::is_proposer,
        rules::{covers_rounds, has_quorum},
        signature::{verify_proof_signatures, SignatureVerifier},
        types::{ConsensusMessage, FlaggedProposal, MessageCode},
    },
    log::debug,
    parking_lot::RwLock,
    solana_hash::Hash,
    solana_pubkey::Pubkey,
    std::{
        collections::{HashMap, HashSet},
        sync::Arc,
    },
};

/// Address of the accusation verifier.
pub const ACCUSATION_VERIFIER_ADDRESS: Pubkey = verifier_address(0xfc);
/// Address of the misbehaviour verifier.
pub const MISBEHAVIOUR_VERIFIER_ADDRESS: Pubkey = verifier_address(0xfd);
/// Address of the innocence verifier.
pub const INNOCENCE_VERIFIER_ADDRESS: Pubkey = verifier_address(0xfe);

const fn verifier_address(last: u8) -> Pubkey {
    let mut bytes = [0u8; 32];
    bytes[31] = last;
    Pubkey::new_from_array(bytes)
}

/// Committee lookup used by verifiers and the fault detector.
pub trait CommitteeProvider: Send + Sync {
    /// Committee that was active after block `height` was committed.
    fn committee_at(&self, height: u64) -> Option<Arc<Committee>>;
}

/// A precompiled contract callable by the protocol contract.
pub trait PrecompiledVerifier: Send + Sync {
    fn name(&self) -> &'static str;

    /// Gas charged for `input`.
    fn required_gas(&self, input: &[u8]) -> u64;

    /// Verify `input` at `block_number`. Failures yield all-zero output.
    fn run(&self, input: &[u8], block_number: u64) -> [u8; VERIFIER_OUTPUT_LEN];
}

// ── Input / output encoding ─────────────────────────────────────────────────

/// Encode a proof as verifier input.
pub fn encode_verifier_input(proof: &AccountabilityProof) -> Result<Vec<u8>> {
    let raw = proof.encode()?;
    let mut input = vec![0u8; VERIFIER_INPUT_PREFIX_LEN];
    input[VERIFIER_INPUT_PREFIX_LEN - 8..].copy_from_slice(&(raw.len() as u64).to_be_bytes());
    input.extend_from_slice(&raw);
    Ok(input)
}

fn decode_verifier_input(input: &[u8], max_size: usize) -> Result<AccountabilityProof> {
    if input.len() <= VERIFIER_INPUT_PREFIX_LEN || input.len() > max_size {
        return Err(AccountabilityError::Garbage("verifier input size out of range"));
    }
    let (prefix, payload) = input.split_at(VERIFIER_INPUT_PREFIX_LEN);
    let (high, low) = prefix.split_at(VERIFIER_INPUT_PREFIX_LEN - 8);
    if high.iter().any(|b| *b != 0) {
        return Err(AccountabilityError::Garbage("verifier input length overflows"));
    }
    let mut len_bytes = [0u8; 8];
    len_bytes.copy_from_slice(low);
    let declared = usize::try_from(u64::from_be_bytes(len_bytes))
        .map_err(|_| AccountabilityError::Garbage("verifier input length overflows"))?;
    let body = payload
        .get(..declared)
        .ok_or(AccountabilityError::Garbage("verifier input shorter than declared"))?;
    AccountabilityProof::decode(body)
}

/// Success payload: `sender ‖ msg_hash ‖ validity ‖ rule`.
pub fn success_output(proof: &AccountabilityProof) -> [u8; VERIFIER_OUTPUT_LEN] {
    let mut out = [0u8; VERIFIER_OUTPUT_LEN];
    out[..32].copy_from_slice(proof.sender().as_ref());
    out[32..64].copy_from_slice(proof.msg_hash().as_ref());
    out[95] = 1;
    out[127] = proof.rule as u8;
    out
}

/// True if `output` carries the validity sentinel.
pub fn is_success(output: &[u8; VERIFIER_OUTPUT_LEN]) -> bool {
    output[64..95].iter().all(|b| *b == 0) && output[95] == 1
}

// ── Verifiers ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VerifierKind {
    Accusation,
    Misbehaviour,
    Innocence,
}

/// One of the three accountability verifiers.
pub struct AccountabilityVerifier {
    kind: VerifierKind,
    committees: Arc<dyn CommitteeProvider>,
    signatures: Arc<dyn SignatureVerifier>,
    config: AccountabilityConfig,
}

impl AccountabilityVerifier {
    pub fn accusation(
        committees: Arc<dyn CommitteeProvider>,
        signatures: Arc<dyn SignatureVerifier>,
        config: AccountabilityConfig,
    ) -> Self {
        Self::new(VerifierKind::Accusation, committees, signatures, config)
    }

    pub fn misbehaviour(
        committees: Arc<dyn CommitteeProvider>,
        signatures: Arc<dyn SignatureVerifier>,
        config: AccountabilityConfig,
    ) -> Self {
        Self::new(VerifierKind::Misbehaviour, committees, signatures, config)
    }

    pub fn innocence(
        committees: Arc<dyn CommitteeProvider>,
        signatures: Arc<dyn SignatureVerifier>,
        config: AccountabilityConfig,
    ) -> Self {
        Self::new(VerifierKind::Innocence, committees, signatures, config)
    }

    fn new(
        kind: VerifierKind,
        committees: Arc<dyn CommitteeProvider>,
        signatures: Arc<dyn SignatureVerifier>,
        config: AccountabilityConfig,
    ) -> Self {
        Self {
            kind,
            committees,
            signatures,
            config,
        }
    }

    fn verify(&self, input: &[u8], block_number: u64) -> Result<AccountabilityProof> {
        let proof = decode_verifier_input(input, self.config.max_proof_size)?;
        let height = proof.message.height();
        if !within_height_range(height, block_number) {
            return Err(AccountabilityError::StaleProof {
                height,
                block: block_number,
            });
        }
        let committee = height
            .checked_sub(1)
            .and_then(|parent| self.committees.committee_at(parent))
            .ok_or(AccountabilityError::NoParentCommittee(height))?;
        verify_proof_signatures(self.signatures.as_ref(), &committee, &proof)?;

        let valid = match self.kind {
            VerifierKind::Accusation => valid_accusation(&proof, block_number),
            VerifierKind::Misbehaviour => valid_misbehaviour(&proof, &committee),
            VerifierKind::Innocence => block_number > 0 && valid_innocence(&proof, &committee),
        };
        if !valid {
            return Err(AccountabilityError::Garbage("proof predicate failed"));
        }
        Ok(proof)
    }
}

impl PrecompiledVerifier for AccountabilityVerifier {
    fn name(&self) -> &'static str {
        match self.kind {
            VerifierKind::Accusation => "accusation-verifier",
            VerifierKind::Misbehaviour => "misbehaviour-verifier",
            VerifierKind::Innocence => "innocence-verifier",
        }
    }

    fn required_gas(&self, input: &[u8]) -> u64 {
        let kilobytes = (input.len() / 1024) as u64;
        self.config
            .verifier_gas_per_kb
            .saturating_mul(kilobytes.saturating_add(1))
    }

    fn run(&self, input: &[u8], block_number: u64) -> [u8; VERIFIER_OUTPUT_LEN] {
        match self.verify(input, block_number) {
            Ok(proof) => success_output(&proof),
            Err(err) => {
                debug!("{}: rejected proof: {err}", self.name());
                [0u8; VERIFIER_OUTPUT_LEN]
            }
        }
    }
}

// ── Registry ────────────────────────────────────────────────────────────────

/// Address-indexed table of precompiled verifiers, shared by reference with
/// whatever executes contract calls.
#[derive(Default)]
pub struct VerifierRegistry {
    verifiers: RwLock<HashMap<Pubkey, Arc<dyn PrecompiledVerifier>>>,
}

impl VerifierRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, address: Pubkey, verifier: Arc<dyn PrecompiledVerifier>) {
        self.verifiers.write().insert(address, verifier);
    }

    pub fn unregister(&self, address: &Pubkey) -> bool {
        self.verifiers.write().remove(address).is_some()
    }

    pub fn get(&self, address: &Pubkey) -> Option<Arc<dyn PrecompiledVerifier>> {
        self.verifiers.read().get(address).cloned()
    }

    pub fn len(&self) -> usize {
        self.verifiers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.verifiers.read().is_empty()
    }

    /// Install the three accountability verifiers at their fixed addresses.
    pub fn register_accountability_verifiers(
        &self,
        committees: Arc<dyn CommitteeProvider>,
        signatures: Arc<dyn SignatureVerifier>,
        config: &AccountabilityConfig,
    ) {
        self.register(
            ACCUSATION_VERIFIER_ADDRESS,
            Arc::new(AccountabilityVerifier::accusation(
                committees.clone(),
                signatures.clone(),
                config.clone(),
            )),
        );
        self.register(
            MISBEHAVIOUR_VERIFIER_ADDRESS,
            Arc::new(AccountabilityVerifier::misbehaviour(
                committees.clone(),
                signatures.clone(),
                config.clone(),
            )),
        );
        self.register(
            INNOCENCE_VERIFIER_ADDRESS,
            Arc::new(AccountabilityVerifier::innocence(
                committees,
                signatures,
                config.clone(),
            )),
        );
    }

    pub fn unregister_accountability_verifiers(&self) {
        let mut verifiers = self.verifiers.write();
        for address in [
            ACCUSATION_VERIFIER_ADDRESS,
            MISBEHAVIOUR_VERIFIER_ADDRESS,
            INNOCENCE_VERIFIER_ADDRESS,
        ] {
            verifiers.remove(&address);
        }
    }
}

// ---------------------------------------------------------------------------
// Predicates
// ---------------------------------------------------------------------------

/// Accusations are only admissible for rebuttable rules on recent heights.
pub fn valid_accusation(proof: &AccountabilityProof, block_number: u64) -> bool {
    if proof.proof_type != ProofType::Accusation {
        return false;
    }
    let msg = &proof.message;
    let height = msg.height();
    if height == 0 || msg.round() > MAX_ROUND {
        return false;
    }
    if !within_height_range(height, block_number) {
        return false;
    }

    match proof.rule {
        Rule::PO => {
            msg.code() == MessageCode::LiteProposal
                && msg.valid_round().is_some()
                && proof.evidence.is_empty()
        }
        Rule::PVN => {
            msg.code() == MessageCode::Prevote
                && msg.value().is_some()
                && proof.evidence.is_empty()
        }
        Rule::PVO => {
            msg.code() == MessageCode::Prevote
                && msg.value().is_some()
                && matches!(proof.evidence.as_slice(), [lite] if is_old_lite_for(lite, msg))
        }
        Rule::C1 => {
            msg.code() == MessageCode::Precommit
                && msg.value().is_some()
                && proof.evidence.is_empty()
        }
        _ => false,
    }
}

/// Upper bound on evidence carried by one misbehaviour proof.
fn max_evidence(committee: &Committee) -> usize {
    let rounds = MAX_ROUND as usize;
    committee.len().max(rounds).saturating_add(1)
}

/// Re-derive a misbehaviour from the proof alone.
pub fn valid_misbehaviour(proof: &AccountabilityProof, committee: &Committee) -> bool {
    if proof.proof_type != ProofType::Misbehaviour {
        return false;
    }
    let msg = &proof.message;
    let evidence = proof.evidence.as_slice();
    if msg.height() == 0 || evidence.len() > max_evidence(committee) {
        return false;
    }

    match proof.rule {
        Rule::PN => check_pn(msg, evidence),
        Rule::PO => check_po(msg, evidence, committee),
        Rule::PVN => check_pvn(msg, evidence),
        Rule::PVO => check_pvo(msg, evidence, committee),
        Rule::PVO12 => check_pvo12(msg, evidence),
        Rule::PVO3 => check_pvo3(msg, evidence),
        Rule::C => check_c(msg, evidence, committee),
        Rule::InvalidProposal => check_invalid_proposal(msg, evidence, committee),
        Rule::InvalidProposer => {
            msg.code().is_proposal()
                && evidence.is_empty()
                && msg.round() <= MAX_ROUND
                && !is_proposer(committee, msg.sender(), msg.height(), msg.round())
        }
        Rule::Equivocation => check_equivocation(msg, evidence),
        Rule::AccountableGarbageMessage => evidence.is_empty() && msg.validate_structure().is_err(),
        Rule::InvalidRound => evidence.is_empty() && msg.round() > MAX_ROUND,
        Rule::WrongValidRound => {
            evidence.is_empty()
                && msg.code().is_proposal()
                && msg.valid_round().is_some_and(|vr| vr >= msg.round())
        }
        Rule::C1 => false,
    }
}

/// Re-derive the innocence of an accused message.
pub fn valid_innocence(proof: &AccountabilityProof, committee: &Committee) -> bool {
    if proof.proof_type != ProofType::Innocence {
        return false;
    }
    let msg = &proof.message;
    let evidence = proof.evidence.as_slice();
    let Some(value) = msg.value() else {
        return false;
    };

    match proof.rule {
        Rule::PO => {
            let Some(valid_round) = msg.valid_round() else {
                return false;
            };
            msg.code() == MessageCode::LiteProposal
                && quorum_of_prevotes(evidence, msg.height(), valid_round, committee, |v| {
                    v == Some(value)
                })
        }
        Rule::PVN => {
            msg.code() == MessageCode::Prevote
                && matches!(evidence, [lite] if is_new_lite_for(lite, msg))
        }
        Rule::PVO => match evidence.split_first() {
            Some((lite, votes)) if msg.code() == MessageCode::Prevote && is_old_lite_for(lite, msg) => {
                let Some(valid_round) = lite.valid_round() else {
                    return false;
                };
                quorum_of_prevotes(votes, msg.height(), valid_round, committee, |v| {
                    v == Some(value)
                })
            }
            _ => false,
        },
        Rule::C1 => {
            msg.code() == MessageCode::Precommit
                && quorum_of_prevotes(evidence, msg.height(), msg.round(), committee, |v| {
                    v == Some(value)
                })
        }
        _ => false,
    }
}

// ── Misbehaviour checks ──

fn check_pn(msg: &ConsensusMessage, evidence: &[ConsensusMessage]) -> bool {
    msg.code() == MessageCode::LiteProposal
        && msg.valid_round().is_none()
        && matches!(evidence, [pc] if pc.code() == MessageCode::Precommit
            && pc.sender() == msg.sender()
            && pc.round() < msg.round()
            && pc.value().is_some())
}

fn check_po(msg: &ConsensusMessage, evidence: &[ConsensusMessage], committee: &Committee) -> bool {
    if msg.code() != MessageCode::LiteProposal {
        return false;
    }
    let (Some(valid_round), Some(value)) = (msg.valid_round(), msg.value()) else {
        return false;
    };
    if valid_round >= msg.round() {
        return true;
    }
    if let [pc] = evidence {
        if pc.code() == MessageCode::Precommit && pc.sender() == msg.sender() {
            let locked = pc.value().is_some();
            if locked && pc.round() == valid_round && pc.value() != Some(value) {
                return true;
            }
            if locked && pc.round() > valid_round && pc.round() < msg.round() {
                return true;
            }
        }
    }
    quorum_of_prevotes(evidence, msg.height(), valid_round, committee, |v| {
        v.is_some() && v != Some(value)
    })
}

fn check_pvn(msg: &ConsensusMessage, evidence: &[ConsensusMessage]) -> bool {
    if msg.code() != MessageCode::Prevote {
        return false;
    }
    let Some(value) = msg.value() else {
        return false;
    };
    let Some((lite, precommits)) = evidence.split_first() else {
        return false;
    };
    if !is_new_lite_for(lite, msg) {
        return false;
    }
    let Some((first, rest)) = precommits.split_first() else {
        return false;
    };
    let from_sender = precommits.iter().all(|pc| {
        pc.code() == MessageCode::Precommit
            && pc.sender() == msg.sender()
            && pc.height() == msg.height()
            && pc.round() < msg.round()
    });
    if !from_sender || first.value().is_none() || first.value() == Some(value) {
        return false;
    }
    if rest.iter().any(|pc| pc.value().is_some()) {
        return false;
    }
    let consecutive = precommits
        .windows(2)
        .all(|w| w[0].round().checked_add(1) == Some(w[1].round()));
    let last = precommits.last().map(|pc| pc.round());
    consecutive && last.and_then(|r| r.checked_add(1)) == Some(msg.round())
}

fn check_pvo(msg: &ConsensusMessage, evidence: &[ConsensusMessage], committee: &Committee) -> bool {
    if msg.code() != MessageCode::Prevote || evidence.len() < 2 {
        return false;
    }
    let Some(value) = msg.value() else {
        return false;
    };
    let Some((lite, votes)) = evidence.split_first() else {
        return false;
    };
    if !is_old_lite_for(lite, msg) {
        return false;
    }
    let Some(valid_round) = lite.valid_round() else {
        return false;
    };
    let Some(other) = votes[0].value() else {
        return false;
    };
    other != value
        && quorum_of_prevotes(votes, msg.height(), valid_round, committee, |v| {
            v == Some(other)
        })
}

fn check_pvo12(msg: &ConsensusMessage, evidence: &[ConsensusMessage]) -> bool {
    if msg.code() != MessageCode::Prevote {
        return false;
    }
    let Some(value) = msg.value() else {
        return false;
    };
    let Some((lite, precommits)) = evidence.split_first() else {
        return false;
    };
    if !is_old_lite_for(lite, msg) {
        return false;
    }
    let Some(valid_round) = lite.valid_round() else {
        return false;
    };
    let from_sender = precommits.iter().all(|pc| {
        pc.code() == MessageCode::Precommit
            && pc.sender() == msg.sender()
            && pc.height() == msg.height()
    });
    let refs: Vec<&ConsensusMessage> = precommits.iter().collect();
    if !from_sender || !covers_rounds(&refs, valid_round, msg.round()) {
        return false;
    }
    let last_v = precommits
        .iter()
        .filter(|pc| pc.value() == Some(value))
        .map(|pc| pc.round())
        .max();
    let last_not_v = precommits
        .iter()
        .filter(|pc| pc.value().is_some() && pc.value() != Some(value))
        .map(|pc| pc.round())
        .max();
    last_not_v > last_v
}

fn check_pvo3(msg: &ConsensusMessage, evidence: &[ConsensusMessage]) -> bool {
    msg.code() == MessageCode::Prevote
        && matches!(evidence, [lite] if lite.code() == MessageCode::LiteProposal
            && lite.round() == msg.round()
            && lite.value() == msg.value()
            && lite.valid_round().is_some_and(|vr| vr >= lite.round()))
}

fn check_c(msg: &ConsensusMessage, evidence: &[ConsensusMessage], committee: &Committee) -> bool {
    if msg.code() != MessageCode::Precommit {
        return false;
    }
    let Some(value) = msg.value() else {
        return false;
    };
    quorum_of_prevotes(evidence, msg.height(), msg.round(), committee, |v| {
        v != Some(value)
    })
}

fn check_invalid_proposal(
    msg: &ConsensusMessage,
    evidence: &[ConsensusMessage],
    committee: &Committee,
) -> bool {
    if msg.code() != MessageCode::LiteProposal {
        return false;
    }
    let Some(value) = msg.value() else {
        return false;
    };
    let flag = FlaggedProposal {
        proposer: *msg.sender(),
        value,
    };
    evidence.iter().all(|v| v.flagged() == Some(&flag))
        && quorum_of_prevotes(evidence, msg.height(), msg.round(), committee, |v| {
            v.is_none()
        })
}

fn check_equivocation(msg: &ConsensusMessage, evidence: &[ConsensusMessage]) -> bool {
    matches!(evidence, [other] if other.code().slot_code() == msg.code().slot_code()
        && other.sender() == msg.sender()
        && other.height() == msg.height()
        && other.round() == msg.round()
        && other.value() != msg.value())
}

// ── Shared helpers ──

/// Non-empty prevotes at (height, round), distinct senders, values accepted
/// by `accept`, together reaching quorum.
fn quorum_of_prevotes<F>(
    votes: &[ConsensusMessage],
    height: u64,
    round: u32,
    committee: &Committee,
    accept: F,
) -> bool
where
    F: Fn(Option<Hash>) -> bool,
{
    if votes.is_empty() {
        return false;
    }
    let mut senders = HashSet::new();
    let well_formed = votes.iter().all(|v| {
        v.code() == MessageCode::Prevote
            && v.height() == height
            && v.round() == round
            && accept(v.value())
            && senders.insert(*v.sender())
    });
    well_formed && has_quorum(votes, committee)
}

/// A lite old proposal matching the round and value of `prevote`.
fn is_old_lite_for(lite: &ConsensusMessage, prevote: &ConsensusMessage) -> bool {
    lite.code() == MessageCode::LiteProposal
        && lite.height() == prevote.height()
        && lite.round() == prevote.round()
        && lite.value() == prevote.value()
        && lite.valid_round().is_some_and(|vr| vr < lite.round())
}

/// A lite new proposal matching the round and value of `prevote`.
fn is_new_lite_for(lite: &ConsensusMessage, prevote: &ConsensusMessage) -> bool {
    lite.code() == MessageCode::LiteProposal
        && lite.height() == prevote.height()
        && lite.round() == prevote.round()
        && lite.value() == prevote.value()
        && lite.valid_round().is_none()
}

/// False once `block_number` is `HEIGHT_RANGE` or more blocks past `height`.
pub fn within_height_range(height: u64, block_number: u64) -> bool {
    block_number.saturating_sub(height) < HEIGHT_RANGE
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            innocence::innocence_proof, message_store::MessageStore, rules::run_rule_engine,
            signature::Ed25519Verifier, types::ProposedBlock,
        },
        solana_keypair::Keypair,
        solana_signer::Signer,
        test_case::test_case,
    };

    const HEIGHT: u64 = 20;

    struct StaticCommittees(HashMap<u64, Arc<Committee>>);

    impl CommitteeProvider for StaticCommittees {
        fn committee_at(&self, height: u64) -> Option<Arc<Committee>> {
            self.0.get(&height).cloned()
        }
    }

    struct Fixture {
        keys: Vec<Keypair>,
        committee: Arc<Committee>,
        store: MessageStore,
        registry: VerifierRegistry,
    }

    impl Fixture {
        fn new(n: usize) -> Self {
            let keys: Vec<Keypair> = (0..n).map(|_| Keypair::new()).collect();
            let committee = Arc::new(Committee::new(
                keys.iter().map(|k| (k.pubkey(), 1)).collect(),
            ));
            let provider = StaticCommittees(HashMap::from([(HEIGHT - 1, committee.clone())]));
            let registry = VerifierRegistry::new();
            registry.register_accountability_verifiers(
                Arc::new(provider),
                Arc::new(Ed25519Verifier),
                &AccountabilityConfig::default(),
            );
            Self {
                keys,
                committee,
                store: MessageStore::new(),
                registry,
            }
        }

        fn proposal(&mut self, who: usize, round: u32, valid_round: Option<u32>) -> ConsensusMessage {
            let kp = &self.keys[who];
            let msg = ConsensusMessage::new_proposal(
                kp,
                HEIGHT,
                round,
                valid_round,
                ProposedBlock {
                    parent_hash: Hash::default(),
                    height: HEIGHT,
                    timestamp: 0,
                    state_root: Hash::new_unique(),
                    proposer: kp.pubkey(),
                    payload: Vec::new(),
                },
            );
            self.store.save(msg.clone());
            msg
        }

        fn run(&self, address: &Pubkey, proof: &AccountabilityProof) -> [u8; VERIFIER_OUTPUT_LEN] {
            let input = encode_verifier_input(proof).unwrap();
            self.registry.get(address).unwrap().run(&input, HEIGHT + 1)
        }

        fn engine_proof(&self, rule: Rule) -> AccountabilityProof {
            run_rule_engine(&self.store, &self.committee, HEIGHT)
                .into_iter()
                .find(|p| p.rule == rule)
                .unwrap()
        }
    }

    #[test_case(&[] ; "empty")]
    #[test_case(&[0u8; 32] ; "prefix only")]
    #[test_case(&[1u8; 64] ; "garbage")]
    fn test_malformed_input_returns_zeros(input: &[u8]) {
        let f = Fixture::new(1);
        for address in [
            ACCUSATION_VERIFIER_ADDRESS,
            MISBEHAVIOUR_VERIFIER_ADDRESS,
            INNOCENCE_VERIFIER_ADDRESS,
        ] {
            let out = f.registry.get(&address).unwrap().run(input, HEIGHT);
            assert_eq!(out, [0u8; VERIFIER_OUTPUT_LEN]);
        }
    }

    #[test]
    fn test_required_gas_scales_per_kb() {
        let f = Fixture::new(1);
        let verifier = f.registry.get(&MISBEHAVIOUR_VERIFIER_ADDRESS).unwrap();
        assert_eq!(verifier.required_gas(&[0u8; 10]), 1_000);
        assert_eq!(verifier.required_gas(&[0u8; 1024]), 2_000);
        assert_eq!(verifier.required_gas(&[0u8; 3000]), 3_000);
    }

    #[test]
    fn test_pn_misbehaviour_round_trip_through_verifier() {
        let mut f = Fixture::new(4);
        let pc = ConsensusMessage::new_precommit(&f.keys[0], HEIGHT, 0, Some(Hash::new_unique()));
        f.store.save(pc);
        f.proposal(0, 1, None);
        let proof = f.engine_proof(Rule::PN);

        let out = f.run(&MISBEHAVIOUR_VERIFIER_ADDRESS, &proof);
        assert!(is_success(&out));
        assert_eq!(&out[..32], f.keys[0].pubkey().as_ref());
        assert_eq!(&out[32..64], proof.msg_hash().as_ref());
        assert_eq!(out[127], Rule::PN as u8);

        // Wrong verifier for the proof type.
        assert!(!is_success(&f.run(&ACCUSATION_VERIFIER_ADDRESS, &proof)));
    }

    #[test]
    fn test_po_misbehaviour_verified() {
        let mut f = Fixture::new(4);
        let other = Some(Hash::new_unique());
        for i in 0..3 {
            let vote = ConsensusMessage::new_prevote(&f.keys[i], HEIGHT, 0, other);
            f.store.save(vote);
        }
        f.proposal(3, 2, Some(0));
        let proof = f.engine_proof(Rule::PO);
        assert!(is_success(&f.run(&MISBEHAVIOUR_VERIFIER_ADDRESS, &proof)));

        let mut short = proof.clone();
        short.evidence.truncate(2);
        assert!(!is_success(&f.run(&MISBEHAVIOUR_VERIFIER_ADDRESS, &short)));
    }

    #[test]
    fn test_accusation_and_innocence_verified() {
        let mut f = Fixture::new(4);
        let value = Some(Hash::new_unique());
        let precommit = ConsensusMessage::new_precommit(&f.keys[0], HEIGHT, 0, value);
        f.store.save(precommit);
        let accusation = f.engine_proof(Rule::C1);
        assert!(is_success(&f.run(&ACCUSATION_VERIFIER_ADDRESS, &accusation)));

        for i in 0..3 {
            let vote = ConsensusMessage::new_prevote(&f.keys[i], HEIGHT, 0, value);
            f.store.save(vote);
        }
        let innocence = innocence_proof(&f.store, &f.committee, &accusation).unwrap();
        let out = f.run(&INNOCENCE_VERIFIER_ADDRESS, &innocence);
        assert!(is_success(&out));
        assert_eq!(out[127], Rule::C1 as u8);
    }

    #[test]
    fn test_stale_accusation_rejected() {
        let kp = Keypair::new();
        let proof = AccountabilityProof::accusation(
            Rule::C1,
            ConsensusMessage::new_precommit(&kp, HEIGHT, 0, Some(Hash::new_unique())),
            vec![],
        );
        assert!(valid_accusation(&proof, HEIGHT + HEIGHT_RANGE - 1));
        assert!(!valid_accusation(&proof, HEIGHT + HEIGHT_RANGE));
    }

    #[test]
    fn test_accusation_rule_must_be_rebuttable() {
        let kp = Keypair::new();
        let proof = AccountabilityProof::accusation(
            Rule::C,
            ConsensusMessage::new_precommit(&kp, HEIGHT, 0, Some(Hash::new_unique())),
            vec![],
        );
        assert!(!valid_accusation(&proof, HEIGHT));
    }

    #[test]
    fn test_tampered_evidence_rejected() {
        let mut f = Fixture::new(4);
        let pc = ConsensusMessage::new_precommit(&f.keys[0], HEIGHT, 0, Some(Hash::new_unique()));
        f.store.save(pc);
        f.proposal(0, 1, None);
        let mut proof = f.engine_proof(Rule::PN);
        if let ConsensusMessage::Precommit { value, .. } = &mut proof.evidence[0] {
            *value = Some(Hash::new_unique());
        }
        assert!(!is_success(&f.run(&MISBEHAVIOUR_VERIFIER_ADDRESS, &proof)));
    }

    #[test]
    fn test_equivocation_verified() {
        let f = Fixture::new(1);
        let a = ConsensusMessage::new_prevote(&f.keys[0], HEIGHT, 3, Some(Hash::new_unique()));
        let b = ConsensusMessage::new_prevote(&f.keys[0], HEIGHT, 3, None);
        let proof = AccountabilityProof::misbehaviour(Rule::Equivocation, a.clone(), vec![b]);
        assert!(is_success(&f.run(&MISBEHAVIOUR_VERIFIER_ADDRESS, &proof)));

        let same = AccountabilityProof::misbehaviour(Rule::Equivocation, a.clone(), vec![a]);
        assert!(!is_success(&f.run(&MISBEHAVIOUR_VERIFIER_ADDRESS, &same)));
    }

    #[test]
    fn test_invalid_round_verified() {
        let f = Fixture::new(1);
        let vote = ConsensusMessage::new_precommit(&f.keys[0], HEIGHT, MAX_ROUND + 1, None);
        let proof = AccountabilityProof::misbehaviour(Rule::InvalidRound, vote, vec![]);
        assert!(is_success(&f.run(&MISBEHAVIOUR_VERIFIER_ADDRESS, &proof)));
    }

    #[test]
    fn test_stale_proofs_rejected_by_every_verifier() {
        let mut f = Fixture::new(4);
        let value = Some(Hash::new_unique());
        let stale_block = HEIGHT + HEIGHT_RANGE;
        let run_at = |f: &Fixture, address: &Pubkey, proof: &AccountabilityProof, block: u64| {
            let input = encode_verifier_input(proof).unwrap();
            is_success(&f.registry.get(address).unwrap().run(&input, block))
        };

        let vote = ConsensusMessage::new_precommit(&f.keys[0], HEIGHT, MAX_ROUND + 1, None);
        let misbehaviour = AccountabilityProof::misbehaviour(Rule::InvalidRound, vote, vec![]);
        assert!(run_at(&f, &MISBEHAVIOUR_VERIFIER_ADDRESS, &misbehaviour, stale_block - 1));
        assert!(!run_at(&f, &MISBEHAVIOUR_VERIFIER_ADDRESS, &misbehaviour, stale_block));
        assert!(!run_at(&f, &MISBEHAVIOUR_VERIFIER_ADDRESS, &misbehaviour, HEIGHT + 100 * HEIGHT_RANGE));

        let precommit = ConsensusMessage::new_precommit(&f.keys[1], HEIGHT, 0, value);
        let accusation = AccountabilityProof::accusation(Rule::C1, precommit, vec![]);
        assert!(!run_at(&f, &ACCUSATION_VERIFIER_ADDRESS, &accusation, stale_block));

        for i in 0..3 {
            f.store.save(ConsensusMessage::new_prevote(&f.keys[i], HEIGHT, 0, value));
        }
        let innocence = innocence_proof(&f.store, &f.committee, &accusation).unwrap();
        assert!(run_at(&f, &INNOCENCE_VERIFIER_ADDRESS, &innocence, stale_block - 1));
        assert!(!run_at(&f, &INNOCENCE_VERIFIER_ADDRESS, &innocence, stale_block));
    }

    #[test]
    fn test_c_accepts_nil_and_mixed_evidence() {
        let mut f = Fixture::new(4);
        f.store.save(ConsensusMessage::new_prevote(&f.keys[0], HEIGHT, 0, None));
        for i in 1..3 {
            let vote = ConsensusMessage::new_prevote(&f.keys[i], HEIGHT, 0, Some(Hash::new_unique()));
            f.store.save(vote);
        }
        let precommit = ConsensusMessage::new_precommit(&f.keys[3], HEIGHT, 0, Some(Hash::new_unique()));
        f.store.save(precommit.clone());

        let proof = f.engine_proof(Rule::C);
        assert_eq!(proof.message, precommit);
        assert!(proof.evidence.iter().any(|v| v.value().is_none()));
        assert!(is_success(&f.run(&MISBEHAVIOUR_VERIFIER_ADDRESS, &proof)));

        // A prevote for the precommitted value does not count against it.
        let mut forged = proof.clone();
        let nil_vote = forged
            .evidence
            .iter()
            .position(|v| *v.sender() == f.keys[0].pubkey())
            .unwrap();
        forged.evidence[nil_vote] =
            ConsensusMessage::new_prevote(&f.keys[0], HEIGHT, 0, precommit.value());
        assert!(!is_success(&f.run(&MISBEHAVIOUR_VERIFIER_ADDRESS, &forged)));
    }

    #[test]
    fn test_unknown_committee_rejected() {
        let f = Fixture::new(1);
        let vote = ConsensusMessage::new_precommit(&f.keys[0], HEIGHT + 5, MAX_ROUND + 1, None);
        let proof = AccountabilityProof::misbehaviour(Rule::InvalidRound, vote, vec![]);
        assert!(!is_success(&f.run(&MISBEHAVIOUR_VERIFIER_ADDRESS, &proof)));
    }

    #[test]
    fn test_registry_lifecycle() {
        let f = Fixture::new(1);
        assert_eq!(f.registry.len(), 3);
        assert_eq!(
            f.registry.get(&INNOCENCE_VERIFIER_ADDRESS).unwrap().name(),
            "innocence-verifier"
        );
        f.registry.unregister_accountability_verifiers();
        assert!(f.registry.is_empty());
        assert!(f.registry.get(&ACCUSATION_VERIFIER_ADDRESS).is_none());
    }

    #[test]
    fn test_input_length_prefix() {
        let kp = Keypair::new();
        let proof = AccountabilityProof::misbehaviour(
            Rule::InvalidRound,
            ConsensusMessage::new_precommit(&kp, 1, MAX_ROUND + 1, None),
            vec![],
        );
        let input = encode_verifier_input(&proof).unwrap();
        let raw = proof.encode().unwrap();
        assert_eq!(input.len(), VERIFIER_INPUT_PREFIX_LEN + raw.len());
        assert_eq!(&input[VERIFIER_INPUT_PREFIX_LEN..], raw.as_slice());
        assert_eq!(decode_verifier_input(&input, usize::MAX).unwrap(), proof);
    }
}
