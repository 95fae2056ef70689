//! End-to-end runs of the fault detector service: consensus messages and
//! new heads go in through channels, transactions come out of the pool.

use {
    crate::harness::{
        init_logging, verifier_registry, verify_on_chain, wait_until, DetectorNode, TestCluster,
    },
    solana_hash::Hash,
    trv1_accountability::{
        config::{DELTA_BLOCKS, REPORTING_SLOT_PERIOD},
        encode_verifier_input, is_success, AccountabilityEvent, AccountabilityProof, ProofType, Rule,
        MISBEHAVIOUR_VERIFIER_ADDRESS,
    },
    trv1_fault_detector::FaultDetectorConfig,
};

const HEIGHT: u64 = 5;

/// Checkpoint at which committee member 0 reports.
const FIRST_SLOT: u64 = REPORTING_SLOT_PERIOD - 1;

fn reporter_node(cluster: &TestCluster, config: FaultDetectorConfig) -> DetectorNode {
    DetectorNode::start(cluster.validator(0).pubkey(), cluster.chain(HEIGHT), config)
}

fn submitted_proofs(node: &DetectorNode) -> Vec<AccountabilityProof> {
    let events: Vec<AccountabilityEvent> =
        node.pool.submitted().into_iter().map(|tx| tx.event).collect();
    let mut proofs = Vec::new();
    let (chunked, whole): (Vec<_>, Vec<_>) = events.into_iter().partition(|e| e.is_chunked());
    for event in whole {
        proofs.push(event.proof().unwrap());
    }
    if !chunked.is_empty() {
        let raw = AccountabilityEvent::reassemble(&chunked).unwrap();
        proofs.push(AccountabilityProof::decode(&raw).unwrap());
    }
    proofs
}

#[test]
fn test_verifiers_follow_detector_lifecycle() {
    let cluster = TestCluster::default();
    let mut node = reporter_node(&cluster, FaultDetectorConfig::dev_default());
    assert_eq!(node.registry.len(), 3);
    let verifier = node.registry.get(&MISBEHAVIOUR_VERIFIER_ADDRESS).unwrap();
    assert_eq!(verifier.name(), "misbehaviour-verifier");

    node.detector.stop();
    assert!(node.registry.is_empty());
}

#[test]
fn test_equivocation_reported_in_slot() {
    init_logging();
    let cluster = TestCluster::default();
    let node = reporter_node(&cluster, FaultDetectorConfig::dev_default());
    let culprit = cluster.validator(2);

    node.deliver(&culprit.prevote(HEIGHT, 0, Some(Hash::new_unique())));
    node.deliver(&culprit.prevote(HEIGHT, 0, Some(Hash::new_unique())));
    assert!(node.wait_for_store_len(2));

    node.advance(HEIGHT + 1..=FIRST_SLOT + DELTA_BLOCKS);
    assert!(wait_until(|| !node.pool.submitted().is_empty()));

    let proofs = submitted_proofs(&node);
    let equivocation = proofs
        .iter()
        .find(|p| p.rule == Rule::Equivocation)
        .expect("equivocation reported");
    assert_eq!(equivocation.proof_type, ProofType::Misbehaviour);
    assert_eq!(equivocation.sender(), &culprit.pubkey());
    assert!(verify_on_chain(&node.registry, equivocation, FIRST_SLOT + DELTA_BLOCKS));
}

#[test]
fn test_auto_incriminating_messages_reported() {
    let cluster = TestCluster::default();
    let node = reporter_node(&cluster, FaultDetectorConfig::dev_default());
    let impostor = cluster.non_proposer(HEIGHT, 0);

    node.deliver(&impostor.proposal(HEIGHT, 0, None));
    node.deliver(&cluster.validator(1).precommit(HEIGHT, 150, None));
    node.deliver(&cluster.validator(1).precommit(HEIGHT, 0, None));
    assert!(node.wait_for_store_len(1));

    node.advance(HEIGHT + 1..=FIRST_SLOT + DELTA_BLOCKS);
    assert!(wait_until(|| node.pool.submitted().len() >= 2));

    let mut rules: Vec<Rule> = submitted_proofs(&node).iter().map(|p| p.rule).collect();
    rules.sort();
    assert_eq!(rules, vec![Rule::InvalidProposer, Rule::InvalidRound]);
    assert_eq!(node.detector.store().read().len(), 1);

    let registry = verifier_registry(node.chain.clone());
    for proof in submitted_proofs(&node) {
        assert!(verify_on_chain(&registry, &proof, FIRST_SLOT + DELTA_BLOCKS));
    }
}

#[test]
fn test_large_proof_is_chunked() {
    let cluster = TestCluster::new(40);
    let config = FaultDetectorConfig {
        max_tx_size: 3 * 1024,
        ..FaultDetectorConfig::dev_default()
    };
    let node = reporter_node(&cluster, config);

    // A precommit contradicted by 39 prevotes; the proof carries the 27
    // that reach quorum.
    let culprit = cluster.validator(39);
    let precommit = culprit.precommit(HEIGHT + 1, 0, Some(Hash::new_unique()));
    let votes = cluster.prevotes(39, HEIGHT + 1, 0, Some(Hash::new_unique()));
    node.deliver(&cluster.validator(0).precommit(HEIGHT, 0, None));
    node.deliver(&precommit);
    for vote in &votes {
        node.deliver(vote);
    }
    assert!(node.wait_for_store_len(votes.len() + 2));

    node.advance(HEIGHT + 1..=FIRST_SLOT + DELTA_BLOCKS);
    assert!(wait_until(|| node
        .pool
        .submitted()
        .iter()
        .any(|tx| tx.event.is_chunked())));
    assert!(wait_until(|| {
        let txs = node.pool.submitted();
        let chunked: Vec<_> = txs.iter().filter(|tx| tx.event.is_chunked()).collect();
        chunked
            .first()
            .is_some_and(|tx| chunked.len() == usize::from(tx.event.chunks))
    }));

    let txs = node.pool.submitted();
    for (i, tx) in txs.iter().enumerate() {
        assert_eq!(tx.nonce, i as u64);
    }
    let chunks: Vec<AccountabilityEvent> = txs
        .into_iter()
        .map(|tx| tx.event)
        .filter(|e| e.is_chunked())
        .collect();
    let proof = AccountabilityProof::decode(&AccountabilityEvent::reassemble(&chunks).unwrap()).unwrap();
    assert_eq!(proof.rule, Rule::C);
    assert_eq!(proof.message, precommit);

    let verifier = node.registry.get(&MISBEHAVIOUR_VERIFIER_ADDRESS).unwrap();
    let input = encode_verifier_input(&proof).unwrap();
    assert!(is_success(&verifier.run(&input, FIRST_SLOT + DELTA_BLOCKS)));
}
