//! The fault detector service.
//!
//! ```text
//!   consensus bytes ──▶ ┌──────────────┐  misbehaviours  ┌──────────────┐
//!   new heads ────────▶ │ msg handler  │ ──────────────▶ │ rule engine  │
//!   tick ─────────────▶ │ intake/reset │ ── heads ─────▶ │ per block H  │
//!                       └──────────────┘                 └──────┬───────┘
//!                                                               │ events
//!                                                        ┌──────▼───────┐
//!                                                        │ tx issuance  │──▶ TxPool
//!                                                        └──────────────┘
//! ```
//!
//! Each loop runs on a named thread. The [`MessageStore`] is shared behind
//! one `RwLock`; the off-chain protocol state lives in [`OffChainProtocol`].

use {
    crate::{
        chain::{Broadcaster, ChainContext, TxPool},
        config::FaultDetectorConfig,
        error::{FaultDetectorError, OffChainError, Result},
        intake::{IntakeOutcome, MessageIntake},
        offchain::OffChainProtocol,
        proof_queue::ProofQueue,
        reporter::Reporter,
        wire::OffChainMessage,
    },
    crossbeam_channel::{bounded, never, select, tick, Receiver, RecvTimeoutError, Sender},
    log::*,
    parking_lot::{Condvar, Mutex, RwLock},
    solana_hash::Hash,
    solana_pubkey::Pubkey,
    std::{
        collections::{BTreeMap, HashSet},
        sync::{
            atomic::{AtomicBool, Ordering},
            Arc,
        },
        thread::{Builder, JoinHandle},
        time::Duration,
    },
    trv1_accountability::{
        config::{
            DELTA_BLOCKS, HEIGHT_RANGE, MAX_ACCUSATION_RATE_PER_HEIGHT, MSG_GC_INTERVAL,
            REPORTING_SLOT_PERIOD,
        },
        innocence_proof, run_rule_engine, AccountabilityEvent, AccountabilityProof, Committee,
        CommitteeProvider, MessageStore, ProofType, SignatureVerifier, VerifierRegistry,
    },
};

/// How often blocked loops wake up to check the exit flag.
const EXIT_POLL_INTERVAL_MS: u64 = 50;

// ---------------------------------------------------------------------------
// In-flight barrier
// ---------------------------------------------------------------------------

/// Counts dispatches still running outside the loops so shutdown can wait
/// for them.
#[derive(Default)]
pub struct InFlight {
    count: Mutex<usize>,
    idle: Condvar,
}

impl InFlight {
    pub fn enter(self: &Arc<Self>) -> InFlightGuard {
        let mut count = self.count.lock();
        *count = count.saturating_add(1);
        InFlightGuard {
            barrier: Arc::clone(self),
        }
    }

    /// Block until no dispatch is running.
    pub fn wait_idle(&self) {
        let mut count = self.count.lock();
        while *count > 0 {
            self.idle.wait(&mut count);
        }
    }

    pub fn count(&self) -> usize {
        *self.count.lock()
    }
}

pub struct InFlightGuard {
    barrier: Arc<InFlight>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut count = self.barrier.count.lock();
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.barrier.idle.notify_all();
        }
    }
}

/// Adapts a [`ChainContext`] to the committee lookup the verifiers need.
struct ChainCommittees(Arc<dyn ChainContext>);

impl CommitteeProvider for ChainCommittees {
    fn committee_at(&self, height: u64) -> Option<Arc<Committee>> {
        self.0.committee_at(height)
    }
}

// ---------------------------------------------------------------------------
// Message handler
// ---------------------------------------------------------------------------

/// State of the message handler loop.
pub struct MessageHandler {
    address: Pubkey,
    intake: MessageIntake,
    offchain: Arc<OffChainProtocol>,
    misbehaviours: Sender<AccountabilityProof>,
}

impl MessageHandler {
    pub fn new(
        address: Pubkey,
        intake: MessageIntake,
        offchain: Arc<OffChainProtocol>,
        misbehaviours: Sender<AccountabilityProof>,
    ) -> Self {
        Self {
            address,
            intake,
            offchain,
            misbehaviours,
        }
    }

    /// Run intake on raw consensus bytes.
    pub fn on_message(&mut self, bytes: &[u8]) -> IntakeOutcome {
        let outcome = self.intake.process_bytes(bytes);
        self.forward(&outcome);
        outcome
    }

    /// Replay buffered messages and reset height-scoped off-chain state.
    pub fn on_new_head(&mut self, head: u64) {
        for outcome in self.intake.replay_future(head) {
            self.forward(&outcome);
        }
        if head % MSG_GC_INTERVAL == 0 {
            self.offchain.reset_height_state();
        }
    }

    pub fn on_tick(&self) {
        self.offchain.reset_rate_window();
    }

    fn forward(&self, outcome: &IntakeOutcome) {
        let Some(proof) = outcome.proof() else {
            return;
        };
        if *proof.sender() == self.address {
            return;
        }
        if let Err(err) = self.misbehaviours.try_send(proof.clone()) {
            warn!("FaultDetector: dropping {} misbehaviour: {err}", proof.rule);
        }
    }
}

// ---------------------------------------------------------------------------
// Rule engine loop
// ---------------------------------------------------------------------------

/// State of the rule engine loop.
pub struct RuleEngineLoop {
    address: Pubkey,
    chain: Arc<dyn ChainContext>,
    store: Arc<RwLock<MessageStore>>,
    offchain: Arc<OffChainProtocol>,
    misbehaviours: Receiver<AccountabilityProof>,
    /// Proofs waiting for this validator's reporting slot.
    pending: ProofQueue,
    /// On-chain accusations already answered, by accused message hash.
    answered: HashSet<(u8, Hash)>,
}

impl RuleEngineLoop {
    pub fn new(
        address: Pubkey,
        chain: Arc<dyn ChainContext>,
        store: Arc<RwLock<MessageStore>>,
        offchain: Arc<OffChainProtocol>,
        misbehaviours: Receiver<AccountabilityProof>,
        pending_capacity: usize,
    ) -> Self {
        Self {
            address,
            chain,
            store,
            offchain,
            misbehaviours,
            pending: ProofQueue::new(pending_capacity),
            answered: HashSet::new(),
        }
    }

    /// Proofs buffered for the next reporting slot.
    pub fn pending(&self) -> &ProofQueue {
        &self.pending
    }

    /// Process block `head`; returns the events to submit on chain.
    pub fn on_new_height(&mut self, head: u64) -> Vec<AccountabilityEvent> {
        let mut events = self.answer_onchain_accusations();

        for accusation in self.offchain.pending().drain_expired(head) {
            info!(
                "FaultDetector: escalating unanswered {} accusation against {}",
                accusation.rule,
                accusation.sender()
            );
            self.buffer(accusation);
        }

        let drained: Vec<AccountabilityProof> = self.misbehaviours.try_iter().collect();
        for proof in drained {
            self.buffer(proof);
        }

        if head > DELTA_BLOCKS {
            let checkpoint = head.saturating_sub(DELTA_BLOCKS);
            self.scan(checkpoint);
            events.extend(self.report(head, checkpoint));
        }

        if head > HEIGHT_RANGE && head % MSG_GC_INTERVAL == 0 {
            let threshold = head.saturating_sub(HEIGHT_RANGE);
            self.store.write().delete_msgs_before_height(threshold);
            self.answered.clear();
            debug!("FaultDetector: pruned messages below height {threshold}");
        }

        events
    }

    /// True if this validator reports at `checkpoint`.
    pub fn is_reporting_slot(&self, checkpoint: u64) -> bool {
        let Some(committee) = self.chain.committee_at(checkpoint.saturating_sub(1)) else {
            return false;
        };
        reporter_index(checkpoint, committee.len())
            .and_then(|idx| committee.get(idx))
            .is_some_and(|member| member.address == self.address)
            && checkpoint.saturating_add(1) % REPORTING_SLOT_PERIOD == 0
    }

    fn answer_onchain_accusations(&mut self) -> Vec<AccountabilityEvent> {
        let raw = self.chain.pending_accusations_against(&self.address);
        let mut events = Vec::new();
        for accusation in collect_proofs(&raw) {
            if accusation.proof_type != ProofType::Accusation {
                continue;
            }
            let key = (accusation.rule as u8, accusation.msg_hash());
            if self.answered.contains(&key) {
                continue;
            }
            let height = accusation.message.height();
            let Some(committee) = self.chain.committee_at(height.saturating_sub(1)) else {
                warn!("FaultDetector: no committee to answer accusation at h={height}");
                continue;
            };
            let innocence = {
                let store = self.store.read();
                innocence_proof(&store, &committee, &accusation)
            };
            match innocence.and_then(|proof| proof.to_event(self.address)) {
                Ok(event) => {
                    info!(
                        "FaultDetector: answering on-chain {} accusation at h={height}",
                        accusation.rule
                    );
                    self.answered.insert(key);
                    events.push(event);
                }
                Err(err) => {
                    warn!("FaultDetector: cannot answer {} accusation: {err}", accusation.rule);
                }
            }
        }
        events
    }

    fn scan(&mut self, checkpoint: u64) {
        if checkpoint <= self.store.read().first_height_buffered() {
            return;
        }
        let Some(committee) = self.chain.committee_at(checkpoint.saturating_sub(1)) else {
            warn!("FaultDetector: no committee for checkpoint {checkpoint}");
            return;
        };
        let proofs = {
            let store = self.store.read();
            run_rule_engine(&store, &committee, checkpoint)
        };

        let mut accused: BTreeMap<Pubkey, usize> = BTreeMap::new();
        for proof in proofs {
            if *proof.sender() == self.address {
                continue;
            }
            if proof.proof_type != ProofType::Accusation {
                self.buffer(proof);
                continue;
            }
            let count = accused.entry(*proof.sender()).or_insert(0);
            if *count >= MAX_ACCUSATION_RATE_PER_HEIGHT {
                continue;
            }
            *count = count.saturating_add(1);
            if let Err(err) = self.offchain.send_accusation(proof) {
                warn!("FaultDetector: failed to send off-chain accusation: {err}");
            }
        }
    }

    fn report(&mut self, head: u64, checkpoint: u64) -> Vec<AccountabilityEvent> {
        if self.pending.is_empty() || !self.is_reporting_slot(checkpoint) {
            return Vec::new();
        }
        let pending = self.pending.drain_fresh(head);
        let mut events = Vec::with_capacity(pending.len());
        for proof in pending {
            match proof.to_event(self.address) {
                Ok(event) if !self.chain.is_processed(&event) => events.push(event),
                Ok(_) => {}
                Err(err) => warn!("FaultDetector: cannot encode {proof}: {err}"),
            }
        }
        info!(
            "FaultDetector: reporting {} events at checkpoint {checkpoint}",
            events.len()
        );
        events
    }

    fn buffer(&mut self, proof: AccountabilityProof) {
        if *proof.sender() == self.address {
            return;
        }
        self.pending.push(proof);
    }
}

/// Committee index of the reporter for `checkpoint`.
pub fn reporter_index(checkpoint: u64, committee_len: usize) -> Option<usize> {
    let len = u64::try_from(committee_len).ok().filter(|len| *len > 0)?;
    let idx = (checkpoint / REPORTING_SLOT_PERIOD).checked_rem(len)?;
    usize::try_from(idx).ok()
}

/// Decode proofs from on-chain events, reassembling chunked ones.
fn collect_proofs(events: &[AccountabilityEvent]) -> Vec<AccountabilityProof> {
    let mut proofs = Vec::new();
    let mut chunked: BTreeMap<(Pubkey, [u8; 32], u8), Vec<AccountabilityEvent>> = BTreeMap::new();
    for event in events {
        if event.is_chunked() {
            chunked
                .entry((event.reporter, event.msg_hash.to_bytes(), event.rule))
                .or_default()
                .push(event.clone());
            continue;
        }
        match event.proof() {
            Ok(proof) => proofs.push(proof),
            Err(err) => warn!("FaultDetector: undecodable on-chain proof: {err}"),
        }
    }
    for parts in chunked.values() {
        let decoded = AccountabilityEvent::reassemble(parts)
            .and_then(|raw| AccountabilityProof::decode(&raw));
        match decoded {
            Ok(proof) => proofs.push(proof),
            Err(err) => debug!("FaultDetector: incomplete chunked proof: {err}"),
        }
    }
    proofs
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

/// Accountability fault detector for one validator.
pub struct FaultDetector {
    address: Pubkey,
    config: FaultDetectorConfig,
    chain: Arc<dyn ChainContext>,
    pool: Arc<dyn TxPool>,
    signatures: Arc<dyn SignatureVerifier>,
    registry: Arc<VerifierRegistry>,
    store: Arc<RwLock<MessageStore>>,
    offchain: Arc<OffChainProtocol>,
    exit: Arc<AtomicBool>,
    in_flight: Arc<InFlight>,
    threads: Vec<JoinHandle<()>>,
}

impl FaultDetector {
    pub fn new(
        address: Pubkey,
        config: FaultDetectorConfig,
        chain: Arc<dyn ChainContext>,
        pool: Arc<dyn TxPool>,
        broadcaster: Arc<dyn Broadcaster>,
        signatures: Arc<dyn SignatureVerifier>,
        registry: Arc<VerifierRegistry>,
    ) -> Result<Self> {
        config.validate()?;
        let store = Arc::new(RwLock::new(MessageStore::new()));
        let offchain = Arc::new(OffChainProtocol::new(
            address,
            chain.clone(),
            signatures.clone(),
            store.clone(),
            broadcaster,
            config.max_offchain_msg_size,
            config.duplicate_cache_capacity,
            config.innocence_cache_capacity,
            config.pending_accusation_capacity,
        ));
        Ok(Self {
            address,
            config,
            chain,
            pool,
            signatures,
            registry,
            store,
            offchain,
            exit: Arc::new(AtomicBool::new(false)),
            in_flight: Arc::new(InFlight::default()),
            threads: Vec::new(),
        })
    }

    pub fn address(&self) -> &Pubkey {
        &self.address
    }

    pub fn store(&self) -> Arc<RwLock<MessageStore>> {
        self.store.clone()
    }

    pub fn offchain(&self) -> &Arc<OffChainProtocol> {
        &self.offchain
    }

    pub fn is_running(&self) -> bool {
        !self.threads.is_empty()
    }

    /// Register the verifiers and spawn the three loops.
    ///
    /// * `consensus_msgs`: raw consensus messages seen by this node.
    /// * `new_heads`: heights of newly committed blocks. Closing this
    ///   channel ends all loops.
    pub fn start(
        &mut self,
        consensus_msgs: Receiver<Vec<u8>>,
        new_heads: Receiver<u64>,
    ) -> Result<()> {
        if self.is_running() {
            return Err(FaultDetectorError::AlreadyStarted);
        }
        self.exit.store(false, Ordering::Relaxed);
        self.registry.register_accountability_verifiers(
            Arc::new(ChainCommittees(self.chain.clone())),
            self.signatures.clone(),
            &self.config.accountability,
        );

        let capacity = self.config.channel_capacity;
        let (misbehaviour_tx, misbehaviour_rx) = bounded(capacity);
        let (head_tx, head_rx) = bounded(capacity);
        let (events_tx, events_rx) = bounded(capacity);

        let intake = MessageIntake::new(
            self.chain.clone(),
            self.signatures.clone(),
            self.store.clone(),
            self.config.future_msg_capacity,
        );
        let handler = MessageHandler::new(
            self.address,
            intake,
            self.offchain.clone(),
            misbehaviour_tx,
        );
        let engine = RuleEngineLoop::new(
            self.address,
            self.chain.clone(),
            self.store.clone(),
            self.offchain.clone(),
            misbehaviour_rx,
            self.config.pending_event_capacity,
        );
        let reporter = Reporter::new(self.address, self.chain.clone(), self.pool.clone(), &self.config);

        let rate_window = Duration::from_millis(self.config.rate_window_ms);
        let exit = self.exit.clone();
        self.threads.push(
            Builder::new()
                .name("trv1AfdMsgHandler".to_string())
                .spawn(move || {
                    run_msg_handler(handler, consensus_msgs, new_heads, head_tx, rate_window, &exit)
                })?,
        );

        let exit = self.exit.clone();
        self.threads.push(
            Builder::new()
                .name("trv1AfdRuleEngine".to_string())
                .spawn(move || run_rule_engine_loop(engine, head_rx, events_tx, &exit))?,
        );

        let exit = self.exit.clone();
        let in_flight = self.in_flight.clone();
        self.threads.push(
            Builder::new()
                .name("trv1AfdTxIssuer".to_string())
                .spawn(move || run_tx_issuance(reporter, events_rx, &in_flight, &exit))?,
        );

        info!("FaultDetector: started for {}", self.address);
        Ok(())
    }

    /// Handle an off-chain accountability message from `peer`. An `Err`
    /// means the peer should be disconnected.
    pub fn handle_offchain_message(
        &self,
        peer: &Pubkey,
        msg: &OffChainMessage,
    ) -> std::result::Result<(), OffChainError> {
        let _guard = self.in_flight.enter();
        self.offchain.handle_message(peer, msg)
    }

    /// Stop the loops, wait for in-flight dispatch, and unregister the
    /// verifiers.
    pub fn stop(&mut self) {
        if !self.is_running() {
            return;
        }
        self.exit.store(true, Ordering::Relaxed);
        for handle in self.threads.drain(..) {
            let name = handle.thread().name().unwrap_or("unnamed").to_string();
            if handle.join().is_err() {
                error!("FaultDetector: {name} thread panicked");
            }
        }
        self.in_flight.wait_idle();
        self.registry.unregister_accountability_verifiers();
        info!("FaultDetector: stopped");
    }
}

impl Drop for FaultDetector {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_msg_handler(
    mut handler: MessageHandler,
    consensus_msgs: Receiver<Vec<u8>>,
    new_heads: Receiver<u64>,
    heads_out: Sender<u64>,
    rate_window: Duration,
    exit: &AtomicBool,
) {
    let ticker = tick(rate_window);
    let mut consensus_msgs = consensus_msgs;
    let poll = Duration::from_millis(EXIT_POLL_INTERVAL_MS);
    loop {
        if exit.load(Ordering::Relaxed) {
            break;
        }
        let mut msgs_closed = false;
        select! {
            recv(consensus_msgs) -> msg => match msg {
                Ok(bytes) => {
                    handler.on_message(&bytes);
                }
                Err(_) => msgs_closed = true,
            },
            recv(new_heads) -> head => match head {
                Ok(head) => {
                    handler.on_new_head(head);
                    if heads_out.send(head).is_err() {
                        break;
                    }
                }
                Err(_) => {
                    info!("FaultDetector: chain event channel closed, shutting down");
                    break;
                }
            },
            recv(ticker) -> _ => handler.on_tick(),
            default(poll) => {}
        }
        if msgs_closed {
            debug!("FaultDetector: consensus message channel closed");
            consensus_msgs = never();
        }
    }
    info!("FaultDetector: message handler exited");
}

fn run_rule_engine_loop(
    mut engine: RuleEngineLoop,
    heads: Receiver<u64>,
    events_out: Sender<Vec<AccountabilityEvent>>,
    exit: &AtomicBool,
) {
    let poll = Duration::from_millis(EXIT_POLL_INTERVAL_MS);
    loop {
        if exit.load(Ordering::Relaxed) {
            break;
        }
        match heads.recv_timeout(poll) {
            Ok(head) => {
                let events = engine.on_new_height(head);
                if !events.is_empty() && events_out.send(events).is_err() {
                    break;
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    info!("FaultDetector: rule engine exited");
}

fn run_tx_issuance(
    reporter: Reporter,
    events: Receiver<Vec<AccountabilityEvent>>,
    in_flight: &Arc<InFlight>,
    exit: &AtomicBool,
) {
    let poll = Duration::from_millis(EXIT_POLL_INTERVAL_MS);
    loop {
        if exit.load(Ordering::Relaxed) {
            break;
        }
        match events.recv_timeout(poll) {
            Ok(batch) => {
                let _guard = in_flight.enter();
                let count = reporter.submit_events(batch);
                debug!("FaultDetector: submitted {count} accountability transactions");
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    info!("FaultDetector: tx issuance exited");
}
