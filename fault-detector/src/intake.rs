//! Ingestion of consensus messages into the shared [`MessageStore`].
//!
//! Every message passes the auto-incriminating checks before it is stored.
//! Faults that need no further context (garbage, invalid round, wrong
//! proposer, bad valid round, equivocation) are turned into misbehaviour
//! proofs on the spot.

use {
    crate::{chain::ChainContext, future_buffer::FutureBuffer},
    log::*,
    parking_lot::RwLock,
    std::sync::Arc,
    trv1_accountability::{
        config::{HEIGHT_RANGE, MAX_ROUND},
        is_proposer, verify_message, AccountabilityProof, ConsensusMessage, MessageStore, Rule,
        SignatureVerifier,
    },
};

/// Why a message was discarded without a proof.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    Undecodable,
    Stale,
    /// No committee for the parent height and the message is not ahead of
    /// the local head.
    NoParentCommittee,
    NotCommitteeMember,
    InvalidSignature,
    /// The future buffer refused the message.
    FutureBufferFull,
}

/// Result of running one message through intake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntakeOutcome {
    Stored,
    /// The same message is already stored.
    Duplicate,
    /// Held until the parent committee is known.
    Buffered,
    Dropped(DropReason),
    /// The message is provably faulty. `stored` is true for equivocations,
    /// which are kept as evidence.
    Faulty {
        proof: Box<AccountabilityProof>,
        stored: bool,
    },
}

impl IntakeOutcome {
    pub fn proof(&self) -> Option<&AccountabilityProof> {
        match self {
            IntakeOutcome::Faulty { proof, .. } => Some(proof),
            _ => None,
        }
    }

    fn faulty(rule: Rule, message: ConsensusMessage, evidence: Vec<ConsensusMessage>, stored: bool) -> Self {
        IntakeOutcome::Faulty {
            proof: Box::new(AccountabilityProof::misbehaviour(rule, message, evidence)),
            stored,
        }
    }
}

/// Validates and stores incoming consensus messages.
pub struct MessageIntake {
    chain: Arc<dyn ChainContext>,
    signatures: Arc<dyn SignatureVerifier>,
    store: Arc<RwLock<MessageStore>>,
    future: FutureBuffer,
}

impl MessageIntake {
    pub fn new(
        chain: Arc<dyn ChainContext>,
        signatures: Arc<dyn SignatureVerifier>,
        store: Arc<RwLock<MessageStore>>,
        future_capacity: usize,
    ) -> Self {
        Self {
            chain,
            signatures,
            store,
            future: FutureBuffer::new(future_capacity),
        }
    }

    /// Decode raw bytes from the consensus layer and process them.
    pub fn process_bytes(&mut self, bytes: &[u8]) -> IntakeOutcome {
        match bincode::deserialize::<ConsensusMessage>(bytes) {
            Ok(msg) => self.process(msg),
            Err(err) => {
                debug!("FaultDetector: dropping undecodable consensus message: {err}");
                IntakeOutcome::Dropped(DropReason::Undecodable)
            }
        }
    }

    /// Run the auto-incriminating checks on `msg` and store it if it is
    /// admissible.
    pub fn process(&mut self, msg: ConsensusMessage) -> IntakeOutcome {
        let head = self.chain.current_height();
        let height = msg.height();

        if height == 0 || (head > HEIGHT_RANGE && height < head.saturating_sub(HEIGHT_RANGE)) {
            trace!("FaultDetector: dropping stale message at h={height} (head {head})");
            return IntakeOutcome::Dropped(DropReason::Stale);
        }

        let Some(committee) = self.chain.committee_at(height.saturating_sub(1)) else {
            if height > head {
                return if self.future.push(msg) {
                    IntakeOutcome::Buffered
                } else {
                    IntakeOutcome::Dropped(DropReason::FutureBufferFull)
                };
            }
            return IntakeOutcome::Dropped(DropReason::NoParentCommittee);
        };

        if let Err(err) = verify_message(self.signatures.as_ref(), &committee, &msg) {
            debug!("FaultDetector: rejecting {msg}: {err}");
            let reason = if committee.contains(msg.sender()) {
                DropReason::InvalidSignature
            } else {
                DropReason::NotCommitteeMember
            };
            return IntakeOutcome::Dropped(reason);
        }

        if let Err(err) = msg.validate_structure() {
            info!("FaultDetector: garbage message from {}: {err}", msg.sender());
            return IntakeOutcome::faulty(Rule::AccountableGarbageMessage, msg, vec![], false);
        }

        if msg.round() > MAX_ROUND {
            return IntakeOutcome::faulty(Rule::InvalidRound, msg.to_lite(), vec![], false);
        }

        let mut store = self.store.write();
        if store.contains_value(&msg) {
            return IntakeOutcome::Duplicate;
        }

        if msg.code().is_proposal() {
            if !is_proposer(&committee, msg.sender(), height, msg.round()) {
                return IntakeOutcome::faulty(Rule::InvalidProposer, msg.to_lite(), vec![], false);
            }
            if msg.valid_round().is_some_and(|vr| vr >= msg.round()) {
                return IntakeOutcome::faulty(Rule::WrongValidRound, msg.to_lite(), vec![], false);
            }
        }

        let conflicting = store.get_equivocated(&msg).first().map(|m| m.to_lite());
        let lite = msg.to_lite();
        store.save(msg);
        match conflicting {
            Some(other) => {
                info!("FaultDetector: equivocation by {} at h={height}", lite.sender());
                IntakeOutcome::faulty(Rule::Equivocation, lite, vec![other], true)
            }
            None => IntakeOutcome::Stored,
        }
    }

    /// Replay buffered messages that became processable at `head`.
    pub fn replay_future(&mut self, head: u64) -> Vec<IntakeOutcome> {
        let ready = self.future.pop_ready(head);
        if !ready.is_empty() {
            debug!("FaultDetector: replaying {} buffered messages at head {head}", ready.len());
        }
        ready.into_iter().map(|msg| self.process(msg)).collect()
    }

    pub fn buffered(&self) -> usize {
        self.future.len()
    }
}
