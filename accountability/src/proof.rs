//! Accountability proofs and their on-chain event encoding.
//!
//! A proof is `{type, rule, message, evidence}`; its canonical binary
//! encoding (bincode) is what the verifiers decode and what
//! [`AccountabilityEvent::raw_proof`] carries, split into chunks when a
//! single transaction cannot hold it.

use {
    crate::{
        error::{AccountabilityError, Result},
        types::ConsensusMessage,
    },
    serde::{Deserialize, Serialize},
    solana_hash::Hash,
    solana_pubkey::Pubkey,
    std::fmt,
};

/// Maximum number of chunks one event can be split into.
pub const MAX_CHUNKS: usize = u8::MAX as usize;

// ── Identifiers ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ProofType {
    Misbehaviour = 0,
    Accusation = 1,
    Innocence = 2,
}

impl TryFrom<u8> for ProofType {
    type Error = AccountabilityError;

    fn try_from(id: u8) -> Result<Self> {
        match id {
            0 => Ok(ProofType::Misbehaviour),
            1 => Ok(ProofType::Accusation),
            2 => Ok(ProofType::Innocence),
            id => Err(AccountabilityError::UnknownIdentifier {
                kind: "proof type",
                id,
            }),
        }
    }
}

/// Accountability rule identifiers, `u8` on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum Rule {
    PN = 0,
    PO = 1,
    PVN = 2,
    PVO = 3,
    PVO12 = 4,
    PVO3 = 5,
    C = 6,
    C1 = 7,
    InvalidProposal = 8,
    InvalidProposer = 9,
    Equivocation = 10,
    AccountableGarbageMessage = 11,
    InvalidRound = 12,
    WrongValidRound = 13,
}

impl Rule {
    const ALL: [Rule; 14] = [
        Rule::PN,
        Rule::PO,
        Rule::PVN,
        Rule::PVO,
        Rule::PVO12,
        Rule::PVO3,
        Rule::C,
        Rule::C1,
        Rule::InvalidProposal,
        Rule::InvalidProposer,
        Rule::Equivocation,
        Rule::AccountableGarbageMessage,
        Rule::InvalidRound,
        Rule::WrongValidRound,
    ];

    /// Only these rules can be rebutted with an innocence proof.
    pub fn admits_innocence(self) -> bool {
        matches!(self, Rule::PO | Rule::PVN | Rule::PVO | Rule::C1)
    }
}

impl TryFrom<u8> for Rule {
    type Error = AccountabilityError;

    fn try_from(id: u8) -> Result<Self> {
        Rule::ALL
            .get(usize::from(id))
            .copied()
            .ok_or(AccountabilityError::UnknownIdentifier { kind: "rule", id })
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// ── Proof ───────────────────────────────────────────────────────────────────

/// A self-contained, re-verifiable claim about one consensus message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountabilityProof {
    pub proof_type: ProofType,
    pub rule: Rule,
    /// The accused (or exonerated) message.
    pub message: ConsensusMessage,
    /// Supporting messages, order significant to the verifier.
    pub evidence: Vec<ConsensusMessage>,
}

impl AccountabilityProof {
    pub fn misbehaviour(
        rule: Rule,
        message: ConsensusMessage,
        evidence: Vec<ConsensusMessage>,
    ) -> Self {
        Self {
            proof_type: ProofType::Misbehaviour,
            rule,
            message,
            evidence,
        }
    }

    pub fn accusation(rule: Rule, message: ConsensusMessage, evidence: Vec<ConsensusMessage>) -> Self {
        Self {
            proof_type: ProofType::Accusation,
            rule,
            message,
            evidence,
        }
    }

    pub fn innocence(rule: Rule, message: ConsensusMessage, evidence: Vec<ConsensusMessage>) -> Self {
        Self {
            proof_type: ProofType::Innocence,
            rule,
            message,
            evidence,
        }
    }

    /// Canonical binary encoding.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }

    pub fn sender(&self) -> &Pubkey {
        self.message.sender()
    }

    pub fn msg_hash(&self) -> Hash {
        self.message.hash()
    }

    /// Wrap this proof into an unchunked on-chain event.
    pub fn to_event(&self, reporter: Pubkey) -> Result<AccountabilityEvent> {
        Ok(AccountabilityEvent {
            event_type: self.proof_type as u8,
            rule: self.rule as u8,
            reporter,
            sender: *self.sender(),
            msg_hash: self.msg_hash(),
            chunks: 0,
            chunk_id: 0,
            raw_proof: self.encode()?,
        })
    }
}

impl fmt::Display for AccountabilityProof {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?}({}) on {} with {} evidence",
            self.proof_type,
            self.rule,
            self.message,
            self.evidence.len()
        )
    }
}

// ── On-chain event ──────────────────────────────────────────────────────────

/// Proof as submitted to the accountability contract. `chunks == 0` marks
/// an unchunked event carrying the whole proof.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountabilityEvent {
    pub event_type: u8,
    pub rule: u8,
    pub reporter: Pubkey,
    pub sender: Pubkey,
    pub msg_hash: Hash,
    pub chunks: u8,
    pub chunk_id: u8,
    pub raw_proof: Vec<u8>,
}

impl AccountabilityEvent {
    pub fn proof_type(&self) -> Result<ProofType> {
        ProofType::try_from(self.event_type)
    }

    pub fn rule(&self) -> Result<Rule> {
        Rule::try_from(self.rule)
    }

    pub fn is_chunked(&self) -> bool {
        self.chunks > 0
    }

    /// Decode the carried proof. Only valid for unchunked events.
    pub fn proof(&self) -> Result<AccountabilityProof> {
        if self.is_chunked() {
            return Err(AccountabilityError::InvalidChunks(format!(
                "event is chunk {} of {}",
                self.chunk_id, self.chunks
            )));
        }
        AccountabilityProof::decode(&self.raw_proof)
    }

    /// Split an unchunked event into `ceil(len / chunk_size)` chunk events.
    pub fn split(&self, chunk_size: usize) -> Result<Vec<AccountabilityEvent>> {
        if chunk_size == 0 {
            return Err(AccountabilityError::InvalidChunks(
                "chunk size must be > 0".to_string(),
            ));
        }
        let count = self.raw_proof.len().div_ceil(chunk_size);
        if count <= 1 {
            return Err(AccountabilityError::InvalidChunks(format!(
                "{} bytes fit in one chunk of {chunk_size}",
                self.raw_proof.len()
            )));
        }
        let chunks = u8::try_from(count).map_err(|_| {
            AccountabilityError::InvalidChunks(format!("{count} chunks exceed {MAX_CHUNKS}"))
        })?;

        Ok(self
            .raw_proof
            .chunks(chunk_size)
            .zip(0..=u8::MAX)
            .map(|(piece, chunk_id)| AccountabilityEvent {
                event_type: self.event_type,
                rule: self.rule,
                reporter: self.reporter,
                sender: self.sender,
                msg_hash: self.msg_hash,
                chunks,
                chunk_id,
                raw_proof: piece.to_vec(),
            })
            .collect())
    }

    /// Concatenate chunk events of one proof in `chunk_id` order.
    pub fn reassemble(parts: &[AccountabilityEvent]) -> Result<Vec<u8>> {
        let first = parts.first().ok_or_else(|| {
            AccountabilityError::InvalidChunks("no chunks to reassemble".to_string())
        })?;
        let expected = usize::from(first.chunks);
        if expected == 0 || parts.len() != expected {
            return Err(AccountabilityError::InvalidChunks(format!(
                "expected {expected} chunks, got {}",
                parts.len()
            )));
        }

        let mut ordered: Vec<&AccountabilityEvent> = parts.iter().collect();
        ordered.sort_by_key(|e| e.chunk_id);
        let mut raw = Vec::new();
        for (i, part) in ordered.iter().enumerate() {
            if usize::from(part.chunk_id) != i
                || part.chunks != first.chunks
                || part.msg_hash != first.msg_hash
                || part.rule != first.rule
                || part.event_type != first.event_type
            {
                return Err(AccountabilityError::InvalidChunks(format!(
                    "inconsistent chunk {} of {}",
                    part.chunk_id, part.chunks
                )));
            }
            raw.extend_from_slice(&part.raw_proof);
        }
        Ok(raw)
    }
}
