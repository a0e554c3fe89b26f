//! Core types for round-scoped consensus messaging

use borsh::{BorshDeserialize, BorshSerialize};
use std::fmt;

/// Identifies one agreement attempt: a block height plus a round within it
///
/// Ordered primarily by sequence number, then by round number. Never reused
/// once this node has moved past it.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, BorshSerialize, BorshDeserialize,
)]
pub struct RoundIdentifier {
    /// Block height being agreed on
    pub sequence_number: u64,
    /// Attempt number within that height
    pub round_number: u32,
}

impl RoundIdentifier {
    /// Create a new round identifier
    pub fn new(sequence_number: u64, round_number: u32) -> Self {
        Self {
            sequence_number,
            round_number,
        }
    }

    /// The next round at the same height
    pub fn next_round(&self) -> Self {
        Self {
            sequence_number: self.sequence_number,
            round_number: self.round_number + 1,
        }
    }
}

impl fmt::Display for RoundIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.sequence_number, self.round_number)
    }
}

/// A validator identity (ed25519 verifying key bytes)
#[derive(Clone, Copy, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize)]
pub struct ValidatorId(pub [u8; 32]);

impl fmt::Display for ValidatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0[..4] {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for ValidatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ValidatorId({})", self)
    }
}

/// A 32-byte block digest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, BorshSerialize, BorshDeserialize)]
pub struct Digest(pub [u8; 32]);

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0[..4] {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// A candidate block carried in a proposal
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Block {
    /// Block height
    pub number: u64,
    /// Digest of the parent block
    pub parent: Digest,
    /// Opaque block body
    pub payload: Vec<u8>,
}

impl Block {
    /// Compute the digest of this block
    pub fn digest(&self) -> Digest {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.number.to_le_bytes());
        hasher.update(&self.parent.0);
        hasher.update(&self.payload);
        Digest(*hasher.finalize().as_bytes())
    }
}

/// A payload together with its author's signature over the encoded payload
///
/// Only ever constructed by the [`MessageFactory`](crate::MessageFactory),
/// which guarantees the signature is produced by the local node credential.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct SignedPayload<P> {
    /// The signed payload
    pub payload: P,
    /// Identity of the signer
    pub author: ValidatorId,
    /// Signature over the borsh encoding of the payload
    pub signature: Vec<u8>,
}

/// Payload of a Proposal message
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct ProposalPayload {
    pub round: RoundIdentifier,
    /// The candidate block being proposed
    pub block: Block,
}

/// Payload of a Prepare message
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct PreparePayload {
    pub round: RoundIdentifier,
    /// Digest of the proposed block
    pub digest: Digest,
}

/// Payload of a Commit message
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct CommitPayload {
    pub round: RoundIdentifier,
    /// Digest of the proposed block
    pub digest: Digest,
    /// Second signature over the digest, usable in the final block's proof
    pub commit_seal: Vec<u8>,
}

/// Payload of a RoundChange message
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct RoundChangePayload {
    /// The round being moved to
    pub round: RoundIdentifier,
    /// Proof of a block prepared by quorum in an earlier round, if any
    pub prepared: Option<PreparedCertificate>,
}

/// Proof that a quorum prepared a block in an earlier round
///
/// Carried forward across round changes to justify re-proposing the block.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct PreparedCertificate {
    pub proposal: SignedPayload<ProposalPayload>,
    pub prepares: Vec<SignedPayload<PreparePayload>>,
}

/// The four round-scoped message kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Proposal,
    Prepare,
    Commit,
    RoundChange,
}

impl MessageKind {
    fn tag(&self) -> u8 {
        match self {
            MessageKind::Proposal => 0x00,
            MessageKind::Prepare => 0x01,
            MessageKind::Commit => 0x02,
            MessageKind::RoundChange => 0x03,
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageKind::Proposal => f.write_str("Proposal"),
            MessageKind::Prepare => f.write_str("Prepare"),
            MessageKind::Commit => f.write_str("Commit"),
            MessageKind::RoundChange => f.write_str("RoundChange"),
        }
    }
}

/// Semantic identity of a message, used for gossip duplicate detection
///
/// Derived from the message kind, round, and payload content, never from
/// transport framing, so two observations of the same logical message
/// always collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageFingerprint(pub [u8; 32]);

/// A signed consensus message as it travels between validators
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum ConsensusMessage {
    /// Candidate block plus the justification for proposing it
    Proposal {
        signed: SignedPayload<ProposalPayload>,
        /// Round changes justifying a proposal in a round above zero
        round_change_justification: Vec<SignedPayload<RoundChangePayload>>,
        /// Prepares backing the prepared certificate, if one is carried
        prepare_justification: Vec<SignedPayload<PreparePayload>>,
    },
    Prepare(SignedPayload<PreparePayload>),
    Commit(SignedPayload<CommitPayload>),
    RoundChange(SignedPayload<RoundChangePayload>),
}

impl ConsensusMessage {
    /// The message kind
    pub fn kind(&self) -> MessageKind {
        match self {
            ConsensusMessage::Proposal { .. } => MessageKind::Proposal,
            ConsensusMessage::Prepare(_) => MessageKind::Prepare,
            ConsensusMessage::Commit(_) => MessageKind::Commit,
            ConsensusMessage::RoundChange(_) => MessageKind::RoundChange,
        }
    }

    /// The round this message belongs to
    pub fn round(&self) -> RoundIdentifier {
        match self {
            ConsensusMessage::Proposal { signed, .. } => signed.payload.round,
            ConsensusMessage::Prepare(signed) => signed.payload.round,
            ConsensusMessage::Commit(signed) => signed.payload.round,
            ConsensusMessage::RoundChange(signed) => signed.payload.round,
        }
    }

    /// The validator that signed this message
    pub fn author(&self) -> ValidatorId {
        match self {
            ConsensusMessage::Proposal { signed, .. } => signed.author,
            ConsensusMessage::Prepare(signed) => signed.author,
            ConsensusMessage::Commit(signed) => signed.author,
            ConsensusMessage::RoundChange(signed) => signed.author,
        }
    }

    /// Serialize for network transmission
    pub fn to_bytes(&self) -> Vec<u8> {
        borsh::to_vec(self).expect("ConsensusMessage serialization should not fail")
    }

    /// Deserialize from network
    pub fn from_bytes(data: &[u8]) -> Result<Self, borsh::io::Error> {
        borsh::from_slice(data)
    }

    /// Compute the gossip fingerprint of this message
    pub fn fingerprint(&self) -> MessageFingerprint {
        let round = self.round();
        let mut hasher = blake3::Hasher::new();
        hasher.update(&[self.kind().tag()]);
        hasher.update(&round.sequence_number.to_le_bytes());
        hasher.update(&round.round_number.to_le_bytes());
        hasher.update(&self.to_bytes());
        MessageFingerprint(*hasher.finalize().as_bytes())
    }
}
