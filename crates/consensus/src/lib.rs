//! BFT consensus messaging - round-scoped messages, gossip multicast, round timers
//!
//! Architecture:
//! - MessageFactory builds and signs the four message kinds with the node credential
//! - NetworkMulticaster fans a message out to the validator set minus a denylist
//! - UniqueMessageMulticaster suppresses re-gossip of already-seen messages
//! - RoundTimer bounds each round and owns the round-change re-announcement task
//! - MessageTransmitter orchestrates build, sign, and multicast per message kind
//!
//! Quorum counting, block validation, signing primitives, and peer transport
//! live outside this crate and are reached through injected capabilities.

pub mod config;
pub mod factory;
pub mod multicast;
pub mod signer;
pub mod timer;
pub mod tracker;
pub mod transmitter;
pub mod types;

pub use config::ConsensusConfig;
pub use factory::MessageFactory;
pub use multicast::{
    NetworkMulticaster, PeerNetwork, UniqueMessageMulticaster, ValidatorMulticaster,
};
pub use signer::{Ed25519Signer, NodeSigner, SigningError};
pub use timer::{RepeatingTask, RoundExpiry, RoundTimer, Scheduler, TokioScheduler};
pub use tracker::MessageTracker;
pub use transmitter::MessageTransmitter;
pub use types::{
    Block, CommitPayload, ConsensusMessage, Digest, MessageFingerprint, MessageKind,
    PreparePayload, PreparedCertificate, ProposalPayload, RoundChangePayload, RoundIdentifier,
    SignedPayload, ValidatorId,
};

/// Default number of gossiped-message fingerprints tracked
pub const DEFAULT_GOSSIP_HISTORY_LIMIT: usize = 1000;
