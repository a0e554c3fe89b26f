//! Construction and signing of the four message kinds

use crate::signer::{NodeSigner, SigningError};
use crate::types::{
    Block, CommitPayload, Digest, PreparePayload, PreparedCertificate, ProposalPayload,
    RoundChangePayload, RoundIdentifier, SignedPayload, ValidatorId,
};
use borsh::BorshSerialize;
use std::sync::Arc;

/// Builds signed payloads from raw protocol data
///
/// The only component that invokes the signing capability; everything it
/// returns carries a signature from the local node credential.
pub struct MessageFactory {
    signer: Arc<dyn NodeSigner>,
}

impl MessageFactory {
    /// Create a factory over the node's signing capability
    pub fn new(signer: Arc<dyn NodeSigner>) -> Self {
        Self { signer }
    }

    /// Identity of the local validator
    pub fn local_id(&self) -> ValidatorId {
        self.signer.id()
    }

    /// Build and sign a proposal payload
    pub fn create_proposal(
        &self,
        round: RoundIdentifier,
        block: Block,
    ) -> Result<SignedPayload<ProposalPayload>, SigningError> {
        self.sign_payload(ProposalPayload { round, block })
    }

    /// Build and sign a prepare payload
    pub fn create_prepare(
        &self,
        round: RoundIdentifier,
        digest: Digest,
    ) -> Result<SignedPayload<PreparePayload>, SigningError> {
        self.sign_payload(PreparePayload { round, digest })
    }

    /// Build and sign a commit payload
    pub fn create_commit(
        &self,
        round: RoundIdentifier,
        digest: Digest,
        commit_seal: Vec<u8>,
    ) -> Result<SignedPayload<CommitPayload>, SigningError> {
        self.sign_payload(CommitPayload {
            round,
            digest,
            commit_seal,
        })
    }

    /// Build and sign a round-change payload
    pub fn create_round_change(
        &self,
        round: RoundIdentifier,
        prepared: Option<PreparedCertificate>,
    ) -> Result<SignedPayload<RoundChangePayload>, SigningError> {
        self.sign_payload(RoundChangePayload { round, prepared })
    }

    fn sign_payload<P: BorshSerialize>(&self, payload: P) -> Result<SignedPayload<P>, SigningError> {
        let encoded = borsh::to_vec(&payload).expect("payload serialization should not fail");
        let signature = self.signer.sign(&encoded)?;
        Ok(SignedPayload {
            payload,
            author: self.signer.id(),
            signature,
        })
    }
}
