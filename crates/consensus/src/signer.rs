//! Local signing credential for consensus messages

use crate::types::ValidatorId;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::RngCore;
use thiserror::Error;

/// Failure of the local signing capability
///
/// Never fatal: the message being built is dropped and the round-state
/// machine retries on its next event.
#[derive(Error, Debug, Clone)]
pub enum SigningError {
    #[error("signing credential unavailable: {0}")]
    Unavailable(String),

    #[error("signing failed: {0}")]
    Failed(String),
}

/// The node's signing capability
///
/// Implementations wrap whatever holds the validator key (an in-process key,
/// a remote security module). Signing must be fast and non-blocking.
pub trait NodeSigner: Send + Sync {
    /// Identity of the local validator
    fn id(&self) -> ValidatorId;

    /// Sign an encoded payload with the local credential
    fn sign(&self, payload: &[u8]) -> Result<Vec<u8>, SigningError>;
}

/// In-process ed25519 signer
pub struct Ed25519Signer {
    key: SigningKey,
}

impl Ed25519Signer {
    /// Create a signer from an existing key
    pub fn new(key: SigningKey) -> Self {
        Self { key }
    }

    /// Create a signer with a freshly generated key
    pub fn random() -> Self {
        let mut seed = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut seed);
        Self {
            key: SigningKey::from_bytes(&seed),
        }
    }
}

impl NodeSigner for Ed25519Signer {
    fn id(&self) -> ValidatorId {
        ValidatorId(self.key.verifying_key().to_bytes())
    }

    fn sign(&self, payload: &[u8]) -> Result<Vec<u8>, SigningError> {
        Ok(self.key.sign(payload).to_bytes().to_vec())
    }
}

/// Check a signature against a payload and its claimed author
pub fn verify(payload: &[u8], signature: &[u8], author: &ValidatorId) -> bool {
    let Ok(key) = VerifyingKey::from_bytes(&author.0) else {
        return false;
    };
    let Ok(signature) = Signature::from_slice(signature) else {
        return false;
    };
    key.verify(payload, &signature).is_ok()
}
