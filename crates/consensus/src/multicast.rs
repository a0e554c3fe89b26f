//! Multicast of consensus messages to the validator set
//!
//! `NetworkMulticaster` fans a message out over the injected peer transport;
//! `UniqueMessageMulticaster` wraps any multicaster with gossip duplicate
//! suppression so every-relays-to-every does not amplify exponentially.

use crate::tracker::MessageTracker;
use crate::types::{ConsensusMessage, ValidatorId};
use std::sync::Arc;

/// Opaque peer transport capability
///
/// Delivery is fire-and-forget: best effort, unordered, no acknowledgment.
/// Higher layers tolerate loss via round timeouts and re-announcement.
pub trait PeerNetwork: Send + Sync {
    /// Dispatch an encoded message to a set of peers
    fn dispatch(&self, peers: &[ValidatorId], bytes: &[u8]);
}

/// Sends a message to all validators, minus an optional denylist
pub trait ValidatorMulticaster: Send + Sync {
    /// Send to every known validator
    fn send(&self, message: &ConsensusMessage) {
        self.send_except(message, &[]);
    }

    /// Send to every known validator except those in `denylist`
    ///
    /// Used to avoid echoing a message back to its original sender or a
    /// suspected-faulty peer.
    fn send_except(&self, message: &ConsensusMessage, denylist: &[ValidatorId]);
}

/// Multicaster over the fixed validator set and the peer transport
pub struct NetworkMulticaster {
    network: Arc<dyn PeerNetwork>,
    validators: Vec<ValidatorId>,
    local_id: ValidatorId,
}

impl NetworkMulticaster {
    /// Create a multicaster for the given validator set
    ///
    /// The local validator is never dispatched to, whether or not it appears
    /// in `validators`.
    pub fn new(
        network: Arc<dyn PeerNetwork>,
        validators: Vec<ValidatorId>,
        local_id: ValidatorId,
    ) -> Self {
        Self {
            network,
            validators,
            local_id,
        }
    }
}

impl ValidatorMulticaster for NetworkMulticaster {
    fn send_except(&self, message: &ConsensusMessage, denylist: &[ValidatorId]) {
        let recipients: Vec<ValidatorId> = self
            .validators
            .iter()
            .copied()
            .filter(|v| *v != self.local_id && !denylist.contains(v))
            .collect();

        if recipients.is_empty() {
            tracing::debug!(
                "No reachable validators for {} at round {}",
                message.kind(),
                message.round()
            );
            return;
        }

        self.network.dispatch(&recipients, &message.to_bytes());
    }
}

/// Wraps a multicaster, suppressing re-send of already-gossiped messages
///
/// For a given instance, at most one outbound attempt is made per distinct
/// fingerprint until that fingerprint is evicted from the bounded tracker.
pub struct UniqueMessageMulticaster {
    multicaster: Arc<dyn ValidatorMulticaster>,
    tracker: Arc<MessageTracker>,
}

impl UniqueMessageMulticaster {
    /// Attach gossip duplicate suppression to a multicaster
    pub fn new(multicaster: Arc<dyn ValidatorMulticaster>, gossip_history_limit: usize) -> Self {
        Self {
            multicaster,
            tracker: Arc::new(MessageTracker::new(gossip_history_limit)),
        }
    }

    /// Attach suppression backed by an existing tracker
    pub fn with_tracker(
        multicaster: Arc<dyn ValidatorMulticaster>,
        tracker: Arc<MessageTracker>,
    ) -> Self {
        Self {
            multicaster,
            tracker,
        }
    }

    /// The tracker backing this multicaster
    pub fn tracker(&self) -> &Arc<MessageTracker> {
        &self.tracker
    }
}

impl ValidatorMulticaster for UniqueMessageMulticaster {
    fn send_except(&self, message: &ConsensusMessage, denylist: &[ValidatorId]) {
        let fingerprint = message.fingerprint();
        if self.tracker.has_seen(&fingerprint) {
            tracing::trace!(
                "Suppressing {} for round {}, already gossiped",
                message.kind(),
                message.round()
            );
            return;
        }
        self.multicaster.send_except(message, denylist);
        self.tracker.record_seen(fingerprint);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Digest, PreparePayload, RoundIdentifier, SignedPayload};
    use parking_lot::Mutex;

    fn validator(n: u8) -> ValidatorId {
        ValidatorId([n; 32])
    }

    fn prepare(round_number: u32) -> ConsensusMessage {
        ConsensusMessage::Prepare(SignedPayload {
            payload: PreparePayload {
                round: RoundIdentifier::new(1, round_number),
                digest: Digest([5u8; 32]),
            },
            author: validator(9),
            signature: vec![0xAA; 64],
        })
    }

    #[derive(Default)]
    struct RecordingNetwork {
        dispatched: Mutex<Vec<Vec<ValidatorId>>>,
    }

    impl PeerNetwork for RecordingNetwork {
        fn dispatch(&self, peers: &[ValidatorId], _bytes: &[u8]) {
            self.dispatched.lock().push(peers.to_vec());
        }
    }

    #[derive(Default)]
    struct RecordingMulticaster {
        sends: Mutex<Vec<ConsensusMessage>>,
    }

    impl ValidatorMulticaster for RecordingMulticaster {
        fn send_except(&self, message: &ConsensusMessage, _denylist: &[ValidatorId]) {
            self.sends.lock().push(message.clone());
        }
    }

    #[test]
    fn test_denylist_never_dispatched_to() {
        let network = Arc::new(RecordingNetwork::default());
        let validators = vec![validator(1), validator(2), validator(3), validator(4)];
        let multicaster =
            NetworkMulticaster::new(network.clone(), validators, validator(1));

        multicaster.send_except(&prepare(0), &[validator(3)]);

        let dispatched = network.dispatched.lock();
        assert_eq!(dispatched.len(), 1);
        assert_eq!(dispatched[0], vec![validator(2), validator(4)]);
    }

    #[test]
    fn test_empty_denylist_equals_send() {
        let network = Arc::new(RecordingNetwork::default());
        let validators = vec![validator(1), validator(2), validator(3)];
        let multicaster =
            NetworkMulticaster::new(network.clone(), validators, validator(1));

        multicaster.send(&prepare(0));
        multicaster.send_except(&prepare(1), &[]);

        let dispatched = network.dispatched.lock();
        assert_eq!(dispatched[0], dispatched[1]);
        assert_eq!(dispatched[0], vec![validator(2), validator(3)]);
    }

    #[test]
    fn test_duplicate_send_suppressed() {
        let recording = Arc::new(RecordingMulticaster::default());
        let unique = UniqueMessageMulticaster::new(recording.clone(), 100);

        unique.send(&prepare(0));
        unique.send(&prepare(0));

        assert_eq!(recording.sends.lock().len(), 1);
    }

    #[test]
    fn test_eviction_allows_resend() {
        let recording = Arc::new(RecordingMulticaster::default());
        let unique = UniqueMessageMulticaster::new(recording.clone(), 2);

        // Capacity 2: rounds 1 and 2 evict round 0, so resubmitting it sends again
        unique.send(&prepare(0));
        unique.send(&prepare(1));
        unique.send(&prepare(2));
        unique.send(&prepare(0));

        assert_eq!(recording.sends.lock().len(), 4);
    }

    #[test]
    fn test_suppression_applies_across_denylists() {
        let recording = Arc::new(RecordingMulticaster::default());
        let unique = UniqueMessageMulticaster::new(recording.clone(), 100);

        unique.send_except(&prepare(0), &[validator(2)]);
        unique.send_except(&prepare(0), &[validator(3)]);

        assert_eq!(recording.sends.lock().len(), 1);
    }
}
