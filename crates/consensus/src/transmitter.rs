//! Orchestrates building, signing, and multicasting each message kind

use crate::factory::MessageFactory;
use crate::multicast::ValidatorMulticaster;
use crate::signer::SigningError;
use crate::timer::{RoundTimer, Scheduler};
use crate::types::{
    Block, ConsensusMessage, Digest, MessageKind, PreparePayload, PreparedCertificate,
    RoundChangePayload, RoundIdentifier, SignedPayload,
};
use std::sync::Arc;
use std::time::Duration;

/// Emits signed consensus messages on behalf of the round-state machine
///
/// Guarantees "attempted", never "delivered": signing failures drop the
/// message with a warning, and transport failures are swallowed below the
/// multicaster. Round-change messages are re-announced periodically; the
/// re-announcement task handle is handed to the round timer, which owns
/// cancelling it when the round advances.
pub struct MessageTransmitter {
    factory: MessageFactory,
    multicaster: Arc<dyn ValidatorMulticaster>,
    scheduler: Arc<dyn Scheduler>,
    rebroadcast_interval: Duration,
}

impl MessageTransmitter {
    /// Create a transmitter over the node's factory, multicaster, and
    /// scheduling capability
    pub fn new(
        factory: MessageFactory,
        multicaster: Arc<dyn ValidatorMulticaster>,
        scheduler: Arc<dyn Scheduler>,
        rebroadcast_interval: Duration,
    ) -> Self {
        Self {
            factory,
            multicaster,
            scheduler,
            rebroadcast_interval,
        }
    }

    /// Build and multicast a proposal for the given round
    pub fn send_proposal(
        &self,
        round: RoundIdentifier,
        block: Block,
        round_change_justification: Vec<SignedPayload<RoundChangePayload>>,
        prepare_justification: Vec<SignedPayload<PreparePayload>>,
    ) {
        self.build_and_multicast(MessageKind::Proposal, |factory| {
            Ok(ConsensusMessage::Proposal {
                signed: factory.create_proposal(round, block)?,
                round_change_justification,
                prepare_justification,
            })
        });
    }

    /// Build and multicast a prepare for the given round
    pub fn send_prepare(&self, round: RoundIdentifier, digest: Digest) {
        self.build_and_multicast(MessageKind::Prepare, |factory| {
            Ok(ConsensusMessage::Prepare(
                factory.create_prepare(round, digest)?,
            ))
        });
    }

    /// Build and multicast a commit for the given round
    pub fn send_commit(&self, round: RoundIdentifier, digest: Digest, commit_seal: Vec<u8>) {
        self.build_and_multicast(MessageKind::Commit, |factory| {
            Ok(ConsensusMessage::Commit(factory.create_commit(
                round,
                digest,
                commit_seal,
            )?))
        });
    }

    /// Build a round change, multicast it now, and keep re-announcing it
    ///
    /// The message is built and signed once; the periodic task re-multicasts
    /// it on a fixed interval so peers that missed the first gossip still
    /// observe this node's round-change intent. Ownership of the task handle
    /// transfers to `round_timer`, which cancels it when the round advances.
    pub fn send_round_change(
        &self,
        round: RoundIdentifier,
        prepared: Option<PreparedCertificate>,
        round_timer: &RoundTimer,
    ) {
        let signed = match self.factory.create_round_change(round, prepared) {
            Ok(signed) => signed,
            Err(e) => {
                warn_not_sent(MessageKind::RoundChange, &e);
                return;
            }
        };
        let message = ConsensusMessage::RoundChange(signed);

        let multicaster = Arc::clone(&self.multicaster);
        let task = self.scheduler.schedule_repeating(
            self.rebroadcast_interval,
            Box::new(move || {
                tracing::debug!("Announcing round change for round {}", message.round());
                multicaster.send(&message);
            }),
        );
        round_timer.register_repeating_task(task);
    }

    fn build_and_multicast(
        &self,
        kind: MessageKind,
        build: impl FnOnce(&MessageFactory) -> Result<ConsensusMessage, SigningError>,
    ) {
        match build(&self.factory) {
            Ok(message) => {
                tracing::debug!("Multicasting {} for round {}", kind, message.round());
                self.multicaster.send(&message);
            }
            Err(e) => warn_not_sent(kind, &e),
        }
    }
}

fn warn_not_sent(kind: MessageKind, error: &SigningError) {
    tracing::warn!("Failed to generate signature for {} (not sent): {}", kind, error);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConsensusConfig;
    use crate::signer::{Ed25519Signer, NodeSigner};
    use crate::timer::RepeatingTask;
    use crate::types::ValidatorId;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingMulticaster {
        sends: Mutex<Vec<ConsensusMessage>>,
    }

    impl RecordingMulticaster {
        fn count(&self) -> usize {
            self.sends.lock().len()
        }
    }

    impl ValidatorMulticaster for RecordingMulticaster {
        fn send_except(&self, message: &ConsensusMessage, _denylist: &[ValidatorId]) {
            self.sends.lock().push(message.clone());
        }
    }

    struct FailingSigner;

    impl NodeSigner for FailingSigner {
        fn id(&self) -> ValidatorId {
            ValidatorId([0u8; 32])
        }

        fn sign(&self, _payload: &[u8]) -> Result<Vec<u8>, SigningError> {
            Err(SigningError::Unavailable("security module offline".into()))
        }
    }

    struct FakeTask {
        run: Arc<dyn Fn() + Send + Sync>,
        probe: tokio::task::AbortHandle,
    }

    /// Scheduler that fires tasks only when the test says so (after the
    /// immediate first fire the contract requires)
    #[derive(Default)]
    struct FakeScheduler {
        tasks: Mutex<Vec<FakeTask>>,
    }

    impl FakeScheduler {
        fn live_tasks(&self) -> usize {
            self.tasks.lock().iter().filter(|t| !t.probe.is_finished()).count()
        }

        fn fire_live(&self) {
            for task in self.tasks.lock().iter() {
                if !task.probe.is_finished() {
                    (task.run)();
                }
            }
        }
    }

    impl Scheduler for FakeScheduler {
        fn schedule_repeating(
            &self,
            _interval: Duration,
            task: Box<dyn Fn() + Send + Sync>,
        ) -> RepeatingTask {
            let run: Arc<dyn Fn() + Send + Sync> = Arc::from(task);
            run();
            let handle = tokio::spawn(std::future::pending::<()>());
            self.tasks.lock().push(FakeTask {
                run,
                probe: handle.abort_handle(),
            });
            RepeatingTask::new(handle)
        }
    }

    fn transmitter(
        signer: Arc<dyn NodeSigner>,
        multicaster: Arc<RecordingMulticaster>,
        scheduler: Arc<FakeScheduler>,
    ) -> MessageTransmitter {
        MessageTransmitter::new(
            MessageFactory::new(signer),
            multicaster,
            scheduler,
            Duration::from_secs(5),
        )
    }

    async fn settle() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_send_prepare_multicasts_once() {
        let recording = Arc::new(RecordingMulticaster::default());
        let tx = transmitter(
            Arc::new(Ed25519Signer::random()),
            recording.clone(),
            Arc::new(FakeScheduler::default()),
        );

        tx.send_prepare(RoundIdentifier::new(3, 0), Digest([1u8; 32]));

        assert_eq!(recording.count(), 1);
        assert_eq!(recording.sends.lock()[0].kind(), MessageKind::Prepare);
    }

    #[tokio::test]
    async fn test_signing_error_drops_commit() {
        let recording = Arc::new(RecordingMulticaster::default());
        let tx = transmitter(
            Arc::new(FailingSigner),
            recording.clone(),
            Arc::new(FakeScheduler::default()),
        );

        tx.send_commit(RoundIdentifier::new(3, 0), Digest([1u8; 32]), vec![0xAB; 64]);

        assert_eq!(recording.count(), 0);
    }

    #[tokio::test]
    async fn test_proposal_carries_justification() {
        let signer = Arc::new(Ed25519Signer::random());
        let factory = MessageFactory::new(signer.clone());
        let recording = Arc::new(RecordingMulticaster::default());
        let tx = transmitter(signer, recording.clone(), Arc::new(FakeScheduler::default()));

        let round = RoundIdentifier::new(4, 1);
        let block = Block {
            number: 4,
            parent: Digest::default(),
            payload: vec![7],
        };
        let round_change = factory.create_round_change(round, None).unwrap();
        let prepare = factory
            .create_prepare(RoundIdentifier::new(4, 0), block.digest())
            .unwrap();

        tx.send_proposal(round, block, vec![round_change], vec![prepare]);

        let sends = recording.sends.lock();
        match &sends[0] {
            ConsensusMessage::Proposal {
                round_change_justification,
                prepare_justification,
                ..
            } => {
                assert_eq!(round_change_justification.len(), 1);
                assert_eq!(prepare_justification.len(), 1);
            }
            other => panic!("expected proposal, got {}", other.kind()),
        }
    }

    #[tokio::test]
    async fn test_round_change_announces_immediately_and_repeats() {
        let recording = Arc::new(RecordingMulticaster::default());
        let scheduler = Arc::new(FakeScheduler::default());
        let tx = transmitter(
            Arc::new(Ed25519Signer::random()),
            recording.clone(),
            scheduler.clone(),
        );
        let (timer, _expiry_rx) = RoundTimer::new(&ConsensusConfig::default());

        tx.send_round_change(RoundIdentifier::new(2, 1), None, &timer);
        assert_eq!(recording.count(), 1);

        scheduler.fire_live();
        scheduler.fire_live();
        assert_eq!(recording.count(), 3);
        assert_eq!(recording.sends.lock()[2].kind(), MessageKind::RoundChange);
    }

    #[tokio::test]
    async fn test_new_round_change_replaces_previous_task() {
        let recording = Arc::new(RecordingMulticaster::default());
        let scheduler = Arc::new(FakeScheduler::default());
        let tx = transmitter(
            Arc::new(Ed25519Signer::random()),
            recording.clone(),
            scheduler.clone(),
        );
        let (timer, _expiry_rx) = RoundTimer::new(&ConsensusConfig::default());

        tx.send_round_change(RoundIdentifier::new(2, 1), None, &timer);
        tx.send_round_change(RoundIdentifier::new(2, 2), None, &timer);
        settle().await;

        // Only the round 2/2 task is still live
        assert_eq!(scheduler.live_tasks(), 1);

        let before = recording.count();
        scheduler.fire_live();
        assert_eq!(recording.count(), before + 1);
        assert_eq!(
            recording.sends.lock().last().unwrap().round(),
            RoundIdentifier::new(2, 2)
        );
    }

    #[tokio::test]
    async fn test_signing_error_schedules_no_round_change_task() {
        let recording = Arc::new(RecordingMulticaster::default());
        let scheduler = Arc::new(FakeScheduler::default());
        let tx = transmitter(Arc::new(FailingSigner), recording.clone(), scheduler.clone());
        let (timer, _expiry_rx) = RoundTimer::new(&ConsensusConfig::default());

        tx.send_round_change(RoundIdentifier::new(2, 1), None, &timer);

        assert_eq!(recording.count(), 0);
        assert_eq!(scheduler.live_tasks(), 0);
    }
}
