//! Round timers and scheduled re-announcement tasks

use crate::config::ConsensusConfig;
use crate::types::RoundIdentifier;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Notification that a round reached its deadline without progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundExpiry {
    /// The round that timed out
    pub round: RoundIdentifier,
}

/// Owned handle to a scheduled repeating task
///
/// Exactly one component owns a handle at any time; the owner is responsible
/// for eventually cancelling it. Cancellation is idempotent, and dropping the
/// handle cancels the task.
#[derive(Debug)]
pub struct RepeatingTask {
    handle: JoinHandle<()>,
}

impl RepeatingTask {
    /// Wrap a spawned task
    pub fn new(handle: JoinHandle<()>) -> Self {
        Self { handle }
    }

    /// Stop the task; a no-op if it already stopped
    pub fn cancel(&self) {
        self.handle.abort();
    }

    /// Whether the task has stopped
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for RepeatingTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Scheduling capability for periodic tasks
///
/// Injected rather than owned so handle ownership stays explicit and tests
/// can drive task firing manually.
pub trait Scheduler: Send + Sync {
    /// Run `task` immediately, then on every `interval` tick, until the
    /// returned handle is cancelled
    fn schedule_repeating(
        &self,
        interval: Duration,
        task: Box<dyn Fn() + Send + Sync>,
    ) -> RepeatingTask;
}

/// Scheduler over the tokio runtime
pub struct TokioScheduler;

impl Scheduler for TokioScheduler {
    fn schedule_repeating(
        &self,
        interval: Duration,
        task: Box<dyn Fn() + Send + Sync>,
    ) -> RepeatingTask {
        let interval = interval.max(Duration::from_millis(1));
        RepeatingTask::new(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                // First tick completes immediately: announce, then repeat
                ticker.tick().await;
                task();
            }
        }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ArmedRound {
    epoch: u64,
    round: RoundIdentifier,
}

#[derive(Default)]
struct TimerInner {
    armed: Option<ArmedRound>,
    deadline_task: Option<JoinHandle<()>>,
    rebroadcast: Option<RepeatingTask>,
    next_epoch: u64,
}

/// Per-round countdown driving round advancement
///
/// Armed when a round begins; on expiry it notifies the round-state machine,
/// which is expected to initiate a round change. Also the single owner of the
/// round-change re-announcement task installed by the transmitter: arming a
/// new round, or cancelling, cancels that task before discarding its handle,
/// so no stale task outlives its round.
pub struct RoundTimer {
    expiry_tx: mpsc::UnboundedSender<RoundExpiry>,
    inner: Arc<Mutex<TimerInner>>,
    base_timeout: Duration,
    max_timeout_exponent: u32,
}

impl RoundTimer {
    /// Create a timer; the receiver surfaces expiry events to the
    /// round-state machine
    pub fn new(config: &ConsensusConfig) -> (Self, mpsc::UnboundedReceiver<RoundExpiry>) {
        let (expiry_tx, expiry_rx) = mpsc::unbounded_channel();
        (
            Self {
                expiry_tx,
                inner: Arc::new(Mutex::new(TimerInner::default())),
                base_timeout: config.base_round_timeout,
                max_timeout_exponent: config.max_timeout_exponent,
            },
            expiry_rx,
        )
    }

    /// Timeout applied to the given round number
    ///
    /// Doubles with the round number to aid eventual synchrony, capped to
    /// keep the shift bounded.
    pub fn timeout_for(&self, round_number: u32) -> Duration {
        let exponent = round_number.min(self.max_timeout_exponent);
        self.base_timeout.saturating_mul(1u32 << exponent)
    }

    /// Arm the timer for a round, superseding any previous round
    ///
    /// Cancels the previously armed deadline and any registered
    /// re-announcement task. Must be called within a tokio runtime.
    pub fn start_timer(&self, round: RoundIdentifier) {
        let timeout = self.timeout_for(round.round_number);
        let mut inner = self.inner.lock();
        Self::disarm(&mut inner);

        let epoch = inner.next_epoch;
        inner.next_epoch += 1;
        inner.armed = Some(ArmedRound { epoch, round });

        let state = Arc::clone(&self.inner);
        let tx = self.expiry_tx.clone();
        inner.deadline_task = Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let mut inner = state.lock();
            // A cancel or re-arm that won the race leaves nothing to deliver
            match inner.armed {
                Some(armed) if armed.epoch == epoch => {}
                _ => return,
            }
            inner.armed = None;
            inner.deadline_task = None;
            drop(inner);
            tracing::debug!("Round {} expired after {:?}", round, timeout);
            let _ = tx.send(RoundExpiry { round });
        }));

        tracing::trace!("Armed round {} with timeout {:?}", round, timeout);
    }

    /// Disarm the timer, used when the round progresses before its deadline
    pub fn cancel_timer(&self) {
        let mut inner = self.inner.lock();
        Self::disarm(&mut inner);
    }

    /// Take ownership of a re-announcement task, cancelling any previous one
    pub fn register_repeating_task(&self, task: RepeatingTask) {
        let mut inner = self.inner.lock();
        if let Some(previous) = inner.rebroadcast.replace(task) {
            previous.cancel();
        }
    }

    /// The round currently armed, if any
    pub fn armed_round(&self) -> Option<RoundIdentifier> {
        self.inner.lock().armed.map(|armed| armed.round)
    }

    fn disarm(inner: &mut TimerInner) {
        inner.armed = None;
        if let Some(task) = inner.deadline_task.take() {
            task.abort();
        }
        if let Some(task) = inner.rebroadcast.take() {
            task.cancel();
        }
    }
}
