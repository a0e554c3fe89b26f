//! Bounded record of gossiped message fingerprints

use crate::types::MessageFingerprint;
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};

/// Bounded-memory record of previously seen message fingerprints
///
/// Answers "have I already handled this message" for the gossip layer.
/// Eviction is strict FIFO by insertion order, with no recency promotion;
/// the tracker bounds memory, it does not maximize hit rate. State is never
/// persisted, so a restart forgets gossip history.
pub struct MessageTracker {
    inner: Mutex<Inner>,
}

struct Inner {
    seen: HashSet<MessageFingerprint>,
    order: VecDeque<MessageFingerprint>,
    capacity: usize,
}

impl MessageTracker {
    /// Create a tracker holding at most `capacity` fingerprints
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(Inner {
                seen: HashSet::with_capacity(capacity),
                order: VecDeque::with_capacity(capacity),
                capacity,
            }),
        }
    }

    /// Whether this fingerprint is currently tracked
    pub fn has_seen(&self, fingerprint: &MessageFingerprint) -> bool {
        self.inner.lock().seen.contains(fingerprint)
    }

    /// Record a fingerprint, evicting the oldest entry at capacity
    pub fn record_seen(&self, fingerprint: MessageFingerprint) {
        let mut inner = self.inner.lock();
        if !inner.seen.insert(fingerprint) {
            return;
        }
        inner.order.push_back(fingerprint);
        if inner.order.len() > inner.capacity {
            if let Some(oldest) = inner.order.pop_front() {
                inner.seen.remove(&oldest);
            }
        }
    }

    /// Number of fingerprints currently tracked
    pub fn len(&self) -> usize {
        self.inner.lock().order.len()
    }

    /// Whether the tracker is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn fp(n: u8) -> MessageFingerprint {
        MessageFingerprint([n; 32])
    }

    #[test]
    fn test_records_and_reports_seen() {
        let tracker = MessageTracker::new(10);
        assert!(!tracker.has_seen(&fp(1)));

        tracker.record_seen(fp(1));
        assert!(tracker.has_seen(&fp(1)));
        assert!(!tracker.has_seen(&fp(2)));
    }

    #[test]
    fn test_fifo_eviction() {
        let tracker = MessageTracker::new(2);
        tracker.record_seen(fp(1));
        tracker.record_seen(fp(2));
        tracker.record_seen(fp(3));

        assert!(!tracker.has_seen(&fp(1)));
        assert!(tracker.has_seen(&fp(2)));
        assert!(tracker.has_seen(&fp(3)));
        assert_eq!(tracker.len(), 2);
    }

    #[test]
    fn test_duplicate_record_does_not_consume_capacity() {
        let tracker = MessageTracker::new(2);
        tracker.record_seen(fp(1));
        tracker.record_seen(fp(1));
        tracker.record_seen(fp(2));

        assert!(tracker.has_seen(&fp(1)));
        assert!(tracker.has_seen(&fp(2)));
        assert_eq!(tracker.len(), 2);
    }

    #[test]
    fn test_concurrent_recording_stays_bounded() {
        let tracker = Arc::new(MessageTracker::new(64));
        let mut handles = Vec::new();
        for t in 0..4u8 {
            let tracker = tracker.clone();
            handles.push(std::thread::spawn(move || {
                for i in 0..100u8 {
                    let mut bytes = [i; 32];
                    bytes[0] = t;
                    tracker.record_seen(MessageFingerprint(bytes));
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(tracker.len(), 64);
    }
}
