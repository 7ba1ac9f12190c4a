//! `BatchCorrelator`: the completion barrier for one batch of item requests.
//!
//! State transitions:
//! - `Open` → `Fulfilled`: the last pending key is completed
//! - `Open` → `TimedOut`:  the waiter's deadline elapses first
//!
//! Both terminal states freeze the entries: later events are rejected, so a
//! snapshot handed back to the requester never changes underneath it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::entry::{Outcome, Payload, PendingEntry};
use crate::error::CorrelatorError;

static NEXT_BATCH_ID: AtomicU64 = AtomicU64::new(1);

/// Batch-level state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchPhase {
    /// Keys are still pending.
    Open,
    /// Every key reached a terminal state.
    Fulfilled,
    /// The deadline elapsed with keys still pending.
    TimedOut,
}

impl std::fmt::Display for BatchPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Fulfilled => write!(f, "fulfilled"),
            Self::TimedOut => write!(f, "timed-out"),
        }
    }
}

struct BatchInner {
    entries: Vec<PendingEntry>,
    remaining: usize,
    phase: BatchPhase,
    started_at: Option<Instant>,
    ended_at: Option<Instant>,
}

/// Correlates asynchronous per-key events with one blocked requester.
///
/// Entry writes and the remaining-count decrement happen under the same
/// lock, so everything a `complete` call wrote is visible to the waiter
/// once it is released.
pub struct BatchCorrelator {
    id: u64,
    timeout: Duration,
    index: HashMap<String, usize>,
    inner: Mutex<BatchInner>,
    released: Condvar,
}

impl BatchCorrelator {
    /// Build a batch for `keys`, in the given order.
    ///
    /// Repeated keys collapse onto their first occurrence. Fails with
    /// [`CorrelatorError::InvalidArgument`] for an empty set or a blank key.
    pub fn new<I, K>(keys: I, timeout: Duration) -> Result<Self, CorrelatorError>
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        let mut index = HashMap::new();
        let mut entries = Vec::new();
        for key in keys {
            let key = key.into();
            if key.trim().is_empty() {
                return Err(CorrelatorError::InvalidArgument(
                    "item keys must not be blank".into(),
                ));
            }
            if index.contains_key(&key) {
                continue;
            }
            index.insert(key.clone(), entries.len());
            entries.push(PendingEntry::new(key));
        }
        if entries.is_empty() {
            return Err(CorrelatorError::InvalidArgument(
                "a batch needs at least one item key".into(),
            ));
        }

        let remaining = entries.len();
        Ok(Self {
            id: NEXT_BATCH_ID.fetch_add(1, Ordering::Relaxed),
            timeout,
            index,
            inner: Mutex::new(BatchInner {
                entries,
                remaining,
                phase: BatchPhase::Open,
                started_at: None,
                ended_at: None,
            }),
            released: Condvar::new(),
        })
    }

    /// Process-unique batch id (logging only).
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait budget configured at construction.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Number of distinct keys in the batch.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Keys in insertion order.
    pub fn keys(&self) -> Vec<String> {
        self.inner.lock().entries.iter().map(|e| e.key.clone()).collect()
    }

    pub fn remaining(&self) -> usize {
        self.inner.lock().remaining
    }

    pub fn phase(&self) -> BatchPhase {
        self.inner.lock().phase
    }

    /// Current state of the entry for `key`.
    pub fn lookup(&self, key: &str) -> Result<PendingEntry, CorrelatorError> {
        let idx = self.slot(key)?;
        Ok(self.inner.lock().entries[idx].clone())
    }

    /// Record the terminal outcome for `key` and return how many keys are
    /// still pending.
    ///
    /// The first completion of a key wins; repeats are rejected with
    /// [`CorrelatorError::DuplicateCompletion`] and leave the counter alone.
    /// Once the batch has timed out every event is rejected with
    /// [`CorrelatorError::BatchClosed`].
    pub fn complete(
        &self,
        key: &str,
        outcome: Outcome,
        detail: impl Into<String>,
        payload: Payload,
    ) -> Result<usize, CorrelatorError> {
        let idx = self.slot(key)?;
        let mut inner = self.inner.lock();
        if inner.phase == BatchPhase::TimedOut {
            return Err(CorrelatorError::BatchClosed { batch: self.id });
        }
        if !inner.entries[idx].resolve(outcome, detail.into(), payload) {
            return Err(CorrelatorError::DuplicateCompletion {
                batch: self.id,
                key: key.to_string(),
            });
        }

        inner.remaining -= 1;
        let remaining = inner.remaining;
        if remaining == 0 {
            inner.phase = BatchPhase::Fulfilled;
            drop(inner);
            self.released.notify_all();
            tracing::debug!(batch = self.id, "batch fulfilled");
        }
        Ok(remaining)
    }

    /// Stamp the start of the fulfilment clock. Only the first stamp counts.
    pub fn mark_started(&self) {
        let mut inner = self.inner.lock();
        if inner.started_at.is_none() {
            inner.started_at = Some(Instant::now());
        }
    }

    /// Block until every key is complete (`true`) or `timeout` elapses
    /// (`false`).
    ///
    /// Returns immediately when the batch is already terminal. A timeout
    /// freezes the batch in [`BatchPhase::TimedOut`].
    pub fn await_completion(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        if inner.started_at.is_none() {
            inner.started_at = Some(Instant::now());
        }

        while inner.phase == BatchPhase::Open {
            if self.released.wait_until(&mut inner, deadline).timed_out() {
                if inner.phase == BatchPhase::Open {
                    inner.phase = BatchPhase::TimedOut;
                    tracing::debug!(
                        batch = self.id,
                        remaining = inner.remaining,
                        "batch timed out"
                    );
                }
                break;
            }
        }

        if inner.ended_at.is_none() {
            inner.ended_at = Some(Instant::now());
        }
        inner.phase == BatchPhase::Fulfilled
    }

    /// [`await_completion`](Self::await_completion) with the batch's own timeout.
    pub fn wait(&self) -> bool {
        self.await_completion(self.timeout)
    }

    /// Every entry in key insertion order, whatever its state.
    pub fn snapshot(&self) -> Vec<PendingEntry> {
        self.inner.lock().entries.clone()
    }

    /// Time between the start stamp and the waiter's release. `None` until
    /// the wait has returned.
    pub fn fulfilment_latency(&self) -> Option<Duration> {
        let inner = self.inner.lock();
        match (inner.started_at, inner.ended_at) {
            (Some(start), Some(end)) => Some(end.saturating_duration_since(start)),
            _ => None,
        }
    }

    fn slot(&self, key: &str) -> Result<usize, CorrelatorError> {
        self.index
            .get(key)
            .copied()
            .ok_or_else(|| CorrelatorError::UnknownKey {
                batch: self.id,
                key: key.to_string(),
            })
    }
}

impl std::fmt::Debug for BatchCorrelator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("BatchCorrelator")
            .field("id", &self.id)
            .field("len", &self.index.len())
            .field("remaining", &inner.remaining)
            .field("phase", &inner.phase)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::EntryStatus;

    fn batch(keys: &[&str]) -> BatchCorrelator {
        BatchCorrelator::new(keys.iter().copied(), Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn rejects_empty_batch() {
        let err = BatchCorrelator::new(Vec::<String>::new(), Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, CorrelatorError::InvalidArgument(_)));
    }

    #[test]
    fn rejects_blank_key() {
        let err = BatchCorrelator::new(["A", "  "], Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, CorrelatorError::InvalidArgument(_)));
    }

    #[test]
    fn duplicate_keys_collapse() {
        let b = batch(&["A", "B", "A"]);
        assert_eq!(b.len(), 2);
        assert_eq!(b.remaining(), 2);
        assert_eq!(b.keys(), vec!["A", "B"]);
    }

    #[test]
    fn ids_are_unique() {
        let a = batch(&["A"]);
        let b = batch(&["A"]);
        assert!(b.id() > a.id());
    }

    #[test]
    fn complete_decrements_and_fulfils() {
        let b = batch(&["A", "B"]);
        assert_eq!(b.complete("A", Outcome::Completed, "ok", Payload::new()), Ok(1));
        assert_eq!(b.phase(), BatchPhase::Open);
        assert_eq!(b.complete("B", Outcome::Failed, "nf", Payload::new()), Ok(0));
        assert_eq!(b.phase(), BatchPhase::Fulfilled);
    }

    #[test]
    fn duplicate_completion_is_rejected() {
        let b = batch(&["A", "B"]);
        b.complete("A", Outcome::Completed, "first", Payload::new()).unwrap();
        let err = b.complete("A", Outcome::Failed, "second", Payload::new()).unwrap_err();
        assert!(matches!(err, CorrelatorError::DuplicateCompletion { .. }));
        assert_eq!(b.remaining(), 1);
        assert_eq!(b.lookup("A").unwrap().status_detail, "first");
    }

    #[test]
    fn unknown_key_leaves_counter() {
        let b = batch(&["A"]);
        let err = b.complete("Z", Outcome::Completed, "", Payload::new()).unwrap_err();
        assert!(matches!(err, CorrelatorError::UnknownKey { .. }));
        assert_eq!(b.remaining(), 1);
        assert!(b.lookup("Z").is_err());
    }

    #[test]
    fn timeout_closes_batch() {
        let b = batch(&["A", "B"]);
        b.complete("A", Outcome::Completed, "", Payload::new()).unwrap();
        assert!(!b.await_completion(Duration::from_millis(20)));
        assert_eq!(b.phase(), BatchPhase::TimedOut);

        let err = b.complete("B", Outcome::Completed, "", Payload::new()).unwrap_err();
        assert_eq!(err, CorrelatorError::BatchClosed { batch: b.id() });
        let snap = b.snapshot();
        assert_eq!(snap[1].status, EntryStatus::Pending);
        assert_eq!(b.remaining(), 1);
    }

    #[test]
    fn second_wait_after_timeout_returns_immediately() {
        let b = batch(&["A"]);
        assert!(!b.await_completion(Duration::from_millis(10)));
        let start = Instant::now();
        assert!(!b.await_completion(Duration::from_secs(5)));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn latency_only_after_wait() {
        let b = batch(&["A"]);
        b.mark_started();
        assert!(b.fulfilment_latency().is_none());
        b.complete("A", Outcome::Completed, "", Payload::new()).unwrap();
        assert!(b.wait());
        assert!(b.fulfilment_latency().is_some());
    }
}
