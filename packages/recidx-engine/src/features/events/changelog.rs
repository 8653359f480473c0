use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use recidx_model::RecordEvent;

use crate::Result;

/// One change-log message: the raw record-id bytes as partition key,
/// and the MessagePack-encoded [`RecordEvent`] as payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeLogEntry {
    pub key: Vec<u8>,
    pub payload: Vec<u8>,
}

/// Seam through which the updater emits follow-up events for
/// dependant records. Publishing appends to the same log the consumer
/// reads from, so denormalized updates flow through the ordinary
/// delivery path.
pub trait EventPublisher: Send + Sync {
    fn publish(&self, key: &[u8], event: &RecordEvent) -> Result<()>;
}

#[derive(Default)]
struct LogState {
    queue: VecDeque<ChangeLogEntry>,
    in_flight: usize,
}

/// In-process change log: a FIFO queue with in-flight accounting.
///
/// An entry handed out by [`poll`](ChangeLog::poll) stays in flight
/// until [`complete`](ChangeLog::complete) is called for it, so
/// [`wait_idle`](ChangeLog::wait_idle) only returns once every
/// published event has actually been processed, follow-ups included.
#[derive(Default)]
pub struct ChangeLog {
    state: Mutex<LogState>,
    available: Condvar,
    idle: Condvar,
}

impl ChangeLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, key: Vec<u8>, payload: Vec<u8>) {
        let mut state = self.state.lock();
        state.queue.push_back(ChangeLogEntry { key, payload });
        self.available.notify_one();
    }

    /// Takes the next entry, waiting up to `timeout` for one to arrive.
    /// The entry counts as in flight until `complete` is called.
    pub fn poll(&self, timeout: Duration) -> Option<ChangeLogEntry> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while state.queue.is_empty() {
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            self.available.wait_for(&mut state, deadline - now);
        }
        let entry = state.queue.pop_front();
        if entry.is_some() {
            state.in_flight += 1;
        }
        entry
    }

    /// Marks one previously polled entry as processed.
    pub fn complete(&self) {
        let mut state = self.state.lock();
        state.in_flight = state.in_flight.saturating_sub(1);
        if state.queue.is_empty() && state.in_flight == 0 {
            self.idle.notify_all();
        }
    }

    pub fn is_idle(&self) -> bool {
        let state = self.state.lock();
        state.queue.is_empty() && state.in_flight == 0
    }

    /// Blocks until the log is drained and nothing is in flight.
    /// Returns false if the timeout elapses first.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while !(state.queue.is_empty() && state.in_flight == 0) {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            self.idle.wait_for(&mut state, deadline - now);
        }
        true
    }
}

impl EventPublisher for ChangeLog {
    fn publish(&self, key: &[u8], event: &RecordEvent) -> Result<()> {
        let payload = event.to_bytes()?;
        self.push(key.to_vec(), payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;
    use std::thread;

    #[test]
    fn poll_returns_entries_in_order() {
        let log = ChangeLog::new();
        log.push(b"a".to_vec(), b"1".to_vec());
        log.push(b"b".to_vec(), b"2".to_vec());

        let first = log.poll(Duration::from_millis(10)).unwrap();
        assert_eq!(first.key, b"a");
        let second = log.poll(Duration::from_millis(10)).unwrap();
        assert_eq!(second.key, b"b");
        assert!(log.poll(Duration::from_millis(10)).is_none());
    }

    #[test]
    fn idle_requires_completion_not_just_drain() {
        let log = ChangeLog::new();
        log.push(b"a".to_vec(), b"1".to_vec());
        let _entry = log.poll(Duration::from_millis(10)).unwrap();

        assert!(!log.is_idle());
        assert!(!log.wait_idle(Duration::from_millis(20)));

        log.complete();
        assert!(log.is_idle());
        assert!(log.wait_idle(Duration::from_millis(20)));
    }

    #[test]
    fn poll_wakes_on_push_from_another_thread() {
        let log = Arc::new(ChangeLog::new());
        let producer = Arc::clone(&log);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            producer.push(b"k".to_vec(), b"v".to_vec());
        });

        let entry = log.poll(Duration::from_secs(2)).unwrap();
        assert_eq!(entry.key, b"k");
        handle.join().unwrap();
    }
}
