use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};

use crate::features::events::{ChangeLog, ChangeLogEntry};
use crate::stop::StopSignal;
use crate::Result;

/// Processes one delivered change-log entry. Returning an error asks
/// the transport to redeliver; the consumer retries the same entry in
/// place, which also keeps the per-key ordering intact.
pub trait EventHandler: Send + Sync + 'static {
    fn handle(&self, key: &[u8], payload: &[u8]) -> Result<()>;
}

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const RETRY_DELAY: Duration = Duration::from_millis(200);

/// Worker pool draining a [`ChangeLog`].
///
/// Entries are partitioned across workers by a hash of the key, so
/// two events for the same record id never run concurrently and stay
/// in publication order. A dispatcher thread does the routing.
pub struct Consumer {
    stop: StopSignal,
    dispatcher: Option<JoinHandle<()>>,
    workers: Vec<JoinHandle<()>>,
}

impl Consumer {
    pub fn start(
        log: Arc<ChangeLog>,
        handler: Arc<dyn EventHandler>,
        worker_count: usize,
        stop: StopSignal,
    ) -> Result<Consumer> {
        let worker_count = worker_count.max(1);
        let mut senders: Vec<Sender<ChangeLogEntry>> = Vec::with_capacity(worker_count);
        let mut workers = Vec::with_capacity(worker_count);

        for slot in 0..worker_count {
            let (sender, receiver) = mpsc::channel();
            senders.push(sender);
            let log = Arc::clone(&log);
            let handler = Arc::clone(&handler);
            let stop = stop.clone();
            workers.push(
                thread::Builder::new()
                    .name(format!("recidx-consumer-{slot}"))
                    .spawn(move || worker_loop(receiver, log, handler, stop))?,
            );
        }

        let dispatcher = {
            let stop = stop.clone();
            thread::Builder::new()
                .name("recidx-dispatcher".to_string())
                .spawn(move || dispatch_loop(log, senders, stop))?
        };

        Ok(Consumer { stop, dispatcher: Some(dispatcher), workers })
    }

    /// Requests a cooperative stop and joins all threads. In-flight
    /// entries may be abandoned; re-processing after a restart repairs
    /// whatever they left half-applied.
    pub fn stop(mut self) {
        self.stop.request_stop();
        self.join();
    }

    fn join(&mut self) {
        if let Some(dispatcher) = self.dispatcher.take() {
            let _ = dispatcher.join();
        }
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

impl Drop for Consumer {
    fn drop(&mut self) {
        self.stop.request_stop();
        self.join();
    }
}

fn dispatch_loop(log: Arc<ChangeLog>, senders: Vec<Sender<ChangeLogEntry>>, stop: StopSignal) {
    while !stop.is_stopped() {
        let Some(entry) = log.poll(POLL_INTERVAL) else {
            continue;
        };
        let slot = partition(&entry.key, senders.len());
        if senders[slot].send(entry).is_err() {
            // Worker is gone; nothing can process this partition.
            log.complete();
            return;
        }
    }
}

fn worker_loop(
    receiver: Receiver<ChangeLogEntry>,
    log: Arc<ChangeLog>,
    handler: Arc<dyn EventHandler>,
    stop: StopSignal,
) {
    loop {
        let entry = match receiver.recv_timeout(POLL_INTERVAL) {
            Ok(entry) => entry,
            Err(RecvTimeoutError::Timeout) => {
                if stop.is_stopped() {
                    return;
                }
                continue;
            }
            Err(RecvTimeoutError::Disconnected) => return,
        };

        loop {
            match handler.handle(&entry.key, &entry.payload) {
                Ok(()) => break,
                Err(error) if error.is_interrupted() || stop.is_stopped() => {
                    debug!("stop requested, abandoning in-flight event");
                    log.complete();
                    return;
                }
                Err(error) => {
                    warn!(%error, "event handling failed, will redeliver");
                    thread::sleep(RETRY_DELAY);
                }
            }
        }
        log.complete();
    }
}

fn partition(key: &[u8], slots: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() % slots as u64) as usize
}
