//! Single-slot rendezvous scheduler.
//!
//! Producers `submit` items; consumers announce themselves with `ready` and
//! then wait on their own one-slot [`WorkChannel`]. The dispatch loop pairs
//! each queued item with exactly one ready consumer.
//!
//! ```text
//! submit ──(bounded)──┐
//! resubmit ─(unbounded)┼─▶ dispatch loop ──▶ ready worker's WorkChannel
//! ready ──(unbounded)─┘
//! ```
//!
//! `submit` waits once `capacity` items are queued, which throttles the
//! block scanner to the speed of receipt processing. `resubmit` never
//! waits, so a consumer can always hand an item back without deadlocking
//! against a full queue.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::engine::error::SchedulerClosed;
use crate::observability::metrics;

/// A consumer's private one-slot inbox.
pub struct WorkChannel<T> {
    tx: mpsc::Sender<T>,
    rx: mpsc::Receiver<T>,
}

impl<T> WorkChannel<T> {
    /// Wait for the item handed to this consumer.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }
}

struct Receivers<T> {
    submit: mpsc::Receiver<T>,
    retry: mpsc::UnboundedReceiver<T>,
    ready: mpsc::UnboundedReceiver<mpsc::Sender<T>>,
}

/// Hands each submitted item to exactly one ready consumer.
pub struct Scheduler<T> {
    name: String,
    capacity: usize,
    submit_tx: mpsc::Sender<T>,
    retry_tx: mpsc::UnboundedSender<T>,
    ready_tx: mpsc::UnboundedSender<mpsc::Sender<T>>,
    receivers: Mutex<Option<Receivers<T>>>,
    depth: Arc<AtomicUsize>,
}

impl<T: Send + 'static> Scheduler<T> {
    /// Create a scheduler queueing at most `capacity` items.
    pub fn new(name: impl Into<String>, capacity: usize) -> Arc<Self> {
        let (submit_tx, submit) = mpsc::channel(1);
        let (retry_tx, retry) = mpsc::unbounded_channel();
        let (ready_tx, ready) = mpsc::unbounded_channel();
        Arc::new(Self {
            name: name.into(),
            capacity: capacity.max(1),
            submit_tx,
            retry_tx,
            ready_tx,
            receivers: Mutex::new(Some(Receivers { submit, retry, ready })),
            depth: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Items waiting for a consumer.
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    /// A fresh inbox for one consumer.
    pub fn work_channel(&self) -> WorkChannel<T> {
        let (tx, rx) = mpsc::channel(1);
        WorkChannel { tx, rx }
    }

    /// Announce that the owner of `channel` can take one item.
    ///
    /// Call once per item: after `ready`, the next `recv` on the channel
    /// yields exactly one item.
    pub fn ready(&self, channel: &WorkChannel<T>) -> Result<(), SchedulerClosed> {
        self.ready_tx
            .send(channel.tx.clone())
            .map_err(|_| SchedulerClosed)
    }

    /// Enqueue an item, waiting while the queue is full.
    pub async fn submit(&self, item: T) -> Result<(), SchedulerClosed> {
        self.submit_tx.send(item).await.map_err(|_| SchedulerClosed)
    }

    /// Enqueue an item without waiting, bypassing the capacity bound.
    pub fn resubmit(&self, item: T) -> Result<(), SchedulerClosed> {
        self.retry_tx.send(item).map_err(|_| SchedulerClosed)
    }

    /// Re-enqueue `item` after `delay`.
    pub fn resubmit_after(&self, item: T, delay: Duration) {
        let retry_tx = self.retry_tx.clone();
        let name = self.name.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if retry_tx.send(item).is_err() {
                tracing::debug!(queue = %name, "Scheduler closed, dropping delayed item");
            }
        });
    }

    /// Start the dispatch loop. Returns `None` if it is already running.
    pub fn run(&self, shutdown: broadcast::Receiver<()>) -> Option<JoinHandle<()>> {
        let receivers = self
            .receivers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()?;
        let name = self.name.clone();
        let capacity = self.capacity;
        let depth = self.depth.clone();
        Some(tokio::spawn(dispatch(name, capacity, receivers, depth, shutdown)))
    }
}

async fn dispatch<T: Send + 'static>(
    name: String,
    capacity: usize,
    mut receivers: Receivers<T>,
    depth: Arc<AtomicUsize>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut queue: VecDeque<T> = VecDeque::new();
    let mut workers: VecDeque<mpsc::Sender<T>> = VecDeque::new();

    tracing::debug!(queue = %name, capacity, "Scheduler started");

    loop {
        while !queue.is_empty() {
            let Some(worker) = workers.pop_front() else {
                break;
            };
            let Some(item) = queue.pop_front() else {
                break;
            };
            // A closed inbox belongs to a consumer that has exited.
            if let Err(e) = worker.try_send(item) {
                let item = match e {
                    mpsc::error::TrySendError::Full(item) | mpsc::error::TrySendError::Closed(item) => item,
                };
                queue.push_front(item);
            }
        }

        depth.store(queue.len(), Ordering::Relaxed);
        metrics::record_queue_depth(&name, queue.len());

        let accepting = queue.len() < capacity;
        tokio::select! {
            biased;
            _ = shutdown.recv() => break,
            Some(item) = receivers.retry.recv() => queue.push_back(item),
            Some(worker) = receivers.ready.recv() => workers.push_back(worker),
            Some(item) = receivers.submit.recv(), if accepting => queue.push_back(item),
            else => break,
        }
    }

    tracing::debug!(queue = %name, dropped = queue.len(), "Scheduler stopped");
}
