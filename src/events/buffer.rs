//! Event buffer (spec section 4.3).
//!
//! Ten independent FIFO queues, one per event kind, each guarded by its own
//! mutex, with a global per-queue sequence number assigned at enqueue.
//! Enqueue never blocks on I/O; draining merges every queue by sequence
//! number into one totally-ordered batch for the flush strategy.

use super::model::{Event, EventKind};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

struct SequencedEvent {
    sequence: u64,
    event: Event,
}

struct Queue {
    items: Mutex<VecDeque<SequencedEvent>>,
}

impl Queue {
    fn new() -> Self {
        Self { items: Mutex::new(VecDeque::new()) }
    }
}

/// Per-kind FIFO queues feeding the flush strategy, plus the size signal
/// producers pulse on enqueue.
pub struct EventBuffer {
    queues: HashMap<EventKind, Queue>,
    sequence: AtomicU64,
    total_buffered: AtomicU64,
    size_threshold: usize,
    /// Pulsed whenever an enqueue brings the total at or above
    /// `size_threshold`; the flush worker awaits this.
    pub(crate) flush_signal: Arc<Notify>,
}

impl EventBuffer {
    pub fn new(size_threshold: usize) -> Self {
        let queues = EventKind::ALL.into_iter().map(|k| (k, Queue::new())).collect();
        Self {
            queues,
            sequence: AtomicU64::new(0),
            total_buffered: AtomicU64::new(0),
            size_threshold,
            flush_signal: Arc::new(Notify::new()),
        }
    }

    /// Enqueues `event` onto its kind's queue. O(1), never blocks on I/O.
    pub fn enqueue(&self, event: Event) {
        let kind = event.kind();
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        let queue = self.queues.get(&kind).expect("all event kinds have a queue");
        queue.items.lock().push_back(SequencedEvent { sequence, event });

        let total = self.total_buffered.fetch_add(1, Ordering::SeqCst) + 1;
        if total as usize >= self.size_threshold {
            self.flush_signal.notify_one();
        }
    }

    pub fn total_buffered(&self) -> usize {
        self.total_buffered.load(Ordering::SeqCst) as usize
    }

    /// Drains every queue and returns a single batch ordered by enqueue
    /// sequence number, which the persister must preserve.
    pub fn drain_ordered_batch(&self) -> Vec<Event> {
        let mut merged: Vec<SequencedEvent> = Vec::new();
        for queue in self.queues.values() {
            let mut items = queue.items.lock();
            merged.extend(items.drain(..));
        }
        merged.sort_by_key(|e| e.sequence);
        let drained = merged.len();
        if drained > 0 {
            self.total_buffered.fetch_sub(drained as u64, Ordering::SeqCst);
        }
        merged.into_iter().map(|e| e.event).collect()
    }
}
