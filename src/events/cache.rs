//! Temporal event cache (spec section 4.4).
//!
//! A bounded ring of the most recently appended events plus an id→position
//! index, answering "give me everything after event X" without hitting the
//! persister. Readers do not block each other; writers (the flush worker)
//! take the single writer lock briefly per append.

use super::model::Event;
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use uuid::Uuid;

use crate::error::{AccessGraphError, Result};

struct Ring {
    events: VecDeque<Event>,
    /// event_id -> index into `events`, valid only until the next eviction
    /// shifts indices; rebuilt on every append for simplicity given the
    /// small capacities this cache is expected to run at.
    positions: HashMap<Uuid, usize>,
    capacity: usize,
}

impl Ring {
    fn rebuild_positions(&mut self) {
        self.positions.clear();
        for (i, e) in self.events.iter().enumerate() {
            self.positions.insert(e.event_id, i);
        }
    }
}

/// Bounded ring of the last `capacity` events, indexed by id.
pub struct TemporalEventCache {
    ring: RwLock<Ring>,
}

impl TemporalEventCache {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "temporal cache capacity must be positive");
        Self {
            ring: RwLock::new(Ring { events: VecDeque::with_capacity(capacity), positions: HashMap::new(), capacity }),
        }
    }

    /// Appends `batch` in order, evicting the oldest events to stay within
    /// capacity. O(k) where k = batch length plus evicted count.
    pub fn append(&self, batch: &[Event]) {
        if batch.is_empty() {
            return;
        }
        let mut ring = self.ring.write();
        for event in batch {
            if ring.events.len() == ring.capacity {
                ring.events.pop_front();
            }
            ring.events.push_back(event.clone());
        }
        ring.rebuild_positions();
    }

    /// Returns every event strictly after `prior_id`, in order. Fails with
    /// `EventNotCached` if `prior_id` has already been evicted or was never
    /// cached — the caller should fall back to the persister.
    pub fn get_events_since(&self, prior_id: Uuid) -> Result<Vec<Event>> {
        let ring = self.ring.read();
        let pos = ring
            .positions
            .get(&prior_id)
            .ok_or_else(|| AccessGraphError::EventNotCached(prior_id.to_string()))?;
        Ok(ring.events.iter().skip(pos + 1).cloned().collect())
    }

    pub fn len(&self) -> usize {
        self.ring.read().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn latest_event_id(&self) -> Option<Uuid> {
        self.ring.read().events.back().map(|e| e.event_id)
    }
}
