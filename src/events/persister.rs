//! The event persister abstraction (spec section 4.5) and an in-memory
//! reference implementation used by tests and the demonstration binary.
//!
//! This is deliberately not a SQL-backed implementation — per the spec's
//! scope, "bit-exact SQL is a reference implementation of the event log
//! contract... not part of the core." The core only needs the trait; a real
//! deployment plugs in its own vendor-specific persister.

use super::model::{Event, EventKind};
use crate::cluster::routing::HashRange;
use crate::error::{AccessGraphError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::VecDeque;

/// An event plus the durable ordering key the persister assigned it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedEvent {
    pub event: Event,
    pub tx_time: DateTime<Utc>,
    pub tx_sequence: u64,
}

/// Durably appends, reads, and deletes event batches under a
/// (transactionTime, transactionSequence) total order. Not a specific
/// database — an abstract collaborator the core depends on.
#[async_trait]
pub trait EventPersister: Send + Sync {
    /// Appends `events` in the given order under a monotonically
    /// non-decreasing transaction time. Any partial batch failure rolls
    /// back the entire batch.
    async fn persist_batch(&self, events: Vec<Event>) -> Result<Vec<PersistedEvent>>;

    /// Returns every event durably ordered strictly after
    /// `(tx_time, tx_sequence)`.
    async fn get_events_after(&self, tx_time: DateTime<Utc>, tx_sequence: u64) -> Result<Vec<PersistedEvent>>;

    /// Returns events of `kind` whose `hashCode` falls in `range`, persisted
    /// at or after `since_tx_time` when given. Used by the split protocol's
    /// backfill phase.
    async fn get_events_in_hash_range(
        &self,
        kind: EventKind,
        range: HashRange,
        since_tx_time: Option<DateTime<Utc>>,
    ) -> Result<Vec<PersistedEvent>>;

    /// Deletes events of `kind` in `range` persisted strictly before
    /// `before_tx_time`. Used after a split cutover's cleanup phase.
    async fn delete_events_in_hash_range(
        &self,
        kind: EventKind,
        range: HashRange,
        before_tx_time: DateTime<Utc>,
    ) -> Result<u64>;

    /// Replays the entire log in durable order, for rebuilding an
    /// `AccessManager` from scratch.
    async fn load_snapshot(&self) -> Result<Vec<PersistedEvent>>;
}

struct Log {
    events: VecDeque<PersistedEvent>,
    max_tx_time: Option<DateTime<Utc>>,
    sequence_in_current_tx: u64,
    clock: Box<dyn Fn() -> DateTime<Utc> + Send + Sync>,
}

/// An in-memory, process-lifetime `EventPersister`. Offers no durability
/// beyond the process, and is used as the reference implementation of the
/// event-log contract for tests and the demonstration binary.
pub struct InMemoryEventPersister {
    log: Mutex<Log>,
}

impl InMemoryEventPersister {
    pub fn new() -> Self {
        Self::with_clock(Utc::now)
    }

    /// Constructs a persister with an injectable clock, so tests can control
    /// transaction-time ordering deterministically.
    pub fn with_clock<F>(clock: F) -> Self
    where
        F: Fn() -> DateTime<Utc> + Send + Sync + 'static,
    {
        Self {
            log: Mutex::new(Log {
                events: VecDeque::new(),
                max_tx_time: None,
                sequence_in_current_tx: 0,
                clock: Box::new(clock),
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.log.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryEventPersister {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventPersister for InMemoryEventPersister {
    async fn persist_batch(&self, events: Vec<Event>) -> Result<Vec<PersistedEvent>> {
        if events.is_empty() {
            return Ok(Vec::new());
        }
        let mut log = self.log.lock();
        let now = (log.clock)();
        if let Some(max) = log.max_tx_time {
            if now < max {
                return Err(AccessGraphError::Fatal(
                    "claimed transaction time precedes the recorded maximum".to_string(),
                ));
            }
            if now > max {
                log.sequence_in_current_tx = 0;
            }
        }
        log.max_tx_time = Some(now);

        let mut persisted = Vec::with_capacity(events.len());
        for event in events {
            let tx_sequence = log.sequence_in_current_tx;
            log.sequence_in_current_tx += 1;
            let record = PersistedEvent { event, tx_time: now, tx_sequence };
            log.events.push_back(record.clone());
            persisted.push(record);
        }
        Ok(persisted)
    }

    async fn get_events_after(&self, tx_time: DateTime<Utc>, tx_sequence: u64) -> Result<Vec<PersistedEvent>> {
        let log = self.log.lock();
        Ok(log
            .events
            .iter()
            .filter(|e| (e.tx_time, e.tx_sequence) > (tx_time, tx_sequence))
            .cloned()
            .collect())
    }

    async fn get_events_in_hash_range(
        &self,
        kind: EventKind,
        range: HashRange,
        since_tx_time: Option<DateTime<Utc>>,
    ) -> Result<Vec<PersistedEvent>> {
        let log = self.log.lock();
        Ok(log
            .events
            .iter()
            .filter(|e| {
                e.event.kind() == kind
                    && range.contains(e.event.hash_code)
                    && since_tx_time.map_or(true, |since| e.tx_time >= since)
            })
            .cloned()
            .collect())
    }

    async fn delete_events_in_hash_range(
        &self,
        kind: EventKind,
        range: HashRange,
        before_tx_time: DateTime<Utc>,
    ) -> Result<u64> {
        let mut log = self.log.lock();
        let before = log.events.len();
        log.events
            .retain(|e| !(e.event.kind() == kind && range.contains(e.event.hash_code) && e.tx_time < before_tx_time));
        Ok((before - log.events.len()) as u64)
    }

    async fn load_snapshot(&self) -> Result<Vec<PersistedEvent>> {
        Ok(self.log.lock().events.iter().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::model::{EventAction, EventPayload};
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Arc;

    fn user_event(name: &str) -> Event {
        Event::new(EventAction::Add, Utc::now(), EventPayload::User { user: name.to_string() })
    }

    #[tokio::test]
    async fn persist_then_read_preserves_order() {
        let persister = InMemoryEventPersister::new();
        let batch = vec![user_event("alice"), user_event("bob")];
        let persisted = persister.persist_batch(batch).await.unwrap();
        assert_eq!(persisted[0].tx_sequence, 0);
        assert_eq!(persisted[1].tx_sequence, 1);

        let all = persister.get_events_after(DateTime::<Utc>::MIN_UTC, 0).await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn refuses_time_travel() {
        let counter = Arc::new(AtomicI64::new(100));
        let c = counter.clone();
        let persister = InMemoryEventPersister::with_clock(move || {
            let secs = c.load(Ordering::SeqCst);
            DateTime::<Utc>::from_timestamp(secs, 0).unwrap()
        });

        persister.persist_batch(vec![user_event("alice")]).await.unwrap();
        counter.store(50, Ordering::SeqCst);
        let err = persister.persist_batch(vec![user_event("bob")]).await.unwrap_err();
        assert!(matches!(err, AccessGraphError::Fatal(_)));
    }

    #[tokio::test]
    async fn hash_range_queries_and_deletes() {
        let persister = InMemoryEventPersister::new();
        let alice = user_event("alice");
        let alice_hash = alice.hash_code;
        persister.persist_batch(vec![alice]).await.unwrap();

        let range = HashRange::new(alice_hash, alice_hash);
        let in_range = persister.get_events_in_hash_range(EventKind::User, range, None).await.unwrap();
        assert_eq!(in_range.len(), 1);

        let deleted = persister
            .delete_events_in_hash_range(EventKind::User, range, Utc::now() + chrono::Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert!(persister.is_empty());
    }
}
