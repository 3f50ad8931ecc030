//! ReaderNode refresh loop (spec section 4.6).
//!
//! A replica that tails the event log to keep a local `AccessManager`
//! caught up: cache-first, falling back to the persister on a cache miss,
//! then sleeping the refresh interval.

use super::cache::TemporalEventCache;
use super::persister::EventPersister;
use crate::access::AccessManager;
use crate::config::ReaderNodeConfig;
use crate::error::{AccessGraphError, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};
use uuid::Uuid;

struct Tail {
    last_applied_id: Option<Uuid>,
    last_applied_tx_time: DateTime<Utc>,
    last_applied_tx_sequence: u64,
}

/// A polling consumer that reapplies events to a local `AccessManager` to
/// serve eventually-consistent reads.
pub struct ReaderNode {
    manager: Mutex<AccessManager>,
    cache: Arc<TemporalEventCache>,
    persister: Arc<dyn EventPersister>,
    tail: Mutex<Tail>,
    recently_applied: Mutex<VecDeque<Uuid>>,
    dedup_window: usize,
}

impl ReaderNode {
    pub fn new(manager: AccessManager, cache: Arc<TemporalEventCache>, persister: Arc<dyn EventPersister>) -> Self {
        Self::with_config(manager, cache, persister, ReaderNodeConfig::default())
    }

    pub fn with_config(
        manager: AccessManager,
        cache: Arc<TemporalEventCache>,
        persister: Arc<dyn EventPersister>,
        config: ReaderNodeConfig,
    ) -> Self {
        Self {
            manager: Mutex::new(manager),
            cache,
            persister,
            tail: Mutex::new(Tail {
                last_applied_id: None,
                last_applied_tx_time: DateTime::<Utc>::MIN_UTC,
                last_applied_tx_sequence: 0,
            }),
            recently_applied: Mutex::new(VecDeque::with_capacity(config.dedup_window)),
            dedup_window: config.dedup_window,
        }
    }

    /// Runs one refresh cycle: cache-first, persister fallback. Returns how
    /// many events were applied.
    pub async fn refresh_once(&self) -> Result<usize> {
        let current_tail = self.tail.lock().last_applied_id;

        // Only set when events came from the persister: advances the
        // (txTime, txSequence) watermark so the next cache-miss fallback
        // reads the delta since that read, not the whole log from genesis.
        let mut persisted_watermark: Option<(DateTime<Utc>, u64)> = None;

        let events = match current_tail {
            Some(id) => match self.cache.get_events_since(id) {
                Ok(events) => events,
                Err(AccessGraphError::EventNotCached(_)) => {
                    debug!("cache miss on tail, falling back to persister");
                    let (tx_time, tx_sequence) = {
                        let tail = self.tail.lock();
                        (tail.last_applied_tx_time, tail.last_applied_tx_sequence)
                    };
                    let persisted = self.persister.get_events_after(tx_time, tx_sequence).await?;
                    if let Some(last) = persisted.last() {
                        persisted_watermark = Some((last.tx_time, last.tx_sequence));
                    }
                    persisted.into_iter().map(|p| p.event).collect()
                }
                Err(e) => return Err(e),
            },
            None => {
                let persisted = self.persister.get_events_after(DateTime::<Utc>::MIN_UTC, 0).await?;
                if let Some(last) = persisted.last() {
                    persisted_watermark = Some((last.tx_time, last.tx_sequence));
                }
                persisted.into_iter().map(|p| p.event).collect()
            }
        };

        let mut applied = 0;
        for event in &events {
            if self.already_applied(event.event_id) {
                trace!(event_id = %event.event_id, "skipping already-applied event");
                continue;
            }
            self.manager.lock().apply_event(event)?;
            self.mark_applied(event.event_id);
            applied += 1;
        }

        if let Some(last) = events.last() {
            let mut tail = self.tail.lock();
            tail.last_applied_id = Some(last.event_id);
            if let Some((tx_time, tx_sequence)) = persisted_watermark {
                tail.last_applied_tx_time = tx_time;
                tail.last_applied_tx_sequence = tx_sequence;
            }
        }

        Ok(applied)
    }

    fn already_applied(&self, id: Uuid) -> bool {
        self.recently_applied.lock().contains(&id)
    }

    fn mark_applied(&self, id: Uuid) {
        let mut recent = self.recently_applied.lock();
        if recent.len() == self.dedup_window {
            recent.pop_front();
        }
        recent.push_back(id);
    }

    /// Runs `refresh_once` on a loop at `interval` until `shutdown` resolves.
    pub async fn run(&self, interval: Duration, mut shutdown: tokio::sync::oneshot::Receiver<()>) {
        loop {
            if let Err(e) = self.refresh_once().await {
                tracing::warn!(error = %e, "reader node refresh failed");
            }
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = &mut shutdown => return,
            }
        }
    }

    /// Exposes the manager for query handling. Locking discipline mirrors
    /// the single reader/writer lock described in spec section 5.
    pub fn with_manager<T>(&self, f: impl FnOnce(&AccessManager) -> T) -> T {
        f(&self.manager.lock())
    }
}
