//! Flush strategy (spec section 4.3): a background worker that drains the
//! `EventBuffer` into the persister, triggered either by size (the buffer's
//! notify signal) or by a fixed interval.

use super::buffer::EventBuffer;
use super::persister::EventPersister;
use crate::circuit_breaker::TripSwitch;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Whether the worker wakes only on the size signal, or also on a fixed
/// interval (spec section 4.3's "size-limited" vs "loop-limited" variants).
#[derive(Debug, Clone, Copy)]
pub enum FlushStrategy {
    SizeLimited,
    LoopLimited { interval: Duration },
}

/// Drives one `EventBuffer` into one `EventPersister` according to a
/// `FlushStrategy`. A persister failure trips `breaker` and stops the
/// worker loop; the caller observes this via `breaker.check()`.
pub struct FlushWorker {
    buffer: Arc<EventBuffer>,
    persister: Arc<dyn EventPersister>,
    strategy: FlushStrategy,
    breaker: TripSwitch,
    shutdown: Arc<AtomicBool>,
}

impl FlushWorker {
    pub fn new(
        buffer: Arc<EventBuffer>,
        persister: Arc<dyn EventPersister>,
        strategy: FlushStrategy,
        breaker: TripSwitch,
    ) -> Self {
        Self { buffer, persister, strategy, breaker, shutdown: Arc::new(AtomicBool::new(false)) }
    }

    /// Signals the worker loop to drain once more and exit. Per spec section
    /// 4.3, shutdown must drain all remaining events before exit.
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.buffer.flush_signal.notify_one();
    }

    /// Runs the flush loop until `request_shutdown` is called. Intended to
    /// be driven by `tokio::spawn`.
    pub async fn run(&self) {
        loop {
            match self.strategy {
                FlushStrategy::SizeLimited => {
                    self.buffer.flush_signal.notified().await;
                }
                FlushStrategy::LoopLimited { interval } => {
                    tokio::select! {
                        _ = self.buffer.flush_signal.notified() => {}
                        _ = tokio::time::sleep(interval) => {}
                    }
                }
            }

            let shutting_down = self.shutdown.load(Ordering::SeqCst);
            if let Err(e) = self.drain_once().await {
                error!(error = %e, "flush failed, tripping circuit breaker");
                self.breaker.trip(&e.to_string());
                return;
            }
            if shutting_down {
                info!("flush worker drained remaining events and is shutting down");
                return;
            }
        }
    }

    /// Drains and persists whatever is currently buffered, without waiting
    /// for the strategy's trigger. Useful for manual/one-shot flushes and
    /// shutdown paths that don't want to wait on the run loop.
    pub async fn drain_once(&self) -> crate::error::Result<()> {
        let batch = self.buffer.drain_ordered_batch();
        if batch.is_empty() {
            return Ok(());
        }
        let count = batch.len();
        self.persister.persist_batch(batch).await?;
        warn!(count, "flushed event batch");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::model::{Event, EventAction, EventPayload};
    use crate::events::persister::InMemoryEventPersister;
    use chrono::Utc;

    fn user_event(name: &str) -> Event {
        Event::new(EventAction::Add, Utc::now(), EventPayload::User { user: name.to_string() })
    }

    #[tokio::test]
    async fn size_triggered_flush_persists_the_batch() {
        let buffer = Arc::new(EventBuffer::new(2));
        let persister = Arc::new(InMemoryEventPersister::new());
        let breaker = TripSwitch::new(crate::circuit_breaker::TripAction::FailFast);
        let worker = Arc::new(FlushWorker::new(buffer.clone(), persister.clone(), FlushStrategy::SizeLimited, breaker));

        let handle = tokio::spawn({
            let worker = worker.clone();
            async move { worker.run().await }
        });

        buffer.enqueue(user_event("alice"));
        buffer.enqueue(user_event("bob"));

        tokio::time::sleep(Duration::from_millis(50)).await;
        worker.request_shutdown();
        let _ = tokio::time::timeout(Duration::from_secs(1), handle).await;

        assert_eq!(persister.len(), 2);
    }

    #[tokio::test]
    async fn persister_failure_trips_the_breaker() {
        struct FailingPersister;
        #[async_trait::async_trait]
        impl EventPersister for FailingPersister {
            async fn persist_batch(
                &self,
                _events: Vec<Event>,
            ) -> crate::error::Result<Vec<crate::events::persister::PersistedEvent>> {
                Err(crate::error::AccessGraphError::Fatal("disk full".into()))
            }
            async fn get_events_after(
                &self,
                _tx_time: chrono::DateTime<Utc>,
                _tx_sequence: u64,
            ) -> crate::error::Result<Vec<crate::events::persister::PersistedEvent>> {
                Ok(Vec::new())
            }
            async fn get_events_in_hash_range(
                &self,
                _kind: crate::events::model::EventKind,
                _range: crate::cluster::routing::HashRange,
                _since_tx_time: Option<chrono::DateTime<Utc>>,
            ) -> crate::error::Result<Vec<crate::events::persister::PersistedEvent>> {
                Ok(Vec::new())
            }
            async fn delete_events_in_hash_range(
                &self,
                _kind: crate::events::model::EventKind,
                _range: crate::cluster::routing::HashRange,
                _before_tx_time: chrono::DateTime<Utc>,
            ) -> crate::error::Result<u64> {
                Ok(0)
            }
            async fn load_snapshot(&self) -> crate::error::Result<Vec<crate::events::persister::PersistedEvent>> {
                Ok(Vec::new())
            }
        }

        let buffer = Arc::new(EventBuffer::new(1));
        let persister = Arc::new(FailingPersister);
        let breaker = TripSwitch::new(crate::circuit_breaker::TripAction::FailFast);
        let worker = FlushWorker::new(buffer.clone(), persister, FlushStrategy::SizeLimited, breaker.clone());

        buffer.enqueue(user_event("alice"));
        let _ = tokio::time::timeout(Duration::from_secs(1), worker.run()).await;

        assert!(breaker.check().is_err());
    }
}
