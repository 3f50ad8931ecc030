//! OperationRouter and SplitOrchestrator (spec section 4.9): the online
//! shard-group split protocol — Prepare, Dual-write, Backfill, Drain,
//! Cutover, Cleanup — with bounded unavailability synchronized through the
//! `RequestPauser` at cutover.

use super::client::{ShardClient, ShardRequest, ShardResponse};
use super::routing::HashRange;
use crate::config::SplitConfig;
use crate::error::{AccessGraphError, Result};
use crate::events::model::EventKind;
use crate::pauser::RequestPauser;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RouterMode {
    /// All traffic goes to source; no split in progress.
    Normal,
    /// Mutations whose element falls in `range` mirror to both source and
    /// target; everything else still goes to source alone.
    DualWrite,
    /// Traffic whose element falls in `range` now goes to target only.
    TargetOnly,
}

fn is_mutation(request: &ShardRequest) -> bool {
    matches!(request, ShardRequest::ApplyCommand(_))
}

/// Sits in front of a source shard for one hash sub-range, mirroring
/// mutations to a target during a split and flipping at cutover.
pub struct OperationRouter {
    range: HashRange,
    source: Arc<dyn ShardClient>,
    target: RwLock<Option<Arc<dyn ShardClient>>>,
    mode: RwLock<RouterMode>,
    pauser: Arc<RequestPauser>,
}

impl OperationRouter {
    pub fn new(range: HashRange, source: Arc<dyn ShardClient>) -> Self {
        Self { range, source, target: RwLock::new(None), mode: RwLock::new(RouterMode::Normal), pauser: Arc::new(RequestPauser::new()) }
    }

    pub fn pauser(&self) -> Arc<RequestPauser> {
        self.pauser.clone()
    }

    fn in_range(&self, element: &str) -> bool {
        self.range.contains(crate::hash::element_hash_code(element))
    }

    fn begin_dual_write(&self, target: Arc<dyn ShardClient>) {
        *self.target.write() = Some(target);
        *self.mode.write() = RouterMode::DualWrite;
    }

    fn cutover(&self) {
        *self.mode.write() = RouterMode::TargetOnly;
    }

    fn abort(&self) {
        *self.target.write() = None;
        *self.mode.write() = RouterMode::Normal;
    }

    /// Routes `request`, keyed by `element`, according to the current split
    /// phase. Every call passes through the pause checkpoint first.
    pub async fn route(&self, element: &str, request: ShardRequest) -> Result<ShardResponse> {
        self.pauser.test_pause().await;
        let mode = *self.mode.read();
        match mode {
            RouterMode::Normal => self.source.send(request).await,
            RouterMode::TargetOnly if self.in_range(element) => {
                let target = self.target.read().clone().ok_or_else(|| {
                    AccessGraphError::SplitProtocolViolation("cutover mode with no target client".to_string())
                })?;
                target.send(request).await
            }
            RouterMode::TargetOnly => self.source.send(request).await,
            RouterMode::DualWrite if self.in_range(element) && is_mutation(&request) => {
                let response = self.source.send(request).await?;
                if let ShardResponse::Events(events) = &response {
                    if !events.is_empty() {
                        if let Some(target) = self.target.read().clone() {
                            target.send(ShardRequest::ApplyEvents(events.clone())).await?;
                        }
                    }
                }
                Ok(response)
            }
            RouterMode::DualWrite => self.source.send(request).await,
        }
    }
}

/// One phase's outcome, returned to the caller for logging/observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitOutcome {
    Completed,
    AbortedOnDrainTimeout,
}

/// Drives one `OperationRouter` through the six-phase split protocol for
/// every event kind the given `DataElementKind` owns.
pub struct SplitOrchestrator {
    router: Arc<OperationRouter>,
    target: Arc<dyn ShardClient>,
    event_kinds: Vec<EventKind>,
    range: HashRange,
    max_drain_attempts: u32,
    drain_interval: Duration,
}

impl SplitOrchestrator {
    pub fn new(
        router: Arc<OperationRouter>,
        target: Arc<dyn ShardClient>,
        event_kinds: Vec<EventKind>,
        range: HashRange,
    ) -> Self {
        let config = SplitConfig::default();
        Self {
            router,
            target,
            event_kinds,
            range,
            max_drain_attempts: config.max_drain_attempts,
            drain_interval: config.drain_interval,
        }
    }

    pub fn with_config(mut self, config: SplitConfig) -> Self {
        self.max_drain_attempts = config.max_drain_attempts;
        self.drain_interval = config.drain_interval;
        self
    }

    pub fn with_drain_policy(mut self, max_attempts: u32, interval: Duration) -> Self {
        self.max_drain_attempts = max_attempts;
        self.drain_interval = interval;
        self
    }

    /// Runs Prepare (already implicit in construction) through Cleanup.
    /// Returns `AbortedOnDrainTimeout` if the drain phase never reaches
    /// zero in-flight operations; per spec section 4.9 this leaves the
    /// system identical to Prepare's precondition.
    pub async fn run(&self) -> Result<SplitOutcome> {
        info!(lo = self.range.lo, hi = self.range.hi, "split: entering dual-write");
        self.router.begin_dual_write(self.target.clone());

        let backfill_started_at = Utc::now();
        self.backfill(None).await?;

        if !self.drain().await? {
            warn!("split: drain timed out, aborting");
            self.router.abort();
            return Ok(SplitOutcome::AbortedOnDrainTimeout);
        }

        info!("split: pausing for cutover");
        self.router.pauser().pause();
        self.backfill(Some(backfill_started_at)).await?;
        self.router.cutover();
        self.router.pauser().resume();
        info!("split: cutover complete, cleaning up source");

        self.cleanup(Utc::now()).await?;
        Ok(SplitOutcome::Completed)
    }

    async fn backfill(&self, since_tx_time: Option<DateTime<Utc>>) -> Result<()> {
        for kind in &self.event_kinds {
            let response = self
                .router
                .source
                .send(ShardRequest::GetEventsInHashRange { kind: *kind, range: self.range, since_tx_time })
                .await?;
            let persisted = match response {
                ShardResponse::PersistedEvents(p) => p,
                _ => {
                    return Err(AccessGraphError::SplitProtocolViolation(
                        "source did not return persisted events for backfill".to_string(),
                    ))
                }
            };
            if persisted.is_empty() {
                continue;
            }
            let events = persisted.into_iter().map(|p| p.event).collect();
            self.target.send(ShardRequest::ApplyEvents(events)).await?;
        }
        Ok(())
    }

    /// Polls the source's active-operation count until it reaches zero, or
    /// gives up after `max_drain_attempts`. Each wait is jittered up to 20%
    /// so that concurrent splits across shards don't poll in lockstep.
    async fn drain(&self) -> Result<bool> {
        for _ in 0..self.max_drain_attempts {
            match self.router.source.send(ShardRequest::ActiveOperationsCount).await? {
                ShardResponse::Count(0) => return Ok(true),
                ShardResponse::Count(_) => {}
                _ => {
                    return Err(AccessGraphError::SplitProtocolViolation(
                        "source did not return an active-operations count".to_string(),
                    ))
                }
            }
            tokio::time::sleep(self.jittered_drain_interval()).await;
        }
        Ok(false)
    }

    fn jittered_drain_interval(&self) -> Duration {
        let jitter_ceiling = (self.drain_interval.as_millis() as u64 / 5).max(1);
        let jitter_ms = rand::rng().random_range(0..jitter_ceiling);
        self.drain_interval + Duration::from_millis(jitter_ms)
    }

    async fn cleanup(&self, before_tx_time: DateTime<Utc>) -> Result<()> {
        for kind in &self.event_kinds {
            self.router
                .source
                .send(ShardRequest::DeleteEventsInHashRange { kind: *kind, range: self.range, before_tx_time })
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::{Command, IdempotencyMode};
    use crate::circuit_breaker::{TripAction, TripSwitch};
    use crate::events::{EventBuffer, InMemoryEventPersister, TemporalEventCache};
    use crate::node::ShardNode;

    fn make_shard(id: &str) -> Arc<ShardNode> {
        Arc::new(ShardNode::new(
            id,
            IdempotencyMode::DependencyFree,
            Arc::new(EventBuffer::new(1)),
            Arc::new(InMemoryEventPersister::new()),
            Arc::new(TemporalEventCache::new(100)),
            TripSwitch::new(TripAction::FailFast),
            Arc::new(crate::pauser::RequestPauser::new()),
        ))
    }

    async fn flush_once(shard: &ShardNode) {
        let batch = shard.buffer().drain_ordered_batch();
        if !batch.is_empty() {
            shard.persister().persist_batch(batch).await.unwrap();
        }
    }

    #[tokio::test]
    async fn dual_write_mirrors_in_range_mutations() {
        let source = make_shard("source");
        source.apply_command(Command::AddUser("alice".into())).await.unwrap();

        let target = make_shard("target");
        let full_range = HashRange::full();
        let router = Arc::new(OperationRouter::new(full_range, source.clone()));
        router.begin_dual_write(target.clone());

        let events = match router
            .route("bob", ShardRequest::ApplyCommand(Command::AddUser("bob".into())))
            .await
            .unwrap()
        {
            ShardResponse::Events(e) => e,
            _ => panic!("expected events"),
        };
        assert_eq!(events.len(), 1);

        assert!(source.with_manager(|m| m.contains_user("bob")));
        assert!(target.with_manager(|m| m.contains_user("bob")));
        // alice was only ever written to source before dual-write began.
        assert!(!target.with_manager(|m| m.contains_user("alice")));
    }

    #[tokio::test]
    async fn cutover_routes_in_range_traffic_to_target_only() {
        let source = make_shard("source");
        let target = make_shard("target");
        let router = OperationRouter::new(HashRange::full(), source.clone());
        router.begin_dual_write(target.clone());
        router.cutover();

        router
            .route("carol", ShardRequest::ApplyCommand(Command::AddUser("carol".into())))
            .await
            .unwrap();

        assert!(target.with_manager(|m| m.contains_user("carol")));
        assert!(!source.with_manager(|m| m.contains_user("carol")));
    }

    #[tokio::test]
    async fn drain_succeeds_immediately_when_idle() {
        let source = make_shard("source");
        let target = make_shard("target");
        let router = Arc::new(OperationRouter::new(HashRange::full(), source.clone()));
        let orchestrator =
            SplitOrchestrator::new(router, target, vec![EventKind::User], HashRange::full())
                .with_drain_policy(3, Duration::from_millis(1));

        assert!(orchestrator.drain().await.unwrap());
    }

    #[tokio::test]
    async fn backfill_copies_persisted_events_into_the_target() {
        let source = make_shard("source");
        for name in ["alice", "bob", "carol"] {
            source.apply_command(Command::AddUser(name.into())).await.unwrap();
        }
        flush_once(&source).await;

        let target = make_shard("target");
        let router = Arc::new(OperationRouter::new(HashRange::full(), source.clone()));
        let orchestrator =
            SplitOrchestrator::new(router, target.clone(), vec![EventKind::User], HashRange::full());

        orchestrator.backfill(None).await.unwrap();

        for name in ["alice", "bob", "carol"] {
            assert!(target.with_manager(|m| m.contains_user(name)));
        }
    }
}
