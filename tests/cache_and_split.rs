//! Event-cache fallback and online shard-split scenarios, driven through the
//! shard node and cluster machinery rather than `AccessManager` directly.

use accessgraph::access::{Command, IdempotencyMode};
use accessgraph::circuit_breaker::{TripAction, TripSwitch};
use accessgraph::cluster::{DataElementKind, HashRange, OperationRouter, ShardRequest, ShardResponse, SplitOrchestrator};
use accessgraph::events::{EventBuffer, EventKind, EventPersister, InMemoryEventPersister, ReaderNode, TemporalEventCache};
use accessgraph::pauser::RequestPauser;
use accessgraph::ShardNode;
use std::sync::Arc;
use std::time::Duration;

fn make_shard(id: &str) -> Arc<ShardNode> {
    Arc::new(ShardNode::new(
        id,
        IdempotencyMode::DependencyFree,
        Arc::new(EventBuffer::new(1)),
        Arc::new(InMemoryEventPersister::new()),
        Arc::new(TemporalEventCache::new(100)),
        TripSwitch::new(TripAction::FailFast),
        Arc::new(RequestPauser::new()),
    ))
}

/// Emulates a `FlushWorker` tick without spawning one: drains the shard's
/// buffer straight into its persister.
async fn flush(shard: &ShardNode) {
    let batch = shard.buffer().drain_ordered_batch();
    if !batch.is_empty() {
        shard.persister().persist_batch(batch).await.unwrap();
    }
}

#[tokio::test]
async fn reader_node_replays_the_full_log_on_first_refresh() {
    let persister: Arc<dyn EventPersister> = Arc::new(InMemoryEventPersister::new());
    let mut producer = accessgraph::AccessManager::new(IdempotencyMode::DependencyFree);

    let mut all_events = Vec::new();
    for name in ["u1", "u2", "u3", "u4", "u5"] {
        all_events.extend(producer.apply_command(Command::AddUser(name.into())).unwrap());
    }
    persister.persist_batch(all_events).await.unwrap();

    // Capacity 3: only the last 3 persisted events remain cached.
    let cache = Arc::new(TemporalEventCache::new(3));
    let snapshot = persister.load_snapshot().await.unwrap();
    let recent: Vec<_> = snapshot.iter().rev().take(3).rev().map(|p| p.event.clone()).collect();
    cache.append(&recent);

    let reader = ReaderNode::new(accessgraph::AccessManager::new(IdempotencyMode::DependencyFree), cache, persister);
    let applied = reader.refresh_once().await.unwrap();
    assert_eq!(applied, 5);
    reader.with_manager(|m| {
        for name in ["u1", "u2", "u3", "u4", "u5"] {
            assert!(m.contains_user(name));
        }
    });
}

#[tokio::test]
async fn online_split_preserves_every_mutation() {
    let source = make_shard("source");
    for i in 0..20 {
        source.apply_command(Command::AddUser(format!("user-{i}"))).await.unwrap();
    }
    flush(&source).await;

    let target = make_shard("target");
    let full_range = HashRange::full();
    let router = Arc::new(OperationRouter::new(full_range, source.clone()));

    let event_kinds = vec![EventKind::User];
    let orchestrator = SplitOrchestrator::new(router.clone(), target.clone(), event_kinds, full_range)
        .with_drain_policy(20, Duration::from_millis(1));

    // A second wave of writes lands through the router before the split
    // starts, covering data the initial backfill must still pick up.
    for i in 20..30 {
        router
            .route(&format!("user-{i}"), ShardRequest::ApplyCommand(Command::AddUser(format!("user-{i}"))))
            .await
            .unwrap();
    }
    flush(&source).await;

    let outcome = orchestrator.run().await.unwrap();
    assert_eq!(outcome, accessgraph::cluster::SplitOutcome::Completed);

    for i in 0..30 {
        let name = format!("user-{i}");
        let response = router.route(&name, ShardRequest::ContainsUser(name.clone())).await.unwrap();
        assert_eq!(response, ShardResponse::Bool(true));
    }
}

#[test]
fn hash_range_coverage_rejects_overlap() {
    use accessgraph::cluster::{ShardConfigurationEntry, ShardConfigurationSet, ShardEndpoint};

    let endpoint = |id: &str| ShardEndpoint { shard_id: id.to_string(), url: format!("memory://{id}") };
    let config = ShardConfigurationSet::new(vec![
        ShardConfigurationEntry { kind: DataElementKind::User, range: HashRange::new(0, 100), endpoint: endpoint("a") },
        ShardConfigurationEntry { kind: DataElementKind::User, range: HashRange::new(50, i32::MAX), endpoint: endpoint("b") },
        ShardConfigurationEntry { kind: DataElementKind::Group, range: HashRange::full(), endpoint: endpoint("c") },
        ShardConfigurationEntry { kind: DataElementKind::GroupToGroup, range: HashRange::full(), endpoint: endpoint("d") },
    ]);

    assert!(config.validate_coverage().is_err());
}
