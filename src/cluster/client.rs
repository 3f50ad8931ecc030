//! The shard client abstraction (spec section 4.7-4.8).
//!
//! `ShardClient` is the RPC-shaped boundary the Coordinator talks to; the
//! core depends only on the trait. `ShardNode` implements it directly for
//! in-process use, and `InProcessShardClientFactory` pools handles to such
//! nodes, used by tests and the demonstration binary in place of a real
//! transport.

use crate::access::Command;
use crate::error::{AccessGraphError, Result};
use crate::events::model::{Event, EventKind};
use crate::events::persister::PersistedEvent;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;

/// A request the Coordinator or `SplitOrchestrator` sends to one shard.
#[derive(Debug, Clone)]
pub enum ShardRequest {
    ApplyCommand(Command),
    ApplyEvents(Vec<Event>),
    ContainsUser(String),
    ContainsGroup(String),
    GetUserToGroupMappings { user: String, include_indirect: bool },
    GetGroupToGroupMappings { group: String, include_indirect: bool },
    HasAccessToComponent { user: String, component: String, access_level: String },
    GroupHasAccessToComponent { group: String, component: String, access_level: String },
    HasAccessToEntity { user: String, entity_type: String, entity: String },
    GroupHasAccessToEntity { group: String, entity_type: String, entity: String },
    EntitiesAccessibleByUser { user: String, entity_type: Option<String> },
    EntitiesAccessibleByGroup { group: String, entity_type: Option<String> },
    ActiveOperationsCount,
    /// Split backfill: read this shard's persisted events of `kind` in
    /// `range`, optionally only those at or after `since_tx_time`.
    GetEventsInHashRange {
        kind: EventKind,
        range: super::routing::HashRange,
        since_tx_time: Option<DateTime<Utc>>,
    },
    /// Split cleanup: delete this shard's persisted events of `kind` in
    /// `range` older than `before_tx_time`.
    DeleteEventsInHashRange {
        kind: EventKind,
        range: super::routing::HashRange,
        before_tx_time: DateTime<Utc>,
    },
}

/// A shard's response to a `ShardRequest`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShardResponse {
    Events(Vec<Event>),
    PersistedEvents(Vec<PersistedEvent>),
    Bool(bool),
    Strings(HashSet<String>),
    EntityRefs(HashSet<(String, String)>),
    Count(u64),
    Ack,
}

/// The abstract collaborator the Coordinator and SplitOrchestrator speak to.
/// A production deployment backs this with an HTTP-shaped RPC client; the
/// core only needs this trait.
#[async_trait]
pub trait ShardClient: Send + Sync + std::fmt::Debug {
    async fn send(&self, request: ShardRequest) -> Result<ShardResponse>;
    fn shard_id(&self) -> &str;
}

/// Builds a `ShardClient` for a given endpoint, pooling connections keyed by
/// URL. An external collaborator (spec section 1): the core consumes only
/// the trait.
#[async_trait]
pub trait ShardClientFactory: Send + Sync {
    async fn client_for(&self, endpoint: &crate::cluster::routing::ShardEndpoint) -> Result<std::sync::Arc<dyn ShardClient>>;

    /// Evicts pooled handles for endpoints no longer referenced by the
    /// current configuration (spec section 4.7).
    fn evict_unreferenced(&self, still_referenced: &HashSet<String>);
}

/// A `ShardClientFactory` backed by an in-process registry of `ShardNode`s,
/// keyed by shard id. There is no real connection to pool — each "handle" is
/// an `Arc` clone of the already-constructed node — but the lookup/eviction
/// discipline matches what a networked factory would do with real sockets:
/// concurrent readers look up a cached handle without taking a lock against
/// each other, and a configuration refresh drops handles for shards no
/// longer referenced.
///
/// Used by tests and the demonstration binary in place of a networked
/// factory; a production deployment would instead pool real RPC connections
/// behind this same trait.
pub struct InProcessShardClientFactory {
    nodes: DashMap<String, Arc<dyn ShardClient>>,
}

impl InProcessShardClientFactory {
    pub fn new() -> Self {
        Self { nodes: DashMap::new() }
    }

    pub fn register(&self, shard_id: impl Into<String>, client: Arc<dyn ShardClient>) {
        self.nodes.insert(shard_id.into(), client);
    }
}

impl Default for InProcessShardClientFactory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ShardClientFactory for InProcessShardClientFactory {
    async fn client_for(&self, endpoint: &crate::cluster::routing::ShardEndpoint) -> Result<Arc<dyn ShardClient>> {
        self.nodes
            .get(&endpoint.shard_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| AccessGraphError::UpstreamUnavailable(endpoint.shard_id.clone()))
    }

    fn evict_unreferenced(&self, still_referenced: &HashSet<String>) {
        self.nodes.retain(|shard_id, _| still_referenced.contains(shard_id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::IdempotencyMode;
    use crate::circuit_breaker::{TripAction, TripSwitch};
    use crate::events::{EventBuffer, InMemoryEventPersister, TemporalEventCache};
    use crate::node::ShardNode;
    use crate::pauser::RequestPauser;

    fn make_shard(id: &str) -> Arc<ShardNode> {
        Arc::new(ShardNode::new(
            id,
            IdempotencyMode::DependencyFree,
            Arc::new(EventBuffer::new(100)),
            Arc::new(InMemoryEventPersister::new()),
            Arc::new(TemporalEventCache::new(100)),
            TripSwitch::new(TripAction::FailFast),
            Arc::new(RequestPauser::new()),
        ))
    }

    #[tokio::test]
    async fn returns_registered_client_by_shard_id() {
        let factory = InProcessShardClientFactory::new();
        let shard = make_shard("alpha");
        factory.register("alpha", shard as Arc<dyn ShardClient>);

        let endpoint = crate::cluster::routing::ShardEndpoint { shard_id: "alpha".into(), url: "memory://alpha".into() };
        let client = factory.client_for(&endpoint).await.unwrap();
        assert_eq!(client.shard_id(), "alpha");
    }

    #[tokio::test]
    async fn unregistered_shard_is_upstream_unavailable() {
        let factory = InProcessShardClientFactory::new();
        let endpoint = crate::cluster::routing::ShardEndpoint { shard_id: "missing".into(), url: "memory://missing".into() };
        let err = factory.client_for(&endpoint).await.unwrap_err();
        assert!(matches!(err, AccessGraphError::UpstreamUnavailable(_)));
    }

    #[test]
    fn eviction_drops_handles_no_longer_referenced() {
        let factory = InProcessShardClientFactory::new();
        factory.register("alpha", make_shard("alpha") as Arc<dyn ShardClient>);
        factory.register("beta", make_shard("beta") as Arc<dyn ShardClient>);

        let still_referenced: HashSet<String> = ["alpha".to_string()].into_iter().collect();
        factory.evict_unreferenced(&still_referenced);

        assert_eq!(factory.nodes.len(), 1);
        assert!(factory.nodes.contains_key("alpha"));
    }
}
