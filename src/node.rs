//! `ShardNode`: one shard group's writer, bundling the pieces spec section 2
//! lists as owned by a shard — `AccessManager`, `EventBuffer`,
//! `EventPersister`, `TemporalEventCache`, and the `TripSwitch` guarding it.
//! Implements `ShardClient` in-process so the Coordinator and tests can
//! address a shard without a real transport.

use crate::access::{AccessManager, Command, IdempotencyMode};
use crate::circuit_breaker::TripSwitch;
use crate::cluster::client::{ShardClient, ShardRequest, ShardResponse};
use crate::error::Result;
use crate::events::{Event, EventBuffer, EventPersister, TemporalEventCache};
use crate::pauser::RequestPauser;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// One shard group's in-process writer: owns its `AccessManager`
/// exclusively (spec section 3's ownership rule), publishes events through
/// a shared `EventBuffer`, and exposes the active-operation count the split
/// protocol's drain phase polls.
pub struct ShardNode {
    pub id: String,
    manager: Mutex<AccessManager>,
    buffer: Arc<EventBuffer>,
    persister: Arc<dyn EventPersister>,
    cache: Arc<TemporalEventCache>,
    breaker: TripSwitch,
    pauser: Arc<RequestPauser>,
    active_operations: AtomicU64,
}

impl std::fmt::Debug for ShardNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardNode").field("id", &self.id).finish()
    }
}

impl ShardNode {
    pub fn new(
        id: impl Into<String>,
        mode: IdempotencyMode,
        buffer: Arc<EventBuffer>,
        persister: Arc<dyn EventPersister>,
        cache: Arc<TemporalEventCache>,
        breaker: TripSwitch,
        pauser: Arc<RequestPauser>,
    ) -> Self {
        Self {
            id: id.into(),
            manager: Mutex::new(AccessManager::new(mode)),
            buffer,
            persister,
            cache,
            breaker,
            pauser,
            active_operations: AtomicU64::new(0),
        }
    }

    pub fn active_operations(&self) -> u64 {
        self.active_operations.load(Ordering::SeqCst)
    }

    pub fn breaker(&self) -> &TripSwitch {
        &self.breaker
    }

    pub fn persister(&self) -> &Arc<dyn EventPersister> {
        &self.persister
    }

    pub fn buffer(&self) -> &Arc<EventBuffer> {
        &self.buffer
    }

    pub fn cache(&self) -> &Arc<TemporalEventCache> {
        &self.cache
    }

    /// Applies a command, enqueuing the events it produces. The checkpoint
    /// order is: trip-switch check, pause checkpoint, apply, enqueue — a
    /// paused split cutover must observe no new writes past this point.
    pub async fn apply_command(&self, command: Command) -> Result<Vec<Event>> {
        self.breaker.check()?;
        self.pauser.test_pause().await;
        self.active_operations.fetch_add(1, Ordering::SeqCst);
        let result = {
            let mut manager = self.manager.lock();
            manager.apply_command(command)
        };
        self.active_operations.fetch_sub(1, Ordering::SeqCst);
        let events = result?;
        if !events.is_empty() {
            for event in &events {
                self.buffer.enqueue(event.clone());
            }
        }
        Ok(events)
    }

    /// Applies already-decided events without re-emitting them — used for
    /// dual-write mirroring and backfill during a split.
    pub fn apply_events_locally(&self, events: &[Event]) -> Result<()> {
        let mut manager = self.manager.lock();
        for event in events {
            manager.apply_event(event)?;
        }
        Ok(())
    }

    pub fn with_manager<T>(&self, f: impl FnOnce(&AccessManager) -> T) -> T {
        f(&self.manager.lock())
    }
}

#[async_trait]
impl ShardClient for ShardNode {
    async fn send(&self, request: ShardRequest) -> Result<ShardResponse> {
        self.breaker.check()?;
        match request {
            ShardRequest::ApplyCommand(command) => {
                let events = self.apply_command(command).await?;
                Ok(ShardResponse::Events(events))
            }
            ShardRequest::ApplyEvents(events) => {
                self.apply_events_locally(&events)?;
                Ok(ShardResponse::Ack)
            }
            ShardRequest::ContainsUser(user) => Ok(ShardResponse::Bool(self.with_manager(|m| m.contains_user(&user)))),
            ShardRequest::ContainsGroup(group) => {
                Ok(ShardResponse::Bool(self.with_manager(|m| m.contains_group(&group))))
            }
            ShardRequest::GetUserToGroupMappings { user, include_indirect } => {
                let mappings = self.with_manager(|m| m.get_user_to_group_mappings(&user, include_indirect))?;
                Ok(ShardResponse::Strings(mappings))
            }
            ShardRequest::GetGroupToGroupMappings { group, include_indirect } => {
                let mappings = self.with_manager(|m| m.get_group_to_group_mappings(&group, include_indirect))?;
                Ok(ShardResponse::Strings(mappings))
            }
            ShardRequest::HasAccessToComponent { user, component, access_level } => {
                let has = self.with_manager(|m| m.has_access_to_component(&user, &component, &access_level))?;
                Ok(ShardResponse::Bool(has))
            }
            ShardRequest::GroupHasAccessToComponent { group, component, access_level } => {
                let has = self.with_manager(|m| m.group_has_access_to_component(&group, &component, &access_level))?;
                Ok(ShardResponse::Bool(has))
            }
            ShardRequest::HasAccessToEntity { user, entity_type, entity } => {
                let has = self.with_manager(|m| m.has_access_to_entity(&user, &entity_type, &entity))?;
                Ok(ShardResponse::Bool(has))
            }
            ShardRequest::GroupHasAccessToEntity { group, entity_type, entity } => {
                let has = self.with_manager(|m| m.group_has_access_to_entity(&group, &entity_type, &entity))?;
                Ok(ShardResponse::Bool(has))
            }
            ShardRequest::EntitiesAccessibleByUser { user, entity_type } => {
                let entities = self.with_manager(|m| m.entities_accessible_by_user(&user, entity_type.as_deref()))?;
                Ok(ShardResponse::EntityRefs(entities))
            }
            ShardRequest::EntitiesAccessibleByGroup { group, entity_type } => {
                let entities = self.with_manager(|m| m.entities_accessible_by_group(&group, entity_type.as_deref()))?;
                Ok(ShardResponse::EntityRefs(entities))
            }
            ShardRequest::ActiveOperationsCount => Ok(ShardResponse::Count(self.active_operations())),
            ShardRequest::GetEventsInHashRange { kind, range, since_tx_time } => {
                let events = self.persister.get_events_in_hash_range(kind, range, since_tx_time).await?;
                Ok(ShardResponse::PersistedEvents(events))
            }
            ShardRequest::DeleteEventsInHashRange { kind, range, before_tx_time } => {
                let deleted = self.persister.delete_events_in_hash_range(kind, range, before_tx_time).await?;
                Ok(ShardResponse::Count(deleted))
            }
        }
    }

    fn shard_id(&self) -> &str {
        &self.id
    }
}
