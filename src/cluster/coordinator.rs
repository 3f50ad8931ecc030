//! OperationCoordinator (spec section 4.8): translates a client-level API
//! call into one or more shard calls, dispatched by `DataElementKind` and
//! hash.

use super::client::{ShardClient, ShardClientFactory, ShardRequest, ShardResponse};
use super::routing::{DataElementKind, RoutingTable};
use crate::access::Command;
use crate::config::ShardClientConfig;
use crate::error::{AccessGraphError, Result};
use crate::events::Event;
use futures::future;
use std::collections::HashSet;
use std::sync::Arc;

/// Routes per-element operations to exactly one shard group, and fans
/// "accessible by" queries out across every shard of a kind.
pub struct OperationCoordinator {
    routing: Arc<RoutingTable>,
    clients: Arc<dyn ShardClientFactory>,
    fan_out_limit: usize,
}

impl OperationCoordinator {
    pub fn new(routing: Arc<RoutingTable>, clients: Arc<dyn ShardClientFactory>) -> Self {
        Self { routing, clients, fan_out_limit: ShardClientConfig::default().fan_out_limit }
    }

    pub fn with_fan_out_limit(mut self, limit: usize) -> Self {
        self.fan_out_limit = limit;
        self
    }

    async fn client_for(&self, kind: DataElementKind, element: &str) -> Result<Arc<dyn ShardClient>> {
        let endpoint = self.routing.route_one(kind, element)?;
        self.clients.client_for(&endpoint).await
    }

    async fn clients_for_all(&self, kind: DataElementKind) -> Result<Vec<Arc<dyn ShardClient>>> {
        let endpoints = self.routing.route_all(kind);
        let mut clients = Vec::with_capacity(endpoints.len());
        for endpoint in endpoints {
            clients.push(self.clients.client_for(&endpoint).await?);
        }
        Ok(clients)
    }

    /// Dispatches `command` to the shard(s) its primary element(s) hash to.
    /// `AddGroup`/`RemoveGroup` additionally fan out a bookkeeping
    /// prepend/removal across every group-to-group shard, since a group
    /// must exist on a group-to-group shard before an edge naming it can be
    /// accepted there (spec section 4.8's representative dispatch rules).
    /// `AddUserToGroupMapping` prepends that same `AddGroup` bookkeeping
    /// before writing the mapping: the mapping is routed by the *user's*
    /// hash, entirely independent of the Group-kind shard that owns `g`'s
    /// hash range, so without the prepend a group only ever referenced
    /// through mappings would never exist on the shard that actually owns it.
    pub async fn dispatch(&self, command: Command) -> Result<Vec<Event>> {
        match &command {
            Command::AddUser(u) | Command::RemoveUser(u) => {
                self.send_one(DataElementKind::User, u, ShardRequest::ApplyCommand(command.clone())).await
            }
            Command::AddGroup(g) => self.ensure_group_exists(g).await,
            Command::RemoveGroup(g) => {
                self.send_one(DataElementKind::Group, g, ShardRequest::ApplyCommand(command.clone())).await
            }
            Command::AddGroupToGroupMapping { from, .. } | Command::RemoveGroupToGroupMapping { from, .. } => {
                if matches!(command, Command::AddGroupToGroupMapping { .. }) {
                    self.check_cross_shard_cycle(&command).await?;
                }
                self.send_one(DataElementKind::GroupToGroup, from, ShardRequest::ApplyCommand(command.clone())).await
            }
            Command::AddUserToGroupMapping { user, group } => {
                let mut events = self.ensure_group_exists(group).await?;
                events.extend(self.send_one(DataElementKind::User, user, ShardRequest::ApplyCommand(command.clone())).await?);
                Ok(events)
            }
            Command::RemoveUserToGroupMapping { user, .. } => {
                self.send_one(DataElementKind::User, user, ShardRequest::ApplyCommand(command.clone())).await
            }
            Command::AddUserToComponentAccess { user, .. }
            | Command::RemoveUserToComponentAccess { user, .. }
            | Command::AddUserToEntity { user, .. }
            | Command::RemoveUserToEntity { user, .. } => {
                self.send_one(DataElementKind::User, user, ShardRequest::ApplyCommand(command.clone())).await
            }
            Command::AddGroupToComponentAccess { group, .. }
            | Command::RemoveGroupToComponentAccess { group, .. }
            | Command::AddGroupToEntity { group, .. }
            | Command::RemoveGroupToEntity { group, .. } => {
                self.send_one(DataElementKind::Group, group, ShardRequest::ApplyCommand(command.clone())).await
            }
            Command::AddEntityType(et) | Command::RemoveEntityType(et) => {
                self.send_one(DataElementKind::Group, et, ShardRequest::ApplyCommand(command.clone())).await
            }
            Command::AddEntity { entity_type, .. } | Command::RemoveEntity { entity_type, .. } => {
                self.send_one(DataElementKind::Group, entity_type, ShardRequest::ApplyCommand(command.clone())).await
            }
        }
    }

    async fn send_one(&self, kind: DataElementKind, element: &str, request: ShardRequest) -> Result<Vec<Event>> {
        let client = self.client_for(kind, element).await?;
        match client.send(request).await? {
            ShardResponse::Events(events) => Ok(events),
            ShardResponse::Ack => Ok(Vec::new()),
            _ => Err(AccessGraphError::Conflict("unexpected shard response shape".to_string())),
        }
    }

    /// Idempotently ensures `group` exists on the Group-kind shard that owns
    /// its hash range, plus the usual group-to-group bookkeeping broadcast.
    /// Safe to call unconditionally: `AccessManager`'s own `AddGroup` is a
    /// no-op (and emits no event) when the group is already present.
    async fn ensure_group_exists(&self, group: &str) -> Result<Vec<Event>> {
        let command = Command::AddGroup(group.to_string());
        let mut events = self.send_one(DataElementKind::Group, group, ShardRequest::ApplyCommand(command.clone())).await?;
        events.extend(self.broadcast_bookkeeping(DataElementKind::GroupToGroup, command).await?);
        Ok(events)
    }

    async fn broadcast_bookkeeping(&self, kind: DataElementKind, command: Command) -> Result<Vec<Event>> {
        let clients = self.clients_for_all(kind).await?;
        let mut all_events = Vec::new();
        for client in clients {
            match client.send(ShardRequest::ApplyCommand(command.clone())).await {
                Ok(ShardResponse::Events(events)) => all_events.extend(events),
                Ok(_) => {}
                Err(AccessGraphError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(all_events)
    }

    /// Before admitting a new group-to-group edge, walks the forward
    /// reachability closure from `to` across group-to-group shards, failing
    /// with `CycleWouldBeCreated` if `from` is revisited. A shard miss
    /// (group absent there) is treated as "no outgoing edges", consistent
    /// with dependency-free semantics elsewhere in the system.
    async fn check_cross_shard_cycle(&self, command: &Command) -> Result<()> {
        let Command::AddGroupToGroupMapping { from, to } = command else { return Ok(()) };
        if from == to {
            return Err(AccessGraphError::CycleWouldBeCreated { from: from.clone(), to: to.clone() });
        }

        let mut visited: HashSet<String> = HashSet::new();
        let mut frontier = vec![to.clone()];
        while let Some(group) = frontier.pop() {
            if !visited.insert(group.clone()) {
                continue;
            }
            if group == *from {
                return Err(AccessGraphError::CycleWouldBeCreated { from: from.clone(), to: to.clone() });
            }
            let client = self.client_for(DataElementKind::GroupToGroup, &group).await?;
            let response = client
                .send(ShardRequest::GetGroupToGroupMappings { group: group.clone(), include_indirect: false })
                .await;
            let successors = match response {
                Ok(ShardResponse::Strings(s)) => s,
                Err(AccessGraphError::NotFound(_)) => HashSet::new(),
                Err(e) => return Err(e),
                Ok(_) => HashSet::new(),
            };
            for next in successors {
                if !visited.contains(&next) {
                    frontier.push(next);
                }
            }
        }
        Ok(())
    }

    /// `HasAccessToEntity`/`HasAccessToComponent`-shaped fan-out: ask the
    /// user's shard for its direct answer and reachable groups, then query
    /// those groups in parallel, short-circuiting on the first `true`.
    pub async fn has_access_to_component(&self, user: &str, component: &str, access_level: &str) -> Result<bool> {
        let user_client = self.client_for(DataElementKind::User, user).await?;
        let direct = match user_client
            .send(ShardRequest::HasAccessToComponent {
                user: user.to_string(),
                component: component.to_string(),
                access_level: access_level.to_string(),
            })
            .await?
        {
            ShardResponse::Bool(b) => b,
            _ => false,
        };
        if direct {
            return Ok(true);
        }

        let groups = match user_client
            .send(ShardRequest::GetUserToGroupMappings { user: user.to_string(), include_indirect: true })
            .await?
        {
            ShardResponse::Strings(s) => s,
            _ => HashSet::new(),
        };

        self.fan_out_group_component_check(groups, component, access_level).await
    }

    async fn fan_out_group_component_check(&self, groups: HashSet<String>, component: &str, access_level: &str) -> Result<bool> {
        for chunk in chunk_into(groups.into_iter().collect(), self.fan_out_limit) {
            let futures_in_chunk = chunk.into_iter().map(|group| {
                let component = component.to_string();
                let access_level = access_level.to_string();
                async move {
                    let client = self.client_for(DataElementKind::Group, &group).await?;
                    client
                        .send(ShardRequest::GroupHasAccessToComponent { group, component, access_level })
                        .await
                }
            });
            let chunk_results = future::join_all(futures_in_chunk).await;
            for r in chunk_results {
                if let ShardResponse::Bool(true) = r? {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    /// Same shape as `has_access_to_component`: direct answer from the
    /// user's shard, then fan out across the user's reachable groups,
    /// short-circuiting on the first `true`.
    pub async fn has_access_to_entity(&self, user: &str, entity_type: &str, entity: &str) -> Result<bool> {
        let user_client = self.client_for(DataElementKind::User, user).await?;
        let direct = match user_client
            .send(ShardRequest::HasAccessToEntity {
                user: user.to_string(),
                entity_type: entity_type.to_string(),
                entity: entity.to_string(),
            })
            .await?
        {
            ShardResponse::Bool(b) => b,
            _ => false,
        };
        if direct {
            return Ok(true);
        }

        let groups = match user_client
            .send(ShardRequest::GetUserToGroupMappings { user: user.to_string(), include_indirect: true })
            .await?
        {
            ShardResponse::Strings(s) => s,
            _ => HashSet::new(),
        };

        self.fan_out_group_entity_check(groups, entity_type, entity).await
    }

    async fn fan_out_group_entity_check(&self, groups: HashSet<String>, entity_type: &str, entity: &str) -> Result<bool> {
        for chunk in chunk_into(groups.into_iter().collect(), self.fan_out_limit) {
            let futures_in_chunk = chunk.into_iter().map(|group| {
                let entity_type = entity_type.to_string();
                let entity = entity.to_string();
                async move {
                    let client = self.client_for(DataElementKind::Group, &group).await?;
                    client.send(ShardRequest::GroupHasAccessToEntity { group, entity_type, entity }).await
                }
            });
            let chunk_results = future::join_all(futures_in_chunk).await;
            for r in chunk_results {
                if let ShardResponse::Bool(true) = r? {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    /// `EntitiesAccessibleByUser`: one user-shard call returns the user's
    /// direct entities plus whatever its own local reachable-group copies
    /// know about, then the user's full reachable-group set is fanned out
    /// across the Group shards that actually own those groups, unioning
    /// every shard's answer.
    pub async fn entities_accessible_by_user(
        &self,
        user: &str,
        entity_type: Option<&str>,
    ) -> Result<HashSet<(String, String)>> {
        let user_client = self.client_for(DataElementKind::User, user).await?;
        let mut out = match user_client
            .send(ShardRequest::EntitiesAccessibleByUser {
                user: user.to_string(),
                entity_type: entity_type.map(|s| s.to_string()),
            })
            .await?
        {
            ShardResponse::EntityRefs(set) => set,
            _ => HashSet::new(),
        };

        let groups = match user_client
            .send(ShardRequest::GetUserToGroupMappings { user: user.to_string(), include_indirect: true })
            .await?
        {
            ShardResponse::Strings(s) => s,
            _ => HashSet::new(),
        };

        for chunk in chunk_into(groups.into_iter().collect(), self.fan_out_limit) {
            let futures_in_chunk = chunk.into_iter().map(|group| {
                let entity_type = entity_type.map(|s| s.to_string());
                async move {
                    let client = self.client_for(DataElementKind::Group, &group).await?;
                    client.send(ShardRequest::EntitiesAccessibleByGroup { group, entity_type }).await
                }
            });
            let chunk_results = future::join_all(futures_in_chunk).await;
            for r in chunk_results {
                if let ShardResponse::EntityRefs(set) = r? {
                    out.extend(set);
                }
            }
        }

        Ok(out)
    }
}

fn chunk_into<T: Clone>(items: Vec<T>, size: usize) -> Vec<Vec<T>> {
    if size == 0 {
        return vec![items];
    }
    items.chunks(size).map(|c| c.to_vec()).collect::<Vec<_>>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::IdempotencyMode;
    use crate::circuit_breaker::{TripAction, TripSwitch};
    use crate::cluster::client::InProcessShardClientFactory;
    use crate::cluster::routing::{HashRange, ShardConfigurationEntry, ShardConfigurationSet, ShardEndpoint};
    use crate::events::{EventBuffer, InMemoryEventPersister, TemporalEventCache};
    use crate::node::ShardNode;
    use crate::pauser::RequestPauser;

    fn make_shard(id: &str) -> Arc<ShardNode> {
        Arc::new(ShardNode::new(
            id,
            IdempotencyMode::DependencyFree,
            Arc::new(EventBuffer::new(1000)),
            Arc::new(InMemoryEventPersister::new()),
            Arc::new(TemporalEventCache::new(100)),
            TripSwitch::new(TripAction::FailFast),
            Arc::new(RequestPauser::new()),
        ))
    }

    fn single_shard_coordinator() -> (OperationCoordinator, Arc<ShardNode>) {
        let shard = make_shard("only");
        let factory = InProcessShardClientFactory::new();
        factory.register("only", shard.clone() as Arc<dyn ShardClient>);
        let config = ShardConfigurationSet::new(vec![
            ShardConfigurationEntry {
                kind: DataElementKind::User,
                range: HashRange::full(),
                endpoint: ShardEndpoint { shard_id: "only".into(), url: "memory://only".into() },
            },
            ShardConfigurationEntry {
                kind: DataElementKind::Group,
                range: HashRange::full(),
                endpoint: ShardEndpoint { shard_id: "only".into(), url: "memory://only".into() },
            },
            ShardConfigurationEntry {
                kind: DataElementKind::GroupToGroup,
                range: HashRange::full(),
                endpoint: ShardEndpoint { shard_id: "only".into(), url: "memory://only".into() },
            },
        ]);
        let routing = Arc::new(RoutingTable::new(config));
        (OperationCoordinator::new(routing, Arc::new(factory)), shard)
    }

    #[tokio::test]
    async fn dispatches_add_user_to_the_user_shard() {
        let (coordinator, shard) = single_shard_coordinator();
        coordinator.dispatch(Command::AddUser("alice".into())).await.unwrap();
        assert!(shard.with_manager(|m| m.contains_user("alice")));
    }

    #[tokio::test]
    async fn add_group_also_broadcasts_bookkeeping() {
        let (coordinator, shard) = single_shard_coordinator();
        coordinator.dispatch(Command::AddGroup("admins".into())).await.unwrap();
        assert!(shard.with_manager(|m| m.contains_group("admins")));
    }

    #[tokio::test]
    async fn cross_shard_cycle_is_rejected() {
        let (coordinator, _shard) = single_shard_coordinator();
        coordinator.dispatch(Command::AddGroup("a".into())).await.unwrap();
        coordinator.dispatch(Command::AddGroup("b".into())).await.unwrap();
        coordinator
            .dispatch(Command::AddGroupToGroupMapping { from: "a".into(), to: "b".into() })
            .await
            .unwrap();

        let err = coordinator
            .dispatch(Command::AddGroupToGroupMapping { from: "b".into(), to: "a".into() })
            .await
            .unwrap_err();
        assert!(matches!(err, AccessGraphError::CycleWouldBeCreated { .. }));
    }

    #[tokio::test]
    async fn has_access_to_component_fans_out_through_groups() {
        let (coordinator, shard) = single_shard_coordinator();
        shard.apply_command(Command::AddUser("bob".into())).await.unwrap();
        shard.apply_command(Command::AddGroup("staff".into())).await.unwrap();
        shard.apply_command(Command::AddUserToGroupMapping { user: "bob".into(), group: "staff".into() }).await.unwrap();
        shard
            .apply_command(Command::AddGroupToComponentAccess {
                group: "staff".into(),
                component: "Orders".into(),
                access_level: "View".into(),
            })
            .await
            .unwrap();

        let has = coordinator.has_access_to_component("bob", "Orders", "View").await.unwrap();
        assert!(has);
    }

    #[tokio::test]
    async fn has_access_to_entity_fans_out_through_groups() {
        let (coordinator, shard) = single_shard_coordinator();
        shard.apply_command(Command::AddUser("bob".into())).await.unwrap();
        shard.apply_command(Command::AddGroup("staff".into())).await.unwrap();
        shard.apply_command(Command::AddUserToGroupMapping { user: "bob".into(), group: "staff".into() }).await.unwrap();
        shard.apply_command(Command::AddEntityType("document".into())).await.unwrap();
        shard.apply_command(Command::AddEntity { entity_type: "document".into(), entity: "handbook".into() }).await.unwrap();
        shard
            .apply_command(Command::AddGroupToEntity {
                group: "staff".into(),
                entity_type: "document".into(),
                entity: "handbook".into(),
            })
            .await
            .unwrap();

        let has = coordinator.has_access_to_entity("bob", "document", "handbook").await.unwrap();
        assert!(has);
        let has_other = coordinator.has_access_to_entity("bob", "document", "policy").await.unwrap();
        assert!(!has_other);
    }

    #[tokio::test]
    async fn entities_accessible_by_user_unions_direct_and_group_entities() {
        let (coordinator, shard) = single_shard_coordinator();
        shard.apply_command(Command::AddUser("bob".into())).await.unwrap();
        shard.apply_command(Command::AddGroup("staff".into())).await.unwrap();
        shard.apply_command(Command::AddUserToGroupMapping { user: "bob".into(), group: "staff".into() }).await.unwrap();
        shard.apply_command(Command::AddEntityType("document".into())).await.unwrap();
        shard.apply_command(Command::AddEntity { entity_type: "document".into(), entity: "handbook".into() }).await.unwrap();
        shard.apply_command(Command::AddEntity { entity_type: "document".into(), entity: "offer-letter".into() }).await.unwrap();
        shard
            .apply_command(Command::AddGroupToEntity {
                group: "staff".into(),
                entity_type: "document".into(),
                entity: "handbook".into(),
            })
            .await
            .unwrap();
        shard
            .apply_command(Command::AddUserToEntity {
                user: "bob".into(),
                entity_type: "document".into(),
                entity: "offer-letter".into(),
            })
            .await
            .unwrap();

        let entities = coordinator.entities_accessible_by_user("bob", None).await.unwrap();
        assert_eq!(
            entities,
            [("document".to_string(), "handbook".to_string()), ("document".to_string(), "offer-letter".to_string())]
                .into_iter()
                .collect()
        );
    }

    /// A group only ever referenced via `AddUserToGroupMapping` must still be
    /// prepended onto the Group-kind shard that owns its hash range, not just
    /// self-heal locally on the user's shard.
    #[tokio::test]
    async fn add_user_to_group_mapping_prepends_the_group_onto_its_own_shard() {
        let user_shard = make_shard("users");
        let group_shard = make_shard("groups");
        let factory = InProcessShardClientFactory::new();
        factory.register("users", user_shard.clone() as Arc<dyn ShardClient>);
        factory.register("groups", group_shard.clone() as Arc<dyn ShardClient>);
        let config = ShardConfigurationSet::new(vec![
            ShardConfigurationEntry {
                kind: DataElementKind::User,
                range: HashRange::full(),
                endpoint: ShardEndpoint { shard_id: "users".into(), url: "memory://users".into() },
            },
            ShardConfigurationEntry {
                kind: DataElementKind::Group,
                range: HashRange::full(),
                endpoint: ShardEndpoint { shard_id: "groups".into(), url: "memory://groups".into() },
            },
            ShardConfigurationEntry {
                kind: DataElementKind::GroupToGroup,
                range: HashRange::full(),
                endpoint: ShardEndpoint { shard_id: "groups".into(), url: "memory://groups".into() },
            },
        ]);
        let routing = Arc::new(RoutingTable::new(config));
        let coordinator = OperationCoordinator::new(routing, Arc::new(factory));

        coordinator.dispatch(Command::AddUser("bob".into())).await.unwrap();
        coordinator.dispatch(Command::AddUserToGroupMapping { user: "bob".into(), group: "staff".into() }).await.unwrap();

        assert!(group_shard.with_manager(|m| m.contains_group("staff")));
    }
}
