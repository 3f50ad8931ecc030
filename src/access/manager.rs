//! `AccessManager` aggregates the `ReachabilityGraph` plus the component-
//! and entity-mapping tables and exposes the full query/event API described
//! in spec section 4.2. It enforces idempotency, dependency-free prepending,
//! and cascading removal, and is the boundary at which commands become
//! events.

use crate::error::{AccessGraphError, Result};
use crate::events::model::{Event, EventAction, EventPayload};
use crate::graph::{AbsentPolicy, MutationOutcome, ReachabilityGraph};
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use tracing::{debug, trace};

/// Governs whether absent-element operations are surfaced as errors
/// (`Strict`) or silently self-heal by prepending the missing Add event
/// (`DependencyFree`). Distributed deployments default to `DependencyFree`
/// so that out-of-order event replay across shards converges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdempotencyMode {
    Strict,
    DependencyFree,
}

impl IdempotencyMode {
    fn graph_policy(self) -> AbsentPolicy {
        match self {
            IdempotencyMode::Strict => AbsentPolicy::Strict,
            IdempotencyMode::DependencyFree => AbsentPolicy::Silent,
        }
    }
}

/// A client-level request to `AccessManager`. Every Add has a matching
/// Remove; see spec section 4.2.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    AddUser(String),
    RemoveUser(String),
    AddGroup(String),
    RemoveGroup(String),
    AddUserToGroupMapping { user: String, group: String },
    RemoveUserToGroupMapping { user: String, group: String },
    AddGroupToGroupMapping { from: String, to: String },
    RemoveGroupToGroupMapping { from: String, to: String },
    AddUserToComponentAccess { user: String, component: String, access_level: String },
    RemoveUserToComponentAccess { user: String, component: String, access_level: String },
    AddGroupToComponentAccess { group: String, component: String, access_level: String },
    RemoveGroupToComponentAccess { group: String, component: String, access_level: String },
    AddEntityType(String),
    RemoveEntityType(String),
    AddEntity { entity_type: String, entity: String },
    RemoveEntity { entity_type: String, entity: String },
    AddUserToEntity { user: String, entity_type: String, entity: String },
    RemoveUserToEntity { user: String, entity_type: String, entity: String },
    AddGroupToEntity { group: String, entity_type: String, entity: String },
    RemoveGroupToEntity { group: String, entity_type: String, entity: String },
}

type ComponentAccess = HashSet<(String, String)>;
type EntityRef = (String, String);

#[derive(Default)]
pub struct AccessManager {
    graph: ReachabilityGraph,
    mode: IdempotencyMode,
    user_component_access: HashMap<String, ComponentAccess>,
    group_component_access: HashMap<String, ComponentAccess>,
    entity_types: HashSet<String>,
    entities: HashMap<String, HashSet<String>>,
    user_entities: HashMap<String, HashSet<EntityRef>>,
    group_entities: HashMap<String, HashSet<EntityRef>>,
}

impl Default for ReachabilityGraph {
    fn default() -> Self {
        ReachabilityGraph::new(AbsentPolicy::Silent)
    }
}

impl Default for IdempotencyMode {
    fn default() -> Self {
        IdempotencyMode::DependencyFree
    }
}

impl AccessManager {
    pub fn new(mode: IdempotencyMode) -> Self {
        Self { graph: ReachabilityGraph::new(mode.graph_policy()), mode, ..Default::default() }
    }

    pub fn mode(&self) -> IdempotencyMode {
        self.mode
    }

    fn strict(&self) -> bool {
        self.mode == IdempotencyMode::Strict
    }

    fn not_found<T>(&self, what: &str, value: &str) -> Result<T> {
        Err(AccessGraphError::NotFound(format!("{what} '{value}'")))
    }

    // ---- primary-element presence helpers -------------------------------

    pub fn contains_user(&self, user: &str) -> bool {
        self.graph.contains_leaf(user)
    }

    pub fn contains_group(&self, group: &str) -> bool {
        self.graph.contains_non_leaf(group)
    }

    pub fn contains_entity_type(&self, entity_type: &str) -> bool {
        self.entity_types.contains(entity_type)
    }

    pub fn contains_entity(&self, entity_type: &str, entity: &str) -> bool {
        self.entities.get(entity_type).map_or(false, |set| set.contains(entity))
    }

    // ---- command application ---------------------------------------------

    /// Applies `command`, returning the events it produced in application
    /// order (including any dependency-free prepends and cascade removes).
    /// An empty vec means the command was a no-op under idempotency.
    pub fn apply_command(&mut self, command: Command) -> Result<Vec<Event>> {
        let mut events = Vec::new();
        self.apply_command_into(command, &mut events)?;
        Ok(events)
    }

    fn apply_command_into(&mut self, command: Command, events: &mut Vec<Event>) -> Result<()> {
        match command {
            Command::AddUser(user) => self.do_add_user(&user, events),
            Command::RemoveUser(user) => self.do_remove_user(&user, events),
            Command::AddGroup(group) => self.do_add_group(&group, events),
            Command::RemoveGroup(group) => self.do_remove_group(&group, events),
            Command::AddUserToGroupMapping { user, group } => {
                self.do_add_user_to_group(&user, &group, events)
            }
            Command::RemoveUserToGroupMapping { user, group } => {
                self.do_remove_user_to_group(&user, &group, events)
            }
            Command::AddGroupToGroupMapping { from, to } => self.do_add_group_to_group(&from, &to, events),
            Command::RemoveGroupToGroupMapping { from, to } => {
                self.do_remove_group_to_group(&from, &to, events)
            }
            Command::AddUserToComponentAccess { user, component, access_level } => {
                self.do_add_user_component(&user, &component, &access_level, events)
            }
            Command::RemoveUserToComponentAccess { user, component, access_level } => {
                self.do_remove_user_component(&user, &component, &access_level, events)
            }
            Command::AddGroupToComponentAccess { group, component, access_level } => {
                self.do_add_group_component(&group, &component, &access_level, events)
            }
            Command::RemoveGroupToComponentAccess { group, component, access_level } => {
                self.do_remove_group_component(&group, &component, &access_level, events)
            }
            Command::AddEntityType(entity_type) => self.do_add_entity_type(&entity_type, events),
            Command::RemoveEntityType(entity_type) => self.do_remove_entity_type(&entity_type, events),
            Command::AddEntity { entity_type, entity } => self.do_add_entity(&entity_type, &entity, events),
            Command::RemoveEntity { entity_type, entity } => self.do_remove_entity(&entity_type, &entity, events),
            Command::AddUserToEntity { user, entity_type, entity } => {
                self.do_add_user_entity(&user, &entity_type, &entity, events)
            }
            Command::RemoveUserToEntity { user, entity_type, entity } => {
                self.do_remove_user_entity(&user, &entity_type, &entity, events)
            }
            Command::AddGroupToEntity { group, entity_type, entity } => {
                self.do_add_group_entity(&group, &entity_type, &entity, events)
            }
            Command::RemoveGroupToEntity { group, entity_type, entity } => {
                self.do_remove_group_entity(&group, &entity_type, &entity, events)
            }
        }
    }

    fn push_event(&self, events: &mut Vec<Event>, action: EventAction, payload: EventPayload) {
        events.push(Event::new(action, Utc::now(), payload));
    }

    // ---- users / groups ----------------------------------------------------

    fn do_add_user(&mut self, user: &str, events: &mut Vec<Event>) -> Result<()> {
        if self.graph.add_leaf(user)? == MutationOutcome::Applied {
            trace!(user, "user added");
            self.push_event(events, EventAction::Add, EventPayload::User { user: user.to_string() });
        }
        Ok(())
    }

    fn do_remove_user(&mut self, user: &str, events: &mut Vec<Event>) -> Result<()> {
        if !self.contains_user(user) {
            if self.strict() {
                return self.not_found("user", user);
            }
            return Ok(());
        }
        // Cascade: prepend removes for every mapping referencing this user,
        // so replay reproduces the same end state without needing to infer
        // the cascade from the primary remove alone.
        for (component, access) in self.user_component_access.get(user).cloned().unwrap_or_default() {
            self.user_component_access.get_mut(user).map(|s| s.remove(&(component.clone(), access.clone())));
            self.push_event(
                events,
                EventAction::Remove,
                EventPayload::UserToComponentAccess { user: user.to_string(), component, access_level: access },
            );
        }
        self.user_component_access.remove(user);

        for (entity_type, entity) in self.user_entities.get(user).cloned().unwrap_or_default() {
            self.push_event(
                events,
                EventAction::Remove,
                EventPayload::UserToEntity { user: user.to_string(), entity_type, entity },
            );
        }
        self.user_entities.remove(user);

        let direct_groups: Vec<String> = self.graph.direct_successors(user).into_iter().collect();
        for group in &direct_groups {
            self.push_event(
                events,
                EventAction::Remove,
                EventPayload::UserToGroup { user: user.to_string(), group: group.clone() },
            );
        }

        self.graph.remove_leaf(user)?;
        self.push_event(events, EventAction::Remove, EventPayload::User { user: user.to_string() });
        debug!(user, cascaded = events.len() - 1, "user removed with cascade");
        Ok(())
    }

    fn do_add_group(&mut self, group: &str, events: &mut Vec<Event>) -> Result<()> {
        if self.graph.add_non_leaf(group)? == MutationOutcome::Applied {
            self.push_event(events, EventAction::Add, EventPayload::Group { group: group.to_string() });
        }
        Ok(())
    }

    fn do_remove_group(&mut self, group: &str, events: &mut Vec<Event>) -> Result<()> {
        if !self.contains_group(group) {
            if self.strict() {
                return self.not_found("group", group);
            }
            return Ok(());
        }
        for (component, access) in self.group_component_access.get(group).cloned().unwrap_or_default() {
            self.push_event(
                events,
                EventAction::Remove,
                EventPayload::GroupToComponentAccess { group: group.to_string(), component, access_level: access },
            );
        }
        self.group_component_access.remove(group);

        for (entity_type, entity) in self.group_entities.get(group).cloned().unwrap_or_default() {
            self.push_event(
                events,
                EventAction::Remove,
                EventPayload::GroupToEntity { group: group.to_string(), entity_type, entity },
            );
        }
        self.group_entities.remove(group);

        let direct_predecessors = self.graph.direct_predecessors(group);
        for v in &direct_predecessors {
            if self.graph.contains_leaf(v) {
                self.push_event(
                    events,
                    EventAction::Remove,
                    EventPayload::UserToGroup { user: v.clone(), group: group.to_string() },
                );
            } else {
                self.push_event(
                    events,
                    EventAction::Remove,
                    EventPayload::GroupToGroup { from_group: v.clone(), to_group: group.to_string() },
                );
            }
        }
        let outgoing_groups = self.graph.direct_successors(group);
        for to in &outgoing_groups {
            self.push_event(
                events,
                EventAction::Remove,
                EventPayload::GroupToGroup { from_group: group.to_string(), to_group: to.clone() },
            );
        }

        self.graph.remove_non_leaf(group)?;
        self.push_event(events, EventAction::Remove, EventPayload::Group { group: group.to_string() });
        Ok(())
    }

    fn do_add_user_to_group(&mut self, user: &str, group: &str, events: &mut Vec<Event>) -> Result<()> {
        if self.mode == IdempotencyMode::DependencyFree {
            if !self.contains_user(user) {
                self.do_add_user(user, events)?;
            }
            if !self.contains_group(group) {
                self.do_add_group(group, events)?;
            }
        }
        match self.graph.add_edge(user, group) {
            Ok(MutationOutcome::Applied) => {
                self.push_event(
                    events,
                    EventAction::Add,
                    EventPayload::UserToGroup { user: user.to_string(), group: group.to_string() },
                );
                Ok(())
            }
            Ok(_) => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn do_remove_user_to_group(&mut self, user: &str, group: &str, events: &mut Vec<Event>) -> Result<()> {
        match self.graph.remove_edge(user, group) {
            Ok(MutationOutcome::Applied) => {
                self.push_event(
                    events,
                    EventAction::Remove,
                    EventPayload::UserToGroup { user: user.to_string(), group: group.to_string() },
                );
                Ok(())
            }
            Ok(_) => Ok(()),
            Err(e) if self.strict() => Err(e),
            Err(_) => Ok(()),
        }
    }

    fn do_add_group_to_group(&mut self, from: &str, to: &str, events: &mut Vec<Event>) -> Result<()> {
        if self.mode == IdempotencyMode::DependencyFree {
            if !self.contains_group(from) {
                self.do_add_group(from, events)?;
            }
            if !self.contains_group(to) {
                self.do_add_group(to, events)?;
            }
        }
        // CycleWouldBeCreated is always surfaced, per spec section 4.2.
        match self.graph.add_edge(from, to)? {
            MutationOutcome::Applied => {
                self.push_event(
                    events,
                    EventAction::Add,
                    EventPayload::GroupToGroup { from_group: from.to_string(), to_group: to.to_string() },
                );
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn do_remove_group_to_group(&mut self, from: &str, to: &str, events: &mut Vec<Event>) -> Result<()> {
        match self.graph.remove_edge(from, to) {
            Ok(MutationOutcome::Applied) => {
                self.push_event(
                    events,
                    EventAction::Remove,
                    EventPayload::GroupToGroup { from_group: from.to_string(), to_group: to.to_string() },
                );
                Ok(())
            }
            Ok(_) => Ok(()),
            Err(e) if self.strict() => Err(e),
            Err(_) => Ok(()),
        }
    }

    // ---- component access ---------------------------------------------------

    fn do_add_user_component(
        &mut self,
        user: &str,
        component: &str,
        access_level: &str,
        events: &mut Vec<Event>,
    ) -> Result<()> {
        if !self.contains_user(user) {
            if self.mode == IdempotencyMode::DependencyFree {
                self.do_add_user(user, events)?;
            } else {
                return self.not_found("user", user);
            }
        }
        let entry = self.user_component_access.entry(user.to_string()).or_default();
        if entry.insert((component.to_string(), access_level.to_string())) {
            self.push_event(
                events,
                EventAction::Add,
                EventPayload::UserToComponentAccess {
                    user: user.to_string(),
                    component: component.to_string(),
                    access_level: access_level.to_string(),
                },
            );
        }
        Ok(())
    }

    fn do_remove_user_component(
        &mut self,
        user: &str,
        component: &str,
        access_level: &str,
        events: &mut Vec<Event>,
    ) -> Result<()> {
        let removed = self
            .user_component_access
            .get_mut(user)
            .map(|set| set.remove(&(component.to_string(), access_level.to_string())))
            .unwrap_or(false);
        if removed {
            self.push_event(
                events,
                EventAction::Remove,
                EventPayload::UserToComponentAccess {
                    user: user.to_string(),
                    component: component.to_string(),
                    access_level: access_level.to_string(),
                },
            );
        } else if self.strict() {
            return self.not_found("user-component mapping", &format!("{user}:{component}:{access_level}"));
        }
        Ok(())
    }

    fn do_add_group_component(
        &mut self,
        group: &str,
        component: &str,
        access_level: &str,
        events: &mut Vec<Event>,
    ) -> Result<()> {
        if !self.contains_group(group) {
            if self.mode == IdempotencyMode::DependencyFree {
                self.do_add_group(group, events)?;
            } else {
                return self.not_found("group", group);
            }
        }
        let entry = self.group_component_access.entry(group.to_string()).or_default();
        if entry.insert((component.to_string(), access_level.to_string())) {
            self.push_event(
                events,
                EventAction::Add,
                EventPayload::GroupToComponentAccess {
                    group: group.to_string(),
                    component: component.to_string(),
                    access_level: access_level.to_string(),
                },
            );
        }
        Ok(())
    }

    fn do_remove_group_component(
        &mut self,
        group: &str,
        component: &str,
        access_level: &str,
        events: &mut Vec<Event>,
    ) -> Result<()> {
        let removed = self
            .group_component_access
            .get_mut(group)
            .map(|set| set.remove(&(component.to_string(), access_level.to_string())))
            .unwrap_or(false);
        if removed {
            self.push_event(
                events,
                EventAction::Remove,
                EventPayload::GroupToComponentAccess {
                    group: group.to_string(),
                    component: component.to_string(),
                    access_level: access_level.to_string(),
                },
            );
        } else if self.strict() {
            return self.not_found("group-component mapping", &format!("{group}:{component}:{access_level}"));
        }
        Ok(())
    }

    // ---- entity types / entities ---------------------------------------------

    fn do_add_entity_type(&mut self, entity_type: &str, events: &mut Vec<Event>) -> Result<()> {
        if self.entity_types.insert(entity_type.to_string()) {
            self.push_event(events, EventAction::Add, EventPayload::EntityType { entity_type: entity_type.to_string() });
        }
        Ok(())
    }

    fn do_remove_entity_type(&mut self, entity_type: &str, events: &mut Vec<Event>) -> Result<()> {
        if !self.entity_types.remove(entity_type) {
            if self.strict() {
                return self.not_found("entity type", entity_type);
            }
            return Ok(());
        }
        for entity in self.entities.get(entity_type).cloned().unwrap_or_default() {
            self.cascade_remove_entity(entity_type, &entity, events);
            self.push_event(
                events,
                EventAction::Remove,
                EventPayload::Entity { entity_type: entity_type.to_string(), entity: entity.clone() },
            );
        }
        self.entities.remove(entity_type);
        self.push_event(events, EventAction::Remove, EventPayload::EntityType { entity_type: entity_type.to_string() });
        Ok(())
    }

    fn do_add_entity(&mut self, entity_type: &str, entity: &str, events: &mut Vec<Event>) -> Result<()> {
        if !self.contains_entity_type(entity_type) {
            if self.mode == IdempotencyMode::DependencyFree {
                self.do_add_entity_type(entity_type, events)?;
            } else {
                return self.not_found("entity type", entity_type);
            }
        }
        if self.entities.entry(entity_type.to_string()).or_default().insert(entity.to_string()) {
            self.push_event(
                events,
                EventAction::Add,
                EventPayload::Entity { entity_type: entity_type.to_string(), entity: entity.to_string() },
            );
        }
        Ok(())
    }

    fn cascade_remove_entity(&mut self, entity_type: &str, entity: &str, events: &mut Vec<Event>) {
        for (user, refs) in self.user_entities.clone() {
            if refs.contains(&(entity_type.to_string(), entity.to_string())) {
                self.user_entities.get_mut(&user).map(|s| s.remove(&(entity_type.to_string(), entity.to_string())));
                self.push_event(
                    events,
                    EventAction::Remove,
                    EventPayload::UserToEntity {
                        user,
                        entity_type: entity_type.to_string(),
                        entity: entity.to_string(),
                    },
                );
            }
        }
        for (group, refs) in self.group_entities.clone() {
            if refs.contains(&(entity_type.to_string(), entity.to_string())) {
                self.group_entities.get_mut(&group).map(|s| s.remove(&(entity_type.to_string(), entity.to_string())));
                self.push_event(
                    events,
                    EventAction::Remove,
                    EventPayload::GroupToEntity {
                        group,
                        entity_type: entity_type.to_string(),
                        entity: entity.to_string(),
                    },
                );
            }
        }
    }

    fn do_remove_entity(&mut self, entity_type: &str, entity: &str, events: &mut Vec<Event>) -> Result<()> {
        let removed = self.entities.get_mut(entity_type).map(|set| set.remove(entity)).unwrap_or(false);
        if !removed {
            if self.strict() {
                return self.not_found("entity", &format!("{entity_type}:{entity}"));
            }
            return Ok(());
        }
        self.cascade_remove_entity(entity_type, entity, events);
        self.push_event(
            events,
            EventAction::Remove,
            EventPayload::Entity { entity_type: entity_type.to_string(), entity: entity.to_string() },
        );
        Ok(())
    }

    fn do_add_user_entity(
        &mut self,
        user: &str,
        entity_type: &str,
        entity: &str,
        events: &mut Vec<Event>,
    ) -> Result<()> {
        if !self.contains_user(user) {
            if self.mode == IdempotencyMode::DependencyFree {
                self.do_add_user(user, events)?;
            } else {
                return self.not_found("user", user);
            }
        }
        if !self.contains_entity(entity_type, entity) {
            if self.mode == IdempotencyMode::DependencyFree {
                self.do_add_entity(entity_type, entity, events)?;
            } else {
                return self.not_found("entity", &format!("{entity_type}:{entity}"));
            }
        }
        if self.user_entities.entry(user.to_string()).or_default().insert((entity_type.to_string(), entity.to_string())) {
            self.push_event(
                events,
                EventAction::Add,
                EventPayload::UserToEntity {
                    user: user.to_string(),
                    entity_type: entity_type.to_string(),
                    entity: entity.to_string(),
                },
            );
        }
        Ok(())
    }

    fn do_remove_user_entity(
        &mut self,
        user: &str,
        entity_type: &str,
        entity: &str,
        events: &mut Vec<Event>,
    ) -> Result<()> {
        let removed = self
            .user_entities
            .get_mut(user)
            .map(|set| set.remove(&(entity_type.to_string(), entity.to_string())))
            .unwrap_or(false);
        if removed {
            self.push_event(
                events,
                EventAction::Remove,
                EventPayload::UserToEntity {
                    user: user.to_string(),
                    entity_type: entity_type.to_string(),
                    entity: entity.to_string(),
                },
            );
        } else if self.strict() {
            return self.not_found("user-entity mapping", &format!("{user}:{entity_type}:{entity}"));
        }
        Ok(())
    }

    fn do_add_group_entity(
        &mut self,
        group: &str,
        entity_type: &str,
        entity: &str,
        events: &mut Vec<Event>,
    ) -> Result<()> {
        if !self.contains_group(group) {
            if self.mode == IdempotencyMode::DependencyFree {
                self.do_add_group(group, events)?;
            } else {
                return self.not_found("group", group);
            }
        }
        if !self.contains_entity(entity_type, entity) {
            if self.mode == IdempotencyMode::DependencyFree {
                self.do_add_entity(entity_type, entity, events)?;
            } else {
                return self.not_found("entity", &format!("{entity_type}:{entity}"));
            }
        }
        if self.group_entities.entry(group.to_string()).or_default().insert((entity_type.to_string(), entity.to_string())) {
            self.push_event(
                events,
                EventAction::Add,
                EventPayload::GroupToEntity {
                    group: group.to_string(),
                    entity_type: entity_type.to_string(),
                    entity: entity.to_string(),
                },
            );
        }
        Ok(())
    }

    fn do_remove_group_entity(
        &mut self,
        group: &str,
        entity_type: &str,
        entity: &str,
        events: &mut Vec<Event>,
    ) -> Result<()> {
        let removed = self
            .group_entities
            .get_mut(group)
            .map(|set| set.remove(&(entity_type.to_string(), entity.to_string())))
            .unwrap_or(false);
        if removed {
            self.push_event(
                events,
                EventAction::Remove,
                EventPayload::GroupToEntity {
                    group: group.to_string(),
                    entity_type: entity_type.to_string(),
                    entity: entity.to_string(),
                },
            );
        } else if self.strict() {
            return self.not_found("group-entity mapping", &format!("{group}:{entity_type}:{entity}"));
        }
        Ok(())
    }

    // ---- replay -------------------------------------------------------------

    /// Applies an already-decided event to local state without producing
    /// further events. Idempotent: re-applying an event already reflected
    /// in state is a no-op. Used by `ReaderNode` and snapshot replay.
    pub fn apply_event(&mut self, event: &Event) -> Result<()> {
        let mut sink = Vec::new();
        let command = command_from_event(event);
        match self.apply_command_into(command, &mut sink) {
            Ok(()) => Ok(()),
            Err(e) if !self.strict() && matches!(e, AccessGraphError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    // ---- queries --------------------------------------------------------------

    pub fn get_user_to_group_mappings(&self, user: &str, include_indirect: bool) -> Result<HashSet<String>> {
        if !self.contains_user(user) {
            if self.strict() {
                return self.not_found("user", user);
            }
            return Ok(HashSet::new());
        }
        if include_indirect {
            Ok(self.graph.reachable_non_leaves(user))
        } else {
            Ok(self.graph.direct_successors(user))
        }
    }

    pub fn get_group_to_group_mappings(&self, group: &str, include_indirect: bool) -> Result<HashSet<String>> {
        if !self.contains_group(group) {
            if self.strict() {
                return self.not_found("group", group);
            }
            return Ok(HashSet::new());
        }
        if include_indirect {
            Ok(self.graph.reachable_non_leaves(group))
        } else {
            Ok(self.graph.direct_successors(group))
        }
    }

    pub fn has_access_to_component(&self, user: &str, component: &str, access_level: &str) -> Result<bool> {
        if !self.contains_user(user) {
            if self.strict() {
                return self.not_found("user", user);
            }
            return Ok(false);
        }
        let key = (component.to_string(), access_level.to_string());
        if self.user_component_access.get(user).map_or(false, |s| s.contains(&key)) {
            return Ok(true);
        }
        let groups = self.get_user_to_group_mappings(user, true)?;
        for g in groups {
            if self.group_component_access.get(&g).map_or(false, |s| s.contains(&key)) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub fn group_has_access_to_component(&self, group: &str, component: &str, access_level: &str) -> Result<bool> {
        if !self.contains_group(group) {
            if self.strict() {
                return self.not_found("group", group);
            }
            return Ok(false);
        }
        let key = (component.to_string(), access_level.to_string());
        if self.group_component_access.get(group).map_or(false, |s| s.contains(&key)) {
            return Ok(true);
        }
        for g in self.graph.reachable_non_leaves(group) {
            if self.group_component_access.get(&g).map_or(false, |s| s.contains(&key)) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub fn has_access_to_entity(&self, user: &str, entity_type: &str, entity: &str) -> Result<bool> {
        if !self.contains_user(user) {
            if self.strict() {
                return self.not_found("user", user);
            }
            return Ok(false);
        }
        let key = (entity_type.to_string(), entity.to_string());
        if self.user_entities.get(user).map_or(false, |s| s.contains(&key)) {
            return Ok(true);
        }
        let groups = self.get_user_to_group_mappings(user, true)?;
        for g in groups {
            if self.group_entities.get(&g).map_or(false, |s| s.contains(&key)) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub fn group_has_access_to_entity(&self, group: &str, entity_type: &str, entity: &str) -> Result<bool> {
        if !self.contains_group(group) {
            if self.strict() {
                return self.not_found("group", group);
            }
            return Ok(false);
        }
        let key = (entity_type.to_string(), entity.to_string());
        if self.group_entities.get(group).map_or(false, |s| s.contains(&key)) {
            return Ok(true);
        }
        for g in self.graph.reachable_non_leaves(group) {
            if self.group_entities.get(&g).map_or(false, |s| s.contains(&key)) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub fn components_accessible_by_user(&self, user: &str) -> Result<ComponentAccess> {
        if !self.contains_user(user) {
            if self.strict() {
                return self.not_found("user", user);
            }
            return Ok(HashSet::new());
        }
        let mut out = self.user_component_access.get(user).cloned().unwrap_or_default();
        for g in self.get_user_to_group_mappings(user, true)? {
            out.extend(self.group_component_access.get(&g).cloned().unwrap_or_default());
        }
        Ok(out)
    }

    pub fn components_accessible_by_group(&self, group: &str) -> Result<ComponentAccess> {
        if !self.contains_group(group) {
            if self.strict() {
                return self.not_found("group", group);
            }
            return Ok(HashSet::new());
        }
        let mut out = self.group_component_access.get(group).cloned().unwrap_or_default();
        for g in self.graph.reachable_non_leaves(group) {
            out.extend(self.group_component_access.get(&g).cloned().unwrap_or_default());
        }
        Ok(out)
    }

    pub fn entities_accessible_by_user(&self, user: &str, entity_type: Option<&str>) -> Result<HashSet<EntityRef>> {
        if !self.contains_user(user) {
            if self.strict() {
                return self.not_found("user", user);
            }
            return Ok(HashSet::new());
        }
        let mut out = self.user_entities.get(user).cloned().unwrap_or_default();
        for g in self.get_user_to_group_mappings(user, true)? {
            out.extend(self.group_entities.get(&g).cloned().unwrap_or_default());
        }
        if let Some(et) = entity_type {
            out.retain(|(t, _)| t == et);
        }
        Ok(out)
    }

    pub fn entities_accessible_by_group(&self, group: &str, entity_type: Option<&str>) -> Result<HashSet<EntityRef>> {
        if !self.contains_group(group) {
            if self.strict() {
                return self.not_found("group", group);
            }
            return Ok(HashSet::new());
        }
        let mut out = self.group_entities.get(group).cloned().unwrap_or_default();
        for g in self.graph.reachable_non_leaves(group) {
            out.extend(self.group_entities.get(&g).cloned().unwrap_or_default());
        }
        if let Some(et) = entity_type {
            out.retain(|(t, _)| t == et);
        }
        Ok(out)
    }

    pub fn user_count(&self) -> usize {
        self.graph.leaf_count()
    }

    pub fn group_count(&self) -> usize {
        self.graph.non_leaf_count()
    }
}

/// Maps a persisted event back to the command that, when applied, produces
/// the same state transition. Used for replay: `apply_event` runs this
/// command through the normal idempotent path but discards any events it
/// would otherwise emit.
fn command_from_event(event: &Event) -> Command {
    match (&event.action, event.payload.clone()) {
        (EventAction::Add, EventPayload::User { user }) => Command::AddUser(user),
        (EventAction::Remove, EventPayload::User { user }) => Command::RemoveUser(user),
        (EventAction::Add, EventPayload::Group { group }) => Command::AddGroup(group),
        (EventAction::Remove, EventPayload::Group { group }) => Command::RemoveGroup(group),
        (EventAction::Add, EventPayload::UserToGroup { user, group }) => {
            Command::AddUserToGroupMapping { user, group }
        }
        (EventAction::Remove, EventPayload::UserToGroup { user, group }) => {
            Command::RemoveUserToGroupMapping { user, group }
        }
        (EventAction::Add, EventPayload::GroupToGroup { from_group, to_group }) => {
            Command::AddGroupToGroupMapping { from: from_group, to: to_group }
        }
        (EventAction::Remove, EventPayload::GroupToGroup { from_group, to_group }) => {
            Command::RemoveGroupToGroupMapping { from: from_group, to: to_group }
        }
        (EventAction::Add, EventPayload::UserToComponentAccess { user, component, access_level }) => {
            Command::AddUserToComponentAccess { user, component, access_level }
        }
        (EventAction::Remove, EventPayload::UserToComponentAccess { user, component, access_level }) => {
            Command::RemoveUserToComponentAccess { user, component, access_level }
        }
        (EventAction::Add, EventPayload::GroupToComponentAccess { group, component, access_level }) => {
            Command::AddGroupToComponentAccess { group, component, access_level }
        }
        (EventAction::Remove, EventPayload::GroupToComponentAccess { group, component, access_level }) => {
            Command::RemoveGroupToComponentAccess { group, component, access_level }
        }
        (EventAction::Add, EventPayload::EntityType { entity_type }) => Command::AddEntityType(entity_type),
        (EventAction::Remove, EventPayload::EntityType { entity_type }) => Command::RemoveEntityType(entity_type),
        (EventAction::Add, EventPayload::Entity { entity_type, entity }) => {
            Command::AddEntity { entity_type, entity }
        }
        (EventAction::Remove, EventPayload::Entity { entity_type, entity }) => {
            Command::RemoveEntity { entity_type, entity }
        }
        (EventAction::Add, EventPayload::UserToEntity { user, entity_type, entity }) => {
            Command::AddUserToEntity { user, entity_type, entity }
        }
        (EventAction::Remove, EventPayload::UserToEntity { user, entity_type, entity }) => {
            Command::RemoveUserToEntity { user, entity_type, entity }
        }
        (EventAction::Add, EventPayload::GroupToEntity { group, entity_type, entity }) => {
            Command::AddGroupToEntity { group, entity_type, entity }
        }
        (EventAction::Remove, EventPayload::GroupToEntity { group, entity_type, entity }) => {
            Command::RemoveGroupToEntity { group, entity_type, entity }
        }
    }
}
