//! The event type and its wire format (spec section 6, authoritative).
//!
//! An event is a dictionary of `eventId`, `eventAction`, `occurredTime`,
//! `hashCode`, plus a kind-specific set of keys whose *presence* (not an
//! explicit tag) determines which of the ten mutation kinds it represents.
//! `EventPayload` models that as a Rust enum for everywhere except the wire;
//! serialization goes through `RawEvent`, which mirrors the flat dictionary
//! exactly so serializing then deserializing is the identity.

use crate::error::{AccessGraphError, Result};
use chrono::{DateTime, Duration as ChronoDuration, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventAction {
    #[default]
    Add,
    Remove,
}

/// The ten mutation kinds the wire format distinguishes by key presence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    User,
    Group,
    UserToGroup,
    GroupToGroup,
    UserToComponentAccess,
    GroupToComponentAccess,
    EntityType,
    Entity,
    UserToEntity,
    GroupToEntity,
}

impl EventKind {
    pub const ALL: [EventKind; 10] = [
        EventKind::User,
        EventKind::Group,
        EventKind::UserToGroup,
        EventKind::GroupToGroup,
        EventKind::UserToComponentAccess,
        EventKind::GroupToComponentAccess,
        EventKind::EntityType,
        EventKind::Entity,
        EventKind::UserToEntity,
        EventKind::GroupToEntity,
    ];
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventPayload {
    User { user: String },
    Group { group: String },
    UserToGroup { user: String, group: String },
    GroupToGroup { from_group: String, to_group: String },
    UserToComponentAccess { user: String, component: String, access_level: String },
    GroupToComponentAccess { group: String, component: String, access_level: String },
    EntityType { entity_type: String },
    Entity { entity_type: String, entity: String },
    UserToEntity { user: String, entity_type: String, entity: String },
    GroupToEntity { group: String, entity_type: String, entity: String },
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::User { .. } => EventKind::User,
            EventPayload::Group { .. } => EventKind::Group,
            EventPayload::UserToGroup { .. } => EventKind::UserToGroup,
            EventPayload::GroupToGroup { .. } => EventKind::GroupToGroup,
            EventPayload::UserToComponentAccess { .. } => EventKind::UserToComponentAccess,
            EventPayload::GroupToComponentAccess { .. } => EventKind::GroupToComponentAccess,
            EventPayload::EntityType { .. } => EventKind::EntityType,
            EventPayload::Entity { .. } => EventKind::Entity,
            EventPayload::UserToEntity { .. } => EventKind::UserToEntity,
            EventPayload::GroupToEntity { .. } => EventKind::GroupToEntity,
        }
    }

    /// The element whose canonical string form the routing hash is computed
    /// over (spec section 4.7): the user for user-kind events, the group
    /// for group-kind events including `fromGroup` of a group-to-group edge.
    pub fn primary_element(&self) -> &str {
        match self {
            EventPayload::User { user } => user,
            EventPayload::UserToGroup { user, .. } => user,
            EventPayload::UserToComponentAccess { user, .. } => user,
            EventPayload::UserToEntity { user, .. } => user,
            EventPayload::Group { group } => group,
            EventPayload::GroupToComponentAccess { group, .. } => group,
            EventPayload::GroupToEntity { group, .. } => group,
            EventPayload::GroupToGroup { from_group, .. } => from_group,
            EventPayload::EntityType { entity_type } => entity_type,
            EventPayload::Entity { entity_type, .. } => entity_type,
        }
    }
}

/// A durable, replayable record of a single state mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub event_id: Uuid,
    pub action: EventAction,
    pub occurred_time: DateTime<Utc>,
    pub hash_code: i32,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(action: EventAction, occurred_time: DateTime<Utc>, payload: EventPayload) -> Self {
        let hash_code = crate::hash::element_hash_code(payload.primary_element());
        Self { event_id: Uuid::new_v4(), action, occurred_time, hash_code, payload }
    }

    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEvent {
    event_id: String,
    event_action: EventAction,
    occurred_time: String,
    hash_code: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    entity_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    entity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    group: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    application_component: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    access_level: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    from_group: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    to_group: Option<String>,
}

fn format_occurred_time(dt: &DateTime<Utc>) -> String {
    let hundred_ns = dt.timestamp_subsec_nanos() / 100;
    format!("{}.{:07}", dt.format("%Y-%m-%d %H:%M:%S"), hundred_ns)
}

fn parse_occurred_time(s: &str) -> Result<DateTime<Utc>> {
    let (date_part, frac_part) = s
        .split_once('.')
        .ok_or_else(|| AccessGraphError::MalformedEvent(format!("occurredTime '{s}' missing fractional seconds")))?;
    let naive = NaiveDateTime::parse_from_str(date_part, "%Y-%m-%d %H:%M:%S")
        .map_err(|e| AccessGraphError::MalformedEvent(format!("occurredTime '{s}': {e}")))?;
    if frac_part.len() != 7 {
        return Err(AccessGraphError::MalformedEvent(format!(
            "occurredTime '{s}' must have 7 fractional digits (100ns precision)"
        )));
    }
    let hundred_ns: i64 = frac_part
        .parse()
        .map_err(|_| AccessGraphError::MalformedEvent(format!("occurredTime '{s}' has non-numeric fraction")))?;
    Ok(DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc) + ChronoDuration::nanoseconds(hundred_ns * 100))
}

impl Serialize for Event {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut raw = RawEvent {
            event_id: self.event_id.to_string(),
            event_action: self.action,
            occurred_time: format_occurred_time(&self.occurred_time),
            hash_code: self.hash_code,
            ..Default::default()
        };
        match &self.payload {
            EventPayload::User { user } => raw.user = Some(user.clone()),
            EventPayload::Group { group } => raw.group = Some(group.clone()),
            EventPayload::UserToGroup { user, group } => {
                raw.user = Some(user.clone());
                raw.group = Some(group.clone());
            }
            EventPayload::GroupToGroup { from_group, to_group } => {
                raw.from_group = Some(from_group.clone());
                raw.to_group = Some(to_group.clone());
            }
            EventPayload::UserToComponentAccess { user, component, access_level } => {
                raw.user = Some(user.clone());
                raw.application_component = Some(component.clone());
                raw.access_level = Some(access_level.clone());
            }
            EventPayload::GroupToComponentAccess { group, component, access_level } => {
                raw.group = Some(group.clone());
                raw.application_component = Some(component.clone());
                raw.access_level = Some(access_level.clone());
            }
            EventPayload::EntityType { entity_type } => raw.entity_type = Some(entity_type.clone()),
            EventPayload::Entity { entity_type, entity } => {
                raw.entity_type = Some(entity_type.clone());
                raw.entity = Some(entity.clone());
            }
            EventPayload::UserToEntity { user, entity_type, entity } => {
                raw.user = Some(user.clone());
                raw.entity_type = Some(entity_type.clone());
                raw.entity = Some(entity.clone());
            }
            EventPayload::GroupToEntity { group, entity_type, entity } => {
                raw.group = Some(group.clone());
                raw.entity_type = Some(entity_type.clone());
                raw.entity = Some(entity.clone());
            }
        }
        raw.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Event {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = RawEvent::deserialize(deserializer)?;
        let payload = payload_from_raw(&raw).map_err(serde::de::Error::custom)?;
        let event_id = Uuid::parse_str(&raw.event_id).map_err(serde::de::Error::custom)?;
        let occurred_time = parse_occurred_time(&raw.occurred_time).map_err(serde::de::Error::custom)?;
        Ok(Event { event_id, action: raw.event_action, occurred_time, hash_code: raw.hash_code, payload })
    }
}

fn payload_from_raw(raw: &RawEvent) -> Result<EventPayload> {
    let has_et = raw.entity_type.is_some();
    let has_e = raw.entity.is_some();
    let has_u = raw.user.is_some();
    let has_g = raw.group.is_some();
    let has_ac = raw.application_component.is_some();
    let has_al = raw.access_level.is_some();
    let has_fg = raw.from_group.is_some();
    let has_tg = raw.to_group.is_some();

    macro_rules! req {
        ($opt:expr, $name:literal) => {
            $opt.clone().ok_or_else(|| AccessGraphError::MalformedEvent(format!("missing '{}'", $name)))?
        };
    }

    match (has_et, has_e, has_u, has_g, has_ac, has_al, has_fg, has_tg) {
        (true, false, false, false, false, false, false, false) => {
            Ok(EventPayload::EntityType { entity_type: req!(raw.entity_type, "entityType") })
        }
        (true, true, false, false, false, false, false, false) => Ok(EventPayload::Entity {
            entity_type: req!(raw.entity_type, "entityType"),
            entity: req!(raw.entity, "entity"),
        }),
        (true, true, true, false, false, false, false, false) => Ok(EventPayload::UserToEntity {
            user: req!(raw.user, "user"),
            entity_type: req!(raw.entity_type, "entityType"),
            entity: req!(raw.entity, "entity"),
        }),
        (true, true, false, true, false, false, false, false) => Ok(EventPayload::GroupToEntity {
            group: req!(raw.group, "group"),
            entity_type: req!(raw.entity_type, "entityType"),
            entity: req!(raw.entity, "entity"),
        }),
        (false, false, true, false, false, false, false, false) => {
            Ok(EventPayload::User { user: req!(raw.user, "user") })
        }
        (false, false, true, true, false, false, false, false) => Ok(EventPayload::UserToGroup {
            user: req!(raw.user, "user"),
            group: req!(raw.group, "group"),
        }),
        (false, false, true, false, true, true, false, false) => Ok(EventPayload::UserToComponentAccess {
            user: req!(raw.user, "user"),
            component: req!(raw.application_component, "applicationComponent"),
            access_level: req!(raw.access_level, "accessLevel"),
        }),
        (false, false, false, true, false, false, false, false) => {
            Ok(EventPayload::Group { group: req!(raw.group, "group") })
        }
        (false, false, false, true, true, true, false, false) => Ok(EventPayload::GroupToComponentAccess {
            group: req!(raw.group, "group"),
            component: req!(raw.application_component, "applicationComponent"),
            access_level: req!(raw.access_level, "accessLevel"),
        }),
        (false, false, false, false, false, false, true, true) => Ok(EventPayload::GroupToGroup {
            from_group: req!(raw.from_group, "fromGroup"),
            to_group: req!(raw.to_group, "toGroup"),
        }),
        _ => Err(AccessGraphError::MalformedEvent(
            "key combination does not match any known event kind".to_string(),
        )),
    }
}
