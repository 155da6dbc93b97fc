// ============================================================================
// Island Events
// ============================================================================
//
// Event notifications are a closed set of payload shapes selected by the
// event type string (the trailing segment of `<prefix>.evt.<eventType>`).
// They are decoupled from any host event-bus type: the host receives an
// `IslandEvent` value and maps it onto its own listeners.
//
// ============================================================================

use crate::envelope::Envelope;
use island_error::{BusError, RpcResult};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

/// Coarse grouping that drives read-cache invalidation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventCategory {
    /// Who belongs to an island and with which role
    Membership,
    /// Island-level state (settings, bank, lifecycle)
    IslandState,
    /// Invitations; their effect on cached listings is indirect
    Invitation,
    Other,
}

impl EventCategory {
    /// Category of an event type, from its first dotted segment
    pub fn of(event_type: &str) -> Self {
        match event_type.split('.').next().unwrap_or_default() {
            "member" | "role" => EventCategory::Membership,
            "island" | "bank" => EventCategory::IslandState,
            "invite" => EventCategory::Invitation,
            _ => EventCategory::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberChange {
    pub island_id: String,
    pub member_id: String,
    #[serde(default)]
    pub role: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleChange {
    pub island_id: String,
    pub member_id: String,
    pub role: String,
    #[serde(default)]
    pub previous_role: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IslandChange {
    pub island_id: String,
    /// Names of the island properties that changed, when the sender lists them
    #[serde(default)]
    pub fields: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InviteChange {
    pub island_id: String,
    pub invite_id: String,
    #[serde(default)]
    pub inviter_id: Option<String>,
    #[serde(default)]
    pub invitee_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum IslandEvent {
    MemberAdded(MemberChange),
    MemberRemoved(MemberChange),
    MemberRoleChanged(RoleChange),
    IslandUpdated(IslandChange),
    IslandDeleted(IslandChange),
    InviteCreated(InviteChange),
    InviteAccepted(InviteChange),
    InviteRevoked(InviteChange),
    /// Any event type this crate has no dedicated shape for
    Other {
        event_type: String,
        data: Map<String, Value>,
    },
}

impl IslandEvent {
    pub const MEMBER_ADDED: &'static str = "member.added";
    pub const MEMBER_REMOVED: &'static str = "member.removed";
    pub const MEMBER_ROLE_CHANGED: &'static str = "member.role_changed";
    pub const ISLAND_UPDATED: &'static str = "island.updated";
    pub const ISLAND_DELETED: &'static str = "island.deleted";
    pub const INVITE_CREATED: &'static str = "invite.created";
    pub const INVITE_ACCEPTED: &'static str = "invite.accepted";
    pub const INVITE_REVOKED: &'static str = "invite.revoked";

    /// Decode the payload of `envelope` according to `event_type`.
    ///
    /// Known event types with a payload that does not fit their shape are a
    /// `Decode` error; unknown event types become `Other`.
    pub fn decode(event_type: &str, envelope: &Envelope) -> RpcResult<Self> {
        let data = envelope.data();
        let event = match event_type {
            Self::MEMBER_ADDED => IslandEvent::MemberAdded(shape(event_type, data)?),
            Self::MEMBER_REMOVED => IslandEvent::MemberRemoved(shape(event_type, data)?),
            Self::MEMBER_ROLE_CHANGED => IslandEvent::MemberRoleChanged(shape(event_type, data)?),
            Self::ISLAND_UPDATED => IslandEvent::IslandUpdated(shape(event_type, data)?),
            Self::ISLAND_DELETED => IslandEvent::IslandDeleted(shape(event_type, data)?),
            Self::INVITE_CREATED => IslandEvent::InviteCreated(shape(event_type, data)?),
            Self::INVITE_ACCEPTED => IslandEvent::InviteAccepted(shape(event_type, data)?),
            Self::INVITE_REVOKED => IslandEvent::InviteRevoked(shape(event_type, data)?),
            other => IslandEvent::Other {
                event_type: other.to_string(),
                data: data.clone(),
            },
        };
        Ok(event)
    }

    pub fn event_type(&self) -> &str {
        match self {
            IslandEvent::MemberAdded(_) => Self::MEMBER_ADDED,
            IslandEvent::MemberRemoved(_) => Self::MEMBER_REMOVED,
            IslandEvent::MemberRoleChanged(_) => Self::MEMBER_ROLE_CHANGED,
            IslandEvent::IslandUpdated(_) => Self::ISLAND_UPDATED,
            IslandEvent::IslandDeleted(_) => Self::ISLAND_DELETED,
            IslandEvent::InviteCreated(_) => Self::INVITE_CREATED,
            IslandEvent::InviteAccepted(_) => Self::INVITE_ACCEPTED,
            IslandEvent::InviteRevoked(_) => Self::INVITE_REVOKED,
            IslandEvent::Other { event_type, .. } => event_type,
        }
    }

    pub fn category(&self) -> EventCategory {
        EventCategory::of(self.event_type())
    }

    pub fn island_id(&self) -> Option<&str> {
        match self {
            IslandEvent::MemberAdded(c) | IslandEvent::MemberRemoved(c) => Some(c.island_id.as_str()),
            IslandEvent::MemberRoleChanged(c) => Some(c.island_id.as_str()),
            IslandEvent::IslandUpdated(c) | IslandEvent::IslandDeleted(c) => Some(c.island_id.as_str()),
            IslandEvent::InviteCreated(c)
            | IslandEvent::InviteAccepted(c)
            | IslandEvent::InviteRevoked(c) => Some(c.island_id.as_str()),
            IslandEvent::Other { data, .. } => data.get("islandId").and_then(Value::as_str),
        }
    }
}

fn shape<T: DeserializeOwned>(event_type: &str, data: &Map<String, Value>) -> RpcResult<T> {
    serde_json::from_value(Value::Object(data.clone())).map_err(|e| {
        BusError::decode(format!("payload of {} event does not match: {}", event_type, e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event_envelope(event_type: &str, data: Value) -> Envelope {
        let Value::Object(map) = data else {
            panic!("event data must be an object");
        };
        Envelope::new_event(event_type, map)
    }

    #[test]
    fn test_category_of() {
        assert_eq!(EventCategory::of("member.added"), EventCategory::Membership);
        assert_eq!(EventCategory::of("role.granted"), EventCategory::Membership);
        assert_eq!(EventCategory::of("island.updated"), EventCategory::IslandState);
        assert_eq!(EventCategory::of("bank.changed"), EventCategory::IslandState);
        assert_eq!(EventCategory::of("invite.created"), EventCategory::Invitation);
        assert_eq!(EventCategory::of("chat.cosmetic"), EventCategory::Other);
        assert_eq!(EventCategory::of(""), EventCategory::Other);
    }

    #[test]
    fn test_decode_member_added() {
        let envelope = event_envelope(
            "member.added",
            json!({"islandId": "ISL1", "memberId": "U2", "role": "member"}),
        );

        let event = IslandEvent::decode("member.added", &envelope).unwrap();
        assert_eq!(
            event,
            IslandEvent::MemberAdded(MemberChange {
                island_id: "ISL1".into(),
                member_id: "U2".into(),
                role: Some("member".into()),
            })
        );
        assert_eq!(event.island_id(), Some("ISL1"));
        assert_eq!(event.category(), EventCategory::Membership);
    }

    #[test]
    fn test_decode_invite_created() {
        let envelope = event_envelope(
            "invite.created",
            json!({"islandId": "ISL1", "inviteId": "INV9", "inviteeId": "U3"}),
        );

        let event = IslandEvent::decode("invite.created", &envelope).unwrap();
        assert_eq!(event.event_type(), "invite.created");
        assert_eq!(event.category(), EventCategory::Invitation);
    }

    #[test]
    fn test_decode_shape_mismatch_is_decode_error() {
        let envelope = event_envelope("member.added", json!({"memberId": "U2"}));
        assert!(matches!(
            IslandEvent::decode("member.added", &envelope),
            Err(BusError::Decode(_))
        ));
    }

    #[test]
    fn test_decode_unknown_type_is_other() {
        let envelope = event_envelope("furnace.upgraded", json!({"islandId": "ISL7", "level": 3}));

        let event = IslandEvent::decode("furnace.upgraded", &envelope).unwrap();
        assert_eq!(event.event_type(), "furnace.upgraded");
        assert_eq!(event.island_id(), Some("ISL7"));
        assert_eq!(event.category(), EventCategory::Other);
    }
}
