//! The incremental sync payload.
//!
//! Mirrors the shape of a sync response: per-membership room sections, each
//! with separated state, timeline, ephemeral and account-data lists, plus
//! user-scoped lists and the `next_batch` cursor. Events stay raw.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{Cursor, RawEvent, RoomId, TypesError, UserId};

/// One sync delta.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncResponse {
    /// Cursor to resume from after this batch.
    pub next_batch: Cursor,
    /// Room updates by membership.
    #[serde(default)]
    pub rooms: Rooms,
    /// Presence updates of other users.
    #[serde(default)]
    pub presence: EventList,
    /// Global account data.
    #[serde(default)]
    pub account_data: EventList,
    /// Send-to-device messages.
    #[serde(default)]
    pub to_device: EventList,
}

impl SyncResponse {
    /// Decode a payload from JSON bytes.
    pub fn from_json(bytes: &[u8]) -> Result<Self, TypesError> {
        serde_json::from_slice(bytes).map_err(TypesError::InvalidPayload)
    }

    /// Total number of raw events carried by this batch.
    pub fn event_count(&self) -> usize {
        let user = self.presence.len() + self.account_data.len() + self.to_device.len();
        let joined: usize = self
            .rooms
            .join
            .values()
            .map(|r| r.state.len() + r.timeline.len() + r.ephemeral.len() + r.account_data.len())
            .sum();
        let invited: usize = self.rooms.invite.values().map(|r| r.invite_state.len()).sum();
        let left: usize = self
            .rooms
            .leave
            .values()
            .map(|r| r.state.len() + r.timeline.len() + r.account_data.len())
            .sum();
        user + joined + invited + left
    }
}

/// Room sections of a sync response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Rooms {
    /// Rooms the user is joined to.
    #[serde(default)]
    pub join: BTreeMap<RoomId, JoinedRoom>,
    /// Rooms the user is invited to.
    #[serde(default)]
    pub invite: BTreeMap<RoomId, InvitedRoom>,
    /// Rooms the user has left or been removed from.
    #[serde(default)]
    pub leave: BTreeMap<RoomId, LeftRoom>,
}

/// A list of raw events.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventList {
    /// The events, in server order.
    #[serde(default)]
    pub events: Vec<RawEvent>,
}

impl EventList {
    /// Number of events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// True if there are no events.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl From<Vec<RawEvent>> for EventList {
    fn from(events: Vec<RawEvent>) -> Self {
        Self { events }
    }
}

/// Timeline slice of a room.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Timeline {
    /// Events, oldest first.
    #[serde(default)]
    pub events: Vec<RawEvent>,
    /// True if the server skipped events between the previous batch and these.
    #[serde(default)]
    pub limited: bool,
    /// Token to paginate backwards from the start of this slice.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_batch: Option<String>,
}

impl Timeline {
    /// Number of events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// True if there are no events.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Summary counters and heroes of a room.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomSummary {
    /// Users used to name the room when it has no name.
    #[serde(rename = "m.heroes", default, skip_serializing_if = "Vec::is_empty")]
    pub heroes: Vec<UserId>,
    /// Number of joined members.
    #[serde(
        rename = "m.joined_member_count",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub joined_member_count: Option<u64>,
    /// Number of invited members.
    #[serde(
        rename = "m.invited_member_count",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub invited_member_count: Option<u64>,
}

impl RoomSummary {
    /// True if no field is set (the server sends `{}` when nothing changed).
    pub fn is_empty(&self) -> bool {
        self.heroes.is_empty()
            && self.joined_member_count.is_none()
            && self.invited_member_count.is_none()
    }
}

/// Updates for a joined room.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JoinedRoom {
    /// Summary changes.
    #[serde(default)]
    pub summary: RoomSummary,
    /// State between the previous batch and the start of the timeline.
    #[serde(default)]
    pub state: EventList,
    /// New timeline events.
    #[serde(default)]
    pub timeline: Timeline,
    /// Ephemeral events (typing, receipts).
    #[serde(default)]
    pub ephemeral: EventList,
    /// Per-room account data.
    #[serde(default)]
    pub account_data: EventList,
}

/// Updates for an invited room.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InvitedRoom {
    /// Stripped state shown to invitees.
    #[serde(default)]
    pub invite_state: EventList,
}

/// Updates for a left room.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LeftRoom {
    /// Final state.
    #[serde(default)]
    pub state: EventList,
    /// Timeline up to the point of leaving.
    #[serde(default)]
    pub timeline: Timeline,
    /// Per-room account data.
    #[serde(default)]
    pub account_data: EventList,
}
