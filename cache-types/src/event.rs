//! Events: raw bytes as received, and their parsed forms.
//!
//! The cache stores [`RawEvent`] bytes exactly as the server sent them and
//! parses them on the way out. Parsing never fails outright: a malformed
//! event becomes an [`ErroneousEvent`] so one bad entry cannot stall a batch.

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use std::fmt;
use std::sync::Arc;

use crate::{EventId, RoomId, TypesError, UserId};

/// Type of the synthetic marker dispatched after all events of a room in a batch.
///
/// The marker carries no content; subscribers use it as a "room synced" signal.
pub const ROOM_SYNCED: &str = "roomcache.room_synced";

/// An unparsed event, kept as the exact JSON text received.
#[derive(Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawEvent(Box<RawValue>);

impl RawEvent {
    /// Build a raw event from any serializable value.
    pub fn from_json<T: Serialize>(value: &T) -> Result<Self, TypesError> {
        serde_json::value::to_raw_value(value)
            .map(Self)
            .map_err(TypesError::Serialization)
    }

    /// Wrap stored bytes. Fails if the bytes are not a JSON value.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TypesError> {
        serde_json::from_slice::<Box<RawValue>>(bytes)
            .map(Self)
            .map_err(TypesError::InvalidPayload)
    }

    /// The JSON text.
    pub fn as_str(&self) -> &str {
        self.0.get()
    }

    /// The JSON text as bytes, as written to the store.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.get().as_bytes()
    }

    /// Parse this event. See [`parse`].
    pub fn parse(&self, room_id: Option<&RoomId>) -> ParsedEvent {
        parse(self.as_bytes(), room_id)
    }
}

impl fmt::Debug for RawEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RawEvent({} bytes)", self.0.get().len())
    }
}

/// A successfully parsed event.
///
/// Only the envelope fields are typed; `content` stays as JSON because its
/// schema depends on `event_type`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event type, e.g. `m.room.message`.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Type-specific content.
    #[serde(default)]
    pub content: serde_json::Value,
    /// Event identifier (absent for ephemeral and account-data events).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<EventId>,
    /// Sender of the event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<UserId>,
    /// Room the event belongs to. Filled from context when the payload omits it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<RoomId>,
    /// Origin server timestamp in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_server_ts: Option<i64>,
    /// State key; present exactly when this is a state event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_key: Option<String>,
    /// Unsigned server-side data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unsigned: Option<serde_json::Value>,
}

impl Event {
    /// Create a bare event of the given type.
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            ..Self::default()
        }
    }

    /// The synthetic "room synced" marker for a room.
    pub fn room_synced(room_id: &RoomId) -> Self {
        Self {
            event_type: ROOM_SYNCED.to_string(),
            content: serde_json::Value::Null,
            room_id: Some(room_id.clone()),
            ..Self::default()
        }
    }

    /// True if this event carries a state key.
    pub fn is_state(&self) -> bool {
        self.state_key.is_some()
    }

    /// Position of this event in a timeline, if it has both a timestamp and an id.
    pub fn timeline_position(&self) -> Option<(i64, &EventId)> {
        Some((self.origin_server_ts?, self.event_id.as_ref()?))
    }
}

/// An event whose bytes could not be parsed.
#[derive(Debug, Clone)]
pub struct ErroneousEvent {
    /// The original bytes.
    pub raw: Vec<u8>,
    /// Best-effort event type salvaged from the bytes.
    pub event_type: Option<String>,
    /// Room the event was received in, if known.
    pub room_id: Option<RoomId>,
    /// The underlying parse error.
    pub error: Arc<serde_json::Error>,
}

impl fmt::Display for ErroneousEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "erroneous event (type {}): {}",
            self.event_type.as_deref().unwrap_or("<unknown>"),
            self.error
        )
    }
}

/// Result of [`parse`]: either an event or a placeholder carrying the failure.
#[derive(Debug, Clone)]
pub enum ParsedEvent {
    /// Parsed successfully.
    Event(Event),
    /// Could not be parsed.
    Erroneous(ErroneousEvent),
}

impl ParsedEvent {
    /// The event type, salvaged for erroneous events.
    pub fn event_type(&self) -> Option<&str> {
        match self {
            Self::Event(ev) => Some(&ev.event_type),
            Self::Erroneous(err) => err.event_type.as_deref(),
        }
    }

    /// The parsed event, if any.
    pub fn ok(self) -> Option<Event> {
        match self {
            Self::Event(ev) => Some(ev),
            Self::Erroneous(_) => None,
        }
    }

    /// Convert into a `Result`.
    pub fn into_result(self) -> Result<Event, ErroneousEvent> {
        match self {
            Self::Event(ev) => Ok(ev),
            Self::Erroneous(err) => Err(err),
        }
    }
}

#[derive(Deserialize)]
struct TypeOnly {
    #[serde(rename = "type")]
    event_type: Option<String>,
}

/// Parse raw event bytes.
///
/// Never fails: bytes that do not decode into an [`Event`] produce
/// [`ParsedEvent::Erroneous`] with the original bytes and, when the bytes are
/// at least a JSON object with a string `type`, that type.
///
/// `room_id` fills in the event's room when the payload omits it (events
/// inside a room's section of a sync response usually do).
pub fn parse(raw: &[u8], room_id: Option<&RoomId>) -> ParsedEvent {
    match serde_json::from_slice::<Event>(raw) {
        Ok(mut event) => {
            if event.room_id.is_none() {
                event.room_id = room_id.cloned();
            }
            ParsedEvent::Event(event)
        }
        Err(error) => ParsedEvent::Erroneous(ErroneousEvent {
            raw: raw.to_vec(),
            event_type: serde_json::from_slice::<TypeOnly>(raw)
                .ok()
                .and_then(|t| t.event_type),
            room_id: room_id.cloned(),
            error: Arc::new(error),
        }),
    }
}
