//! Subscription shapes: what a subscriber listens to and how it is called.

use roomcache_types::{Event, RoomId, SyncResponse, ROOM_SYNCED};
use std::fmt;
use std::sync::Arc;

/// Callback for whole sync payloads.
pub type SyncFn = Arc<dyn Fn(&SyncResponse) + Send + Sync>;
/// Callback for an event without room context.
pub type EventFn = Arc<dyn Fn(&Event) + Send + Sync>;
/// Callback for an event within a room.
pub type RoomEventFn = Arc<dyn Fn(&RoomId, &Event) + Send + Sync>;
/// Callback for a per-room signal.
pub type SignalFn = Arc<dyn Fn(&RoomId) + Send + Sync>;

/// A subscriber callback.
///
/// Each shape only ever receives what it can accept: a [`Handler::Signal`]
/// only sees the room-synced marker, a [`Handler::StateEvent`] only state
/// events, and room-aware shapes are never offered user-scoped events.
#[derive(Clone)]
pub enum Handler {
    /// Receives the raw sync payload, once per batch.
    Sync(SyncFn),
    /// Receives matching events.
    Event(EventFn),
    /// Receives matching events with their room.
    RoomEvent(RoomEventFn),
    /// Receives matching state events, optionally only those with one state key.
    StateEvent {
        /// Required state key; `None` accepts every state key.
        state_key: Option<String>,
        /// The callback.
        f: RoomEventFn,
    },
    /// Receives the room-synced marker.
    Signal(SignalFn),
}

impl Handler {
    /// True if this handler takes `event` (seen in `room`, if any).
    pub(crate) fn accepts(&self, room: Option<&RoomId>, event: &Event) -> bool {
        match (self, room) {
            (Handler::Sync(_), _) => false,
            (Handler::Event(_), _) => true,
            (Handler::RoomEvent(_), Some(_)) => true,
            (Handler::StateEvent { state_key, .. }, Some(_)) => match (state_key, &event.state_key) {
                (_, None) => false,
                (None, Some(_)) => true,
                (Some(want), Some(got)) => want == got,
            },
            (Handler::Signal(_), Some(_)) => event.event_type == ROOM_SYNCED,
            (Handler::RoomEvent(_) | Handler::StateEvent { .. } | Handler::Signal(_), None) => {
                false
            }
        }
    }

    /// Call the handler if it takes `event`. Returns `true` if it was called.
    pub(crate) fn offer(&self, room: Option<&RoomId>, event: &Event) -> bool {
        if !self.accepts(room, event) {
            return false;
        }
        match (self, room) {
            (Handler::Event(f), _) => f(event),
            (Handler::RoomEvent(f), Some(room)) | (Handler::StateEvent { f, .. }, Some(room)) => {
                f(room, event)
            }
            (Handler::Signal(f), Some(room)) => f(room),
            _ => return false,
        }
        true
    }

    fn shape(&self) -> &'static str {
        match self {
            Handler::Sync(_) => "sync",
            Handler::Event(_) => "event",
            Handler::RoomEvent(_) => "room-event",
            Handler::StateEvent { .. } => "state-event",
            Handler::Signal(_) => "signal",
        }
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handler::{}", self.shape())
    }
}

/// Where a subscription listens.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    /// Whole sync payloads.
    Sync,
    /// User-scoped events (account data, presence, to-device).
    User,
    /// Room state, ephemeral and account-data events; `None` means every room.
    Room(Option<RoomId>),
    /// Timeline events; `None` means every room.
    Timeline(Option<RoomId>),
}

impl Scope {
    /// The same scope widened to every room.
    pub(crate) fn any_room(&self) -> Option<Scope> {
        match self {
            Scope::Room(Some(_)) => Some(Scope::Room(None)),
            Scope::Timeline(Some(_)) => Some(Scope::Timeline(None)),
            _ => None,
        }
    }

    /// True if `handler` can ever be called in this scope.
    pub(crate) fn admits(&self, handler: &Handler) -> bool {
        matches!(
            (self, handler),
            (Scope::Sync, Handler::Sync(_))
                | (Scope::User, Handler::Event(_))
                | (
                    Scope::Room(_),
                    Handler::RoomEvent(_) | Handler::StateEvent { .. } | Handler::Signal(_)
                )
                | (Scope::Timeline(_), Handler::RoomEvent(_) | Handler::StateEvent { .. })
        )
    }
}

/// Event types a subscription accepts.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeFilter {
    /// Every type (written `*`).
    Any,
    /// One type.
    Type(String),
}

impl TypeFilter {
    /// True if `event_type` passes the filter.
    pub fn matches(&self, event_type: &str) -> bool {
        match self {
            TypeFilter::Any => true,
            TypeFilter::Type(t) => t == event_type,
        }
    }
}

impl From<&str> for TypeFilter {
    fn from(s: &str) -> Self {
        if s == "*" {
            TypeFilter::Any
        } else {
            TypeFilter::Type(s.to_string())
        }
    }
}

impl From<String> for TypeFilter {
    fn from(s: String) -> Self {
        if s == "*" {
            TypeFilter::Any
        } else {
            TypeFilter::Type(s)
        }
    }
}

/// Subscription options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Options {
    /// Call at most once per batch, with the newest matching event.
    pub once: bool,
}

impl Options {
    /// Options with `once` set.
    pub fn once() -> Self {
        Self { once: true }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn recorder() -> (Arc<Mutex<Vec<String>>>, RoomEventFn) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        let f: RoomEventFn = Arc::new(move |room: &RoomId, ev: &Event| {
            sink.lock().unwrap().push(format!("{} {}", room, ev.event_type));
        });
        (log, f)
    }

    fn state_event(event_type: &str, state_key: &str) -> Event {
        Event {
            state_key: Some(state_key.to_string()),
            ..Event::new(event_type)
        }
    }

    #[test]
    fn wildcard_filter() {
        assert_eq!(TypeFilter::from("*"), TypeFilter::Any);
        assert!(TypeFilter::Any.matches("m.room.name"));
        assert!(TypeFilter::from("m.room.name").matches("m.room.name"));
        assert!(!TypeFilter::from("m.room.name").matches("m.room.topic"));
    }

    #[test]
    fn state_handler_filters_by_key() {
        let (log, f) = recorder();
        let handler = Handler::StateEvent {
            state_key: Some("@alice:x".into()),
            f,
        };
        let room = RoomId::from("!r:x");

        assert!(handler.offer(Some(&room), &state_event("m.room.member", "@alice:x")));
        assert!(!handler.offer(Some(&room), &state_event("m.room.member", "@bob:x")));
        assert!(!handler.offer(Some(&room), &Event::new("m.room.message")));
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[test]
    fn signal_only_sees_marker() {
        let hits = Arc::new(Mutex::new(0));
        let sink = hits.clone();
        let handler = Handler::Signal(Arc::new(move |_: &RoomId| *sink.lock().unwrap() += 1));
        let room = RoomId::from("!r:x");

        assert!(!handler.offer(Some(&room), &Event::new("m.room.name")));
        assert!(handler.offer(Some(&room), &Event::room_synced(&room)));
        assert_eq!(*hits.lock().unwrap(), 1);
    }

    #[test]
    fn room_shapes_need_a_room() {
        let (log, f) = recorder();
        let handler = Handler::RoomEvent(f);
        assert!(!handler.offer(None, &Event::new("m.direct")));
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn scope_widening() {
        let room = RoomId::from("!r:x");
        assert_eq!(Scope::Room(Some(room.clone())).any_room(), Some(Scope::Room(None)));
        assert_eq!(Scope::Timeline(Some(room)).any_room(), Some(Scope::Timeline(None)));
        assert_eq!(Scope::Room(None).any_room(), None);
        assert_eq!(Scope::User.any_room(), None);
    }

    #[test]
    fn scope_admits_matching_shapes_only() {
        let (_, f) = recorder();
        let room_event = Handler::RoomEvent(f.clone());
        let state_event = Handler::StateEvent { state_key: None, f };
        let signal = Handler::Signal(Arc::new(|_: &RoomId| {}));
        let event = Handler::Event(Arc::new(|_: &Event| {}));
        let sync = Handler::Sync(Arc::new(|_: &SyncResponse| {}));

        assert!(Scope::Sync.admits(&sync));
        assert!(Scope::User.admits(&event));
        assert!(Scope::Room(None).admits(&room_event));
        assert!(Scope::Room(None).admits(&state_event));
        assert!(Scope::Room(None).admits(&signal));
        assert!(Scope::Timeline(None).admits(&room_event));

        assert!(!Scope::User.admits(&room_event));
        assert!(!Scope::Timeline(None).admits(&signal));
        assert!(!Scope::Room(None).admits(&sync));
        assert!(!Scope::Sync.admits(&event));
    }
}
