//! Where things live in the store.
//!
//! ```text
//! roomcache/
//!   next_batch, user_id                  root keys
//!   user/<type>                          user account data
//!   user/m.presence\0<user>              presence per user
//!   rooms/<room>/state/<type>/<key>      room state by state key
//!   rooms/<room>/account_data/<type>     room account data
//!   directs/<room>                       user id of the DM partner
//!   summaries/<room>                     encoded RoomSummary
//!   timelines/<room>/prev_batch          pagination token
//!   timelines/<room>/events/<ts,id>      recent timeline events
//! ```
//!
//! Event values are the raw bytes received; summaries and other typed values
//! go through the engine codec.

use roomcache_store::{key, Node};
use roomcache_types::{Event, RoomId};

/// Name of the root bucket.
pub const ROOT: &str = "roomcache";

pub(crate) const NEXT_BATCH: &str = "next_batch";
pub(crate) const USER_ID: &str = "user_id";
pub(crate) const PREV_BATCH: &str = "prev_batch";

pub(crate) const PRESENCE: &str = "m.presence";
pub(crate) const DIRECT: &str = "m.direct";

const USER: &str = "user";
const ROOMS: &str = "rooms";
const STATE: &str = "state";
const ACCOUNT_DATA: &str = "account_data";
const DIRECTS: &str = "directs";
const SUMMARIES: &str = "summaries";
const TIMELINES: &str = "timelines";
const EVENTS: &str = "events";

pub(crate) fn user<'tx>(root: &Node<'tx>) -> Node<'tx> {
    root.child([USER])
}

pub(crate) fn rooms<'tx>(root: &Node<'tx>) -> Node<'tx> {
    root.child([ROOMS])
}

pub(crate) fn room_states<'tx>(root: &Node<'tx>, room: &RoomId) -> Node<'tx> {
    root.child([ROOMS, room.as_str(), STATE])
}

pub(crate) fn room_state<'tx>(root: &Node<'tx>, room: &RoomId, event_type: &str) -> Node<'tx> {
    root.child([ROOMS, room.as_str(), STATE, event_type])
}

pub(crate) fn room_account_data<'tx>(root: &Node<'tx>, room: &RoomId) -> Node<'tx> {
    root.child([ROOMS, room.as_str(), ACCOUNT_DATA])
}

pub(crate) fn directs<'tx>(root: &Node<'tx>) -> Node<'tx> {
    root.child([DIRECTS])
}

pub(crate) fn summaries<'tx>(root: &Node<'tx>) -> Node<'tx> {
    root.child([SUMMARIES])
}

pub(crate) fn timelines<'tx>(root: &Node<'tx>) -> Node<'tx> {
    root.child([TIMELINES])
}

pub(crate) fn timeline<'tx>(root: &Node<'tx>, room: &RoomId) -> Node<'tx> {
    root.child([TIMELINES, room.as_str()])
}

pub(crate) fn timeline_events<'tx>(root: &Node<'tx>, room: &RoomId) -> Node<'tx> {
    root.child([TIMELINES, room.as_str(), EVENTS])
}

pub(crate) fn presence_key(user: &str) -> Vec<u8> {
    key::composite([PRESENCE, user])
}

/// Timeline key of an event; `None` without both a timestamp and an id.
pub(crate) fn timeline_key(event: &Event) -> Option<Vec<u8>> {
    let (ts, id) = event.timeline_position()?;
    Some(key::timeline(ts, id.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use roomcache_store::{Engine, Path};

    #[test]
    fn paths_nest_under_root() {
        let root = Node::new(Engine::in_memory().unwrap(), Path::new([ROOT]));
        let room = RoomId::from("!a:x");

        assert_eq!(
            room_state(&root, &room, "m.room.name").path().to_string(),
            "roomcache/rooms/!a:x/state/m.room.name"
        );
        assert_eq!(
            timeline_events(&root, &room).path().to_string(),
            "roomcache/timelines/!a:x/events"
        );
        assert!(rooms(&root).path().is_prefix_of(room_states(&root, &room).path()));
    }

    #[test]
    fn timeline_key_needs_position() {
        let mut event = Event::new("m.room.message");
        assert_eq!(timeline_key(&event), None);

        event.origin_server_ts = Some(10);
        event.event_id = Some("$a".into());
        let k = timeline_key(&event).unwrap();
        assert_eq!(key::parse_timeline(&k), Some((10, "$a")));
    }

    #[test]
    fn presence_is_composite() {
        assert_eq!(presence_key("@alice:x"), b"m.presence\0@alice:x".to_vec());
    }
}
