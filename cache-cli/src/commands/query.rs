//! Read-only queries against the store.

use anyhow::{Context, Result};
use roomcache_state::Config;
use roomcache_types::{RoomId, UserId};

use super::{open, print_json};

/// Print the stored sync cursor, or `null` before the first sync.
pub fn cursor(config: &Config) -> Result<()> {
    let cursor = open(config)?.next_cursor()?;
    print_json(&cursor)
}

/// Print the ids of all rooms with stored state.
pub fn rooms(config: &Config) -> Result<()> {
    let rooms = open(config)?.rooms()?;
    print_json(&rooms)
}

/// Print one state event.
pub fn state(config: &Config, room: &str, event_type: &str, state_key: &str) -> Result<()> {
    let room = RoomId::from(room);
    let event = open(config)?
        .room_state(&room, event_type, state_key)
        .with_context(|| format!("No {} state with key {:?} in {}", event_type, state_key, room))?;
    print_json(&event)
}

/// Print every state event of `event_type`, keyed by state key.
pub fn states(config: &Config, room: &str, event_type: &str) -> Result<()> {
    let room = RoomId::from(room);
    let events = open(config)?.room_states(&room, event_type)?;
    print_json(&events)
}

/// Print the cached timeline, oldest first.
pub fn timeline(config: &Config, room: &str) -> Result<()> {
    let events = open(config)?.room_timeline(&RoomId::from(room))?;
    print_json(&events)
}

/// Print a user account-data event.
pub fn user_event(config: &Config, event_type: &str) -> Result<()> {
    let event = open(config)?
        .user_event(event_type)
        .with_context(|| format!("No {} user event", event_type))?;
    print_json(&event)
}

/// Print the local user id, or store `set` as the new one.
pub fn whoami(config: &Config, set: Option<&str>) -> Result<()> {
    let manager = open(config)?;
    match set {
        Some(user) => {
            manager.set_whoami(&UserId::from(user))?;
            tracing::info!("Local user set to {}", user);
            Ok(())
        }
        None => print_json(&manager.whoami()?),
    }
}
