//! # roomcache-types
//!
//! Shared types for the roomcache sync state cache.
//!
//! This crate provides the foundational types used across all roomcache crates:
//! - [`RoomId`], [`UserId`], [`EventId`], [`Cursor`] - Identity and ordering types
//! - [`RawEvent`], [`Event`], [`ErroneousEvent`], [`ParsedEvent`] - Events
//! - [`SyncResponse`] - The incremental sync payload
//! - [`parse`] - Raw bytes to event, never failing outright

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod event;
mod ids;
mod sync;

pub use error::TypesError;
pub use event::{parse, ErroneousEvent, Event, ParsedEvent, RawEvent, ROOM_SYNCED};
pub use ids::{Cursor, EventId, RoomId, UserId};
pub use sync::{
    EventList, InvitedRoom, JoinedRoom, LeftRoom, RoomSummary, Rooms, SyncResponse, Timeline,
};
