//! # roomcache-core
//!
//! Pure event dispatch for roomcache (no I/O, instant tests).
//!
//! The [`Registry`] holds subscriptions keyed by scope (sync, user, room,
//! timeline) and event type, and delivers an already committed, already
//! parsed [`Batch`] to them. It never touches the store: the state manager
//! in `roomcache-state` commits first and dispatches after, so a failing or
//! panicking subscriber can never undo a commit.
//!
//! ## Example
//!
//! ```ignore
//! use roomcache_core::{Options, Registry};
//!
//! let registry = Registry::new();
//! let sub = registry.on_room_event(None, "m.room.name", Options::default(), |room, ev| {
//!     println!("{} renamed: {}", room, ev.content["name"]);
//! });
//!
//! // ... later, from anywhere (including the handler itself)
//! sub.unsubscribe();
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod batch;
pub mod handler;
pub mod registry;

pub use batch::{Batch, DispatchReport, Membership, RoomBatch};
pub use handler::{EventFn, Handler, Options, RoomEventFn, Scope, SignalFn, SyncFn, TypeFilter};
pub use registry::{Registry, Subscription, SubscriptionId};
