//! # roomcache-state
//!
//! Persistent sync state for chat clients.
//!
//! The [`StateManager`] absorbs incremental sync payloads, merges them into
//! per-room and per-user state in the store, keeps a bounded recent timeline
//! per room, and hands every committed batch to the event registry.
//!
//! ## Features
//!
//! - **One transaction per batch**: a payload is stored completely or not at all
//! - **Bounded timelines**: each room keeps its latest `timeline_limit` events
//! - **Commit, then dispatch**: subscribers only ever see committed batches
//! - **Sync waiters**: `wait_next_sync()` futures, cancel by dropping
//!
//! ## Example
//!
//! ```ignore
//! use roomcache_state::{Config, StateManager};
//! use roomcache_types::SyncResponse;
//!
//! let config = Config::default();
//! let manager = StateManager::open(&config.store)?;
//!
//! let sync = SyncResponse::from_json(&bytes)?;
//! manager.apply_sync(&sync)?;
//!
//! let name = manager.room_state(&room, "m.room.name", "")?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod batch;
pub mod config;
pub mod error;
pub mod layout;
pub mod state;
pub mod waiter;

pub use config::{Config, ConfigError, LogConfig, StoreConfig};
pub use error::{Result, StateError};
pub use state::{ApplyReport, StateManager};
pub use waiter::{SyncWaiters, Waiter};
