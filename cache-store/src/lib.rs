//! # roomcache-store
//!
//! Hierarchical transactional key-value storage for roomcache.
//!
//! Data lives in nested buckets addressed by a [`Path`]. A [`Node`] binds a
//! path to the [`Engine`] and optionally to an open [`Transaction`], and is
//! the unit of every get/set/iterate operation.
//!
//! ## Guarantees
//!
//! - One writable transaction at a time; readers see the last committed
//!   snapshot and never block the writer
//! - Buckets are created only by writes; reads of a missing bucket or key
//!   fail with [`StoreError::NotFound`]
//! - Keys are remapped so the empty key and all-NUL keys stay distinct
//!
//! ## Example
//!
//! ```ignore
//! use roomcache_store::{Engine, Node, Path};
//!
//! let engine = Engine::open("roomcache.redb")?;
//! let root = Node::new(engine, Path::new(["roomcache"]));
//!
//! root.tx_update(|n| {
//!     n.child(["rooms", "!a:x", "state", "m.room.name"]).set("", br#"{"name":"Alpha"}"#)?;
//!     n.set("next_batch", "s1")
//! })?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod engine;
pub mod error;
pub mod key;
pub mod node;
pub mod path;

pub use codec::Codec;
pub use engine::{Bucket, Cursor, Engine, Entry, Transaction};
pub use error::{Result, StoreError};
pub use node::Node;
pub use path::Path;
