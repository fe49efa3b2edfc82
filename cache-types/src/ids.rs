//! Identity and ordering types for roomcache.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create an identifier from any string.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Borrow the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume the identifier, returning the inner string.
            pub fn into_string(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                self.0.as_bytes()
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// Identifier of a room, e.g. `!abc:example.org`.
    RoomId
);

string_id!(
    /// Identifier of a user, e.g. `@alice:example.org`.
    UserId
);

string_id!(
    /// Identifier of an event, e.g. `$xyz`.
    EventId
);

/// An opaque resumption token for incremental sync (`next_batch`).
///
/// Unlike a counter, the server-issued token has no ordering; it is only
/// ever replaced by the token of the next successfully applied batch.
#[derive(Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(String);

impl Cursor {
    /// Wrap a server-issued token.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The raw token.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when the token is empty (no position yet).
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cursor({})", self.0)
    }
}

impl From<&str> for Cursor {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_id_display_and_debug() {
        let id = RoomId::new("!room:example.org");
        assert_eq!(id.to_string(), "!room:example.org");
        assert_eq!(format!("{:?}", id), "RoomId(!room:example.org)");
    }

    #[test]
    fn ids_serialize_as_plain_strings() {
        let id = UserId::from("@alice:example.org");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"@alice:example.org\"");

        let back: UserId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn ids_order_by_string() {
        let a = EventId::from("$a");
        let b = EventId::from("$b");
        assert!(a < b);
    }

    #[test]
    fn cursor_default_is_empty() {
        assert!(Cursor::default().is_empty());
        assert!(!Cursor::new("s72594_4483_1934").is_empty());
    }

    #[test]
    fn room_id_borrows_as_str_for_map_lookup() {
        let mut map = std::collections::BTreeMap::new();
        map.insert(RoomId::from("!r:x"), 1);
        assert_eq!(map.get("!r:x"), Some(&1));
    }
}
