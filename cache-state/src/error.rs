//! Error types for roomcache-state.

use roomcache_store::StoreError;

/// State manager errors.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// The requested room, event or value is not cached.
    #[error("not found: {0}")]
    NotFound(String),

    /// A cached value exists but could not be decoded.
    #[error("decode failed: {0}")]
    Decode(#[source] StoreError),

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[source] StoreError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

impl StateError {
    /// True for [`StateError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<StoreError> for StateError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => Self::NotFound(what),
            e @ StoreError::Decode(_) => Self::Decode(e),
            e => Self::Store(e),
        }
    }
}

/// Result type alias for state operations.
pub type Result<T> = std::result::Result<T, StateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_keep_their_kind() {
        let nf: StateError = StoreError::NotFound("roomcache/next_batch".into()).into();
        assert!(nf.is_not_found());

        let decode: StateError = StoreError::Decode("bad".into()).into();
        assert!(matches!(decode, StateError::Decode(_)));

        let other: StateError = StoreError::ReadOnly.into();
        assert!(matches!(other, StateError::Store(StoreError::ReadOnly)));
    }
}
