//! Error types for the store.

/// Storage layer errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A key or bucket does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// An engine error hit while walking a bucket path.
    ///
    /// Distinct from [`StoreError::NotFound`]: the path may exist but could
    /// not be read.
    #[error("bucket traversal failed at {path}: {source}")]
    BucketTraversal {
        /// The path (up to the failing segment).
        path: String,
        /// The underlying engine error.
        #[source]
        source: Box<StoreError>,
    },

    /// A write was attempted through a read-only transaction.
    #[error("transaction is read-only")]
    ReadOnly,

    /// A key is already used by a value where a bucket was expected, or the reverse.
    #[error("incompatible value at {0}")]
    IncompatibleValue(String),

    /// A value could not be encoded.
    #[error("encode failed: {0}")]
    Encode(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// A stored value could not be decoded.
    #[error("decode failed: {0}")]
    Decode(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Database open error.
    #[error("database error: {0}")]
    Database(#[from] redb::DatabaseError),

    /// Transaction begin error.
    #[error("transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    /// Table open error.
    #[error("table error: {0}")]
    Table(#[from] redb::TableError),

    /// Storage I/O or corruption error.
    #[error("storage error: {0}")]
    Storage(#[from] redb::StorageError),

    /// Commit error.
    #[error("commit error: {0}")]
    Commit(#[from] redb::CommitError),
}

impl StoreError {
    /// True for [`StoreError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// True for [`StoreError::Decode`].
    pub fn is_decode(&self) -> bool {
        matches!(self, Self::Decode(_))
    }
}

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_is_distinct_from_decode() {
        let nf = StoreError::NotFound("user/m.direct".into());
        assert!(nf.is_not_found());
        assert!(!nf.is_decode());
        assert_eq!(nf.to_string(), "not found: user/m.direct");
    }

    #[test]
    fn traversal_wraps_source() {
        let err = StoreError::BucketTraversal {
            path: "roomcache/rooms".into(),
            source: Box::new(StoreError::ReadOnly),
        };
        assert!(!err.is_not_found());
        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(source.to_string(), "transaction is read-only");
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<StoreError>();
    }
}
