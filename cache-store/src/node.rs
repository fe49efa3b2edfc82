//! Nodes: a bucket path bound to an engine and, optionally, to an open
//! transaction.
//!
//! A node without a transaction opens one per operation and closes it before
//! returning. Inside [`Node::tx_update`] or [`Node::tx_view`] the node (and
//! every node derived from it) shares one transaction, so several operations
//! commit or roll back together.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::ops::ControlFlow;

use crate::engine::{Bucket, Engine, Entry, Transaction};
use crate::error::{Result, StoreError};
use crate::key;
use crate::path::Path;

/// A handle to one bucket.
#[derive(Clone)]
pub struct Node<'tx> {
    engine: Engine,
    path: Path,
    tx: Option<&'tx Transaction>,
}

impl Node<'static> {
    /// A node at `path` with no open transaction.
    pub fn new(engine: Engine, path: Path) -> Self {
        Self {
            engine,
            path,
            tx: None,
        }
    }
}

impl<'tx> Node<'tx> {
    /// The node's path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The engine behind this node.
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// True if the node is bound to an open transaction.
    pub fn in_transaction(&self) -> bool {
        self.tx.is_some()
    }

    /// The same node bound to `tx`.
    pub fn with_tx<'a>(&self, tx: &'a Transaction) -> Node<'a> {
        Node {
            engine: self.engine.clone(),
            path: self.path.clone(),
            tx: Some(tx),
        }
    }

    /// A node at another path, sharing this node's transaction.
    ///
    /// The bucket is not resolved until the first operation.
    pub fn from_path(&self, path: Path) -> Node<'tx> {
        Node {
            engine: self.engine.clone(),
            path,
            tx: self.tx,
        }
    }

    /// A node at this path extended by `segments`, sharing the transaction.
    pub fn child<I, S>(&self, segments: I) -> Node<'tx>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<[u8]>,
    {
        self.from_path(self.path.tail(segments))
    }

    /// Run `f` with a node bound to a write transaction.
    ///
    /// Reuses the current transaction if there is one. Otherwise a new one
    /// is opened, committed if `f` succeeds and rolled back if it fails; the
    /// error from `f` is returned unchanged.
    pub fn tx_update<T>(&self, f: impl FnOnce(&Node<'_>) -> Result<T>) -> Result<T> {
        self.update_tx(|tx| f(&self.with_tx(tx)))
    }

    /// Run `f` with a node bound to a read transaction (or the current one).
    pub fn tx_view<T>(&self, f: impl FnOnce(&Node<'_>) -> Result<T>) -> Result<T> {
        self.view_tx(|tx| f(&self.with_tx(tx)))
    }

    fn update_tx<T>(&self, f: impl FnOnce(&Transaction) -> Result<T>) -> Result<T> {
        match self.tx {
            Some(tx) if tx.writable() => f(tx),
            Some(_) => Err(StoreError::ReadOnly),
            None => self.engine.update(f),
        }
    }

    fn view_tx<T>(&self, f: impl FnOnce(&Transaction) -> Result<T>) -> Result<T> {
        match self.tx {
            Some(tx) => f(tx),
            None => self.engine.view(f),
        }
    }

    fn view_bucket<T>(&self, f: impl FnOnce(&Bucket<'_>) -> Result<T>) -> Result<T> {
        self.view_tx(|tx| f(&tx.bucket(&self.path)?))
    }

    fn update_bucket<T>(&self, f: impl FnOnce(&Bucket<'_>) -> Result<T>) -> Result<T> {
        self.update_tx(|tx| f(&tx.create_bucket_if_missing(&self.path)?))
    }

    fn not_found(&self, key: &[u8]) -> StoreError {
        StoreError::NotFound(format!("{}/{}", self.path, String::from_utf8_lossy(key)))
    }

    /// Raw bytes stored under `key`.
    pub fn get(&self, key: impl AsRef<[u8]>) -> Result<Vec<u8>> {
        let key = key.as_ref();
        self.view_bucket(|b| b.get(&key::encode(key))?.ok_or_else(|| self.not_found(key)))
    }

    /// Value under `key` passed through `decode`.
    pub fn get_with<T>(
        &self,
        key: impl AsRef<[u8]>,
        decode: impl FnOnce(&[u8]) -> Result<T>,
    ) -> Result<T> {
        let bytes = self.get(key)?;
        decode(&bytes)
    }

    /// Value under `key` decoded with the engine's codec.
    pub fn get_any<T: DeserializeOwned>(&self, key: impl AsRef<[u8]>) -> Result<T> {
        let codec = self.engine.codec();
        self.get_with(key, |bytes| codec.decode(bytes))
    }

    /// Store raw bytes under `key`, creating the bucket if needed.
    pub fn set(&self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Result<()> {
        let key = key::encode(key.as_ref());
        self.update_bucket(|b| b.put(&key, value.as_ref()))
    }

    /// Store `value` encoded with the engine's codec.
    pub fn set_any<T: Serialize + ?Sized>(&self, key: impl AsRef<[u8]>, value: &T) -> Result<()> {
        let bytes = self.engine.codec().encode(value)?;
        self.set(key, bytes)
    }

    /// Store raw bytes only if nothing is stored under `key` yet.
    ///
    /// Returns `true` if the value was written.
    pub fn set_if_none(&self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Result<bool> {
        let key = key::encode(key.as_ref());
        self.update_bucket(|b| {
            if b.get(&key)?.is_some() {
                return Ok(false);
            }
            b.put(&key, value.as_ref())?;
            Ok(true)
        })
    }

    /// Remove `key`. Missing keys and missing buckets are not errors.
    pub fn delete(&self, key: impl AsRef<[u8]>) -> Result<()> {
        let key = key::encode(key.as_ref());
        self.update_tx(|tx| match tx.bucket(&self.path) {
            Ok(b) => b.delete(&key),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        })
    }

    /// True if a value is stored under `key`.
    pub fn exists(&self, key: impl AsRef<[u8]>) -> Result<bool> {
        let key = key::encode(key.as_ref());
        match self.view_bucket(|b| b.get(&key)) {
            Ok(value) => Ok(value.is_some()),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Visit every value of the bucket in key order (or reverse order).
    ///
    /// `f` receives the decoded key, the raw value and the number of values
    /// visited so far (starting at 1). Nested buckets are skipped. Returning
    /// `ControlFlow::Break(())` stops the walk without an error. Returns the
    /// number of values visited.
    pub fn each<F>(&self, reverse: bool, mut f: F) -> Result<usize>
    where
        F: FnMut(&[u8], &[u8], usize) -> Result<ControlFlow<()>>,
    {
        self.view_bucket(|b| {
            let cursor = b.cursor()?;
            let entries: Box<dyn Iterator<Item = Entry>> = if reverse {
                Box::new(cursor.rev())
            } else {
                Box::new(cursor)
            };

            let mut count = 0;
            for entry in entries {
                let Some(value) = entry.value else {
                    continue;
                };
                count += 1;
                if f(key::decode(&entry.key), &value, count)?.is_break() {
                    break;
                }
            }
            Ok(count)
        })
    }

    /// Keep the last `n` values (in key order) and delete everything else,
    /// nested buckets included. A missing bucket is left missing.
    ///
    /// Returns the number of removed entries.
    pub fn drop_except_last(&self, n: usize) -> Result<usize> {
        self.update_tx(|tx| {
            let b = match tx.bucket(&self.path) {
                Ok(b) => b,
                Err(e) if e.is_not_found() => return Ok(0),
                Err(e) => return Err(e),
            };

            let mut kept = 0;
            let mut removed = 0;
            for entry in b.cursor()?.rev() {
                match entry.value {
                    Some(_) if kept < n => kept += 1,
                    Some(_) => {
                        b.delete(&entry.key)?;
                        removed += 1;
                    }
                    None => {
                        b.delete_bucket(&entry.key)?;
                        removed += 1;
                    }
                }
            }
            if removed > 0 {
                tracing::debug!("Trimmed {} entries from {}", removed, self.path);
            }
            Ok(removed)
        })
    }

    /// Delete this node's bucket and everything below it. Idempotent.
    pub fn drop_bucket(&self) -> Result<()> {
        self.update_tx(|tx| match tx.delete_bucket(&self.path) {
            Err(e) if e.is_not_found() => Ok(()),
            other => other,
        })
    }

    /// Names of the nested buckets, in order.
    pub fn children(&self) -> Result<Vec<Vec<u8>>> {
        self.view_bucket(|b| {
            Ok(b.cursor()?
                .filter(|e| e.is_bucket())
                .map(|e| e.key)
                .collect())
        })
    }

    /// Number of values (nested buckets not counted).
    pub fn len(&self) -> Result<usize> {
        self.view_bucket(|b| Ok(b.cursor()?.filter(|e| !e.is_bucket()).count()))
    }

    /// True if the bucket holds no values.
    pub fn is_empty(&self) -> Result<bool> {
        self.len().map(|n| n == 0)
    }
}

impl std::fmt::Debug for Node<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("path", &self.path)
            .field("in_transaction", &self.tx.is_some())
            .finish()
    }
}
