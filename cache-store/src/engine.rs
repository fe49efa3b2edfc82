//! Transactional engine with nested buckets.
//!
//! Backed by a single redb table. redb provides the guarantees: one writable
//! transaction at a time (`begin(true)` blocks until the previous writer
//! commits or rolls back), any number of readers on the last committed
//! snapshot, atomic commit.
//!
//! Buckets are encoded into the flat key space:
//!
//! ```text
//! enc(path)                     bucket marker (exists iff the bucket exists)
//! enc(path) 00 02 <key>         leaf entry <key> of the bucket
//! enc(path) 00 03 <segment>     directory entry for nested bucket <segment>
//! enc(path) <esc(seg)> 00 01    start of the nested bucket's own subtree
//! ```
//!
//! where `enc(path)` escapes NUL as `00 ff` in every segment and terminates
//! each segment with `00 01`. Every bucket's subtree is therefore one
//! contiguous key range, and its leaves and directory entries are two more.

use redb::{Database, ReadableTable, TableDefinition};
use std::fmt;
use std::sync::Arc;

use crate::codec::Codec;
use crate::error::{Result, StoreError};
use crate::path::Path;

const NODES: TableDefinition<&[u8], &[u8]> = TableDefinition::new("nodes");

const SEGMENT_END: [u8; 2] = [0x00, 0x01];
const LEAF_TAG: [u8; 2] = [0x00, 0x02];
const CHILD_TAG: [u8; 2] = [0x00, 0x03];
const CHILD_TAG_END: [u8; 2] = [0x00, 0x04];
const ESCAPED_NUL: [u8; 2] = [0x00, 0xff];
const EMPTY: &[u8] = &[];

fn push_segment(out: &mut Vec<u8>, segment: &[u8]) {
    for &b in segment {
        if b == 0 {
            out.extend_from_slice(&ESCAPED_NUL);
        } else {
            out.push(b);
        }
    }
    out.extend_from_slice(&SEGMENT_END);
}

fn encode_path(path: &Path) -> Vec<u8> {
    let mut out = Vec::new();
    for segment in path.segments() {
        push_segment(&mut out, segment);
    }
    out
}

fn tagged(prefix: &[u8], tag: [u8; 2], rest: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(prefix.len() + 2 + rest.len());
    out.extend_from_slice(prefix);
    out.extend_from_slice(&tag);
    out.extend_from_slice(rest);
    out
}

/// Smallest key greater than every key starting with `prefix`.
fn prefix_end(prefix: &[u8]) -> Vec<u8> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < 0xff {
            end.push(last + 1);
            break;
        }
    }
    end
}

fn get_in<T>(table: &T, key: &[u8]) -> Result<Option<Vec<u8>>>
where
    T: ReadableTable<&'static [u8], &'static [u8]>,
{
    let value = table.get(key)?.map(|v| v.value().to_vec());
    Ok(value)
}

fn range_in<T>(table: &T, lo: &[u8], hi: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>>
where
    T: ReadableTable<&'static [u8], &'static [u8]>,
{
    let mut out = Vec::new();
    for entry in table.range(lo..hi)? {
        let (k, v) = entry?;
        out.push((k.value().to_vec(), v.value().to_vec()));
    }
    Ok(out)
}

fn remove_range(
    table: &mut redb::Table<'_, &'static [u8], &'static [u8]>,
    lo: &[u8],
    hi: &[u8],
) -> Result<usize> {
    let keys: Vec<Vec<u8>> = range_in(&*table, lo, hi)?
        .into_iter()
        .map(|(k, _)| k)
        .collect();
    for key in &keys {
        table.remove(key.as_slice())?;
    }
    Ok(keys.len())
}

/// Handle to the on-disk (or in-memory) database.
///
/// Cheap to clone; all clones share one engine. Only one engine handle per
/// file may exist in a process.
#[derive(Clone)]
pub struct Engine {
    db: Arc<Database>,
    codec: Codec,
}

impl Engine {
    /// Open or create a database file.
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let path = path.as_ref();
        let db = Database::create(path)?;
        tracing::debug!("Opened store at {}", path.display());
        Self::init(db)
    }

    /// Create a database held entirely in memory (for tests and tools).
    pub fn in_memory() -> Result<Self> {
        let db = Database::builder().create_with_backend(redb::backends::InMemoryBackend::new())?;
        Self::init(db)
    }

    fn init(db: Database) -> Result<Self> {
        // Make sure the table exists so read transactions can always open it
        let tx = db.begin_write()?;
        {
            tx.open_table(NODES)?;
        }
        tx.commit()?;

        Ok(Self {
            db: Arc::new(db),
            codec: Codec::default(),
        })
    }

    /// Use `codec` for typed values.
    pub fn with_codec(mut self, codec: Codec) -> Self {
        self.codec = codec;
        self
    }

    /// The codec for typed values.
    pub fn codec(&self) -> Codec {
        self.codec
    }

    /// Begin a transaction.
    ///
    /// A writable transaction blocks until no other writable transaction is
    /// open. Do not call this for writing while the same thread already holds
    /// a writable transaction; it would wait forever.
    pub fn begin(&self, writable: bool) -> Result<Transaction> {
        let inner = if writable {
            Inner::Write(self.db.begin_write()?)
        } else {
            Inner::Read(self.db.begin_read()?)
        };
        Ok(Transaction { inner })
    }

    /// Run `f` in a read transaction.
    pub fn view<T>(&self, f: impl FnOnce(&Transaction) -> Result<T>) -> Result<T> {
        let tx = self.begin(false)?;
        f(&tx)
    }

    /// Run `f` in a write transaction, committing on success.
    ///
    /// On error the transaction is rolled back and the error from `f` is
    /// returned as is.
    pub fn update<T>(&self, f: impl FnOnce(&Transaction) -> Result<T>) -> Result<T> {
        let tx = self.begin(true)?;
        match f(&tx) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback() {
                    tracing::warn!("Rollback after failed update also failed: {}", rollback);
                }
                Err(e)
            }
        }
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("codec", &self.codec)
            .finish_non_exhaustive()
    }
}

enum Inner {
    Read(redb::ReadTransaction),
    Write(redb::WriteTransaction),
}

/// A read or write transaction.
pub struct Transaction {
    inner: Inner,
}

impl Transaction {
    /// True for write transactions.
    pub fn writable(&self) -> bool {
        matches!(self.inner, Inner::Write(_))
    }

    /// Commit. A read transaction is simply closed.
    pub fn commit(self) -> Result<()> {
        match self.inner {
            Inner::Write(tx) => tx.commit()?,
            Inner::Read(tx) => drop(tx),
        }
        Ok(())
    }

    /// Discard all writes made in this transaction.
    pub fn rollback(self) -> Result<()> {
        match self.inner {
            Inner::Write(tx) => tx.abort()?,
            Inner::Read(tx) => drop(tx),
        }
        Ok(())
    }

    fn raw_get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        match &self.inner {
            Inner::Read(tx) => {
                let table = tx.open_table(NODES)?;
                get_in(&table, key)
            }
            Inner::Write(tx) => {
                let table = tx.open_table(NODES)?;
                get_in(&table, key)
            }
        }
    }

    fn raw_range(&self, lo: &[u8], hi: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        match &self.inner {
            Inner::Read(tx) => {
                let table = tx.open_table(NODES)?;
                range_in(&table, lo, hi)
            }
            Inner::Write(tx) => {
                let table = tx.open_table(NODES)?;
                range_in(&table, lo, hi)
            }
        }
    }

    fn with_table<R>(
        &self,
        f: impl FnOnce(&mut redb::Table<'_, &'static [u8], &'static [u8]>) -> Result<R>,
    ) -> Result<R> {
        match &self.inner {
            Inner::Write(tx) => {
                let mut table = tx.open_table(NODES)?;
                f(&mut table)
            }
            Inner::Read(_) => Err(StoreError::ReadOnly),
        }
    }

    /// Open an existing bucket.
    ///
    /// Fails with [`StoreError::NotFound`] if any segment is missing and
    /// with [`StoreError::BucketTraversal`] if the engine fails on the way.
    pub fn bucket(&self, path: &Path) -> Result<Bucket<'_>> {
        if path.is_empty() {
            return Err(StoreError::NotFound("bucket <empty path>".into()));
        }
        let mut prefix = Vec::new();
        for (depth, segment) in path.segments().iter().enumerate() {
            push_segment(&mut prefix, segment);
            let marker = self
                .raw_get(&prefix)
                .map_err(|e| StoreError::BucketTraversal {
                    path: path.prefix(depth + 1).to_string(),
                    source: Box::new(e),
                })?;
            if marker.is_none() {
                return Err(StoreError::NotFound(format!(
                    "bucket {}",
                    path.prefix(depth + 1)
                )));
            }
        }
        Ok(Bucket {
            tx: self,
            path: path.clone(),
            prefix,
        })
    }

    /// Open a bucket, creating it and any missing parents.
    pub fn create_bucket_if_missing(&self, path: &Path) -> Result<Bucket<'_>> {
        if path.is_empty() {
            return Err(StoreError::IncompatibleValue("<empty path>".into()));
        }
        let prefix = self.with_table(|table| {
            let mut prefix = Vec::new();
            for (depth, segment) in path.segments().iter().enumerate() {
                let parent = prefix.clone();
                push_segment(&mut prefix, segment);
                if table.get(prefix.as_slice())?.is_some() {
                    continue;
                }
                if depth > 0 {
                    if table.get(tagged(&parent, LEAF_TAG, segment).as_slice())?.is_some() {
                        return Err(StoreError::IncompatibleValue(
                            path.prefix(depth + 1).to_string(),
                        ));
                    }
                    table.insert(tagged(&parent, CHILD_TAG, segment).as_slice(), EMPTY)?;
                }
                table.insert(prefix.as_slice(), EMPTY)?;
            }
            Ok(prefix)
        })?;
        Ok(Bucket {
            tx: self,
            path: path.clone(),
            prefix,
        })
    }

    /// Delete a bucket and everything below it.
    pub fn delete_bucket(&self, path: &Path) -> Result<()> {
        self.with_table(|table| {
            let prefix = encode_path(path);
            if path.is_empty() || table.get(prefix.as_slice())?.is_none() {
                return Err(StoreError::NotFound(format!("bucket {}", path)));
            }
            let removed = remove_range(table, &prefix, &prefix_end(&prefix))?;
            if let (Some(parent), Some(last)) = (path.parent(), path.last()) {
                if !parent.is_empty() {
                    table.remove(tagged(&encode_path(&parent), CHILD_TAG, last).as_slice())?;
                }
            }
            tracing::debug!("Dropped bucket {} ({} records)", path, removed);
            Ok(())
        })
    }
}

/// One entry of a bucket: a value, or a nested bucket (no value).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Stored key (or nested bucket name).
    pub key: Vec<u8>,
    /// Value; `None` for a nested bucket.
    pub value: Option<Vec<u8>>,
}

impl Entry {
    /// True if this entry is a nested bucket.
    pub fn is_bucket(&self) -> bool {
        self.value.is_none()
    }
}

/// Entries of a bucket in key order, iterable from both ends.
///
/// The entries are a snapshot taken when the cursor was created, so the
/// bucket may be modified while iterating.
#[derive(Debug)]
pub struct Cursor {
    entries: std::vec::IntoIter<Entry>,
}

impl Iterator for Cursor {
    type Item = Entry;

    fn next(&mut self) -> Option<Entry> {
        self.entries.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.entries.size_hint()
    }
}

impl DoubleEndedIterator for Cursor {
    fn next_back(&mut self) -> Option<Entry> {
        self.entries.next_back()
    }
}

impl ExactSizeIterator for Cursor {}

/// An open bucket within a transaction.
pub struct Bucket<'tx> {
    tx: &'tx Transaction,
    path: Path,
    prefix: Vec<u8>,
}

impl<'tx> Bucket<'tx> {
    /// The bucket's path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get a value. `None` if absent.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.tx.raw_get(&tagged(&self.prefix, LEAF_TAG, key))
    }

    /// Store a value, replacing any previous one.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.tx.with_table(|table| {
            if table.get(tagged(&self.prefix, CHILD_TAG, key).as_slice())?.is_some() {
                return Err(StoreError::IncompatibleValue(format!(
                    "{}/{}",
                    self.path,
                    String::from_utf8_lossy(key)
                )));
            }
            table.insert(tagged(&self.prefix, LEAF_TAG, key).as_slice(), value)?;
            Ok(())
        })
    }

    /// Delete a value. Deleting a missing key is not an error.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        self.tx.with_table(|table| {
            table.remove(tagged(&self.prefix, LEAF_TAG, key).as_slice())?;
            Ok(())
        })
    }

    /// Open an existing nested bucket.
    pub fn bucket(&self, segment: &[u8]) -> Result<Bucket<'tx>> {
        self.tx.bucket(&self.path.tail([segment]))
    }

    /// Open a nested bucket, creating it if missing.
    pub fn create_bucket(&self, segment: &[u8]) -> Result<Bucket<'tx>> {
        self.tx.create_bucket_if_missing(&self.path.tail([segment]))
    }

    /// Delete a nested bucket recursively.
    pub fn delete_bucket(&self, segment: &[u8]) -> Result<()> {
        self.tx.delete_bucket(&self.path.tail([segment]))
    }

    /// Snapshot of all entries (values and nested buckets) in key order.
    pub fn cursor(&self) -> Result<Cursor> {
        let leaf_lo = tagged(&self.prefix, LEAF_TAG, EMPTY);
        let leaf_hi = tagged(&self.prefix, CHILD_TAG, EMPTY);
        let child_hi = tagged(&self.prefix, CHILD_TAG_END, EMPTY);

        let mut entries: Vec<Entry> = self
            .tx
            .raw_range(&leaf_lo, &leaf_hi)?
            .into_iter()
            .map(|(k, v)| Entry {
                key: k[leaf_lo.len()..].to_vec(),
                value: Some(v),
            })
            .collect();

        let children = self.tx.raw_range(&leaf_hi, &child_hi)?;
        if !children.is_empty() {
            entries.extend(children.into_iter().map(|(k, _)| Entry {
                key: k[leaf_hi.len()..].to_vec(),
                value: None,
            }));
            entries.sort_by(|a, b| a.key.cmp(&b.key));
        }

        Ok(Cursor {
            entries: entries.into_iter(),
        })
    }
}

impl fmt::Debug for Bucket<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bucket").field("path", &self.path).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    fn path(segments: &[&str]) -> Path {
        Path::new(segments)
    }

    #[test]
    fn read_of_missing_bucket_is_not_found() {
        let engine = Engine::in_memory().unwrap();
        let tx = engine.begin(false).unwrap();

        let err = tx.bucket(&path(&["root", "rooms"])).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn write_creates_intermediate_buckets() {
        let engine = Engine::in_memory().unwrap();
        engine
            .update(|tx| {
                let b = tx.create_bucket_if_missing(&path(&["root", "rooms", "!a"]))?;
                b.put(b"k", b"v")
            })
            .unwrap();

        engine
            .view(|tx| {
                assert!(tx.bucket(&path(&["root"])).is_ok());
                assert!(tx.bucket(&path(&["root", "rooms"])).is_ok());
                let b = tx.bucket(&path(&["root", "rooms", "!a"]))?;
                assert_eq!(b.get(b"k")?, Some(b"v".to_vec()));
                assert_eq!(b.get(b"missing")?, None);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn read_transaction_cannot_write() {
        let engine = Engine::in_memory().unwrap();
        let tx = engine.begin(false).unwrap();
        let err = tx.create_bucket_if_missing(&path(&["root"])).unwrap_err();
        assert!(matches!(err, StoreError::ReadOnly));
    }

    #[test]
    fn cursor_lists_values_and_buckets_in_order() {
        let engine = Engine::in_memory().unwrap();
        engine
            .update(|tx| {
                let b = tx.create_bucket_if_missing(&path(&["root", "t"]))?;
                b.put(b"b", b"2")?;
                b.put(b"a", b"1")?;
                b.create_bucket(b"ab")?.put(b"inner", b"x")?;
                b.put(b"c", b"3")?;
                Ok(())
            })
            .unwrap();

        engine
            .view(|tx| {
                let b = tx.bucket(&path(&["root", "t"]))?;
                let keys: Vec<Vec<u8>> = b.cursor()?.map(|e| e.key).collect();
                assert_eq!(keys, vec![b"a".to_vec(), b"ab".to_vec(), b"b".to_vec(), b"c".to_vec()]);

                let last = b.cursor()?.next_back().unwrap();
                assert_eq!(last.key, b"c".to_vec());

                let nested = b.cursor()?.find(|e| e.is_bucket()).unwrap();
                assert_eq!(nested.key, b"ab".to_vec());
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn sibling_buckets_do_not_leak_into_each_other() {
        let engine = Engine::in_memory().unwrap();
        engine
            .update(|tx| {
                tx.create_bucket_if_missing(&path(&["root", "a"]))?.put(b"k", b"a")?;
                tx.create_bucket_if_missing(&path(&["root", "ab"]))?.put(b"k", b"ab")?;
                tx.create_bucket_if_missing(&path(&["root", "a\0"]))?.put(b"k", b"nul")?;
                Ok(())
            })
            .unwrap();

        engine
            .update(|tx| tx.delete_bucket(&path(&["root", "a"])))
            .unwrap();

        engine
            .view(|tx| {
                assert!(tx.bucket(&path(&["root", "a"])).unwrap_err().is_not_found());
                assert_eq!(tx.bucket(&path(&["root", "ab"]))?.get(b"k")?, Some(b"ab".to_vec()));
                assert_eq!(tx.bucket(&path(&["root", "a\0"]))?.get(b"k")?, Some(b"nul".to_vec()));

                let names: Vec<Vec<u8>> = tx.bucket(&path(&["root"]))?.cursor()?.map(|e| e.key).collect();
                assert_eq!(names, vec![b"a\0".to_vec(), b"ab".to_vec()]);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn delete_bucket_is_recursive() {
        let engine = Engine::in_memory().unwrap();
        engine
            .update(|tx| {
                let room = tx.create_bucket_if_missing(&path(&["root", "timelines", "!r"]))?;
                room.put(b"prev_batch", b"p")?;
                room.create_bucket(b"events")?.put(b"e1", b"{}")?;
                Ok(())
            })
            .unwrap();

        engine
            .update(|tx| tx.delete_bucket(&path(&["root", "timelines", "!r"])))
            .unwrap();

        engine
            .view(|tx| {
                let events = tx.bucket(&path(&["root", "timelines", "!r", "events"]));
                assert!(events.unwrap_err().is_not_found());
                assert_eq!(tx.bucket(&path(&["root", "timelines"]))?.cursor()?.len(), 0);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn value_and_bucket_cannot_share_a_name() {
        let engine = Engine::in_memory().unwrap();
        let err = engine
            .update(|tx| {
                let b = tx.create_bucket_if_missing(&path(&["root"]))?;
                b.put(b"x", b"value")?;
                b.create_bucket(b"x")?;
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(err, StoreError::IncompatibleValue(_)));
    }

    #[test]
    fn failed_update_rolls_back() {
        let engine = Engine::in_memory().unwrap();
        let err = engine
            .update(|tx| {
                tx.create_bucket_if_missing(&path(&["root"]))?.put(b"k", b"v")?;
                Err::<(), _>(StoreError::NotFound("forced".into()))
            })
            .unwrap_err();
        assert!(err.is_not_found());

        let tx = engine.begin(false).unwrap();
        assert!(tx.bucket(&path(&["root"])).unwrap_err().is_not_found());
    }

    #[test]
    fn readers_see_snapshot_from_their_start() {
        let engine = Engine::in_memory().unwrap();
        engine
            .update(|tx| tx.create_bucket_if_missing(&path(&["root"])).map(|_| ()))
            .unwrap();

        let before = engine.begin(false).unwrap();

        let writer = engine.begin(true).unwrap();
        writer
            .create_bucket_if_missing(&path(&["root"]))
            .unwrap()
            .put(b"k", b"v")
            .unwrap();

        let during = engine.begin(false).unwrap();
        writer.commit().unwrap();
        let after = engine.begin(false).unwrap();

        let root = path(&["root"]);
        assert_eq!(before.bucket(&root).unwrap().get(b"k").unwrap(), None);
        assert_eq!(during.bucket(&root).unwrap().get(b"k").unwrap(), None);
        assert_eq!(after.bucket(&root).unwrap().get(b"k").unwrap(), Some(b"v".to_vec()));
    }

    #[test]
    fn second_writer_waits_for_first() {
        let engine = Engine::in_memory().unwrap();
        let committed = Arc::new(AtomicBool::new(false));

        let first = engine.begin(true).unwrap();

        let handle = {
            let engine = engine.clone();
            let committed = committed.clone();
            std::thread::spawn(move || {
                let second = engine.begin(true).unwrap();
                let saw_commit = committed.load(Ordering::SeqCst);
                second.rollback().unwrap();
                saw_commit
            })
        };

        std::thread::sleep(Duration::from_millis(50));
        first
            .create_bucket_if_missing(&path(&["root"]))
            .unwrap()
            .put(b"k", b"v")
            .unwrap();
        committed.store(true, Ordering::SeqCst);
        first.commit().unwrap();

        assert!(handle.join().unwrap());
    }

    #[test]
    fn data_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("cache.redb");

        {
            let engine = Engine::open(&file).unwrap();
            engine
                .update(|tx| tx.create_bucket_if_missing(&path(&["root"]))?.put(b"next_batch", b"s9"))
                .unwrap();
        }

        let engine = Engine::open(&file).unwrap();
        let tx = engine.begin(false).unwrap();
        let value = tx.bucket(&path(&["root"])).unwrap().get(b"next_batch").unwrap();
        assert_eq!(value, Some(b"s9".to_vec()));
    }
}
