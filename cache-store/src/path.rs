//! Bucket paths.

use std::fmt;

/// An ordered, immutable sequence of byte-string segments naming a bucket.
///
/// Paths compare segment by segment, which gives the total order used when
/// walking buckets. Deriving a longer path always copies, so two nodes never
/// share (and accidentally extend) the same backing storage.
#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Path {
    segments: Vec<Vec<u8>>,
}

impl Path {
    /// Build a path from segments.
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<[u8]>,
    {
        Self {
            segments: segments.into_iter().map(|s| s.as_ref().to_vec()).collect(),
        }
    }

    /// A new path with `segments` appended.
    pub fn tail<I, S>(&self, segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<[u8]>,
    {
        let extra = segments.into_iter();
        let mut out = Vec::with_capacity(self.segments.len() + extra.size_hint().0);
        out.extend(self.segments.iter().cloned());
        out.extend(extra.map(|s| s.as_ref().to_vec()));
        Self { segments: out }
    }

    /// The segments.
    pub fn segments(&self) -> &[Vec<u8>] {
        &self.segments
    }

    /// Number of segments.
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// True for the empty path.
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// The last segment.
    pub fn last(&self) -> Option<&[u8]> {
        self.segments.last().map(Vec::as_slice)
    }

    /// The path without its last segment.
    pub fn parent(&self) -> Option<Path> {
        if self.segments.is_empty() {
            return None;
        }
        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// The first `n` segments.
    pub fn prefix(&self, n: usize) -> Path {
        Self {
            segments: self.segments[..n.min(self.segments.len())].to_vec(),
        }
    }

    /// True if `self`'s segments are a prefix of `other`'s.
    pub fn is_prefix_of(&self, other: &Path) -> bool {
        other.segments.starts_with(&self.segments)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, seg) in self.segments.iter().enumerate() {
            if i > 0 {
                f.write_str("/")?;
            }
            write!(f, "{}", String::from_utf8_lossy(seg).escape_debug())?;
        }
        Ok(())
    }
}

impl fmt::Debug for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Path({})", self)
    }
}
