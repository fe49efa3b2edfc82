//! Key encoding.
//!
//! - Empty keys map to the sentinel `\0\0`.
//! - Keys made only of NUL bytes get two more NULs, so no user key encodes
//!   to the sentinel.
//! - Composite keys join parts with a single NUL.
//! - Timeline keys sort chronologically: a fixed-width, order-preserving
//!   base32 rendering of the sign-flipped timestamp, `0x01`, then the event id.

use std::borrow::Cow;

/// Stored form of the empty key.
pub const EMPTY_KEY: &[u8] = b"\0\0";

/// Delimiter between composite key parts.
pub const COMPOSITE_DELIMITER: u8 = 0x00;

/// Separator between the timestamp and the event id in a timeline key.
pub const TIMELINE_SEPARATOR: u8 = 0x01;

/// Order-preserving base32 digits: ascending ASCII, so byte order is numeric order.
const DIGITS: &[u8; 32] = b"0123456789abcdefghijklmnopqrstuv";

/// 64 bits in 5-bit digits.
const TIMESTAMP_WIDTH: usize = 13;

/// Encode a user key for storage.
pub fn encode(key: &[u8]) -> Cow<'_, [u8]> {
    if key.is_empty() {
        return Cow::Borrowed(EMPTY_KEY);
    }
    if key.iter().all(|&b| b == 0) {
        let mut padded = key.to_vec();
        padded.extend_from_slice(&[0, 0]);
        return Cow::Owned(padded);
    }
    Cow::Borrowed(key)
}

/// Decode a stored key back into the user key.
pub fn decode(stored: &[u8]) -> &[u8] {
    if stored == EMPTY_KEY {
        return &[];
    }
    if stored.len() > EMPTY_KEY.len() && stored.iter().all(|&b| b == 0) {
        return &stored[..stored.len() - 2];
    }
    stored
}

/// Join key parts with the composite delimiter.
pub fn composite<I, S>(parts: I) -> Vec<u8>
where
    I: IntoIterator<Item = S>,
    S: AsRef<[u8]>,
{
    let mut out = Vec::new();
    for (i, part) in parts.into_iter().enumerate() {
        if i > 0 {
            out.push(COMPOSITE_DELIMITER);
        }
        out.extend_from_slice(part.as_ref());
    }
    out
}

/// Split a composite key into its parts.
pub fn split_composite(key: &[u8]) -> Vec<&[u8]> {
    key.split(|&b| b == COMPOSITE_DELIMITER).collect()
}

/// Encode a timestamp so that byte order equals numeric order.
pub fn encode_timestamp(ts: i64) -> [u8; TIMESTAMP_WIDTH] {
    // Flip the sign bit so negative values sort before positive ones
    let mut n = (ts as u64) ^ (1u64 << 63);
    let mut out = [DIGITS[0]; TIMESTAMP_WIDTH];
    for slot in out.iter_mut().rev() {
        *slot = DIGITS[(n & 0x1f) as usize];
        n >>= 5;
    }
    out
}

/// Decode a timestamp written by [`encode_timestamp`].
pub fn decode_timestamp(encoded: &[u8]) -> Option<i64> {
    if encoded.len() != TIMESTAMP_WIDTH {
        return None;
    }
    let mut n: u64 = 0;
    for &c in encoded {
        let digit = DIGITS.iter().position(|&d| d == c)? as u64;
        n = n.checked_mul(32)?.checked_add(digit)?;
    }
    Some((n ^ (1u64 << 63)) as i64)
}

/// Build a timeline key from a timestamp and an event id.
pub fn timeline(ts: i64, event_id: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(TIMESTAMP_WIDTH + 1 + event_id.len());
    out.extend_from_slice(&encode_timestamp(ts));
    out.push(TIMELINE_SEPARATOR);
    out.extend_from_slice(event_id.as_bytes());
    out
}

/// Split a timeline key into timestamp and event id.
pub fn parse_timeline(key: &[u8]) -> Option<(i64, &str)> {
    if key.len() <= TIMESTAMP_WIDTH || key[TIMESTAMP_WIDTH] != TIMELINE_SEPARATOR {
        return None;
    }
    let ts = decode_timestamp(&key[..TIMESTAMP_WIDTH])?;
    let id = std::str::from_utf8(&key[TIMESTAMP_WIDTH + 1..]).ok()?;
    Some((ts, id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_key_uses_sentinel() {
        assert_eq!(encode(b"").as_ref(), EMPTY_KEY);
        assert_eq!(decode(EMPTY_KEY), b"");
    }

    #[test]
    fn nul_keys_never_collide_with_sentinel() {
        let one = encode(b"\0");
        let two = encode(b"\0\0");

        assert_ne!(one.as_ref(), EMPTY_KEY);
        assert_ne!(two.as_ref(), EMPTY_KEY);
        assert_ne!(one, two);
        assert_eq!(decode(&one), b"\0");
        assert_eq!(decode(&two), b"\0\0");
    }

    #[test]
    fn ordinary_keys_are_untouched() {
        assert!(matches!(encode(b"m.room.name"), Cow::Borrowed(_)));
        assert_eq!(decode(b"m.room.name"), b"m.room.name");
        assert_eq!(decode(b"a\0b"), b"a\0b");
    }

    #[test]
    fn composite_joins_with_nul() {
        let key = composite(["m.presence", "@alice:x"]);
        assert_eq!(key, b"m.presence\0@alice:x");
        assert_eq!(split_composite(&key), vec![&b"m.presence"[..], &b"@alice:x"[..]]);
    }

    #[test]
    fn timestamps_sort_numerically() {
        let values = [i64::MIN, -1_000, -1, 0, 1, 9, 10, 31, 32, 1_000_000, i64::MAX];
        for pair in values.windows(2) {
            assert!(
                encode_timestamp(pair[0]) < encode_timestamp(pair[1]),
                "{} should sort before {}",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn timestamp_decodes() {
        for ts in [i64::MIN, -42, 0, 1_700_000_000_000, i64::MAX] {
            assert_eq!(decode_timestamp(&encode_timestamp(ts)), Some(ts));
        }
        assert_eq!(decode_timestamp(b"short"), None);
        assert_eq!(decode_timestamp(b"zzzzzzzzzzzzz"), None);
    }

    #[test]
    fn timeline_keys_order_by_time_then_id() {
        let a = timeline(10, "$b");
        let b = timeline(20, "$a");
        let c = timeline(20, "$b");
        assert!(a < b);
        assert!(b < c);
        assert_eq!(parse_timeline(&c), Some((20, "$b")));
        assert_eq!(parse_timeline(b"garbage"), None);
    }
}
