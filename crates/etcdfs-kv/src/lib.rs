//! The ordered key-value store interface the filesystem is built on, plus the
//! key-range arithmetic shared by every caller and backend.

mod store;

pub use store::*;

/// Exclusive upper bound of a key range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RangeEnd {
    Bounded(Vec<u8>),
    /// Scan to the end of the keyspace.
    Unbounded,
}

impl RangeEnd {
    /// Whether `key` lies strictly below this bound.
    pub fn admits(&self, key: &[u8]) -> bool {
        match self {
            RangeEnd::Bounded(end) => key < end.as_slice(),
            RangeEnd::Unbounded => true,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            RangeEnd::Bounded(end) => Some(end),
            RangeEnd::Unbounded => None,
        }
    }
}

/// Return the key immediately after the given key.
///
/// Appends a zero byte, giving the smallest key strictly greater than `key`.
pub fn key_after(key: &[u8]) -> Vec<u8> {
    let mut result = key.to_vec();
    result.push(0);
    result
}

/// Return the smallest key strictly greater than every key that starts with
/// `prefix`.
///
/// Increments the last byte that is not 0xFF and drops everything after it.
/// A prefix made only of 0xFF bytes (or an empty prefix) has no such key, so
/// the range runs to the end of the keyspace.
pub fn prefix_range_end(prefix: &[u8]) -> RangeEnd {
    let mut end = prefix.to_vec();
    while let Some(last) = end.last_mut() {
        if *last < 0xFF {
            *last += 1;
            return RangeEnd::Bounded(end);
        }
        end.pop();
    }
    RangeEnd::Unbounded
}
