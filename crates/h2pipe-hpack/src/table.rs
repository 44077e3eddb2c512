//! HPACK static and dynamic tables.

use std::collections::VecDeque;

use bytes::Bytes;

use crate::error::{HpackError, Result};

/// Per-entry overhead added to name and value lengths (RFC 7541 §4.1).
pub const ENTRY_OVERHEAD: usize = 32;

/// A header field (name-value pair).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HeaderField {
    pub name: Bytes,
    pub value: Bytes,
}

impl HeaderField {
    pub fn new(name: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Size of this field for table accounting.
    pub fn size(&self) -> usize {
        entry_size(&self.name, &self.value)
    }
}

pub fn entry_size(name: &[u8], value: &[u8]) -> usize {
    name.len() + value.len() + ENTRY_OVERHEAD
}

/// The static table (RFC 7541 Appendix A), indices 1 through 61.
#[rustfmt::skip]
const STATIC_ENTRIES: [(&str, &str); 61] = [
    (":authority", ""),
    (":method", "GET"),
    (":method", "POST"),
    (":path", "/"),
    (":path", "/index.html"),
    (":scheme", "http"),
    (":scheme", "https"),
    (":status", "200"),
    (":status", "204"),
    (":status", "206"),
    (":status", "304"),
    (":status", "400"),
    (":status", "404"),
    (":status", "500"),
    ("accept-charset", ""),
    ("accept-encoding", "gzip, deflate"),
    ("accept-language", ""),
    ("accept-ranges", ""),
    ("accept", ""),
    ("access-control-allow-origin", ""),
    ("age", ""),
    ("allow", ""),
    ("authorization", ""),
    ("cache-control", ""),
    ("content-disposition", ""),
    ("content-encoding", ""),
    ("content-language", ""),
    ("content-length", ""),
    ("content-location", ""),
    ("content-range", ""),
    ("content-type", ""),
    ("cookie", ""),
    ("date", ""),
    ("etag", ""),
    ("expect", ""),
    ("expires", ""),
    ("from", ""),
    ("host", ""),
    ("if-match", ""),
    ("if-modified-since", ""),
    ("if-none-match", ""),
    ("if-range", ""),
    ("if-unmodified-since", ""),
    ("last-modified", ""),
    ("link", ""),
    ("location", ""),
    ("max-forwards", ""),
    ("proxy-authenticate", ""),
    ("proxy-authorization", ""),
    ("range", ""),
    ("referer", ""),
    ("refresh", ""),
    ("retry-after", ""),
    ("server", ""),
    ("set-cookie", ""),
    ("strict-transport-security", ""),
    ("transfer-encoding", ""),
    ("user-agent", ""),
    ("vary", ""),
    ("via", ""),
    ("www-authenticate", ""),
];

/// Number of static table entries.
pub const STATIC_TABLE_LEN: usize = STATIC_ENTRIES.len();

/// Static table entry at 1-based `index`.
pub fn static_entry(index: usize) -> Option<HeaderField> {
    let (name, value) = STATIC_ENTRIES.get(index.checked_sub(1)?)?;
    Some(HeaderField::new(
        Bytes::from_static(name.as_bytes()),
        Bytes::from_static(value.as_bytes()),
    ))
}

/// Search the static table. Returns the 1-based index and whether the value
/// matched too; an exact match wins over an earlier name-only match.
pub fn static_find(name: &[u8], value: &[u8]) -> Option<(usize, bool)> {
    let mut name_match = None;
    for (i, (entry_name, entry_value)) in STATIC_ENTRIES.iter().enumerate() {
        if entry_name.as_bytes() == name {
            if entry_value.as_bytes() == value {
                return Some((i + 1, true));
            }
            name_match.get_or_insert(i + 1);
        }
    }
    name_match.map(|i| (i, false))
}

/// The dynamic table: a FIFO of header fields, newest first, bounded by the
/// sum of entry sizes.
#[derive(Debug, Clone)]
pub struct DynamicTable {
    entries: VecDeque<HeaderField>,
    size: usize,
    max_size: usize,
}

impl DynamicTable {
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            size: 0,
            max_size,
        }
    }

    /// Add a field as the newest entry, evicting the oldest as needed.
    ///
    /// A field larger than the whole table empties it and is not stored.
    /// Returns whether the field was stored.
    pub fn insert(&mut self, field: HeaderField) -> bool {
        let entry_size = field.size();
        if entry_size > self.max_size {
            self.entries.clear();
            self.size = 0;
            return false;
        }
        self.evict_if_needed(self.max_size - entry_size);
        self.size += entry_size;
        self.entries.push_front(field);
        true
    }

    /// Evict oldest entries until the table occupies at most `max` bytes.
    pub fn evict_if_needed(&mut self, max: usize) {
        while self.size > max {
            let Some(evicted) = self.entries.pop_back() else {
                break;
            };
            self.size -= evicted.size();
        }
    }

    /// Entry at 0-based `index`, where 0 is the newest.
    pub fn lookup(&self, index: usize) -> Result<&HeaderField> {
        self.entries.get(index).ok_or(HpackError::IndexOutOfRange {
            index,
            len: self.entries.len(),
        })
    }

    /// Change the maximum size, evicting to fit.
    pub fn resize(&mut self, new_max: usize) {
        self.max_size = new_max;
        self.evict_if_needed(new_max);
    }

    /// Search the table. Returns the 0-based index and whether the value
    /// matched too.
    pub fn find(&self, name: &[u8], value: &[u8]) -> Option<(usize, bool)> {
        let mut name_match = None;
        for (i, entry) in self.entries.iter().enumerate() {
            if entry.name == name {
                if entry.value == value {
                    return Some((i, true));
                }
                name_match.get_or_insert(i);
            }
        }
        name_match.map(|i| (i, false))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Current size in bytes, including per-entry overhead.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Entries from newest to oldest.
    pub fn iter(&self) -> impl Iterator<Item = &HeaderField> {
        self.entries.iter()
    }
}
