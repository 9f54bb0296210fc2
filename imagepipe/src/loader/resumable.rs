//! Partial downloads kept for resumption.
//!
//! When a fetch fails or is cancelled after some bytes arrived, and the
//! server gave an entity validator, the bytes are stored here keyed by URL.
//! The next fetch of that URL asks the loader to continue from them.

use std::collections::VecDeque;

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::debug;

/// Bytes received before an interrupted load, with the validator that
/// identifies the entity they belong to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumableData {
    pub data: Bytes,
    pub validator: String,
}

impl ResumableData {
    /// Returns resumable data only if it is worth resuming from.
    pub fn new(data: Bytes, validator: Option<String>) -> Option<Self> {
        match validator {
            Some(validator) if !data.is_empty() && !validator.is_empty() => {
                Some(Self { data, validator })
            }
            _ => None,
        }
    }
}

/// Bounded store of [`ResumableData`] keyed by URL.
///
/// Oldest entries are evicted first once `capacity` is reached.
pub struct ResumableDataStore {
    entries: DashMap<String, ResumableData>,
    order: Mutex<VecDeque<String>>,
    capacity: usize,
}

impl ResumableDataStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            order: Mutex::new(VecDeque::new()),
            capacity,
        }
    }

    pub fn store(&self, url: &str, data: ResumableData) {
        if self.capacity == 0 {
            return;
        }

        let mut order = self.order.lock();
        if self.entries.insert(url.to_string(), data).is_none() {
            order.push_back(url.to_string());
        }
        while order.len() > self.capacity {
            if let Some(oldest) = order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
        debug!(url = url, entries = order.len(), "Stored resumable data");
    }

    /// Removes and returns the data saved for `url`.
    pub fn take(&self, url: &str) -> Option<ResumableData> {
        let (_, data) = self.entries.remove(url)?;
        self.order.lock().retain(|u| u != url);
        Some(data)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ResumableDataStore {
    fn default() -> Self {
        Self::new(32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resumable(bytes: &'static [u8]) -> ResumableData {
        ResumableData::new(Bytes::from_static(bytes), Some("\"etag\"".to_string())).unwrap()
    }

    #[test]
    fn test_requires_validator_and_bytes() {
        assert!(ResumableData::new(Bytes::from_static(b"abc"), None).is_none());
        assert!(ResumableData::new(Bytes::new(), Some("v".into())).is_none());
        assert!(ResumableData::new(Bytes::from_static(b"abc"), Some("v".into())).is_some());
    }

    #[test]
    fn test_take_removes_entry() {
        let store = ResumableDataStore::new(4);
        store.store("a", resumable(b"123"));

        assert_eq!(store.take("a").map(|r| r.data), Some(Bytes::from_static(b"123")));
        assert!(store.take("a").is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_evicts_oldest_when_full() {
        let store = ResumableDataStore::new(2);
        store.store("a", resumable(b"1"));
        store.store("b", resumable(b"2"));
        store.store("c", resumable(b"3"));

        assert_eq!(store.len(), 2);
        assert!(store.take("a").is_none());
        assert!(store.take("b").is_some());
        assert!(store.take("c").is_some());
    }

    #[test]
    fn test_zero_capacity_stores_nothing() {
        let store = ResumableDataStore::new(0);
        store.store("a", resumable(b"1"));
        assert!(store.is_empty());
    }
}
