//! In-process fallback tier.

use crate::error::{CacheError, CacheResult};
use parking_lot::Mutex;
use regex::Regex;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

struct LocalEntry {
    value: Vec<u8>,
    expires_at: Instant,
    compressed: bool,
}

impl LocalEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Local map of encoded values with absolute expiry.
#[derive(Default)]
pub struct LocalTier {
    data: Mutex<HashMap<String, LocalEntry>>,
}

impl LocalTier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a live value, deleting it if it has expired.
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        let mut data = self.data.lock();
        let now = Instant::now();
        match data.get(key) {
            Some(entry) if !entry.is_expired(now) => Some(entry.value.clone()),
            Some(_) => {
                data.remove(key);
                None
            }
            None => None,
        }
    }

    /// Store a value. Returns the entry count afterwards.
    pub fn set(&self, key: &str, value: Vec<u8>, ttl: Duration, compressed: bool) -> usize {
        let mut data = self.data.lock();
        data.insert(
            key.to_string(),
            LocalEntry {
                value,
                expires_at: Instant::now() + ttl,
                compressed,
            },
        );
        data.len()
    }

    pub fn remove(&self, key: &str) -> bool {
        self.data.lock().remove(key).is_some()
    }

    /// Remove keys that match `pattern` as a glob or contain `needle`.
    pub fn remove_matching(&self, pattern: &Regex, needle: &str) -> usize {
        let mut data = self.data.lock();
        let before = data.len();
        data.retain(|key, _| !(pattern.is_match(key) || (!needle.is_empty() && key.contains(needle))));
        before - data.len()
    }

    /// Remove every key starting with `prefix`.
    pub fn remove_prefix(&self, prefix: &str) -> usize {
        let mut data = self.data.lock();
        let before = data.len();
        data.retain(|key, _| !key.starts_with(prefix));
        before - data.len()
    }

    /// Sweep expired entries. Returns the number removed.
    pub fn cleanup_expired(&self) -> usize {
        let mut data = self.data.lock();
        let now = Instant::now();
        let before = data.len();
        data.retain(|_, entry| !entry.is_expired(now));
        let cleaned = before - data.len();

        if cleaned > 0 {
            debug!(
                cleaned_entries = cleaned,
                remaining_entries = data.len(),
                "Fallback cache cleanup completed"
            );
        }
        cleaned
    }

    /// Sweep expired entries once the map holds more than `max` entries.
    pub fn enforce_limit(&self, max: usize) {
        if self.len() <= max {
            return;
        }
        self.cleanup_expired();
        let len = self.len();
        if len > max {
            warn!(entries = len, max, "Fallback cache above size ceiling after cleanup");
        }
    }

    pub fn len(&self) -> usize {
        self.data.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.lock().is_empty()
    }

    /// Entries stored gzipped.
    pub fn compressed_len(&self) -> usize {
        self.data.lock().values().filter(|e| e.compressed).count()
    }

    pub fn clear(&self) {
        self.data.lock().clear();
    }
}

/// Compile a Redis-style glob (`*`, `?`) into an anchored regex.
pub fn glob_to_regex(pattern: &str) -> CacheResult<Regex> {
    let mut source = String::with_capacity(pattern.len() + 8);
    source.push('^');
    for c in pattern.chars() {
        match c {
            '*' => source.push_str(".*"),
            '?' => source.push('.'),
            other => source.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
        }
    }
    source.push('$');

    Regex::new(&source).map_err(|e| CacheError::Config(format!("Invalid key pattern: {e}")))
}

/// Whether `key` matches the glob `pattern`.
pub fn glob_matches(pattern: &str, key: &str) -> bool {
    glob_to_regex(pattern).is_ok_and(|re| re.is_match(key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expired_entry_is_deleted_on_read() {
        let tier = LocalTier::new();
        tier.set("k", b"1".to_vec(), Duration::ZERO, false);

        assert_eq!(tier.get("k"), None);
        assert!(tier.is_empty());
    }

    #[test]
    fn test_live_entry_is_returned() {
        let tier = LocalTier::new();
        tier.set("k", b"1".to_vec(), Duration::from_secs(60), false);
        assert_eq!(tier.get("k"), Some(b"1".to_vec()));
    }

    #[test]
    fn test_glob_matching() {
        assert!(glob_matches("ts:tenant:*", "ts:tenant:42"));
        assert!(glob_matches("ts:tenant:?", "ts:tenant:4"));
        assert!(!glob_matches("ts:tenant:?", "ts:tenant:42"));
        assert!(!glob_matches("ts:tenant.*", "ts:tenantX42"));
    }

    #[test]
    fn test_remove_matching_uses_glob_and_substring() {
        let tier = LocalTier::new();
        let ttl = Duration::from_secs(60);
        tier.set("p:tenant:1:daily", vec![], ttl, false);
        tier.set("p:tenant:2:daily", vec![], ttl, false);
        tier.set("p:other:tenant:1", vec![], ttl, false);
        tier.set("p:global", vec![], ttl, false);

        let removed = tier.remove_matching(&glob_to_regex("p:tenant:*").unwrap(), "tenant:1");

        assert_eq!(removed, 3);
        assert_eq!(tier.len(), 1);
    }

    #[test]
    fn test_cleanup_keeps_live_entries() {
        let tier = LocalTier::new();
        tier.set("old", vec![], Duration::ZERO, false);
        tier.set("new", vec![], Duration::from_secs(60), true);

        assert_eq!(tier.cleanup_expired(), 1);
        assert_eq!(tier.len(), 1);
        assert_eq!(tier.compressed_len(), 1);
    }

    #[test]
    fn test_remove_prefix() {
        let tier = LocalTier::new();
        let ttl = Duration::from_secs(60);
        tier.set("a:1", vec![], ttl, false);
        tier.set("a:2", vec![], ttl, false);
        tier.set("b:1", vec![], ttl, false);

        assert_eq!(tier.remove_prefix("a:"), 2);
        assert_eq!(tier.remove_prefix("a:"), 0);
    }
}
