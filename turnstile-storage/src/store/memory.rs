//! In-process store with the same semantics as the networked one.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use turnstile_core::{Clock, StoreError, StoreResult, SystemClock};

use super::{KeyValueStore, StoreCounters};

#[derive(Debug, Clone)]
enum Slot {
    Text(String),
    /// Sorted-set members and their scores.
    Window(BTreeMap<String, i64>),
}

#[derive(Debug, Clone)]
struct Entry {
    slot: Slot,
    expires_at: Option<i64>,
}

/// Key-value store held in process memory.
///
/// Expiry is evaluated lazily against the injected [`Clock`], so tests can
/// advance time instead of sleeping.
pub struct InMemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
    clock: Arc<dyn Clock>,
    commands: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryStore")
            .field("commands", &self.commands.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
            commands: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Live keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let now = self.clock.now_epoch_secs();
        let Ok(entries) = self.entries.lock() else {
            return Vec::new();
        };
        let mut keys: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| !is_expired(entry, now))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Members of a live window set, ordered by score.
    pub fn window_members(&self, key: &str) -> Vec<String> {
        let now = self.clock.now_epoch_secs();
        let Ok(entries) = self.entries.lock() else {
            return Vec::new();
        };
        match entries.get(key) {
            Some(entry) if !is_expired(entry, now) => match &entry.slot {
                Slot::Window(members) => {
                    let mut scored: Vec<(&String, &i64)> = members.iter().collect();
                    scored.sort_by_key(|(member, score)| (**score, (*member).clone()));
                    scored.into_iter().map(|(member, _)| member.clone()).collect()
                }
                Slot::Text(_) => Vec::new(),
            },
            _ => Vec::new(),
        }
    }

    /// Remaining lifetime of a key in seconds, if it has one.
    pub fn ttl(&self, key: &str) -> Option<i64> {
        let now = self.clock.now_epoch_secs();
        let entries = self.entries.lock().ok()?;
        let entry = entries.get(key).filter(|entry| !is_expired(entry, now))?;
        entry.expires_at.map(|at| at - now)
    }

    fn lock(&self, operation: &str) -> StoreResult<MutexGuard<'_, HashMap<String, Entry>>> {
        self.commands.fetch_add(1, Ordering::Relaxed);
        self.entries
            .lock()
            .map_err(|_| StoreError::operation(operation, "store lock poisoned"))
    }

    /// Window set under `key`, dropping an expired entry first.
    fn window_mut<'a>(
        entries: &'a mut HashMap<String, Entry>,
        key: &str,
        now: i64,
    ) -> StoreResult<&'a mut Entry> {
        if entries.get(key).is_some_and(|entry| is_expired(entry, now)) {
            entries.remove(key);
        }
        let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
            slot: Slot::Window(BTreeMap::new()),
            expires_at: None,
        });
        match entry.slot {
            Slot::Window(_) => Ok(entry),
            Slot::Text(_) => Err(StoreError::operation(
                "ZCARD",
                "WRONGTYPE Operation against a key holding the wrong kind of value",
            )),
        }
    }
}

fn is_expired(entry: &Entry, now: i64) -> bool {
    entry.expires_at.is_some_and(|at| now >= at)
}

fn prune(members: &mut BTreeMap<String, i64>, window_start: i64) -> u64 {
    members.retain(|_, score| *score > window_start);
    members.len() as u64
}

#[async_trait]
impl KeyValueStore for InMemoryStore {
    fn endpoint(&self) -> String {
        "memory://".to_string()
    }

    async fn ping(&self) -> StoreResult<()> {
        self.lock("PING").map(|_| ())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let now = self.clock.now_epoch_secs();
        let mut entries = self.lock("GET")?;
        if entries.get(key).is_some_and(|entry| is_expired(entry, now)) {
            entries.remove(key);
        }
        let value = match entries.get(key) {
            Some(Entry {
                slot: Slot::Text(value),
                ..
            }) => Some(value.clone()),
            Some(_) => {
                return Err(StoreError::operation(
                    "GET",
                    "WRONGTYPE Operation against a key holding the wrong kind of value",
                ))
            }
            None => None,
        };
        match value {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        Ok(value)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> StoreResult<()> {
        if ttl_secs == 0 {
            return Err(StoreError::operation("SETEX", "invalid expire time"));
        }
        let now = self.clock.now_epoch_secs();
        let mut entries = self.lock("SETEX")?;
        entries.insert(
            key.to_string(),
            Entry {
                slot: Slot::Text(value.to_string()),
                expires_at: Some(now + ttl_secs as i64),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let now = self.clock.now_epoch_secs();
        let mut entries = self.lock("DEL")?;
        Ok(entries
            .remove(key)
            .is_some_and(|entry| !is_expired(&entry, now)))
    }

    async fn scan_match(&self, pattern: &str) -> StoreResult<Vec<String>> {
        let matcher = glob::Pattern::new(pattern)
            .map_err(|e| StoreError::operation("SCAN", e))?;
        let now = self.clock.now_epoch_secs();
        let entries = self.lock("SCAN")?;
        let mut keys: Vec<String> = entries
            .iter()
            .filter(|(key, entry)| !is_expired(entry, now) && matcher.matches(key))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn flush_db(&self) -> StoreResult<()> {
        self.lock("FLUSHDB")?.clear();
        Ok(())
    }

    async fn counters(&self) -> StoreResult<StoreCounters> {
        drop(self.lock("INFO")?);
        Ok(StoreCounters {
            total_commands: self.commands.load(Ordering::Relaxed),
            keyspace_hits: self.hits.load(Ordering::Relaxed),
            keyspace_misses: self.misses.load(Ordering::Relaxed),
        })
    }

    async fn window_count(&self, key: &str, window_start: i64) -> StoreResult<u64> {
        let now = self.clock.now_epoch_secs();
        let mut entries = self.lock("ZCARD")?;
        if !entries.contains_key(key) {
            return Ok(0);
        }
        let entry = Self::window_mut(&mut entries, key, now)?;
        let count = match &mut entry.slot {
            Slot::Window(members) => prune(members, window_start),
            Slot::Text(_) => 0,
        };
        if count == 0 {
            entries.remove(key);
        }
        Ok(count)
    }

    async fn window_admit(
        &self,
        key: &str,
        now: i64,
        window_start: i64,
        limit: u32,
        ttl_secs: u64,
    ) -> StoreResult<u64> {
        let clock_now = self.clock.now_epoch_secs();
        let mut entries = self.lock("EVALSHA")?;
        let entry = Self::window_mut(&mut entries, key, clock_now)?;
        let Slot::Window(members) = &mut entry.slot else {
            return Ok(0);
        };
        let count = prune(members, window_start);
        if count < u64::from(limit) {
            members.insert(now.to_string(), now);
            entry.expires_at = Some(clock_now + ttl_secs as i64);
        } else if members.is_empty() {
            entries.remove(key);
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use turnstile_test_utils::ManualClock;

    fn store_at(now: i64) -> (InMemoryStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(now));
        (InMemoryStore::with_clock(clock.clone()), clock)
    }

    #[tokio::test]
    async fn test_get_set_delete() {
        let (store, _) = store_at(1_000);
        assert_eq!(store.get("k").await.unwrap(), None);
        store.set_ex("k", "\"v\"", 30).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("\"v\""));
        assert_eq!(store.ttl("k"), Some(30));
        assert!(store.delete("k").await.unwrap());
        assert!(!store.delete("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_entry_expires() {
        let (store, clock) = store_at(1_000);
        store.set_ex("k", "1", 1).await.unwrap();
        assert!(store.get("k").await.unwrap().is_some());
        clock.advance(1);
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_zero_ttl_rejected() {
        let (store, _) = store_at(1_000);
        assert!(store.set_ex("k", "1", 0).await.is_err());
        assert!(store.keys().is_empty());
    }

    #[tokio::test]
    async fn test_scan_match_glob() {
        let (store, _) = store_at(1_000);
        for key in ["p:1", "p:2", "q:1", "pp:1"] {
            store.set_ex(key, "1", 60).await.unwrap();
        }
        assert_eq!(store.scan_match("p:*").await.unwrap(), vec!["p:1", "p:2"]);
        assert_eq!(store.scan_match("*:1").await.unwrap(), vec!["p:1", "pp:1", "q:1"]);
        assert!(store.scan_match("[").await.is_err());
    }

    #[tokio::test]
    async fn test_counters_track_hits_and_misses() {
        let (store, _) = store_at(1_000);
        store.set_ex("a", "1", 60).await.unwrap();
        store.get("a").await.unwrap();
        store.get("a").await.unwrap();
        store.get("b").await.unwrap();
        let counters = store.counters().await.unwrap();
        assert_eq!(counters.keyspace_hits, 2);
        assert_eq!(counters.keyspace_misses, 1);
        assert!(counters.total_commands >= 4);
    }

    #[tokio::test]
    async fn test_window_admit_stops_at_limit() {
        let (store, clock) = store_at(1_000);
        for (i, expected) in [0u64, 1, 2, 3].into_iter().enumerate() {
            clock.advance(1);
            let now = 1_001 + i as i64;
            let count = store.window_admit("w", now, now - 60, 3, 61).await.unwrap();
            assert_eq!(count, expected);
        }
        assert_eq!(store.window_members("w"), vec!["1001", "1002", "1003"]);
        assert_eq!(store.ttl("w"), Some(60));
    }

    #[tokio::test]
    async fn test_window_prunes_old_entries() {
        let (store, _) = store_at(1_000);
        store.window_admit("w", 1_000, 940, 5, 61).await.unwrap();
        store.window_admit("w", 1_030, 970, 5, 61).await.unwrap();
        // Entry at 1000 is at the window start and gets dropped.
        assert_eq!(store.window_count("w", 1_000).await.unwrap(), 1);
        assert_eq!(store.window_members("w"), vec!["1030"]);
    }

    #[tokio::test]
    async fn test_window_same_second_collides() {
        let (store, _) = store_at(1_000);
        store.window_admit("w", 1_000, 940, 5, 61).await.unwrap();
        let count = store.window_admit("w", 1_000, 940, 5, 61).await.unwrap();
        assert_eq!(count, 1);
        assert_eq!(store.window_count("w", 940).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_window_on_text_key_is_an_error() {
        let (store, _) = store_at(1_000);
        store.set_ex("k", "1", 60).await.unwrap();
        assert!(store.window_admit("k", 1_000, 940, 5, 61).await.is_err());
        assert!(store.window_count("k", 940).await.is_err());
    }

    #[tokio::test]
    async fn test_flush_db() {
        let (store, _) = store_at(1_000);
        store.set_ex("a", "1", 60).await.unwrap();
        store.window_admit("w", 1_000, 940, 5, 61).await.unwrap();
        store.flush_db().await.unwrap();
        assert!(store.keys().is_empty());
    }
}
