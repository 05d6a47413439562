use std::sync::Arc;

use dashmap::DashMap;
use rustc_hash::FxBuildHasher;

use crate::key::CacheKey;

/// Resolved records, shared between the store and every caller it is handed to.
pub type Records = Arc<[String]>;

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub records: Records,
    /// Read since the last refresh.
    pub used: bool,
}

/// Keyed record store. DashMap shards are readers-writer locks, so hits on
/// different keys never contend and a hit on an already-used entry only
/// takes a read lock.
#[derive(Debug, Default)]
pub struct CacheStore {
    entries: DashMap<CacheKey, CacheEntry, FxBuildHasher>,
}

impl CacheStore {
    pub fn new() -> Self {
        Self {
            entries: DashMap::with_hasher(FxBuildHasher::default()),
        }
    }

    /// Returns the cached records for `key`.
    ///
    /// Not read-only: the first hit after a put with `used = false` marks the
    /// entry as used. Later hits see the flag already set and skip the write lock.
    pub fn get(&self, key: &CacheKey) -> Option<Records> {
        // Read guard must be released before get_mut on the same shard.
        let (records, used) = {
            let entry = self.entries.get(key)?;
            (Arc::clone(&entry.records), entry.used)
        };
        if !used {
            if let Some(mut entry) = self.entries.get_mut(key) {
                entry.used = true;
            }
        }
        Some(records)
    }

    /// Upserts `key`. An existing entry is updated in place.
    pub fn put(&self, key: CacheKey, records: Records, used: bool) {
        self.entries
            .entry(key)
            .and_modify(|entry| {
                entry.records = Arc::clone(&records);
                entry.used = used;
            })
            .or_insert_with(|| CacheEntry {
                records: Arc::clone(&records),
                used,
            });
    }

    pub fn remove(&self, key: &CacheKey) {
        self.entries.remove(key);
    }

    /// Partitions all keys by their used flag: `(used, unused)`.
    pub fn snapshot_used_and_unused(&self) -> (Vec<CacheKey>, Vec<CacheKey>) {
        let mut used = Vec::with_capacity(self.entries.len());
        let mut unused = Vec::new();
        for entry in self.entries.iter() {
            if entry.used {
                used.push(entry.key().clone());
            } else {
                unused.push(entry.key().clone());
            }
        }
        (used, unused)
    }

    /// Drops each of `keys` that is still unused. An entry hit since the
    /// snapshot was taken survives. Returns the number of entries dropped.
    pub fn remove_unused(&self, keys: &[CacheKey]) -> usize {
        keys.iter()
            .filter(|key| self.entries.remove_if(*key, |_, entry| !entry.used).is_some())
            .count()
    }

    /// Reads the used flag without touching it.
    pub fn is_used(&self, key: &CacheKey) -> Option<bool> {
        self.entries.get(key).map(|entry| entry.used)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn records(items: &[&str]) -> Records {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn get_marks_unused_entry_as_used() {
        let store = CacheStore::new();
        let key = CacheKey::host("example.com");
        store.put(key.clone(), records(&["10.0.0.1"]), false);
        assert_eq!(store.is_used(&key), Some(false));

        let hit = store.get(&key).expect("cached");
        assert_eq!(&*hit, &["10.0.0.1".to_string()]);
        assert_eq!(store.is_used(&key), Some(true));
    }

    #[test]
    fn miss_does_not_create_entry() {
        let store = CacheStore::new();
        assert!(store.get(&CacheKey::host("missing.example")).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn put_updates_existing_entry_in_place() {
        let store = CacheStore::new();
        let key = CacheKey::host("example.com");
        store.put(key.clone(), records(&["10.0.0.1"]), true);
        store.put(key.clone(), records(&["10.0.0.2", "10.0.0.3"]), false);

        assert_eq!(store.len(), 1);
        assert_eq!(store.is_used(&key), Some(false));
        assert_eq!(store.get(&key).expect("cached").len(), 2);
    }

    #[test]
    fn remove_absent_key_is_noop() {
        let store = CacheStore::new();
        store.remove(&CacheKey::host("nothing"));
        assert!(store.is_empty());
    }

    #[test]
    fn snapshot_partitions_by_flag() {
        let store = CacheStore::new();
        store.put(CacheKey::host("a"), records(&["1.1.1.1"]), true);
        store.put(CacheKey::host("b"), records(&["2.2.2.2"]), false);
        store.put(CacheKey::addr("1.1.1.1"), records(&["a."]), true);

        let (mut used, unused) = store.snapshot_used_and_unused();
        used.sort_by(|a, b| a.to_string().cmp(&b.to_string()));
        assert_eq!(used, vec![CacheKey::addr("1.1.1.1"), CacheKey::host("a")]);
        assert_eq!(unused, vec![CacheKey::host("b")]);
    }

    #[test]
    fn remove_unused_spares_entries_hit_after_snapshot() {
        let store = CacheStore::new();
        let stale = CacheKey::host("stale");
        let revived = CacheKey::host("revived");
        store.put(stale.clone(), records(&["1.1.1.1"]), false);
        store.put(revived.clone(), records(&["2.2.2.2"]), false);

        let (_, unused) = store.snapshot_used_and_unused();
        assert_eq!(unused.len(), 2);
        store.get(&revived);

        assert_eq!(store.remove_unused(&unused), 1);
        assert!(store.is_used(&stale).is_none());
        assert_eq!(store.is_used(&revived), Some(true));
    }

    #[test]
    fn forward_and_reverse_entries_do_not_overwrite() {
        let store = CacheStore::new();
        store.put(CacheKey::host("1.2.3.4"), records(&["5.6.7.8"]), true);
        store.put(CacheKey::addr("1.2.3.4"), records(&["host.example."]), true);

        assert_eq!(store.len(), 2);
        assert_eq!(&*store.get(&CacheKey::host("1.2.3.4")).unwrap(), &["5.6.7.8".to_string()]);
        assert_eq!(
            &*store.get(&CacheKey::addr("1.2.3.4")).unwrap(),
            &["host.example.".to_string()]
        );
    }
}
