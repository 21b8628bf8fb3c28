//! Versioned in-memory store of published prototype sets.
//!
//! Published sets live in an arena keyed by integer version; an index names
//! the active one. Publishing inserts a new immutable snapshot and moves the
//! index under one short write lock, so readers either see the previous set
//! or the new one. A reader that already holds an `Arc` keeps its snapshot
//! for as long as it needs it.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use lectag_core::PrototypeSet;
use lectag_core::error::StoreError;

/// Summary of one retained version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionInfo {
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub num_prototypes: usize,
    pub num_low_data: usize,
    pub active: bool,
}

#[derive(Debug, Default)]
struct Arena {
    sets: BTreeMap<u64, Arc<PrototypeSet>>,
    active: Option<u64>,
    last_version: u64,
}

#[derive(Debug)]
pub struct PrototypeStore {
    arena: RwLock<Arena>,
    /// 0 keeps every version
    max_retained: usize,
}

impl Default for PrototypeStore {
    fn default() -> Self {
        Self::new(0)
    }
}

impl PrototypeStore {
    pub fn new(max_retained: usize) -> Self {
        Self {
            arena: RwLock::new(Arena::default()),
            max_retained,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Arena> {
        self.arena.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Arena> {
        self.arena.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Publish a freshly built set under the next version and make it active.
    pub fn publish(&self, set: PrototypeSet) -> Arc<PrototypeSet> {
        let mut arena = self.write();
        let version = arena.last_version + 1;
        let set = Arc::new(set.with_version(version));
        arena.sets.insert(version, Arc::clone(&set));
        arena.active = Some(version);
        arena.last_version = version;
        self.evict(&mut arena);
        drop(arena);

        info!(version, prototypes = set.len(), "Published prototype set");
        set
    }

    /// Insert a previously persisted set under its own version and make it
    /// active. Later publishes continue numbering after it.
    pub fn restore(&self, set: PrototypeSet) -> Arc<PrototypeSet> {
        let mut arena = self.write();
        let version = set.version;
        let set = Arc::new(set);
        arena.sets.insert(version, Arc::clone(&set));
        arena.active = Some(version);
        arena.last_version = arena.last_version.max(version);
        self.evict(&mut arena);
        drop(arena);

        info!(version, prototypes = set.len(), "Restored prototype set");
        set
    }

    /// Snapshot of the active set.
    pub fn active(&self) -> Option<Arc<PrototypeSet>> {
        let arena = self.read();
        arena.active.and_then(|v| arena.sets.get(&v).cloned())
    }

    pub fn active_version(&self) -> Option<u64> {
        self.read().active
    }

    /// The version the next `publish` would assign.
    pub fn next_version(&self) -> u64 {
        self.read().last_version + 1
    }

    pub fn get(&self, version: u64) -> Option<Arc<PrototypeSet>> {
        self.read().sets.get(&version).cloned()
    }

    /// Make a retained version active again (rollback).
    pub fn activate(&self, version: u64) -> Result<Arc<PrototypeSet>, StoreError> {
        let mut arena = self.write();
        let set = arena
            .sets
            .get(&version)
            .cloned()
            .ok_or(StoreError::VersionNotFound(version))?;
        arena.active = Some(version);
        drop(arena);

        info!(version, "Activated prototype set");
        Ok(set)
    }

    /// Retained versions, newest first.
    pub fn versions(&self) -> Vec<VersionInfo> {
        let arena = self.read();
        arena
            .sets
            .values()
            .rev()
            .map(|set| VersionInfo {
                version: set.version,
                created_at: set.created_at,
                num_prototypes: set.len(),
                num_low_data: set.low_data_count(),
                active: arena.active == Some(set.version),
            })
            .collect()
    }

    /// Drop the oldest inactive versions beyond the retention limit.
    fn evict(&self, arena: &mut Arena) {
        if self.max_retained == 0 {
            return;
        }
        while arena.sets.len() > self.max_retained {
            let Some(oldest) = arena
                .sets
                .keys()
                .copied()
                .find(|v| Some(*v) != arena.active)
            else {
                break;
            };
            arena.sets.remove(&oldest);
            debug!(version = oldest, "Evicted prototype set");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lectag_core::Prototype;

    fn set(tag_id: &str) -> PrototypeSet {
        let prototype = Prototype {
            tag_id: tag_id.into(),
            centroid: vec![1.0, 0.0],
            example_count: 1,
            threshold: 0.5,
            calibrated: true,
            low_data: true,
            version: 0,
        };
        PrototypeSet::new(BTreeMap::from([(tag_id.to_string(), prototype)]), BTreeMap::new())
    }

    #[test]
    fn empty_store_has_no_active_set() {
        let store = PrototypeStore::default();
        assert!(store.active().is_none());
        assert!(store.versions().is_empty());
    }

    #[test]
    fn publish_assigns_increasing_versions() {
        let store = PrototypeStore::default();
        let first = store.publish(set("a"));
        let second = store.publish(set("b"));
        assert_eq!(first.version, 1);
        assert_eq!(second.version, 2);
        assert_eq!(second.get("b").unwrap().version, 2);
        assert_eq!(store.active_version(), Some(2));
    }

    #[test]
    fn snapshot_survives_publish() {
        let store = PrototypeStore::default();
        store.publish(set("a"));
        let snapshot = store.active().unwrap();
        store.publish(set("b"));
        assert!(snapshot.get("a").is_some());
        assert_eq!(snapshot.version, 1);
        assert!(store.active().unwrap().get("b").is_some());
    }

    #[test]
    fn activate_rolls_back() {
        let store = PrototypeStore::default();
        store.publish(set("a"));
        store.publish(set("b"));
        store.activate(1).unwrap();
        assert!(store.active().unwrap().get("a").is_some());
        assert!(matches!(store.activate(7), Err(StoreError::VersionNotFound(7))));

        // numbering continues after the newest version, not the active one
        assert_eq!(store.publish(set("c")).version, 3);
    }

    #[test]
    fn retention_keeps_active_version() {
        let store = PrototypeStore::new(2);
        store.publish(set("a"));
        store.publish(set("b"));
        store.activate(1).unwrap();
        store.publish(set("c"));
        // 3 is active now; oldest inactive (1) was evicted
        let versions: Vec<_> = store.versions().iter().map(|v| v.version).collect();
        assert_eq!(versions, vec![3, 2]);
        assert!(store.get(1).is_none());
    }

    #[test]
    fn restore_continues_numbering() {
        let store = PrototypeStore::default();
        store.restore(set("a").with_version(41));
        assert_eq!(store.active_version(), Some(41));
        assert_eq!(store.next_version(), 42);
        assert_eq!(store.publish(set("b")).version, 42);
        let info = store.versions();
        assert!(info[0].active);
        assert_eq!(info[1].version, 41);
        assert_eq!(info[1].num_low_data, 1);
    }

    #[test]
    fn concurrent_readers_never_see_partial_sets() {
        let store = Arc::new(PrototypeStore::default());
        store.publish(set("a"));
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        if i == 0 {
                            store.publish(set("a"));
                        } else {
                            let snapshot = store.active().unwrap();
                            assert_eq!(snapshot.len(), 1);
                            assert!(snapshot.iter().all(|p| p.version == snapshot.version));
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(store.active_version(), Some(201));
    }
}
