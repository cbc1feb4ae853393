//! Run-wide shared state: per-collection tallies and the manifest.
//!
//! [`RunState`] is owned by the reconciler for the duration of a run and
//! shared by reference (`Arc`) with every file task. Tasks run on a
//! multi-threaded runtime, so every mutation goes through a mutex that is
//! never held across an `.await`.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tracing::debug;

use crate::collection::{CacheMode, Collection, CollectionKey, FileRecord};
use crate::manifest::Manifest;

/// Running byte counters for one collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Tally {
    /// Bytes of files that matched their expected digest.
    pub intact: u64,
    /// Bytes of files that did not.
    pub altered: u64,
    /// Expected collection size recorded in the manifest.
    pub total: u64,
}

/// Counter a verified file is added to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TallyBucket {
    /// Digest matched.
    Intact,
    /// Digest mismatched or the file could not be fetched.
    Altered,
}

/// Point-in-time copy of every tally: `version -> mode -> tally`.
pub type Snapshot = BTreeMap<String, BTreeMap<CacheMode, Tally>>;

/// Process-lifetime tallies keyed by collection.
#[derive(Debug, Default)]
pub struct TallyStore {
    tallies: Mutex<BTreeMap<CollectionKey, Tally>>,
}

impl TallyStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<CollectionKey, Tally>> {
        self.tallies.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Starts a collection at `{intact: 0, altered: 0, total}`.
    pub fn init(&self, key: &CollectionKey, total: u64) {
        self.lock().insert(
            key.clone(),
            Tally {
                intact: 0,
                altered: 0,
                total,
            },
        );
    }

    /// Adds `bytes` to one bucket of a collection.
    pub fn increment(&self, key: &CollectionKey, bucket: TallyBucket, bytes: u64) {
        let mut tallies = self.lock();
        let tally = tallies.entry(key.clone()).or_default();
        match bucket {
            TallyBucket::Intact => tally.intact = tally.intact.saturating_add(bytes),
            TallyBucket::Altered => tally.altered = tally.altered.saturating_add(bytes),
        }
    }

    /// Adds a discovered file: `intact += bytes` and `total += bytes` in one step.
    pub fn register(&self, key: &CollectionKey, bytes: u64) {
        let mut tallies = self.lock();
        let tally = tallies.entry(key.clone()).or_default();
        tally.intact = tally.intact.saturating_add(bytes);
        tally.total = tally.total.saturating_add(bytes);
    }

    /// Zeroes every counter of a collection.
    pub fn reset(&self, key: &CollectionKey) {
        self.lock().insert(key.clone(), Tally::default());
    }

    /// Current tally of a collection.
    #[must_use]
    pub fn get(&self, key: &CollectionKey) -> Option<Tally> {
        self.lock().get(key).copied()
    }

    /// Copies every tally under a single lock.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        let mut snapshot = Snapshot::new();
        for (key, tally) in self.lock().iter() {
            snapshot
                .entry(key.version.clone())
                .or_default()
                .insert(key.mode, *tally);
        }
        snapshot
    }
}

/// Tallies plus manifest for one run.
#[derive(Debug)]
pub struct RunState {
    tallies: TallyStore,
    manifest: Mutex<Manifest>,
}

impl RunState {
    /// Creates run state, starting each collection's `total` at the size
    /// recorded in the manifest.
    #[must_use]
    pub fn new(manifest: Manifest, collections: &[Collection]) -> Self {
        let tallies = TallyStore::new();
        for collection in collections {
            let key = collection.key();
            let total = manifest
                .entry(&key.version)
                .map_or(0, |entry| entry.size(key.mode));
            tallies.init(key, total);
        }
        Self {
            tallies,
            manifest: Mutex::new(manifest),
        }
    }

    /// The tally store.
    #[must_use]
    pub fn tallies(&self) -> &TallyStore {
        &self.tallies
    }

    fn manifest(&self) -> MutexGuard<'_, Manifest> {
        self.manifest.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds a verified file's bytes to one bucket.
    pub fn tally(&self, record: &FileRecord, bucket: TallyBucket, bytes: u64) {
        self.tallies.increment(record.key(), bucket, bytes);
    }

    /// Registers a discovered file: tallied intact, added to `total`, and its
    /// digest recorded in the manifest.
    pub fn register(&self, record: &FileRecord, bytes: u64, digest: &str) {
        self.tallies.register(record.key(), bytes);
        self.manifest()
            .register(record.key(), record.rel_path(), digest, bytes);
        debug!(
            collection = %record.key(),
            path = record.rel_path(),
            bytes,
            "registered discovered file"
        );
    }

    /// Zeroes a collection's tally and clears its manifest section.
    pub fn unregister_collection(&self, key: &CollectionKey) {
        self.tallies.reset(key);
        self.manifest().clear_collection(key);
        debug!(collection = %key, "collection unregistered");
    }

    /// Snapshot of every tally.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        self.tallies.snapshot()
    }

    /// Whether the manifest needs rewriting.
    #[must_use]
    pub fn is_manifest_dirty(&self) -> bool {
        self.manifest().is_dirty()
    }

    /// Copy of the current manifest.
    #[must_use]
    pub fn manifest_snapshot(&self) -> Manifest {
        self.manifest().clone()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::collection::Origin;
    use std::sync::Arc;

    fn key(mode: CacheMode) -> CollectionKey {
        CollectionKey::new("beta-20100104", mode)
    }

    fn collection() -> Collection {
        Collection::new(
            key(CacheMode::Playable),
            "/cache/beta-20100104",
            Origin::parse("http://cdn.example.com/beta-20100104/").unwrap(),
            false,
        )
    }

    fn state() -> RunState {
        let manifest = Manifest::parse(
            r#"{"beta-20100104": {"playable_size": 100, "offline_size": 7, "playable": {}, "offline": {}}}"#,
        )
        .unwrap();
        RunState::new(manifest, &[collection()])
    }

    #[test]
    fn test_run_state_starts_from_manifest_size() {
        let state = state();
        assert_eq!(
            state.tallies().get(&key(CacheMode::Playable)),
            Some(Tally {
                intact: 0,
                altered: 0,
                total: 100
            })
        );
        assert_eq!(state.tallies().get(&key(CacheMode::Offline)), None);
    }

    #[test]
    fn test_increment_buckets() {
        let store = TallyStore::new();
        let key = key(CacheMode::Offline);
        store.init(&key, 10);
        store.increment(&key, TallyBucket::Intact, 4);
        store.increment(&key, TallyBucket::Altered, 3);
        store.increment(&key, TallyBucket::Intact, 1);
        assert_eq!(
            store.get(&key),
            Some(Tally {
                intact: 5,
                altered: 3,
                total: 10
            })
        );
    }

    #[test]
    fn test_register_updates_tally_and_manifest() {
        let state = state();
        let record = collection().record("data/x.pak", "").unwrap();

        state.register(&record, 25, "abcd");

        let tally = state.tallies().get(record.key()).unwrap();
        assert_eq!(tally.intact, 25);
        assert_eq!(tally.total, 125);
        assert!(state.is_manifest_dirty());
        let manifest = state.manifest_snapshot();
        let entry = manifest.entry("beta-20100104").unwrap();
        assert_eq!(entry.playable.get("data/x.pak"), Some("abcd"));
        assert_eq!(entry.playable_size, 125);
    }

    #[test]
    fn test_unregister_collection_zeroes_everything() {
        let state = state();
        let record = collection().record("data/x.pak", "").unwrap();
        state.register(&record, 25, "abcd");
        state.tally(&record, TallyBucket::Altered, 5);

        state.unregister_collection(record.key());

        assert_eq!(state.tallies().get(record.key()), Some(Tally::default()));
        let manifest = state.manifest_snapshot();
        let entry = manifest.entry("beta-20100104").unwrap();
        assert!(entry.playable.is_empty());
        assert_eq!(entry.playable_size, 0);
        assert_eq!(entry.offline_size, 7);
    }

    #[test]
    fn test_snapshot_serializes_nested_by_version_and_mode() {
        let state = state();
        let json = serde_json::to_string(&state.snapshot()).unwrap();
        assert_eq!(
            json,
            r#"{"beta-20100104":{"playable":{"intact":0,"altered":0,"total":100}}}"#
        );
    }

    #[test]
    fn test_concurrent_increments_are_not_lost() {
        let store = Arc::new(TallyStore::new());
        let key = key(CacheMode::Playable);
        store.init(&key, 0);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                let key = key.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        store.increment(&key, TallyBucket::Intact, 1);
                        store.register(&key, 1);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let tally = store.get(&key).unwrap();
        assert_eq!(tally.intact, 16_000);
        assert_eq!(tally.total, 8_000);
    }
}
