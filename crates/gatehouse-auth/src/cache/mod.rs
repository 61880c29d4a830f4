//! Two-tier snapshot cache.
//!
//! ```text
//! get(identity) → local tier (process memory)
//!               → miss? persisted tier (survives restart) → valid? promote
//!               → miss in both → None, caller fetches
//! ```
//!
//! Both tiers share one TTL. The persisted tier is best-effort: its failures
//! are logged and the cache carries on with the local tier alone.

pub mod sqlite;

pub use sqlite::SqliteSnapshotStore;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, TimeDelta, Utc};
use gatehouse_core::config::CacheConfig;
use gatehouse_core::{CacheEntry, Clock, Identity, PermissionError, Snapshot};

/// Format version written with every persisted entry. Rows carrying any
/// other version are ignored and purged.
pub const CACHE_FORMAT_VERSION: u32 = 1;

/// Storage behind the persisted tier.
pub trait SnapshotPersistence: Send + Sync {
    /// Every entry of the current format version, expired or not.
    fn load_all(&self) -> Result<Vec<CacheEntry>, PermissionError>;
    fn load(&self, identity: &Identity) -> Result<Option<CacheEntry>, PermissionError>;
    fn store(&self, entry: &CacheEntry) -> Result<(), PermissionError>;
    fn remove(&self, identity: &Identity) -> Result<(), PermissionError>;
    fn clear(&self) -> Result<(), PermissionError>;
    /// Drop rows that expired before `now` or carry a foreign format version.
    fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, PermissionError>;
}

/// Invalidation counters observed for one identity.
///
/// A snapshot obtained under one generation must not be trusted once the
/// generation for its identity has moved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Generation {
    /// Bumped by `invalidate_all`.
    pub global: u64,
    /// Bumped by `invalidate` of this identity.
    pub identity: u64,
}

#[derive(Default)]
struct Tiers {
    local: HashMap<Identity, CacheEntry>,
    /// Persisted rows fetched at or before these instants are stale: their
    /// removal failed, so they must not be promoted.
    tombstones: HashMap<Identity, DateTime<Utc>>,
    stale_before: Option<DateTime<Utc>>,
    global_generation: u64,
    generations: HashMap<Identity, u64>,
}

impl Tiers {
    fn generation(&self, identity: &Identity) -> Generation {
        Generation {
            global: self.global_generation,
            identity: self.generations.get(identity).copied().unwrap_or(0),
        }
    }

    fn is_stale(&self, entry: &CacheEntry) -> bool {
        let fetched_at = entry.snapshot.fetched_at();
        self.stale_before.is_some_and(|t| fetched_at <= t)
            || self
                .tombstones
                .get(entry.snapshot.identity())
                .is_some_and(|t| fetched_at <= *t)
    }
}

/// Process-wide snapshot cache. Construct once and share by `Arc`.
pub struct CacheStore {
    ttl: TimeDelta,
    clock: Arc<dyn Clock>,
    tiers: Mutex<Tiers>,
    persisted: Option<Box<dyn SnapshotPersistence>>,
}

impl CacheStore {
    /// A cache with only the local tier.
    pub fn new(ttl: TimeDelta, clock: Arc<dyn Clock>) -> Self {
        Self {
            ttl,
            clock,
            tiers: Mutex::new(Tiers::default()),
            persisted: None,
        }
    }

    pub fn with_persistence(mut self, persistence: Box<dyn SnapshotPersistence>) -> Self {
        self.persisted = Some(persistence);
        self
    }

    /// Build from configuration, opening the SQLite persisted tier when enabled.
    ///
    /// A persisted tier that cannot be opened is logged and skipped.
    pub fn from_config(config: &CacheConfig, clock: Arc<dyn Clock>) -> Self {
        let store = Self::new(config.ttl(), clock);
        if !config.persist {
            return store;
        }
        match SqliteSnapshotStore::open(&config.path) {
            Ok(persisted) => store.with_persistence(Box::new(persisted)),
            Err(e) => {
                tracing::warn!(path = %config.path, error = %e, "persisted cache unavailable; using memory only");
                store
            }
        }
    }

    pub fn ttl(&self) -> TimeDelta {
        self.ttl
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Current invalidation generation for `identity`.
    pub fn generation(&self, identity: &Identity) -> Generation {
        self.tiers().generation(identity)
    }

    fn tiers(&self) -> MutexGuard<'_, Tiers> {
        self.tiers.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Warm the local tier from the persisted tier. Returns how many entries were loaded.
    pub fn init(&self) -> usize {
        let Some(persisted) = &self.persisted else {
            return 0;
        };
        let now = self.clock.now();
        if let Err(e) = persisted.purge_expired(now) {
            tracing::warn!(error = %e, "failed to purge expired cache rows");
        }
        let entries = match persisted.load_all() {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(error = %e, "failed to read persisted cache; starting cold");
                return 0;
            }
        };

        let mut tiers = self.tiers();
        let mut warmed = 0;
        for entry in entries {
            if entry.is_valid_at(now) && !tiers.is_stale(&entry) {
                tiers
                    .local
                    .insert(entry.snapshot.identity().clone(), entry);
                warmed += 1;
            }
        }
        tracing::debug!(warmed, "warmed local cache tier");
        warmed
    }

    /// Valid entry for `identity`, if any tier has one.
    pub fn get(&self, identity: &Identity) -> Option<CacheEntry> {
        let now = self.clock.now();
        let mut tiers = self.tiers();

        if let Some(entry) = tiers.local.get(identity) {
            if entry.is_valid_at(now) {
                tracing::debug!(%identity, "cache hit (local)");
                return Some(entry.clone());
            }
            tiers.local.remove(identity);
        }

        let persisted = self.persisted.as_ref()?;
        match persisted.load(identity) {
            Ok(Some(entry)) if entry.is_valid_at(now) && !tiers.is_stale(&entry) => {
                tracing::debug!(%identity, "cache hit (persisted); promoting");
                tiers.local.insert(identity.clone(), entry.clone());
                Some(entry)
            }
            Ok(_) => {
                tracing::debug!(%identity, "cache miss");
                None
            }
            Err(e) => {
                tracing::warn!(%identity, error = %e, "persisted cache read failed");
                None
            }
        }
    }

    /// Store `snapshot` with `expires_at = now + ttl`.
    pub fn put(&self, identity: &Identity, snapshot: Arc<Snapshot>) -> CacheEntry {
        let mut tiers = self.tiers();
        self.put_locked(&mut tiers, identity, snapshot)
    }

    /// Like [`put`](Self::put), but only if `identity` was not invalidated
    /// since `generation` was observed.
    pub fn put_if_generation(
        &self,
        identity: &Identity,
        snapshot: Arc<Snapshot>,
        generation: Generation,
    ) -> Option<CacheEntry> {
        let mut tiers = self.tiers();
        if tiers.generation(identity) != generation {
            tracing::debug!(%identity, "discarding snapshot fetched before invalidation");
            return None;
        }
        Some(self.put_locked(&mut tiers, identity, snapshot))
    }

    fn put_locked(
        &self,
        tiers: &mut Tiers,
        identity: &Identity,
        snapshot: Arc<Snapshot>,
    ) -> CacheEntry {
        let entry = CacheEntry::new(snapshot, self.clock.now() + self.ttl);
        tiers.local.insert(identity.clone(), entry.clone());

        if let Some(persisted) = &self.persisted {
            match persisted.store(&entry) {
                Ok(()) => {
                    tiers.tombstones.remove(identity);
                }
                Err(e) => {
                    tracing::warn!(%identity, error = %e, "failed to persist snapshot; keeping in memory only");
                }
            }
        }
        entry
    }

    /// Drop `identity` from both tiers.
    pub fn invalidate(&self, identity: &Identity) {
        let mut tiers = self.tiers();
        *tiers.generations.entry(identity.clone()).or_insert(0) += 1;
        tiers.local.remove(identity);

        if let Some(persisted) = &self.persisted {
            if let Err(e) = persisted.remove(identity) {
                tracing::warn!(%identity, error = %e, "failed to remove persisted snapshot");
                tiers.tombstones.insert(identity.clone(), self.clock.now());
            }
        }
        tracing::debug!(%identity, "invalidated cached permissions");
    }

    /// Drop every entry from both tiers.
    pub fn invalidate_all(&self) {
        let mut tiers = self.tiers();
        tiers.global_generation += 1;
        tiers.local.clear();
        tiers.tombstones.clear();

        if let Some(persisted) = &self.persisted {
            if let Err(e) = persisted.clear() {
                tracing::warn!(error = %e, "failed to clear persisted cache");
                tiers.stale_before = Some(self.clock.now());
            }
        }
        tracing::info!("invalidated all cached permissions");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatehouse_core::ManualClock;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn ttl() -> TimeDelta {
        TimeDelta::minutes(5)
    }

    fn snapshot(id: &str, at: DateTime<Utc>) -> Arc<Snapshot> {
        Arc::new(Snapshot::member(id.into(), vec![], vec![], at))
    }

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(Utc::now()))
    }

    /// In-memory persisted tier with switchable failures.
    #[derive(Default)]
    struct MemoryPersistence {
        rows: Mutex<HashMap<Identity, CacheEntry>>,
        fail_writes: AtomicBool,
        fail_reads: AtomicBool,
    }

    impl MemoryPersistence {
        fn rows(&self) -> MutexGuard<'_, HashMap<Identity, CacheEntry>> {
            self.rows.lock().unwrap()
        }

        fn write_guard(&self) -> Result<(), PermissionError> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(PermissionError::CacheWrite("quota exceeded".into()));
            }
            Ok(())
        }

        fn read_guard(&self) -> Result<(), PermissionError> {
            if self.fail_reads.load(Ordering::SeqCst) {
                return Err(PermissionError::CacheRead("corrupt".into()));
            }
            Ok(())
        }
    }

    impl SnapshotPersistence for Arc<MemoryPersistence> {
        fn load_all(&self) -> Result<Vec<CacheEntry>, PermissionError> {
            self.read_guard()?;
            Ok(self.rows().values().cloned().collect())
        }

        fn load(&self, identity: &Identity) -> Result<Option<CacheEntry>, PermissionError> {
            self.read_guard()?;
            Ok(self.rows().get(identity).cloned())
        }

        fn store(&self, entry: &CacheEntry) -> Result<(), PermissionError> {
            self.write_guard()?;
            self.rows()
                .insert(entry.snapshot.identity().clone(), entry.clone());
            Ok(())
        }

        fn remove(&self, identity: &Identity) -> Result<(), PermissionError> {
            self.write_guard()?;
            self.rows().remove(identity);
            Ok(())
        }

        fn clear(&self) -> Result<(), PermissionError> {
            self.write_guard()?;
            self.rows().clear();
            Ok(())
        }

        fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, PermissionError> {
            self.write_guard()?;
            let mut rows = self.rows();
            let before = rows.len();
            rows.retain(|_, e| e.is_valid_at(now));
            Ok(before - rows.len())
        }
    }

    fn persisted_store(clock: Arc<ManualClock>) -> (CacheStore, Arc<MemoryPersistence>) {
        let mem = Arc::new(MemoryPersistence::default());
        let store = CacheStore::new(ttl(), clock).with_persistence(Box::new(mem.clone()));
        (store, mem)
    }

    #[test]
    fn entry_valid_until_ttl_elapses() {
        let clock = clock();
        let store = CacheStore::new(ttl(), clock.clone());
        let id = Identity::new("U1");
        let written_at = clock.now();
        let entry = store.put(&id, snapshot("U1", written_at));
        assert_eq!(entry.expires_at, written_at + ttl());

        clock.advance(ttl() - TimeDelta::milliseconds(1));
        assert!(store.get(&id).is_some());

        clock.advance(TimeDelta::milliseconds(1));
        assert!(store.get(&id).is_none());
    }

    #[test]
    fn invalidate_removes_only_that_identity() {
        let clock = clock();
        let store = CacheStore::new(ttl(), clock.clone());
        store.put(&"U1".into(), snapshot("U1", clock.now()));
        store.put(&"U2".into(), snapshot("U2", clock.now()));
        let u1 = store.generation(&"U1".into());
        let u2 = store.generation(&"U2".into());

        store.invalidate(&"U1".into());
        assert!(store.get(&"U1".into()).is_none());
        assert!(store.get(&"U2".into()).is_some());
        assert_ne!(store.generation(&"U1".into()), u1);
        assert_eq!(store.generation(&"U2".into()), u2);
    }

    #[test]
    fn invalidate_all_clears_both_tiers() {
        let clock = clock();
        let (store, mem) = persisted_store(clock.clone());
        store.put(&"U1".into(), snapshot("U1", clock.now()));
        store.put(&"U2".into(), snapshot("U2", clock.now()));
        assert_eq!(mem.rows().len(), 2);

        store.invalidate_all();
        assert!(store.get(&"U1".into()).is_none());
        assert!(store.get(&"U2".into()).is_none());
        assert!(mem.rows().is_empty());
    }

    #[test]
    fn stale_generation_is_not_written() {
        let clock = clock();
        let store = CacheStore::new(ttl(), clock.clone());
        let observed = store.generation(&"U1".into());
        store.invalidate_all();

        let written = store.put_if_generation(&"U1".into(), snapshot("U1", clock.now()), observed);
        assert!(written.is_none());
        assert!(store.get(&"U1".into()).is_none());

        let current = store.generation(&"U1".into());
        assert_ne!(current.global, observed.global);
        assert!(
            store
                .put_if_generation(&"U1".into(), snapshot("U1", clock.now()), current)
                .is_some()
        );
    }

    #[test]
    fn invalidating_one_identity_keeps_others_writable() {
        let clock = clock();
        let store = CacheStore::new(ttl(), clock.clone());
        let observed = store.generation(&"U1".into());

        store.invalidate(&"U2".into());
        assert!(
            store
                .put_if_generation(&"U1".into(), snapshot("U1", clock.now()), observed)
                .is_some()
        );

        store.invalidate(&"U1".into());
        assert!(
            store
                .put_if_generation(&"U1".into(), snapshot("U1", clock.now()), observed)
                .is_none()
        );
    }

    #[test]
    fn persisted_entry_is_promoted_on_read() {
        let clock = clock();
        let mem = Arc::new(MemoryPersistence::default());
        let first = CacheStore::new(ttl(), clock.clone()).with_persistence(Box::new(mem.clone()));
        first.put(&"U1".into(), snapshot("U1", clock.now()));

        // A fresh process: empty local tier, same persisted tier.
        let second = CacheStore::new(ttl(), clock.clone()).with_persistence(Box::new(mem.clone()));
        assert!(second.get(&"U1".into()).is_some());

        mem.rows().clear();
        assert!(second.get(&"U1".into()).is_some(), "promoted into local tier");
    }

    #[test]
    fn init_warms_only_valid_entries() {
        let clock = clock();
        let mem = Arc::new(MemoryPersistence::default());
        let first = CacheStore::new(ttl(), clock.clone()).with_persistence(Box::new(mem.clone()));
        first.put(&"OLD".into(), snapshot("OLD", clock.now()));
        clock.advance(TimeDelta::minutes(3));
        first.put(&"NEW".into(), snapshot("NEW", clock.now()));
        clock.advance(TimeDelta::minutes(3));

        let second = CacheStore::new(ttl(), clock.clone()).with_persistence(Box::new(mem.clone()));
        assert_eq!(second.init(), 1);
        assert_eq!(mem.rows().len(), 1, "expired row purged");
        assert!(second.get(&"NEW".into()).is_some());
        assert!(second.get(&"OLD".into()).is_none());
    }

    #[test]
    fn persist_failure_keeps_local_tier_working() {
        let clock = clock();
        let (store, mem) = persisted_store(clock.clone());
        mem.fail_writes.store(true, Ordering::SeqCst);

        let entry = store.put(&"U1".into(), snapshot("U1", clock.now()));
        assert_eq!(store.get(&"U1".into()), Some(entry));
        assert!(mem.rows().is_empty());
    }

    #[test]
    fn read_failure_is_a_miss() {
        let clock = clock();
        let (store, mem) = persisted_store(clock.clone());
        mem.fail_reads.store(true, Ordering::SeqCst);
        assert!(store.get(&"U1".into()).is_none());
        assert_eq!(store.init(), 0);
    }

    #[test]
    fn failed_removal_blocks_promotion_of_stale_row() {
        let clock = clock();
        let (store, mem) = persisted_store(clock.clone());
        store.put(&"U1".into(), snapshot("U1", clock.now()));

        mem.fail_writes.store(true, Ordering::SeqCst);
        store.invalidate(&"U1".into());
        assert_eq!(mem.rows().len(), 1, "row survived failed removal");
        assert!(store.get(&"U1".into()).is_none());

        mem.fail_writes.store(false, Ordering::SeqCst);
        clock.advance(TimeDelta::seconds(1));
        store.put(&"U1".into(), snapshot("U1", clock.now()));
        assert!(store.get(&"U1".into()).is_some());
    }

    #[test]
    fn failed_clear_blocks_promotion_of_every_older_row() {
        let clock = clock();
        let (store, mem) = persisted_store(clock.clone());
        store.put(&"U1".into(), snapshot("U1", clock.now()));

        mem.fail_writes.store(true, Ordering::SeqCst);
        store.invalidate_all();
        mem.fail_writes.store(false, Ordering::SeqCst);

        assert!(store.get(&"U1".into()).is_none());
    }

    #[test]
    fn from_config_without_persistence() {
        let config = CacheConfig {
            ttl_secs: 600,
            persist: false,
            path: String::new(),
        };
        let store = CacheStore::from_config(&config, clock());
        assert_eq!(store.ttl(), TimeDelta::minutes(10));
        assert_eq!(store.init(), 0);
    }
}
