//! Single-flight snapshot fetching.
//!
//! At most one backend fetch per identity is in flight. Later callers for the
//! same identity, forced or not, await that fetch instead of starting another.
//! The fetch runs on its own task, so a caller that goes away does not cancel
//! work other callers are waiting on.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use gatehouse_core::{Clock, Identity, PermissionError, Snapshot};

use crate::cache::CacheStore;
use crate::store::{PermissionSource, fetch_snapshot};

type SharedFetch = Shared<BoxFuture<'static, Result<Arc<Snapshot>, PermissionError>>>;

struct InFlight {
    id: u64,
    fetch: SharedFetch,
}

type InFlightMap = Arc<Mutex<HashMap<Identity, InFlight>>>;

fn lock(map: &InFlightMap) -> MutexGuard<'_, HashMap<Identity, InFlight>> {
    map.lock().unwrap_or_else(|e| e.into_inner())
}

pub struct FetchCoordinator {
    source: Arc<dyn PermissionSource>,
    cache: Arc<CacheStore>,
    clock: Arc<dyn Clock>,
    in_flight: InFlightMap,
    next_id: AtomicU64,
    backend_fetches: Arc<AtomicU64>,
}

impl FetchCoordinator {
    pub fn new(
        source: Arc<dyn PermissionSource>,
        cache: Arc<CacheStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            source,
            cache,
            clock,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
            backend_fetches: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }

    /// Number of backend fetches started so far.
    pub fn backend_fetches(&self) -> u64 {
        self.backend_fetches.load(Ordering::SeqCst)
    }

    pub fn is_in_flight(&self, identity: &Identity) -> bool {
        lock(&self.in_flight).contains_key(identity)
    }

    /// Cached snapshot for `identity`, without fetching.
    pub fn cached(&self, identity: &Identity) -> Option<Arc<Snapshot>> {
        self.cache.get(identity).map(|entry| entry.snapshot)
    }

    /// Return a valid snapshot for `identity`, fetching it if needed.
    ///
    /// `force_refresh` skips the cache read but still joins an in-flight fetch.
    pub async fn ensure_snapshot(
        &self,
        identity: &Identity,
        force_refresh: bool,
    ) -> Result<Arc<Snapshot>, PermissionError> {
        if !force_refresh {
            if let Some(snapshot) = self.cached(identity) {
                return Ok(snapshot);
            }
        }
        self.join_or_start(identity).await
    }

    fn join_or_start(&self, identity: &Identity) -> SharedFetch {
        // Check and register under one lock so two callers cannot both start a fetch.
        let mut in_flight = lock(&self.in_flight);
        if let Some(existing) = in_flight.get(identity) {
            tracing::debug!(%identity, "joining in-flight permission fetch");
            return existing.fetch.clone();
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let generation = self.cache.generation(identity);
        let source = self.source.clone();
        let cache = self.cache.clone();
        let clock = self.clock.clone();
        let map = self.in_flight.clone();
        let counter = self.backend_fetches.clone();
        let who = identity.clone();

        let task = tokio::spawn(async move {
            counter.fetch_add(1, Ordering::SeqCst);
            let result = fetch_snapshot(source.as_ref(), &who, clock.as_ref())
                .await
                .map(Arc::new);

            match &result {
                Ok(snapshot) => {
                    tracing::info!(
                        identity = %who,
                        is_admin = snapshot.is_admin(),
                        groups = snapshot.groups().len(),
                        permissions = snapshot.permissions().len(),
                        "fetched permissions"
                    );
                    cache.put_if_generation(&who, snapshot.clone(), generation);
                }
                Err(e) => tracing::warn!(identity = %who, error = %e, "permission fetch failed"),
            }

            let mut in_flight = lock(&map);
            if in_flight.get(&who).is_some_and(|f| f.id == id) {
                in_flight.remove(&who);
            }
            result
        });

        let fetch = async move {
            match task.await {
                Ok(result) => result,
                Err(e) => Err(PermissionError::Fetch(format!("fetch task failed: {e}"))),
            }
        }
        .boxed()
        .shared();

        in_flight.insert(
            identity.clone(),
            InFlight {
                id,
                fetch: fetch.clone(),
            },
        );
        fetch
    }

    /// Forget `identity`: drop its cache entry and detach any in-flight fetch.
    pub fn invalidate(&self, identity: &Identity) {
        lock(&self.in_flight).remove(identity);
        self.cache.invalidate(identity);
    }

    /// Forget everyone. Called on sign-out.
    pub fn invalidate_all(&self) {
        lock(&self.in_flight).clear();
        self.cache.invalidate_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{TimeDelta, Utc};
    use gatehouse_core::{Group, ManualClock, Permission};
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    /// Counts admin checks (one per fetch) and optionally blocks until released.
    struct GatedSource {
        calls: AtomicUsize,
        gate: Option<Arc<Notify>>,
        fail: bool,
    }

    impl GatedSource {
        fn open() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                gate: None,
                fail: false,
            }
        }

        fn gated(gate: Arc<Notify>) -> Self {
            Self {
                gate: Some(gate),
                ..Self::open()
            }
        }
    }

    #[async_trait]
    impl PermissionSource for GatedSource {
        async fn is_administrator(&self, _identity: &Identity) -> Result<bool, PermissionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if self.fail {
                return Err(PermissionError::Fetch("backend down".into()));
            }
            Ok(false)
        }

        async fn groups_for_identity(
            &self,
            _identity: &Identity,
        ) -> Result<Vec<Group>, PermissionError> {
            Ok(vec![Group {
                id: "g1".into(),
                name: "editors".into(),
                description: None,
            }])
        }

        async fn permissions_for_groups(
            &self,
            _group_ids: &[String],
        ) -> Result<Vec<Permission>, PermissionError> {
            Ok(vec![Permission {
                id: "p1".into(),
                name: "expressions.edit".into(),
                resource: "expressions".into(),
                action: "edit".into(),
            }])
        }
    }

    fn coordinator(source: Arc<GatedSource>) -> (FetchCoordinator, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let cache = Arc::new(CacheStore::new(TimeDelta::minutes(5), clock.clone()));
        (FetchCoordinator::new(source, cache, clock.clone()), clock)
    }

    #[tokio::test]
    async fn concurrent_calls_share_one_fetch() {
        let gate = Arc::new(Notify::new());
        let source = Arc::new(GatedSource::gated(gate.clone()));
        let (coord, _) = coordinator(source.clone());
        let id = Identity::new("U1");

        let (a, b, ()) = tokio::join!(
            coord.ensure_snapshot(&id, false),
            coord.ensure_snapshot(&id, false),
            async {
                tokio::task::yield_now().await;
                gate.notify_one();
            }
        );

        let (a, b) = (a.unwrap(), b.unwrap());
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert_eq!(coord.backend_fetches(), 1);
        assert!(!coord.is_in_flight(&id));
    }

    #[tokio::test]
    async fn forced_refreshes_collapse_into_one_fetch() {
        let gate = Arc::new(Notify::new());
        let source = Arc::new(GatedSource::gated(gate.clone()));
        let (coord, _) = coordinator(source.clone());
        let id = Identity::new("U1");

        let (a, b, c, ()) = tokio::join!(
            coord.ensure_snapshot(&id, true),
            coord.ensure_snapshot(&id, true),
            coord.ensure_snapshot(&id, false),
            async {
                tokio::task::yield_now().await;
                gate.notify_one();
            }
        );

        assert!(a.is_ok() && b.is_ok() && c.is_ok());
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cached_snapshot_avoids_backend_until_forced() {
        let source = Arc::new(GatedSource::open());
        let (coord, _) = coordinator(source.clone());
        let id = Identity::new("U1");

        coord.ensure_snapshot(&id, false).await.unwrap();
        coord.ensure_snapshot(&id, false).await.unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        coord.ensure_snapshot(&id, true).await.unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn expired_entry_triggers_refetch() {
        let source = Arc::new(GatedSource::open());
        let (coord, clock) = coordinator(source.clone());
        let id = Identity::new("U1");

        coord.ensure_snapshot(&id, false).await.unwrap();
        clock.advance(TimeDelta::minutes(5));
        coord.ensure_snapshot(&id, false).await.unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failure_clears_marker_and_is_not_cached() {
        let source = Arc::new(GatedSource {
            fail: true,
            ..GatedSource::open()
        });
        let (coord, _) = coordinator(source.clone());
        let id = Identity::new("U1");

        let err = coord.ensure_snapshot(&id, false).await.unwrap_err();
        assert!(matches!(err, PermissionError::Fetch(_)));
        assert!(!coord.is_in_flight(&id));
        assert!(coord.cached(&id).is_none());

        coord.ensure_snapshot(&id, false).await.unwrap_err();
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn invalidate_all_forces_fresh_fetch() {
        let source = Arc::new(GatedSource::open());
        let (coord, _) = coordinator(source.clone());
        let id = Identity::new("U1");

        coord.ensure_snapshot(&id, false).await.unwrap();
        coord.invalidate_all();
        coord.ensure_snapshot(&id, false).await.unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn fetch_in_flight_during_sign_out_does_not_repopulate_cache() {
        let gate = Arc::new(Notify::new());
        let source = Arc::new(GatedSource::gated(gate.clone()));
        let (coord, _) = coordinator(source.clone());
        let id = Identity::new("U1");

        let pending = coord.join_or_start(&id);
        tokio::task::yield_now().await;
        coord.invalidate_all();
        assert!(!coord.is_in_flight(&id));

        gate.notify_one();
        pending.await.unwrap();
        assert!(coord.cached(&id).is_none());
    }

    #[tokio::test]
    async fn invalidating_another_identity_keeps_in_flight_result() {
        let gate = Arc::new(Notify::new());
        let source = Arc::new(GatedSource::gated(gate.clone()));
        let (coord, _) = coordinator(source.clone());
        let id = Identity::new("U1");

        let pending = coord.join_or_start(&id);
        tokio::task::yield_now().await;
        coord.invalidate(&Identity::new("U2"));
        assert!(coord.is_in_flight(&id));

        gate.notify_one();
        pending.await.unwrap();
        assert!(coord.cached(&id).is_some());
        coord.ensure_snapshot(&id, false).await.unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dropped_caller_does_not_cancel_shared_fetch() {
        let gate = Arc::new(Notify::new());
        let source = Arc::new(GatedSource::gated(gate.clone()));
        let (coord, _) = coordinator(source.clone());
        let id = Identity::new("U1");

        drop(coord.join_or_start(&id));
        gate.notify_one();

        // The spawned fetch completes and populates the cache for the next caller.
        for _ in 0..100 {
            if coord.cached(&id).is_some() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(coord.cached(&id).is_some());
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }
}
