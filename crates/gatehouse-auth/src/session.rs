//! Per-consumer view of the signed-in identity's permissions.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use gatehouse_core::{Group, Identity, Permission, PermissionError, Snapshot, evaluate};

use crate::cache::Generation;
use crate::coordinator::FetchCoordinator;
use crate::guard::{self, GuardState, PermissionGuard, RenderDecision, Requirement};
use crate::identity::IdentityProvider;

struct SessionState {
    identity: Option<Identity>,
    guard: GuardState,
    /// Cache generation a `Ready` snapshot was loaded under. Once the cache
    /// moves past it the snapshot is no longer served.
    generation: Generation,
    /// Bumped by every load and sign-out. A fetch result is applied only if
    /// the epoch it started under is still current.
    epoch: u64,
}

/// Permission state for whoever the [`IdentityProvider`] says is signed in.
///
/// Queries are synchronous and read the last loaded state. They answer `false`
/// while loading, after an error, and as soon as the shared cache drops the
/// identity (sign-out from any session, or a direct invalidation).
pub struct PermissionSession {
    coordinator: Arc<FetchCoordinator>,
    identities: Arc<dyn IdentityProvider>,
    state: RwLock<SessionState>,
    debug_errors: bool,
}

impl PermissionSession {
    pub fn new(coordinator: Arc<FetchCoordinator>, identities: Arc<dyn IdentityProvider>) -> Self {
        Self {
            coordinator,
            identities,
            state: RwLock::new(SessionState {
                identity: None,
                guard: GuardState::Loading,
                generation: Generation::default(),
                epoch: 0,
            }),
            debug_errors: false,
        }
    }

    /// Hand fetch errors to guard error renderers instead of the fallback.
    pub fn with_debug_errors(mut self, enabled: bool) -> Self {
        self.debug_errors = enabled;
        self
    }

    fn read(&self) -> RwLockReadGuard<'_, SessionState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, SessionState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn coordinator(&self) -> &Arc<FetchCoordinator> {
        &self.coordinator
    }

    pub fn debug_errors(&self) -> bool {
        self.debug_errors
    }

    /// Bring the state up to date for the current identity, using the cache.
    pub async fn load(&self) -> GuardState {
        self.sync(false).await
    }

    /// Re-fetch from the backend, bypassing the cache.
    pub async fn refresh_permissions(&self) -> GuardState {
        self.sync(true).await
    }

    /// Try again after an error.
    pub async fn retry(&self) -> GuardState {
        self.sync(false).await
    }

    async fn sync(&self, force_refresh: bool) -> GuardState {
        let Some(identity) = self.identities.current_identity().await else {
            let mut state = self.write();
            state.epoch += 1;
            state.identity = None;
            state.guard = GuardState::Error(PermissionError::NotAuthenticated);
            return state.guard.clone();
        };

        let cache = self.coordinator.cache();
        let (epoch, generation) = {
            let mut state = self.write();
            state.epoch += 1;
            // Observed before the cache read, so a concurrent invalidation is never missed.
            let generation = cache.generation(&identity);
            let same_identity = state.identity.as_ref() == Some(&identity);
            if !same_identity {
                tracing::debug!(%identity, "identity changed");
                state.identity = Some(identity.clone());
            }

            if !force_refresh {
                if let Some(snapshot) = self.coordinator.cached(&identity) {
                    state.guard = GuardState::Ready(snapshot);
                    state.generation = generation;
                    return self.resolve(&state);
                }
            }

            // An expired snapshot for the same identity keeps serving until its replacement lands.
            let keep_ready = !force_refresh
                && same_identity
                && matches!(self.resolve(&state), GuardState::Ready(_));
            if !keep_ready {
                state.guard = GuardState::Loading;
            }
            (state.epoch, generation)
        };

        let result = self.coordinator.ensure_snapshot(&identity, force_refresh).await;

        let mut state = self.write();
        if state.epoch != epoch {
            tracing::debug!(%identity, "discarding permission result superseded while loading");
            return self.resolve(&state);
        }
        match result {
            Ok(snapshot) => {
                state.guard = GuardState::Ready(snapshot);
                state.generation = generation;
            }
            Err(e) => state.guard = GuardState::Error(e),
        }
        self.resolve(&state)
    }

    /// The effective state: a `Ready` snapshot whose identity was invalidated
    /// since it was loaded fails closed.
    fn resolve(&self, state: &SessionState) -> GuardState {
        let (GuardState::Ready(snapshot), Some(identity)) = (&state.guard, &state.identity) else {
            return state.guard.clone();
        };
        let current = self.coordinator.cache().generation(identity);
        if current == state.generation {
            GuardState::Ready(snapshot.clone())
        } else if current.global != state.generation.global {
            GuardState::Error(PermissionError::NotAuthenticated)
        } else {
            // Evicted for this identity only: stale until the next load.
            GuardState::Loading
        }
    }

    /// Drop every cached snapshot and fail closed until the next load.
    pub fn sign_out(&self) {
        self.coordinator.invalidate_all();
        let mut state = self.write();
        state.epoch += 1;
        if let Some(identity) = state.identity.take() {
            tracing::info!(%identity, "signed out; permissions cleared");
        }
        state.guard = GuardState::Error(PermissionError::NotAuthenticated);
    }

    pub fn state(&self) -> GuardState {
        self.resolve(&self.read())
    }

    pub fn identity(&self) -> Option<Identity> {
        self.read().identity.clone()
    }

    pub fn snapshot(&self) -> Option<Arc<Snapshot>> {
        match self.state() {
            GuardState::Ready(snapshot) => Some(snapshot),
            _ => None,
        }
    }

    pub fn has_permission(&self, resource: &str, action: &str) -> bool {
        evaluate(self.snapshot().as_deref(), resource, action)
    }

    pub fn can_view(&self, resource: &str) -> bool {
        gatehouse_core::can_view(self.snapshot().as_deref(), resource)
    }

    pub fn can_edit(&self, resource: &str) -> bool {
        gatehouse_core::can_edit(self.snapshot().as_deref(), resource)
    }

    pub fn can_create(&self, resource: &str) -> bool {
        gatehouse_core::can_create(self.snapshot().as_deref(), resource)
    }

    pub fn can_delete(&self, resource: &str) -> bool {
        gatehouse_core::can_delete(self.snapshot().as_deref(), resource)
    }

    pub fn can_manage(&self, resource: &str) -> bool {
        gatehouse_core::can_manage(self.snapshot().as_deref(), resource)
    }

    pub fn is_admin(&self) -> bool {
        self.snapshot().is_some_and(|s| s.is_admin())
    }

    pub fn user_groups(&self) -> Vec<Group> {
        self.snapshot()
            .map(|s| s.groups().to_vec())
            .unwrap_or_default()
    }

    /// Enumerated permissions. Empty for administrators, who are not enumerated.
    pub fn user_permissions(&self) -> Vec<Permission> {
        self.snapshot()
            .map(|s| s.permissions().to_vec())
            .unwrap_or_default()
    }

    pub fn loading(&self) -> bool {
        self.state().is_loading()
    }

    pub fn error(&self) -> Option<PermissionError> {
        self.state().error().cloned()
    }

    pub fn decide(&self, resource: &str, action: &str) -> RenderDecision {
        guard::decide(&self.state(), resource, action)
    }

    pub fn decide_requirement(&self, requirement: &Requirement) -> RenderDecision {
        guard::decide_requirement(&self.state(), requirement)
    }

    /// Render `content` behind `guard` against the current state.
    pub fn render<T>(&self, guard: PermissionGuard<'_, T>, content: impl FnOnce() -> T) -> Option<T> {
        let state = self.state();
        guard.render(&state, self.debug_errors, content)
    }
}
