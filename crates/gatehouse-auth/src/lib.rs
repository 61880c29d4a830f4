//! Permission snapshots for signed-in identities: fetch, cache, evaluate, guard.
//!
//! ```text
//! IdentityProvider ─► PermissionSession ─► FetchCoordinator ─► PermissionSource
//!                          │                     │
//!                          ▼                     ▼
//!                     GuardState ◄──────── CacheStore (local + persisted tier)
//! ```

pub mod cache;
pub mod coordinator;
pub mod guard;
pub mod identity;
pub mod session;
pub mod store;

pub use cache::{
    CACHE_FORMAT_VERSION, CacheStore, Generation, SnapshotPersistence, SqliteSnapshotStore,
};
pub use coordinator::FetchCoordinator;
pub use guard::{GuardState, PermissionGuard, RenderDecision, Requirement, decide, decide_requirement};
pub use identity::{IdentityProvider, StaticIdentity};
pub use session::PermissionSession;
pub use store::seed::seed_defaults;
pub use store::{PermissionSource, SqlitePermissionSource, fetch_snapshot};

#[cfg(feature = "postgres")]
pub use store::PostgresPermissionSource;
