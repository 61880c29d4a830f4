pub mod seed;
pub mod sqlite;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use sqlite::SqlitePermissionSource;

#[cfg(feature = "postgres")]
pub use postgres::PostgresPermissionSource;

use std::collections::HashSet;

use async_trait::async_trait;
use gatehouse_core::{Clock, Group, Identity, Permission, PermissionError, Snapshot};

/// Read side of the permission backend.
///
/// Every method reports backend trouble as [`PermissionError::Fetch`].
#[async_trait]
pub trait PermissionSource: Send + Sync {
    /// Authoritative administrator flag for `identity`.
    async fn is_administrator(&self, identity: &Identity) -> Result<bool, PermissionError>;

    async fn groups_for_identity(&self, identity: &Identity)
    -> Result<Vec<Group>, PermissionError>;

    /// Every permission attached to any of `group_ids`. May contain duplicates.
    async fn permissions_for_groups(
        &self,
        group_ids: &[String],
    ) -> Result<Vec<Permission>, PermissionError>;
}

/// Build a fresh [`Snapshot`] for `identity` from the backend.
///
/// Administrators (by flag or by membership in the `admin` group) get an
/// admin snapshot without permission enumeration. Errors from any backend
/// call propagate; they never degrade to an empty permission set.
pub async fn fetch_snapshot(
    source: &dyn PermissionSource,
    identity: &Identity,
    clock: &dyn Clock,
) -> Result<Snapshot, PermissionError> {
    if source.is_administrator(identity).await? {
        tracing::debug!(%identity, "identity is administrator; skipping enumeration");
        return Ok(Snapshot::admin(identity.clone(), Vec::new(), clock.now()));
    }

    let groups = source.groups_for_identity(identity).await?;
    if groups.is_empty() {
        return Ok(Snapshot::member(
            identity.clone(),
            Vec::new(),
            Vec::new(),
            clock.now(),
        ));
    }

    if groups.iter().any(Group::is_admin_group) {
        tracing::debug!(%identity, "member of admin group; skipping enumeration");
        return Ok(Snapshot::admin(identity.clone(), groups, clock.now()));
    }

    let group_ids: Vec<String> = groups.iter().map(|g| g.id.clone()).collect();
    let permissions = dedup_permissions(source.permissions_for_groups(&group_ids).await?);

    Ok(Snapshot::member(
        identity.clone(),
        groups,
        permissions,
        clock.now(),
    ))
}

/// Collapse grants of the same `(resource, action)` to the first occurrence.
pub fn dedup_permissions(permissions: Vec<Permission>) -> Vec<Permission> {
    let mut seen: HashSet<(String, String)> = HashSet::new();
    permissions
        .into_iter()
        .filter(|p| seen.insert((p.resource.clone(), p.action.clone())))
        .collect()
}
