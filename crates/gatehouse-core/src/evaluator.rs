//! Pure allow/deny decisions over a [`Snapshot`].
//!
//! - No IO
//! - No panics
//! - Absent snapshot denies

use crate::types::{Snapshot, actions};

/// Decide whether `snapshot` allows `action` on `resource`.
///
/// Administrators are allowed everything regardless of their permission list.
/// Otherwise some permission must match by exact-or-wildcard resource and
/// exact-or-wildcard action.
pub fn evaluate(snapshot: Option<&Snapshot>, resource: &str, action: &str) -> bool {
    let Some(snapshot) = snapshot else {
        return false;
    };
    if snapshot.is_admin() {
        return true;
    }
    snapshot
        .permissions()
        .iter()
        .any(|p| p.matches(resource, action))
}

pub fn can_view(snapshot: Option<&Snapshot>, resource: &str) -> bool {
    evaluate(snapshot, resource, actions::VIEW)
}

pub fn can_edit(snapshot: Option<&Snapshot>, resource: &str) -> bool {
    evaluate(snapshot, resource, actions::EDIT)
}

pub fn can_create(snapshot: Option<&Snapshot>, resource: &str) -> bool {
    evaluate(snapshot, resource, actions::CREATE)
}

pub fn can_delete(snapshot: Option<&Snapshot>, resource: &str) -> bool {
    evaluate(snapshot, resource, actions::DELETE)
}

pub fn can_manage(snapshot: Option<&Snapshot>, resource: &str) -> bool {
    evaluate(snapshot, resource, actions::MANAGE)
}
