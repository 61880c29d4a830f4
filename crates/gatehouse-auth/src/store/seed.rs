use gatehouse_core::{ADMIN_GROUP, PermissionError, WILDCARD, actions};

use crate::store::SqlitePermissionSource;

/// `(resource, action, display name)` for every built-in permission.
pub const PERMISSIONS: &[(&str, &str, &str)] = &[
    ("expressions", actions::VIEW, "View citizen expressions"),
    ("expressions", actions::CREATE, "Register citizen expressions"),
    ("expressions", actions::EDIT, "Edit citizen expressions"),
    ("expressions", actions::DELETE, "Delete citizen expressions"),
    ("dashboard", actions::VIEW, "View dashboards"),
    ("reports", actions::VIEW, "View reports"),
    ("settings", actions::VIEW, "View settings"),
    ("settings", actions::MANAGE, "Manage settings"),
    ("users", actions::MANAGE, "Manage users and groups"),
];

const VIEWER_PERMISSIONS: &[(&str, &str)] = &[(WILDCARD, actions::VIEW)];

const EDITOR_PERMISSIONS: &[(&str, &str)] = &[
    ("expressions", actions::VIEW),
    ("expressions", actions::CREATE),
    ("expressions", actions::EDIT),
    ("dashboard", actions::VIEW),
    ("reports", actions::VIEW),
];

/// Create the default groups and permissions. Safe to run repeatedly.
pub fn seed_defaults(store: &SqlitePermissionSource) -> Result<(), PermissionError> {
    for (resource, action, name) in PERMISSIONS {
        store.create_permission(resource, action, Some(*name))?;
    }

    let groups = [
        (ADMIN_GROUP, "Full administrative access"),
        ("editors", "Register and edit citizen expressions"),
        ("viewers", "Read-only access"),
    ];

    for (name, desc) in &groups {
        let group = match store.get_group_by_name(name)? {
            Some(g) => g,
            None => store.create_group(name, Some(*desc))?,
        };

        // Admin membership short-circuits evaluation; no grants needed.
        let grants: &[(&str, &str)] = match *name {
            "editors" => EDITOR_PERMISSIONS,
            "viewers" => VIEWER_PERMISSIONS,
            _ => &[],
        };

        for (resource, action) in grants {
            let perm = store.create_permission(resource, action, None)?;
            store.add_group_permission(&group.id, &perm.id)?;
        }
    }

    tracing::info!("seeded default groups and permissions");
    Ok(())
}
