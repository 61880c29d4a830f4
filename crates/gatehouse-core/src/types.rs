use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Matches any value in the `resource` or `action` field of a [`Permission`].
pub const WILDCARD: &str = "*";

/// Membership in a group with this name grants universal access.
pub const ADMIN_GROUP: &str = "admin";

/// Fixed actions behind the `can_*` convenience predicates.
pub mod actions {
    pub const VIEW: &str = "view";
    pub const EDIT: &str = "edit";
    pub const CREATE: &str = "create";
    pub const DELETE: &str = "delete";
    pub const MANAGE: &str = "manage";
}

/// Opaque identity supplied by the external auth provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Identity {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Identity {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl Group {
    pub fn is_admin_group(&self) -> bool {
        self.name == ADMIN_GROUP
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub id: String,
    pub name: String,
    pub resource: String,
    pub action: String,
}

impl Permission {
    /// Exact or wildcard match on both fields. Case-sensitive.
    pub fn matches(&self, resource: &str, action: &str) -> bool {
        (self.resource == resource || self.resource == WILDCARD)
            && (self.action == action || self.action == WILDCARD)
    }

    /// Two grants with the same key are the same permission, whichever group carries them.
    pub fn key(&self) -> (&str, &str) {
        (&self.resource, &self.action)
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.resource, self.action)
    }
}

/// Everything needed to answer permission queries for one identity.
///
/// Created only from a successful fetch and shared as `Arc<Snapshot>`; a
/// refresh replaces it wholesale. When `is_admin` is set the permission list
/// is usually empty and must not be consulted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    identity: Identity,
    is_admin: bool,
    groups: Vec<Group>,
    permissions: Vec<Permission>,
    fetched_at: DateTime<Utc>,
}

impl Snapshot {
    pub fn admin(identity: Identity, groups: Vec<Group>, fetched_at: DateTime<Utc>) -> Self {
        Self {
            identity,
            is_admin: true,
            groups,
            permissions: Vec::new(),
            fetched_at,
        }
    }

    pub fn member(
        identity: Identity,
        groups: Vec<Group>,
        permissions: Vec<Permission>,
        fetched_at: DateTime<Utc>,
    ) -> Self {
        Self {
            identity,
            is_admin: false,
            groups,
            permissions,
            fetched_at,
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn is_admin(&self) -> bool {
        self.is_admin
    }

    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    pub fn permissions(&self) -> &[Permission] {
        &self.permissions
    }

    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }

    pub fn in_group(&self, name: &str) -> bool {
        self.groups.iter().any(|g| g.name == name)
    }
}

/// A cached snapshot with its expiry.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub snapshot: Arc<Snapshot>,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(snapshot: Arc<Snapshot>, expires_at: DateTime<Utc>) -> Self {
        Self {
            snapshot,
            expires_at,
        }
    }

    /// Valid iff `now < expires_at`.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn perm(resource: &str, action: &str) -> Permission {
        Permission {
            id: format!("{resource}-{action}"),
            name: format!("{resource} {action}"),
            resource: resource.into(),
            action: action.into(),
        }
    }

    #[test]
    fn permission_matching_is_exact_or_wildcard() {
        assert!(perm("expressions", "edit").matches("expressions", "edit"));
        assert!(!perm("expressions", "edit").matches("expressions", "delete"));
        assert!(!perm("expressions", "edit").matches("Expressions", "edit"));
        assert!(!perm("express", "edit").matches("expressions", "edit"));
        assert!(perm("*", "view").matches("anything", "view"));
        assert!(perm("reports", "*").matches("reports", "export"));
        assert!(perm("*", "*").matches("settings", "manage"));
    }

    #[test]
    fn cache_entry_expires_exactly_at_deadline() {
        let now = Utc::now();
        let snap = Arc::new(Snapshot::member("u1".into(), vec![], vec![], now));
        let entry = CacheEntry::new(snap, now + TimeDelta::seconds(300));

        assert!(entry.is_valid_at(now));
        assert!(entry.is_valid_at(now + TimeDelta::seconds(300) - TimeDelta::milliseconds(1)));
        assert!(!entry.is_valid_at(now + TimeDelta::seconds(300)));
    }

    #[test]
    fn snapshot_serializes_with_transparent_identity() {
        let now = Utc::now();
        let snap = Snapshot::admin("ADMIN1".into(), vec![], now);
        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["identity"], "ADMIN1");
        assert_eq!(json["is_admin"], true);

        let back: Snapshot = serde_json::from_value(json).unwrap();
        assert_eq!(back, snap);
    }
}
