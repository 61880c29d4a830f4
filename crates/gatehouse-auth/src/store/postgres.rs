#![cfg(feature = "postgres")]

use async_trait::async_trait;
use gatehouse_core::{Group, Identity, Permission, PermissionError};
use sqlx::PgPool;

use super::PermissionSource;

/// The hosted backend: admin flag and memberships come from its RPC functions.
pub struct PostgresPermissionSource {
    pool: PgPool,
}

impl PostgresPermissionSource {
    pub async fn new(database_url: &str) -> Result<Self, PermissionError> {
        let pool = PgPool::connect(database_url).await.map_err(db_err)?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn db_err(e: sqlx::Error) -> PermissionError {
    PermissionError::Fetch(format!("database error: {e}"))
}

#[async_trait]
impl PermissionSource for PostgresPermissionSource {
    async fn is_administrator(&self, identity: &Identity) -> Result<bool, PermissionError> {
        let (is_admin,) = sqlx::query_as::<_, (Option<bool>,)>("SELECT is_admin($1::uuid)")
            .bind(identity.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(is_admin.unwrap_or(false))
    }

    async fn groups_for_identity(
        &self,
        identity: &Identity,
    ) -> Result<Vec<Group>, PermissionError> {
        let rows = sqlx::query_as::<_, (String, String, Option<String>)>(
            "SELECT g.id::text, g.name, g.description
             FROM get_user_groups($1::uuid) g
             ORDER BY g.name",
        )
        .bind(identity.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(rows
            .into_iter()
            .map(|r| Group {
                id: r.0,
                name: r.1,
                description: r.2,
            })
            .collect())
    }

    async fn permissions_for_groups(
        &self,
        group_ids: &[String],
    ) -> Result<Vec<Permission>, PermissionError> {
        if group_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query_as::<_, (String, String, String, String)>(
            "SELECT p.id::text, p.name, p.resource, p.action
             FROM permissions p
             JOIN group_permissions gp ON gp.permission_id = p.id
             WHERE gp.group_id::text = ANY($1)
             ORDER BY p.resource, p.action",
        )
        .bind(group_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(rows
            .into_iter()
            .map(|r| Permission {
                id: r.0,
                name: r.1,
                resource: r.2,
                action: r.3,
            })
            .collect())
    }
}
