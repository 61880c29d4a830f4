pub mod check;
pub mod config;
pub mod grant;
pub mod init;
pub mod members;
pub mod seed;
pub mod show;
pub mod sign_out;

use anyhow::{Result, bail};
use std::path::Path;
use std::sync::Arc;

use gatehouse_auth::{
    CacheStore, FetchCoordinator, PermissionSession, PermissionSource, SqlitePermissionSource,
    StaticIdentity,
};
use gatehouse_core::config::{BackendType, GatehouseConfig};
use gatehouse_core::{Clock, SystemClock};

pub fn load_config(base_dir: &Path) -> Result<GatehouseConfig> {
    Ok(GatehouseConfig::load(&GatehouseConfig::default_path(base_dir))?)
}

/// The local SQLite backend, for commands that edit groups and grants.
pub fn admin_store(config: &GatehouseConfig) -> Result<SqlitePermissionSource> {
    if config.gatehouse.backend != BackendType::Sqlite {
        bail!(
            "group administration needs the sqlite backend (configured: {})",
            config.gatehouse.backend
        );
    }
    Ok(SqlitePermissionSource::open(&config.gatehouse.db_path)?)
}

pub async fn permission_source(config: &GatehouseConfig) -> Result<Arc<dyn PermissionSource>> {
    match config.gatehouse.backend {
        BackendType::Sqlite => Ok(Arc::new(SqlitePermissionSource::open(
            &config.gatehouse.db_path,
        )?)),
        #[cfg(feature = "postgres")]
        BackendType::Postgres => {
            let url = config.gatehouse.database_url.as_deref().unwrap_or_default();
            Ok(Arc::new(
                gatehouse_auth::PostgresPermissionSource::new(url).await?,
            ))
        }
        #[cfg(not(feature = "postgres"))]
        BackendType::Postgres => bail!("gatehouse was built without the `postgres` feature"),
    }
}

pub fn cache(config: &GatehouseConfig, clock: Arc<dyn Clock>) -> Arc<CacheStore> {
    let cache = CacheStore::from_config(&config.cache, clock);
    cache.init();
    Arc::new(cache)
}

/// A session for `identity` over the configured backend and cache.
pub async fn session(config: &GatehouseConfig, identity: &str) -> Result<PermissionSession> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let source = permission_source(config).await?;
    let coordinator = Arc::new(FetchCoordinator::new(
        source,
        cache(config, clock.clone()),
        clock,
    ));
    Ok(
        PermissionSession::new(coordinator, Arc::new(StaticIdentity::signed_in(identity)))
            .with_debug_errors(config.gatehouse.debug_errors),
    )
}
