use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;

use gatehouse_core::config::GatehouseConfig;
use gatehouse_core::{Group, Identity, SystemClock};

use gatehouse_auth::SqlitePermissionSource;

fn group(store: &SqlitePermissionSource, name: &str) -> Result<Group> {
    store
        .get_group_by_name(name)?
        .with_context(|| format!("unknown group '{name}'"))
}

/// Cached snapshots for `identity` no longer reflect the backend.
fn forget(config: &GatehouseConfig, identity: &str) {
    super::cache(config, Arc::new(SystemClock)).invalidate(&Identity::new(identity));
}

pub fn add(base_dir: &Path, identity: &str, group_name: &str) -> Result<()> {
    let config = super::load_config(base_dir)?;
    let store = super::admin_store(&config)?;
    let g = group(&store, group_name)?;
    store.add_user_group(identity, &g.id)?;
    forget(&config, identity);
    println!("Added {identity} to {}", g.name);
    Ok(())
}

pub fn remove(base_dir: &Path, identity: &str, group_name: &str) -> Result<()> {
    let config = super::load_config(base_dir)?;
    let store = super::admin_store(&config)?;
    let g = group(&store, group_name)?;
    store.remove_user_group(identity, &g.id)?;
    forget(&config, identity);
    println!("Removed {identity} from {}", g.name);
    Ok(())
}

pub fn set_admin(base_dir: &Path, identity: &str, is_admin: bool) -> Result<()> {
    let config = super::load_config(base_dir)?;
    let store = super::admin_store(&config)?;
    store.set_administrator(identity, is_admin)?;
    forget(&config, identity);
    if is_admin {
        println!("{identity} is now an administrator");
    } else {
        println!("{identity} is no longer an administrator");
    }
    Ok(())
}
