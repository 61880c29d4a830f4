use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;

use gatehouse_core::SystemClock;

pub fn run(
    base_dir: &Path,
    group: &str,
    resource: &str,
    action: &str,
    name: Option<&str>,
) -> Result<()> {
    let config = super::load_config(base_dir)?;
    let store = super::admin_store(&config)?;

    let g = store
        .get_group_by_name(group)?
        .with_context(|| format!("unknown group '{group}'"))?;
    let perm = store.create_permission(resource, action, name)?;
    store.add_group_permission(&g.id, &perm.id)?;

    // Every member's snapshot may be affected.
    super::cache(&config, Arc::new(SystemClock)).invalidate_all();

    println!("Granted {} to {}", perm, g.name);
    Ok(())
}
