use anyhow::Result;
use std::path::Path;

use gatehouse_auth::seed_defaults;

pub fn run(base_dir: &Path) -> Result<()> {
    let config = super::load_config(base_dir)?;
    let store = super::admin_store(&config)?;
    seed_defaults(&store)?;

    let groups = store.list_groups()?;
    println!("Groups ({}):", groups.len());
    for g in &groups {
        println!(
            "  - {:<10} {}",
            g.name,
            g.description.as_deref().unwrap_or("")
        );
    }
    Ok(())
}
