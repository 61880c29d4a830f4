use anyhow::Result;
use std::path::Path;

use gatehouse_auth::SqliteSnapshotStore;
use gatehouse_core::config::{BackendType, GatehouseConfig};

pub fn run(base_dir: &Path) -> Result<()> {
    println!("Initializing Gatehouse in {}", base_dir.display());

    std::fs::create_dir_all(base_dir)?;

    let config_path = GatehouseConfig::default_path(base_dir);
    if config_path.exists() {
        println!("Config already exists at {}", config_path.display());
    } else {
        let config = GatehouseConfig::default_config(base_dir);
        config.save(&config_path)?;
        println!("Created config: {}", config_path.display());
    }

    let config = GatehouseConfig::load(&config_path)?;

    if config.gatehouse.backend == BackendType::Sqlite {
        super::admin_store(&config)?;
        println!("Initialized permission database: {}", config.gatehouse.db_path);
    } else {
        println!(
            "Backend '{}' configured; groups and grants are managed there.",
            config.gatehouse.backend
        );
    }

    if config.cache.persist {
        SqliteSnapshotStore::open(&config.cache.path)?;
        println!("Initialized permission cache: {}", config.cache.path);
    }

    println!("\nGatehouse initialized. Next steps:");
    println!("  1. Run `gatehouse seed` to create the default groups");
    println!("  2. Run `gatehouse add-member <identity> <group>`");
    println!("  3. Run `gatehouse check <identity> <resource> <action>`");

    Ok(())
}
