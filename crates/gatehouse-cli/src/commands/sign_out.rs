use anyhow::Result;
use std::path::Path;
use std::sync::Arc;

use gatehouse_core::{Identity, SystemClock};

pub fn run(base_dir: &Path, identity: Option<&str>) -> Result<()> {
    let config = super::load_config(base_dir)?;
    // Only the cache is touched; the permission backend is never opened.
    let cache = super::cache(&config, Arc::new(SystemClock));

    match identity {
        Some(who) => {
            cache.invalidate(&Identity::new(who));
            println!("Cleared cached permissions for {who}");
        }
        None => {
            cache.invalidate_all();
            println!("Cleared all cached permissions");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatehouse_core::config::{BackendType, GatehouseConfig};
    use gatehouse_core::{Clock, Snapshot};
    use tempfile::TempDir;

    fn cached(config: &GatehouseConfig, identity: &str) -> bool {
        crate::commands::cache(config, Arc::new(SystemClock))
            .get(&Identity::new(identity))
            .is_some()
    }

    fn unreachable_backend(base_dir: &Path) -> GatehouseConfig {
        let mut config = GatehouseConfig::default_config(base_dir);
        config.gatehouse.backend = BackendType::Postgres;
        config.gatehouse.database_url = Some("postgres://nobody@127.0.0.1:1/none".into());
        config.save(&GatehouseConfig::default_path(base_dir)).unwrap();

        let cache = crate::commands::cache(&config, Arc::new(SystemClock));
        for id in ["U1", "U2"] {
            let snapshot = Snapshot::member(id.into(), vec![], vec![], SystemClock.now());
            cache.put(&Identity::new(id), Arc::new(snapshot));
        }
        config
    }

    #[test]
    fn clears_one_identity_without_opening_backend() {
        let tmp = TempDir::new().unwrap();
        let config = unreachable_backend(tmp.path());

        run(tmp.path(), Some("U1")).unwrap();
        assert!(!cached(&config, "U1"));
        assert!(cached(&config, "U2"));
    }

    #[test]
    fn clears_everyone_without_opening_backend() {
        let tmp = TempDir::new().unwrap();
        let config = unreachable_backend(tmp.path());

        run(tmp.path(), None).unwrap();
        assert!(!cached(&config, "U1"));
        assert!(!cached(&config, "U2"));
    }
}
