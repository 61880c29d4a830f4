use anyhow::Result;
use std::path::Path;

use gatehouse_auth::GuardState;

pub async fn run(base_dir: &Path, identity: &str, json: bool) -> Result<()> {
    let config = super::load_config(base_dir)?;
    let session = super::session(&config, identity).await?;

    let snapshot = match session.load().await {
        GuardState::Ready(snapshot) => snapshot,
        GuardState::Error(e) => return Err(e.into()),
        GuardState::Loading => anyhow::bail!("permissions for {identity} are still loading"),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(snapshot.as_ref())?);
        return Ok(());
    }

    println!("Identity:       {}", snapshot.identity());
    println!("Administrator:  {}", snapshot.is_admin());
    println!("Fetched at:     {}", snapshot.fetched_at());

    if snapshot.groups().is_empty() {
        println!("\n  No groups.");
    } else {
        println!("\n  Groups ({}):", snapshot.groups().len());
        for g in snapshot.groups() {
            println!("    - {}", g.name);
        }
    }

    if snapshot.is_admin() {
        println!("\n  Administrators pass every check; permissions are not enumerated.");
    } else if snapshot.permissions().is_empty() {
        println!("\n  No permissions.");
    } else {
        println!("\n  {:<16} {:<10} {}", "RESOURCE", "ACTION", "NAME");
        for p in snapshot.permissions() {
            println!("  {:<16} {:<10} {}", p.resource, p.action, p.name);
        }
    }

    Ok(())
}
