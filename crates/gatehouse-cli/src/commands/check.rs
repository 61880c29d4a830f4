use anyhow::Result;
use std::path::Path;

use gatehouse_auth::PermissionGuard;

pub async fn run(
    base_dir: &Path,
    identity: &str,
    resource: &str,
    action: &str,
    refresh: bool,
) -> Result<()> {
    let config = super::load_config(base_dir)?;
    let session = super::session(&config, identity).await?;

    if refresh {
        session.refresh_permissions().await;
    } else {
        session.load().await;
    }

    let target = format!("{identity} {resource}:{action}");
    let guard = PermissionGuard::new(resource, action)
        .fallback(format!("DENY   {target}"))
        .loading_fallback(format!("DENY   {target} (still loading)"))
        .on_error(|e| format!("DENY   {target} ({e})"));

    if let Some(line) = session.render(guard, || format!("ALLOW  {target}")) {
        println!("{line}");
    }
    if let Some(e) = session.error() {
        tracing::warn!(%identity, error = %e, "permissions unavailable; denied");
    }
    Ok(())
}
