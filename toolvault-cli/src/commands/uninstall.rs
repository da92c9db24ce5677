//! Handler for the `uninstall` command.

use toolvault::lifecycle::LifecycleManager;

use super::common::parse_version;
use crate::error::CliError;

/// Remove an installed version from disk.
pub async fn execute(manager: &LifecycleManager, version: &str) -> Result<(), CliError> {
    let id = parse_version(version)?;

    manager.refresh_local().await?;
    manager.uninstall(&id).await?;
    println!("Uninstalled {}", id);
    Ok(())
}
