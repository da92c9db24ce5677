//! Handler for the `select` command.

use toolvault::lifecycle::LifecycleManager;

use super::common::parse_version;
use crate::error::CliError;

/// Make an installed version the selected one.
pub async fn execute(manager: &LifecycleManager, version: &str) -> Result<(), CliError> {
    let id = parse_version(version)?;

    manager.refresh_local().await?;
    manager.select(&id).await?;
    println!("Selected {}", id);
    Ok(())
}
