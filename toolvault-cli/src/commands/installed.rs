//! Handler for the `installed` command.

use toolvault::lifecycle::{LifecycleManager, VersionState};

use crate::error::CliError;

/// List versions present on disk, without touching the network.
pub async fn execute(manager: &LifecycleManager) -> Result<(), CliError> {
    manager.refresh_local().await?;

    let snapshot = manager.snapshot();
    let mut any = false;
    for (id, state) in &snapshot.states {
        match state {
            VersionState::Selected { path } => {
                any = true;
                println!("* {:<28} {}", id.to_string(), path.display());
            }
            VersionState::Installed { path } => {
                any = true;
                println!("  {:<28} {}", id.to_string(), path.display());
            }
            _ => {}
        }
    }

    for copy in &snapshot.unknown_copies {
        any = true;
        println!("? <unknown>                    {}", copy.path.display());
    }

    if !any {
        println!("No versions installed.");
        println!();
        println!("Use 'toolvault install <version>' to install one.");
    }
    Ok(())
}
