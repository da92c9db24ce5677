//! Handler for the `list` command.

use toolvault::catalog::AuthSession;
use toolvault::lifecycle::{LifecycleManager, VersionState};

use super::common::format_size;
use crate::error::CliError;

/// List catalog versions, annotated with their local state.
pub async fn execute(
    manager: &LifecycleManager,
    session: &AuthSession,
    matching: Option<&str>,
) -> Result<(), CliError> {
    manager.refresh(session).await?;

    let versions = manager.find_versions(matching.unwrap_or("")).await;
    if versions.is_empty() {
        println!("No versions in the catalog.");
        return Ok(());
    }

    let snapshot = manager.snapshot();
    for version in versions {
        let marker = match snapshot.state_of(&version.id) {
            VersionState::Selected { .. } => "*",
            VersionState::Installed { .. } => "+",
            _ => " ",
        };
        let size = version
            .size_bytes
            .map(format_size)
            .unwrap_or_else(|| "-".to_string());
        println!("{} {:<28} {}", marker, version.display_string(), size);
    }
    println!();
    println!("* selected, + installed");
    Ok(())
}
