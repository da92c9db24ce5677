//! Handler for the `install` command.
//!
//! Runs the full pipeline in the foreground with progress output. Ctrl-C
//! requests cancellation; partial-download state stays on disk so a later
//! `install` of the same version resumes where it left off.

use toolvault::catalog::AuthSession;
use toolvault::lifecycle::{InstallOutcome, LifecycleManager, VersionState};

use super::common::{format_size, parse_version};
use crate::error::CliError;

pub async fn execute(
    manager: &LifecycleManager,
    session: &AuthSession,
    version: &str,
) -> Result<(), CliError> {
    let id = parse_version(version)?;

    manager.refresh(session).await?;

    let ticket = manager.request_install(&id, session).await?;
    println!("Installing {} ...", id);

    let mut updates = manager.subscribe();
    let mut last_line = String::new();
    let mut cancelled = false;

    let wait = ticket.wait();
    tokio::pin!(wait);

    let outcome = loop {
        tokio::select! {
            outcome = &mut wait => break outcome,
            signal = tokio::signal::ctrl_c(), if !cancelled => {
                if signal.is_ok() {
                    cancelled = true;
                    eprintln!();
                    eprintln!("Cancelling; partial download is kept for resume.");
                    manager.cancel(&id).await;
                }
            }
            changed = updates.changed() => {
                if changed.is_err() {
                    continue;
                }
                let state = updates.borrow_and_update().state_of(&id);
                let line = describe(&state);
                if line != last_line {
                    println!("  {}", line);
                    last_line = line;
                }
            }
        }
    };

    match outcome {
        InstallOutcome::Installed { path } => {
            println!("Installed {} at {}", id, path.display());
            Ok(())
        }
        InstallOutcome::Failed(reason) => Err(CliError::InstallFailed(reason.to_string())),
    }
}

/// One-line progress description for a state.
fn describe(state: &VersionState) -> String {
    match state {
        VersionState::Downloading {
            bytes_received,
            bytes_total: Some(total),
        } => {
            let percent = (*bytes_received as f64 / *total as f64 * 100.0).floor();
            format!(
                "downloading {:.0}% ({} / {})",
                percent,
                format_size(*bytes_received),
                format_size(*total)
            )
        }
        VersionState::Downloading { bytes_received, .. } => {
            format!("downloading ({})", format_size(*bytes_received))
        }
        VersionState::Verifying => "verifying".to_string(),
        VersionState::Extracting => "extracting".to_string(),
        VersionState::Installing => "installing".to_string(),
        VersionState::Installed { .. } => "installed".to_string(),
        VersionState::Selected { .. } => "selected".to_string(),
        VersionState::Failed { reason } => format!("failed: {}", reason),
        VersionState::NotInstalled => "pending".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_download_progress() {
        let state = VersionState::Downloading {
            bytes_received: 512 * 1024,
            bytes_total: Some(1024 * 1024),
        };
        assert_eq!(describe(&state), "downloading 50% (512.0 KiB / 1.0 MiB)");
    }

    #[test]
    fn test_describe_download_without_total() {
        let state = VersionState::Downloading {
            bytes_received: 2048,
            bytes_total: None,
        };
        assert_eq!(describe(&state), "downloading (2.0 KiB)");
    }
}
