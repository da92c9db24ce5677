//! The install pipeline: download, checksum, extract, signature, install.
//!
//! One task per identity, spawned by the manager. The ordering is fixed and
//! no stage is skippable: the checksum gates extraction, the signature gates
//! installation. Cancellation is honored between stages up to the moment
//! installation begins; after that the pipeline runs to completion.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::catalog::AuthSession;
use crate::install::InstallError;
use crate::store::{DownloadFailure, DownloadOutcome};
use crate::verify::{verify_checksum, ChecksumError};
use crate::version::{parse_bundle_info, RemoteVersion, VersionId};

use super::state::{FailureCode, FailureReason, StateEvent};
use super::{apply_event, InstallOutcome, Shared};

/// Drive one install attempt to a terminal outcome.
pub(super) async fn run_pipeline(
    shared: Arc<Shared>,
    version: RemoteVersion,
    session: AuthSession,
    cancel: CancellationToken,
) {
    let id = version.id.clone();
    let outcome = match run_stages(&shared, &version, &session, &cancel).await {
        Ok(path) => InstallOutcome::Installed { path },
        Err(reason) => InstallOutcome::Failed(reason),
    };
    finish(&shared, &id, outcome).await;
}

/// All stages in order. Returns the installed path or the failure reason.
async fn run_stages(
    shared: &Shared,
    version: &RemoteVersion,
    session: &AuthSession,
    cancel: &CancellationToken,
) -> Result<PathBuf, FailureReason> {
    let id = &version.id;

    let archive = download(shared, version, session, cancel).await?;

    apply(shared, id, StateEvent::DownloadFinished).await;
    check_cancelled(cancel)?;
    checksum(shared, version, &archive).await?;

    apply(shared, id, StateEvent::ChecksumPassed).await;
    check_cancelled(cancel)?;
    let bundle = extract(shared, id, &archive).await?;

    apply(shared, id, StateEvent::Extracted).await;
    if let Err(reason) = verify_bundle(shared, version, &bundle).await {
        discard_scratch(&bundle);
        return Err(reason);
    }

    apply(shared, id, StateEvent::SignaturePassed).await;
    if let Err(reason) = check_cancelled(cancel) {
        discard_scratch(&bundle);
        return Err(reason);
    }

    // Point of no return: installation runs to completion.
    install(shared, id, &bundle).await
}

/// Download the archive, forwarding progress into the published state.
async fn download(
    shared: &Shared,
    version: &RemoteVersion,
    session: &AuthSession,
    cancel: &CancellationToken,
) -> Result<PathBuf, FailureReason> {
    // The gate caps concurrent transfers; a request cancelled while queued
    // never touches the network.
    let permit = tokio::select! {
        permit = shared.download_gate.clone().acquire_owned() => permit
            .map_err(|e| FailureReason::new(FailureCode::Io, e.to_string()))?,
        _ = cancel.cancelled() => return Err(cancelled_reason()),
    };

    let handle = shared.store.start_or_resume(version, session);
    let mut progress = handle.progress();
    let mut cancel_forwarded = false;
    let mut progress_open = true;

    let wait = handle.clone().wait();
    tokio::pin!(wait);

    let outcome = loop {
        tokio::select! {
            outcome = &mut wait => break outcome,
            _ = cancel.cancelled(), if !cancel_forwarded => {
                handle.cancel();
                cancel_forwarded = true;
            }
            changed = progress.changed(), if progress_open => {
                if changed.is_err() {
                    progress_open = false;
                    continue;
                }
                let observed = *progress.borrow_and_update();
                apply(
                    shared,
                    &version.id,
                    StateEvent::DownloadProgress {
                        bytes_received: observed.bytes_received,
                        bytes_total: observed.bytes_total,
                    },
                )
                .await;
            }
        }
    };
    drop(permit);

    match outcome {
        DownloadOutcome::Completed(path) => Ok(path),
        DownloadOutcome::Cancelled => Err(cancelled_reason()),
        DownloadOutcome::Failed(failure) => Err(match failure {
            DownloadFailure::Network(reason) => FailureReason::new(FailureCode::Network, reason),
            DownloadFailure::AuthExpired => FailureReason::new(
                FailureCode::AuthExpired,
                "authenticated session expired during download",
            ),
            DownloadFailure::Io(reason) => FailureReason::new(FailureCode::Io, reason),
        }),
    }
}

/// Verify the archive digest against the catalog checksum.
///
/// A mismatched archive is evicted so a retry re-downloads instead of
/// re-verifying the same bytes.
async fn checksum(
    shared: &Shared,
    version: &RemoteVersion,
    archive: &Path,
) -> Result<(), FailureReason> {
    let Some(expected) = version.checksum.clone() else {
        tracing::warn!(
            "catalog publishes no checksum for {}; skipping archive verification",
            version.id
        );
        return Ok(());
    };

    let path = archive.to_path_buf();
    let result = tokio::task::spawn_blocking(move || verify_checksum(&path, &expected))
        .await
        .map_err(|e| FailureReason::new(FailureCode::Io, e.to_string()))?;

    match result {
        Ok(()) => Ok(()),
        Err(e @ ChecksumError::Mismatch { .. }) => {
            tracing::error!("checksum mismatch for {}: {}", version.id, e);
            shared.store.evict(&version.id);
            Err(FailureReason::new(FailureCode::ChecksumMismatch, e.to_string()))
        }
        Err(ChecksumError::Unreadable { path, source }) => Err(FailureReason::new(
            FailureCode::Io,
            format!("cannot read {}: {}", path.display(), source),
        )),
    }
}

/// Unpack the archive into a per-identity scratch directory.
async fn extract(shared: &Shared, id: &VersionId, archive: &Path) -> Result<PathBuf, FailureReason> {
    let scratch = shared.config.scratch_dir().join(id.cache_stem());
    // A leftover from an earlier attempt would make the bundle root
    // ambiguous.
    discard_scratch(&scratch);

    shared
        .installer
        .extract(archive, &scratch)
        .await
        .map_err(install_failure)
}

/// Cross-check the extracted bundle's embedded identity and verify its
/// signature. Both run post-extraction, before anything privileged.
async fn verify_bundle(
    shared: &Shared,
    version: &RemoteVersion,
    bundle: &Path,
) -> Result<(), FailureReason> {
    let info = parse_bundle_info(bundle).map_err(|e| {
        FailureReason::new(
            FailureCode::CorruptArchive,
            format!("unreadable bundle metadata: {}", e),
        )
    })?;
    if info.identity() != version.id {
        return Err(FailureReason::new(
            FailureCode::CorruptArchive,
            format!(
                "archive for {} contains bundle identifying as {}",
                version.id,
                info.identity()
            ),
        ));
    }

    let verifier = Arc::clone(&shared.verifier);
    let path = bundle.to_path_buf();
    let verified = tokio::task::spawn_blocking(move || verifier.verify_signature(&path))
        .await
        .map_err(|e| FailureReason::new(FailureCode::Io, e.to_string()))?;

    match verified {
        Ok(signer) => {
            tracing::debug!("bundle for {} signed by {}", version.id, signer.key_id);
            Ok(())
        }
        Err(e) => {
            tracing::error!("signature verification failed for {}: {}", version.id, e);
            Err(FailureReason::new(FailureCode::SignatureInvalid, e.to_string()))
        }
    }
}

/// Relocate the verified bundle, fix ownership, and confirm it is visible
/// in the registry. Runs under the install-phase write guard.
async fn install(shared: &Shared, id: &VersionId, bundle: &Path) -> Result<PathBuf, FailureReason> {
    let final_location = shared.install_location(id);
    {
        let _guard = shared.install_phase.write().await;

        if let Some(parent) = final_location.parent() {
            // Best effort; an elevated helper creates it on the caller's
            // behalf when this process lacks the rights.
            let _ = std::fs::create_dir_all(parent);
        }

        match shared.installer.relocate(bundle, &final_location).await {
            Ok(()) => {}
            Err(InstallError::AlreadyExists { path }) => {
                // Another process put the same bundle there; the scratch
                // copy is redundant.
                tracing::warn!("destination {} already exists, keeping it", path.display());
            }
            Err(e) => return Err(install_failure(e)),
        }
        if let Some(scratch) = bundle.parent() {
            discard_scratch(scratch);
        }

        shared
            .installer
            .fix_ownership(&final_location)
            .await
            .map_err(install_failure)?;
    }

    confirm_installed(shared, id).await
}

/// Re-scan the registry and confirm the bundle actually landed.
async fn confirm_installed(shared: &Shared, id: &VersionId) -> Result<PathBuf, FailureReason> {
    let _guard = shared.install_phase.read().await;
    let registry = Arc::clone(&shared.registry);
    let copies = tokio::task::spawn_blocking(move || registry.scan())
        .await
        .map_err(|e| FailureReason::new(FailureCode::Io, e.to_string()))?
        .map_err(|e| FailureReason::new(FailureCode::Io, e.to_string()))?;

    copies
        .into_iter()
        .find(|copy| copy.identity.as_ref() == Some(id))
        .map(|copy| copy.path)
        .ok_or_else(|| {
            FailureReason::new(
                FailureCode::Io,
                "installed bundle not visible in the registry after relocation",
            )
        })
}

/// Resolve the ticket, record the terminal state, and retire the pipeline.
async fn finish(shared: &Shared, id: &VersionId, outcome: InstallOutcome) {
    let mut inner = shared.inner.lock().await;

    let event = match &outcome {
        InstallOutcome::Installed { path } => {
            tracing::info!("installed {} at {}", id, path.display());
            StateEvent::Installed { path: path.clone() }
        }
        InstallOutcome::Failed(reason) => {
            if reason.is_security() {
                tracing::error!("install of {} refused: {}", id, reason);
            } else {
                tracing::warn!("install of {} failed: {}", id, reason);
            }
            StateEvent::Failed {
                reason: reason.clone(),
            }
        }
    };
    apply_event(&mut inner, id, event);

    if let Some(active) = inner.active.remove(id) {
        active.outcome_tx.send_replace(Some(outcome));
    }
    shared.publish(&inner);
}

/// Apply a state-machine event under the lock and publish the new view.
async fn apply(shared: &Shared, id: &VersionId, event: StateEvent) {
    let mut inner = shared.inner.lock().await;
    apply_event(&mut inner, id, event);
    shared.publish(&inner);
}

fn check_cancelled(cancel: &CancellationToken) -> Result<(), FailureReason> {
    if cancel.is_cancelled() {
        Err(cancelled_reason())
    } else {
        Ok(())
    }
}

fn cancelled_reason() -> FailureReason {
    FailureReason::new(FailureCode::Cancelled, "install cancelled by request")
}

fn install_failure(e: InstallError) -> FailureReason {
    let code = match &e {
        InstallError::CorruptArchive { .. } => FailureCode::CorruptArchive,
        InstallError::DiskFull { .. } => FailureCode::DiskFull,
        InstallError::AlreadyExists { .. } => FailureCode::Io,
        InstallError::PermissionDenied { .. } => FailureCode::PermissionDenied,
        InstallError::PrivilegeDenied(_) => FailureCode::PrivilegeDenied,
        InstallError::Io { .. } => FailureCode::Io,
    };
    FailureReason::new(code, e.to_string())
}

/// Best-effort removal of scratch contents.
fn discard_scratch(path: &Path) {
    if let Err(e) = std::fs::remove_dir_all(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!("failed to clean scratch {}: {}", path.display(), e);
        }
    }
}
