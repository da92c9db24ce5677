//! Per-version lifecycle state and its transition rules.
//!
//! `VersionState` is a closed sum type; every legal edge of the state
//! machine is an arm of [`VersionState::transition`], so the compiler checks
//! the machine exhaustively. Only the orchestrator mutates states, either
//! through transitions (pipeline events) or wholesale from a merge (disk
//! ground truth).

use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Why an install attempt failed. Retained on the `Failed` state so a
/// presentation layer can render it; retry is always a new explicit request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureReason {
    /// Taxonomy code.
    pub code: FailureCode,
    /// Human-readable detail for display and logs.
    pub detail: String,
}

impl FailureReason {
    /// Build a reason.
    pub fn new(code: FailureCode, detail: impl Into<String>) -> Self {
        Self {
            code,
            detail: detail.into(),
        }
    }

    /// True for failures that question the integrity of the payload.
    /// These deserve security-grade severity in any UI.
    pub fn is_security(&self) -> bool {
        self.code.is_security()
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.detail)
    }
}

/// Failure taxonomy, mirrored from the error types of the pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCode {
    /// Transient network failure; retryable by a new request.
    Network,
    /// Session expired; requires external re-authentication.
    AuthExpired,
    /// Archive digest did not match the catalog. The cached bytes are
    /// evicted; a retry re-downloads.
    ChecksumMismatch,
    /// Trust chain rejected (untrusted, revoked, or malformed).
    SignatureInvalid,
    /// Archive not unpackable.
    CorruptArchive,
    /// Out of disk space.
    DiskFull,
    /// Filesystem permissions refused an operation.
    PermissionDenied,
    /// Privileged helper refused or was unreachable.
    PrivilegeDenied,
    /// Other local I/O failure.
    Io,
    /// Cancelled by explicit request at a stage boundary.
    Cancelled,
}

impl FailureCode {
    /// True for fail-closed verification failures.
    pub fn is_security(&self) -> bool {
        matches!(self, Self::ChecksumMismatch | Self::SignatureInvalid)
    }
}

impl fmt::Display for FailureCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Network => "network error",
            Self::AuthExpired => "authentication expired",
            Self::ChecksumMismatch => "checksum mismatch",
            Self::SignatureInvalid => "signature invalid",
            Self::CorruptArchive => "corrupt archive",
            Self::DiskFull => "disk full",
            Self::PermissionDenied => "permission denied",
            Self::PrivilegeDenied => "privilege denied",
            Self::Io => "I/O error",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Merged per-version state. Exactly one exists per identity; it is owned
/// exclusively by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionState {
    /// Known remotely, not present on disk.
    NotInstalled,
    /// Archive transfer in progress.
    Downloading {
        bytes_received: u64,
        bytes_total: Option<u64>,
    },
    /// Checksum or signature verification in progress.
    Verifying,
    /// Archive unpacking into the scratch area.
    Extracting,
    /// Relocation and privileged finalization in progress.
    Installing,
    /// Present on disk.
    Installed { path: PathBuf },
    /// Present on disk and the target of the selection pointer. At most one
    /// identity is in this state at any time.
    Selected { path: PathBuf },
    /// The last install attempt failed; the reason is retained for display.
    /// Not terminal: a fresh install request re-enters `Downloading`.
    Failed { reason: FailureReason },
}

/// Events that drive the per-version state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateEvent {
    /// A caller asked to install this version.
    InstallRequested,
    /// Transfer progress observation.
    DownloadProgress {
        bytes_received: u64,
        bytes_total: Option<u64>,
    },
    /// Transfer completed; checksum verification begins.
    DownloadFinished,
    /// Archive checksum verified; extraction begins.
    ChecksumPassed,
    /// Bundle unpacked; signature verification begins.
    Extracted,
    /// Trust chain verified; installation begins.
    SignaturePassed,
    /// Bundle confirmed on disk at `path`.
    Installed { path: PathBuf },
    /// This identity became the selection target.
    Selected,
    /// Another identity became the selection target.
    Deselected,
    /// A pipeline stage failed.
    Failed { reason: FailureReason },
}

/// An event arrived in a state that has no edge for it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} in state {state:?}")]
pub struct TransitionError {
    pub state: VersionState,
    pub event: StateEvent,
}

impl VersionState {
    /// True when a fresh install request may begin from this state.
    pub fn can_begin_install(&self) -> bool {
        matches!(self, Self::NotInstalled | Self::Failed { .. })
    }

    /// True for `Installed` or `Selected`.
    pub fn is_installed(&self) -> bool {
        matches!(self, Self::Installed { .. } | Self::Selected { .. })
    }

    /// True while a pipeline stage is underway for this identity.
    pub fn is_pipeline_active(&self) -> bool {
        matches!(
            self,
            Self::Downloading { .. } | Self::Verifying | Self::Extracting | Self::Installing
        )
    }

    /// Install path for `Installed`/`Selected` states.
    pub fn installed_path(&self) -> Option<&Path> {
        match self {
            Self::Installed { path } | Self::Selected { path } => Some(path),
            _ => None,
        }
    }

    /// Apply one event, yielding the successor state.
    ///
    /// Every legal edge is listed explicitly; anything else is a
    /// [`TransitionError`].
    pub fn transition(self, event: StateEvent) -> Result<VersionState, TransitionError> {
        use StateEvent as E;
        use VersionState as S;

        match (self, event) {
            (S::NotInstalled | S::Failed { .. }, E::InstallRequested) => Ok(S::Downloading {
                bytes_received: 0,
                bytes_total: None,
            }),

            (
                S::Downloading { .. },
                E::DownloadProgress {
                    bytes_received,
                    bytes_total,
                },
            ) => Ok(S::Downloading {
                bytes_received,
                bytes_total,
            }),

            (S::Downloading { .. }, E::DownloadFinished) => Ok(S::Verifying),
            (S::Verifying, E::ChecksumPassed) => Ok(S::Extracting),
            (S::Extracting, E::Extracted) => Ok(S::Verifying),
            (S::Verifying, E::SignaturePassed) => Ok(S::Installing),
            (S::Installing, E::Installed { path }) => Ok(S::Installed { path }),

            (S::Installed { path }, E::Selected) => Ok(S::Selected { path }),
            (S::Selected { path }, E::Deselected) => Ok(S::Installed { path }),

            (
                S::Downloading { .. } | S::Verifying | S::Extracting | S::Installing,
                E::Failed { reason },
            ) => Ok(S::Failed { reason }),

            (state, event) => Err(TransitionError { state, event }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fail(code: FailureCode) -> StateEvent {
        StateEvent::Failed {
            reason: FailureReason::new(code, "test"),
        }
    }

    #[test]
    fn test_full_happy_path_in_order() {
        let path = PathBuf::from("/opt/devkit/versions/devkit-15.2.0+15C500b");
        let mut state = VersionState::NotInstalled;

        let events = [
            StateEvent::InstallRequested,
            StateEvent::DownloadProgress {
                bytes_received: 10,
                bytes_total: Some(100),
            },
            StateEvent::DownloadFinished,
            StateEvent::ChecksumPassed,
            StateEvent::Extracted,
            StateEvent::SignaturePassed,
            StateEvent::Installed { path: path.clone() },
            StateEvent::Selected,
        ];
        for event in events {
            state = state.transition(event).unwrap();
        }
        assert_eq!(state, VersionState::Selected { path });
    }

    #[test]
    fn test_no_stage_may_be_skipped() {
        // Downloading cannot jump straight to Extracting.
        let state = VersionState::Downloading {
            bytes_received: 0,
            bytes_total: None,
        };
        assert!(state.transition(StateEvent::ChecksumPassed).is_err());

        // Verifying cannot claim Installed.
        let err = VersionState::Verifying
            .transition(StateEvent::Installed {
                path: PathBuf::from("/x"),
            })
            .unwrap_err();
        assert_eq!(err.state, VersionState::Verifying);
    }

    #[test]
    fn test_any_active_stage_may_fail() {
        for state in [
            VersionState::Downloading {
                bytes_received: 5,
                bytes_total: None,
            },
            VersionState::Verifying,
            VersionState::Extracting,
            VersionState::Installing,
        ] {
            let next = state.transition(fail(FailureCode::Network)).unwrap();
            assert!(matches!(next, VersionState::Failed { .. }));
        }
    }

    #[test]
    fn test_installed_states_do_not_fail() {
        let state = VersionState::Installed {
            path: PathBuf::from("/x"),
        };
        assert!(state.transition(fail(FailureCode::Io)).is_err());
    }

    #[test]
    fn test_failed_is_reenterable() {
        let state = VersionState::Failed {
            reason: FailureReason::new(FailureCode::ChecksumMismatch, "bad digest"),
        };
        assert!(state.can_begin_install());
        let next = state.transition(StateEvent::InstallRequested).unwrap();
        assert!(matches!(next, VersionState::Downloading { .. }));
    }

    #[test]
    fn test_installed_cannot_reenter_download_without_explicit_request_path() {
        let state = VersionState::Installed {
            path: PathBuf::from("/x"),
        };
        assert!(!state.can_begin_install());
        assert!(state.transition(StateEvent::InstallRequested).is_err());
    }

    #[test]
    fn test_select_deselect_roundtrip() {
        let path = PathBuf::from("/x");
        let selected = VersionState::Installed { path: path.clone() }
            .transition(StateEvent::Selected)
            .unwrap();
        let back = selected.transition(StateEvent::Deselected).unwrap();
        assert_eq!(back, VersionState::Installed { path });
    }

    #[test]
    fn test_security_failures_flagged() {
        assert!(FailureReason::new(FailureCode::SignatureInvalid, "x").is_security());
        assert!(FailureReason::new(FailureCode::ChecksumMismatch, "x").is_security());
        assert!(!FailureReason::new(FailureCode::Network, "x").is_security());
        assert!(!FailureReason::new(FailureCode::PrivilegeDenied, "x").is_security());
    }
}
