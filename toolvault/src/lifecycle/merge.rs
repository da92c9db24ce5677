//! Merging the remote catalog, the installed registry, and in-memory
//! pipeline state into one view.
//!
//! Three sources of truth, one rule: disk wins. An identity the registry
//! reports as installed is `Installed`/`Selected` no matter what the
//! in-memory state claims; a stale `Downloading` left over from a previous
//! process must never block a later install. Merging is deterministic and
//! idempotent: the same inputs always produce the same view.

use std::collections::BTreeMap;

use crate::registry::InstalledCopy;
use crate::version::{RemoteVersion, VersionId};

use super::state::VersionState;

/// Compute the merged view.
///
/// Union of catalog identities and registry identities, keyed by
/// (release, build):
///
/// - present on disk: `Installed` or `Selected` (registry's selection flag;
///   at most one entry ends up `Selected`)
/// - known remotely only: `NotInstalled`, unless the previous view has a
///   live pipeline or retained failure for it
/// - present only in the previous view: kept only while a pipeline is
///   underway or a failure is retained, so an attempt never silently
///   disappears
pub fn merge_states(
    previous: &BTreeMap<VersionId, VersionState>,
    remote: &BTreeMap<VersionId, RemoteVersion>,
    copies: &[InstalledCopy],
) -> BTreeMap<VersionId, VersionState> {
    let mut merged = BTreeMap::new();

    // Disk ground truth first. The registry can only ever report one
    // selected copy; if it somehow reports more, keep the first and demote
    // the rest rather than violating selection exclusivity.
    let mut selected_seen = false;
    for copy in copies {
        let Some(id) = &copy.identity else {
            // Unknown copies are surfaced separately by the snapshot; they
            // have no identity to merge under.
            continue;
        };
        let state = if copy.selected && !selected_seen {
            selected_seen = true;
            VersionState::Selected {
                path: copy.path.clone(),
            }
        } else {
            if copy.selected {
                tracing::warn!(
                    "registry reported more than one selected copy; demoting {}",
                    copy.path.display()
                );
            }
            VersionState::Installed {
                path: copy.path.clone(),
            }
        };

        if let Some(old) = previous.get(id) {
            if old.is_pipeline_active() {
                tracing::info!(
                    "registry shows {} installed; overriding stale in-memory {:?}",
                    id,
                    old
                );
            }
        }
        merged.insert(id.clone(), state);
    }

    // Remote-only identities.
    for id in remote.keys() {
        if merged.contains_key(id) {
            continue;
        }
        let state = match previous.get(id) {
            Some(state) if state.is_pipeline_active() => state.clone(),
            Some(state @ VersionState::Failed { .. }) => state.clone(),
            _ => VersionState::NotInstalled,
        };
        merged.insert(id.clone(), state);
    }

    // In-flight or failed attempts for identities no longer in the catalog
    // and not on disk: the attempt still happened, keep it visible.
    for (id, state) in previous {
        if merged.contains_key(id) {
            continue;
        }
        if state.is_pipeline_active() || matches!(state, VersionState::Failed { .. }) {
            merged.insert(id.clone(), state.clone());
        }
    }

    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::state::{FailureCode, FailureReason};
    use semver::Version;
    use std::path::PathBuf;

    fn id(minor: u64, build: &str) -> VersionId {
        VersionId::new(Version::new(15, minor, 0), build)
    }

    fn remote_version(minor: u64, build: &str) -> RemoteVersion {
        RemoteVersion {
            id: id(minor, build),
            name: "DevKit".to_string(),
            download_url: format!("https://example.com/devkit-15.{}.tar.gz", minor),
            release_notes_url: None,
            checksum: None,
            size_bytes: None,
            released_at: None,
            prerelease: false,
        }
    }

    fn remote_map(versions: &[RemoteVersion]) -> BTreeMap<VersionId, RemoteVersion> {
        versions
            .iter()
            .map(|v| (v.id.clone(), v.clone()))
            .collect()
    }

    fn copy(minor: u64, build: &str, selected: bool) -> InstalledCopy {
        InstalledCopy {
            path: PathBuf::from(format!("/opt/devkit/versions/devkit-15.{}.0+{}", minor, build)),
            identity: Some(id(minor, build)),
            info: None,
            selected,
        }
    }

    fn unknown_copy() -> InstalledCopy {
        InstalledCopy {
            path: PathBuf::from("/opt/devkit/versions/mystery"),
            identity: None,
            info: None,
            selected: false,
        }
    }

    #[test]
    fn test_remote_only_is_not_installed() {
        let merged = merge_states(
            &BTreeMap::new(),
            &remote_map(&[remote_version(2, "15C500b")]),
            &[],
        );
        assert_eq!(merged[&id(2, "15C500b")], VersionState::NotInstalled);
    }

    #[test]
    fn test_registry_only_is_installed_without_remote_metadata() {
        // Offline case: nothing remote, one bundle on disk.
        let merged = merge_states(&BTreeMap::new(), &BTreeMap::new(), &[copy(1, "15B42", false)]);
        assert!(matches!(
            merged[&id(1, "15B42")],
            VersionState::Installed { .. }
        ));
    }

    #[test]
    fn test_selection_is_exclusive() {
        let merged = merge_states(
            &BTreeMap::new(),
            &BTreeMap::new(),
            &[copy(1, "15B42", true), copy(2, "15C500b", false)],
        );
        let selected = merged
            .values()
            .filter(|s| matches!(s, VersionState::Selected { .. }))
            .count();
        assert_eq!(selected, 1);
    }

    #[test]
    fn test_double_selection_from_registry_is_demoted() {
        let merged = merge_states(
            &BTreeMap::new(),
            &BTreeMap::new(),
            &[copy(1, "15B42", true), copy(2, "15C500b", true)],
        );
        let selected = merged
            .values()
            .filter(|s| matches!(s, VersionState::Selected { .. }))
            .count();
        assert_eq!(selected, 1);
    }

    #[test]
    fn test_disk_truth_overrides_stale_downloading() {
        let mut previous = BTreeMap::new();
        previous.insert(
            id(2, "15C500b"),
            VersionState::Downloading {
                bytes_received: 500,
                bytes_total: Some(1000),
            },
        );

        let merged = merge_states(
            &previous,
            &remote_map(&[remote_version(2, "15C500b")]),
            &[copy(2, "15C500b", false)],
        );
        assert!(matches!(
            merged[&id(2, "15C500b")],
            VersionState::Installed { .. }
        ));
    }

    #[test]
    fn test_live_pipeline_state_is_kept_when_not_on_disk() {
        let mut previous = BTreeMap::new();
        previous.insert(
            id(2, "15C500b"),
            VersionState::Downloading {
                bytes_received: 500,
                bytes_total: Some(1000),
            },
        );

        let merged = merge_states(
            &previous,
            &remote_map(&[remote_version(2, "15C500b")]),
            &[],
        );
        assert!(matches!(
            merged[&id(2, "15C500b")],
            VersionState::Downloading { .. }
        ));
    }

    #[test]
    fn test_failed_attempt_stays_visible() {
        let mut previous = BTreeMap::new();
        previous.insert(
            id(2, "15C500b"),
            VersionState::Failed {
                reason: FailureReason::new(FailureCode::Network, "reset"),
            },
        );

        // Still in the catalog: failure retained.
        let merged = merge_states(
            &previous,
            &remote_map(&[remote_version(2, "15C500b")]),
            &[],
        );
        assert!(matches!(
            merged[&id(2, "15C500b")],
            VersionState::Failed { .. }
        ));

        // Even out of the catalog: the attempt still happened.
        let merged = merge_states(&previous, &BTreeMap::new(), &[]);
        assert!(matches!(
            merged[&id(2, "15C500b")],
            VersionState::Failed { .. }
        ));
    }

    #[test]
    fn test_merge_is_idempotent() {
        let mut previous = BTreeMap::new();
        previous.insert(
            id(3, "15D99"),
            VersionState::Failed {
                reason: FailureReason::new(FailureCode::DiskFull, "enospc"),
            },
        );
        let remote = remote_map(&[remote_version(2, "15C500b"), remote_version(3, "15D99")]);
        let copies = [copy(1, "15B42", true), unknown_copy()];

        let once = merge_states(&previous, &remote, &copies);
        let twice = merge_states(&once, &remote, &copies);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_gone_from_disk_and_catalog_disappears() {
        let mut previous = BTreeMap::new();
        previous.insert(
            id(1, "15B42"),
            VersionState::Installed {
                path: PathBuf::from("/gone"),
            },
        );

        let merged = merge_states(&previous, &BTreeMap::new(), &[]);
        assert!(merged.is_empty());
    }

    #[test]
    fn test_unknown_copies_do_not_merge() {
        let merged = merge_states(&BTreeMap::new(), &BTreeMap::new(), &[unknown_copy()]);
        assert!(merged.is_empty());
    }
}
