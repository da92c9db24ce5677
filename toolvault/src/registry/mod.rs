//! Installed registry: ground-truth scan of bundles present on disk.
//!
//! The registry never trusts directory names for identity; each candidate's
//! embedded metadata is read instead. A bundle whose metadata is unreadable
//! or corrupt is still reported, as an "unknown" copy, so the orchestrator
//! can surface it rather than drop it silently.
//!
//! Which copy is "selected" is determined by reading the selection symlink
//! the OS toolchain mechanism uses, never by convention or scan order.
//! Re-scanning is idempotent and side-effect free on disk.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::version::{parse_bundle_info, BundleInfo, VersionId, BUNDLE_INFO_FILE};

/// Name of the selection symlink under the install root.
pub const SELECTION_LINK: &str = "current";

/// Subdirectory of the install root holding installed bundles.
pub const VERSIONS_DIR: &str = "versions";

/// An installed bundle discovered on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledCopy {
    /// Path to the bundle directory.
    pub path: PathBuf,
    /// Identity from the embedded metadata, or `None` when the metadata is
    /// unreadable or corrupt ("unknown" copy).
    pub identity: Option<VersionId>,
    /// Parsed embedded metadata, when readable.
    pub info: Option<BundleInfo>,
    /// True when this copy is the target of the selection symlink.
    pub selected: bool,
}

impl InstalledCopy {
    /// True for bundles whose embedded metadata could not be read.
    pub fn is_unknown(&self) -> bool {
        self.identity.is_none()
    }
}

/// Errors from registry scanning.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A search path could not be read.
    #[error("failed to read {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Registry of installed bundles under a set of well-known search paths.
pub struct InstalledRegistry {
    search_paths: Vec<PathBuf>,
    selection_link: PathBuf,
}

impl InstalledRegistry {
    /// Create a registry over an install root laid out as
    /// `<root>/versions/<bundle>` with the selection symlink `<root>/current`.
    pub fn new(install_root: impl Into<PathBuf>) -> Self {
        let root = install_root.into();
        Self {
            search_paths: vec![root.join(VERSIONS_DIR)],
            selection_link: root.join(SELECTION_LINK),
        }
    }

    /// Add an extra search path (e.g. a legacy install location).
    pub fn with_search_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.search_paths.push(path.into());
        self
    }

    /// Path of the selection symlink.
    pub fn selection_link(&self) -> &Path {
        &self.selection_link
    }

    /// Scan all search paths and return every bundle found.
    ///
    /// A search path that does not exist yet contributes no copies and no
    /// error; a path that exists but cannot be read is an error.
    pub fn scan(&self) -> Result<Vec<InstalledCopy>, RegistryError> {
        let selected_target = self.read_selection_target();
        let mut copies = Vec::new();

        for search_path in &self.search_paths {
            if !search_path.exists() {
                continue;
            }

            let entries = fs::read_dir(search_path).map_err(|e| RegistryError::ReadFailed {
                path: search_path.clone(),
                source: e,
            })?;

            for entry in entries.flatten() {
                let path = entry.path();
                if !path.is_dir() {
                    continue;
                }

                // Only directories carrying the bundle marker are candidates;
                // anything else in the search path is not ours to report.
                if !path.join(BUNDLE_INFO_FILE).exists() {
                    continue;
                }

                let selected = is_same_bundle(selected_target.as_deref(), &path);
                match parse_bundle_info(&path) {
                    Ok(info) => copies.push(InstalledCopy {
                        path,
                        identity: Some(info.identity()),
                        info: Some(info),
                        selected,
                    }),
                    Err(e) => {
                        tracing::warn!(
                            "bundle at {} has unreadable metadata: {}",
                            path.display(),
                            e
                        );
                        copies.push(InstalledCopy {
                            path,
                            identity: None,
                            info: None,
                            selected,
                        });
                    }
                }
            }
        }

        copies.sort_by(|a, b| a.identity.cmp(&b.identity).then_with(|| a.path.cmp(&b.path)));
        Ok(copies)
    }

    /// The currently selected copy, if the selection symlink points at a
    /// bundle this registry can see.
    pub fn selected_copy(&self) -> Result<Option<InstalledCopy>, RegistryError> {
        Ok(self.scan()?.into_iter().find(|c| c.selected))
    }

    /// Resolve the selection symlink target, if any.
    fn read_selection_target(&self) -> Option<PathBuf> {
        let target = fs::read_link(&self.selection_link).ok()?;
        if target.is_absolute() {
            Some(target)
        } else {
            // Relative link targets resolve against the link's parent.
            Some(self.selection_link.parent()?.join(target))
        }
    }
}

/// Compare the selection target against a bundle path, canonicalizing both
/// so symlinked roots still match.
fn is_same_bundle(target: Option<&Path>, bundle: &Path) -> bool {
    let Some(target) = target else {
        return false;
    };
    match (target.canonicalize(), bundle.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => target == bundle,
    }
}
