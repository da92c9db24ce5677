//! Parsing of the metadata file embedded in every installed bundle.
//!
//! Identity is always taken from this file, never from the directory name:
//! a bundle renamed on disk must still resolve to the release it actually
//! contains.

use std::path::Path;

use chrono::{DateTime, Utc};
use semver::Version;
use serde::Deserialize;
use thiserror::Error;

use super::VersionId;

/// File name of the embedded bundle metadata, relative to the bundle root.
pub const BUNDLE_INFO_FILE: &str = "devkit_bundle_info.json";

/// Metadata embedded in an installed bundle.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BundleInfo {
    /// Human-readable product name.
    pub name: String,
    /// Release version.
    pub release: Version,
    /// Build identifier.
    pub build: String,
    /// Publication timestamp, when the bundle carries one.
    #[serde(default)]
    pub released_at: Option<DateTime<Utc>>,
}

impl BundleInfo {
    /// The identity this bundle corresponds to.
    pub fn identity(&self) -> VersionId {
        VersionId::new(self.release.clone(), self.build.clone())
    }
}

/// Error reading or parsing embedded bundle metadata.
#[derive(Debug, Error)]
pub enum BundleInfoError {
    /// The metadata file is missing or unreadable.
    #[error("failed to read {path}: {source}")]
    ReadFailed {
        path: String,
        source: std::io::Error,
    },
    /// The metadata file exists but does not parse.
    #[error("malformed bundle metadata in {path}: {reason}")]
    Malformed { path: String, reason: String },
}

/// Read and parse the embedded metadata of the bundle at `bundle_path`.
pub fn parse_bundle_info(bundle_path: &Path) -> Result<BundleInfo, BundleInfoError> {
    let info_path = bundle_path.join(BUNDLE_INFO_FILE);
    let content =
        std::fs::read_to_string(&info_path).map_err(|e| BundleInfoError::ReadFailed {
            path: info_path.display().to_string(),
            source: e,
        })?;

    serde_json::from_str(&content).map_err(|e| BundleInfoError::Malformed {
        path: info_path.display().to_string(),
        reason: e.to_string(),
    })
}
