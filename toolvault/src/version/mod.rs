//! Core types for DevKit version identity and metadata.
//!
//! A version's identity is the pair (release version, build identifier);
//! two catalog entries or installed bundles with the same pair refer to the
//! same DevKit release. Everything else (name, URLs, checksum, size) is
//! metadata that a newer catalog fetch may supersede.

mod bundle_info;
mod identity;

pub use bundle_info::{parse_bundle_info, BundleInfo, BundleInfoError, BUNDLE_INFO_FILE};
pub use identity::{VersionId, VersionIdParseError};

use chrono::{DateTime, Utc};

/// A version as described by the remote catalog.
///
/// Immutable once obtained; a fresh catalog fetch may supersede it with
/// updated metadata for the same identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteVersion {
    /// Identity (release version, build identifier).
    pub id: VersionId,
    /// Human-readable name, e.g. "DevKit 15.2".
    pub name: String,
    /// Where the archive can be downloaded from.
    pub download_url: String,
    /// Release notes page, when the catalog provides one.
    pub release_notes_url: Option<String>,
    /// Expected SHA-256 of the archive, when the catalog provides one.
    pub checksum: Option<String>,
    /// Archive size in bytes, when the catalog provides one.
    pub size_bytes: Option<u64>,
    /// Publication timestamp.
    pub released_at: Option<DateTime<Utc>>,
    /// True for beta / prerelease builds.
    pub prerelease: bool,
}

impl RemoteVersion {
    /// Display string used by list output and the assistant integration,
    /// e.g. "DevKit 15.2.0 (15C500b) [beta]".
    pub fn display_string(&self) -> String {
        if self.prerelease {
            format!("{} {} [beta]", self.name, self.id)
        } else {
            format!("{} {}", self.name, self.id)
        }
    }
}
