//! Version identity: (release version, build identifier).

use std::fmt;
use std::str::FromStr;

use semver::Version;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Directory name prefix for installed bundles.
const BUNDLE_DIR_PREFIX: &str = "devkit-";

/// Identity of a DevKit release: release version plus build identifier.
///
/// The build identifier disambiguates rebuilds of the same release version
/// (e.g. a beta and its GM both carrying "15.2.0").
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VersionId {
    /// Release version (semantic versioning).
    pub release: Version,
    /// Build identifier, e.g. "15C500b".
    pub build: String,
}

impl VersionId {
    /// Create a new identity.
    pub fn new(release: Version, build: impl Into<String>) -> Self {
        Self {
            release,
            build: build.into(),
        }
    }

    /// Directory name used for the installed bundle,
    /// e.g. `devkit-15.2.0+15C500b`.
    pub fn bundle_dir_name(&self) -> String {
        format!("{}{}+{}", BUNDLE_DIR_PREFIX, self.release, self.build)
    }

    /// Filename stem used for cached archives and resume metadata,
    /// e.g. `devkit-15.2.0+15C500b`.
    pub fn cache_stem(&self) -> String {
        self.bundle_dir_name()
    }

    /// Parse an identity back out of a bundle directory name.
    ///
    /// Returns `None` for directories that do not follow the bundle naming
    /// scheme; callers fall back to the embedded bundle metadata instead.
    pub fn from_bundle_dir_name(name: &str) -> Option<Self> {
        let rest = name.strip_prefix(BUNDLE_DIR_PREFIX)?;
        rest.parse().ok()
    }
}

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.release, self.build)
    }
}

/// Error parsing a version identity from text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VersionIdParseError {
    /// The release-version part is not valid semver.
    #[error("invalid release version {input:?}: {reason}")]
    InvalidRelease { input: String, reason: String },
    /// The build identifier is missing or empty.
    #[error("missing build identifier in {0:?}")]
    MissingBuild(String),
}

impl FromStr for VersionId {
    type Err = VersionIdParseError;

    /// Parse from `"<release>+<build>"` (e.g. `15.2.0+15C500b`) or
    /// `"<release> (<build>)"` (the display form).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (release_str, build) = if let Some((release, build)) = s.split_once('+') {
            (release, build.trim().to_string())
        } else if let Some((release, rest)) = s.split_once('(') {
            let build = rest.trim_end_matches(')').trim().to_string();
            (release.trim(), build)
        } else {
            return Err(VersionIdParseError::MissingBuild(s.to_string()));
        };

        if build.is_empty() {
            return Err(VersionIdParseError::MissingBuild(s.to_string()));
        }

        let release = Version::parse(release_str.trim()).map_err(|e| {
            VersionIdParseError::InvalidRelease {
                input: release_str.to_string(),
                reason: e.to_string(),
            }
        })?;

        Ok(Self { release, build })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let id = VersionId::new(Version::new(15, 2, 0), "15C500b");
        assert_eq!(id.to_string(), "15.2.0 (15C500b)");
    }

    #[test]
    fn test_bundle_dir_name_roundtrip() {
        let id = VersionId::new(Version::new(15, 2, 0), "15C500b");
        let name = id.bundle_dir_name();
        assert_eq!(name, "devkit-15.2.0+15C500b");
        assert_eq!(VersionId::from_bundle_dir_name(&name), Some(id));
    }

    #[test]
    fn test_from_bundle_dir_name_rejects_foreign_dirs() {
        assert_eq!(VersionId::from_bundle_dir_name("downloads"), None);
        assert_eq!(VersionId::from_bundle_dir_name("devkit-notaversion"), None);
    }

    #[test]
    fn test_parse_plus_form() {
        let id: VersionId = "15.2.0+15C500b".parse().unwrap();
        assert_eq!(id.release, Version::new(15, 2, 0));
        assert_eq!(id.build, "15C500b");
    }

    #[test]
    fn test_parse_display_form() {
        let id: VersionId = "15.2.0 (15C500b)".parse().unwrap();
        assert_eq!(id.build, "15C500b");
    }

    #[test]
    fn test_parse_missing_build() {
        let err = "15.2.0".parse::<VersionId>().unwrap_err();
        assert!(matches!(err, VersionIdParseError::MissingBuild(_)));
    }

    #[test]
    fn test_parse_invalid_release() {
        let err = "abc+15C500b".parse::<VersionId>().unwrap_err();
        assert!(matches!(err, VersionIdParseError::InvalidRelease { .. }));
    }

    #[test]
    fn test_ordering_by_release_then_build() {
        let a = VersionId::new(Version::new(15, 1, 0), "15B42");
        let b = VersionId::new(Version::new(15, 2, 0), "15C500b");
        assert!(a < b);
    }
}
