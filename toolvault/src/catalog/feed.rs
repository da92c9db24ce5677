//! Catalog feed parsing.
//!
//! The feed is a JSON document with a `versions` array. Parsing is
//! forward-compatible: unknown fields are ignored, and an entry missing its
//! identity or download URL is skipped with a warning rather than failing
//! the whole fetch.

use chrono::{DateTime, Utc};
use semver::Version;
use serde::Deserialize;

use crate::version::{RemoteVersion, VersionId};

/// Top-level feed document.
#[derive(Debug, Deserialize)]
struct Feed {
    #[serde(default)]
    versions: Vec<FeedEntry>,
}

/// One feed entry, with every field optional so a single bad entry never
/// poisons the fetch.
#[derive(Debug, Deserialize)]
struct FeedEntry {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    build: Option<String>,
    #[serde(default)]
    download_url: Option<String>,
    #[serde(default)]
    release_notes_url: Option<String>,
    #[serde(default)]
    checksum: Option<String>,
    #[serde(default)]
    size_bytes: Option<u64>,
    #[serde(default)]
    released_at: Option<DateTime<Utc>>,
    #[serde(default)]
    prerelease: bool,
}

impl FeedEntry {
    /// Convert into a [`RemoteVersion`], or `None` (with a reason) when the
    /// entry lacks the fields a version cannot exist without.
    fn into_remote_version(self) -> Result<RemoteVersion, &'static str> {
        let release_str = self.version.ok_or("missing version")?;
        let release = Version::parse(&release_str).map_err(|_| "unparseable version")?;
        let build = match self.build {
            Some(b) if !b.is_empty() => b,
            _ => return Err("missing build identifier"),
        };
        let download_url = match self.download_url {
            Some(u) if !u.is_empty() => u,
            _ => return Err("missing download URL"),
        };

        Ok(RemoteVersion {
            id: VersionId::new(release, build),
            name: self.name.unwrap_or_else(|| "DevKit".to_string()),
            download_url,
            release_notes_url: self.release_notes_url,
            checksum: self.checksum,
            size_bytes: self.size_bytes,
            released_at: self.released_at,
            prerelease: self.prerelease,
        })
    }
}

/// Parse a catalog feed document.
///
/// # Errors
///
/// Returns the serde error message when the document itself is not valid
/// JSON of the expected shape. Individually incomplete entries are skipped
/// with a warning instead.
pub fn parse_catalog(content: &str) -> Result<Vec<RemoteVersion>, String> {
    let feed: Feed = serde_json::from_str(content).map_err(|e| e.to_string())?;

    let mut versions = Vec::with_capacity(feed.versions.len());
    for (index, entry) in feed.versions.into_iter().enumerate() {
        match entry.into_remote_version() {
            Ok(version) => versions.push(version),
            Err(reason) => {
                tracing::warn!("skipping catalog entry {}: {}", index, reason);
            }
        }
    }

    Ok(versions)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_entry() {
        let feed = r#"{
            "versions": [{
                "name": "DevKit",
                "version": "15.2.0",
                "build": "15C500b",
                "download_url": "https://example.com/devkit.tar.gz",
                "release_notes_url": "https://example.com/notes",
                "checksum": "abc123",
                "size_bytes": 4096,
                "released_at": "2024-01-08T00:00:00Z",
                "prerelease": false
            }]
        }"#;

        let versions = parse_catalog(feed).unwrap();
        assert_eq!(versions.len(), 1);
        let v = &versions[0];
        assert_eq!(v.id.to_string(), "15.2.0 (15C500b)");
        assert_eq!(v.checksum.as_deref(), Some("abc123"));
        assert_eq!(v.size_bytes, Some(4096));
        assert!(!v.prerelease);
    }

    #[test]
    fn test_parse_tolerates_unknown_fields() {
        let feed = r#"{
            "generated_at": "2024-01-08T00:00:00Z",
            "versions": [{
                "version": "15.2.0",
                "build": "15C500b",
                "download_url": "https://example.com/devkit.tar.gz",
                "future_field": {"nested": true}
            }]
        }"#;

        let versions = parse_catalog(feed).unwrap();
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].name, "DevKit");
    }

    #[test]
    fn test_parse_skips_entry_missing_download_url() {
        let feed = r#"{
            "versions": [
                {"version": "15.2.0", "build": "15C500b"},
                {"version": "15.1.0", "build": "15B42",
                 "download_url": "https://example.com/old.tar.gz"}
            ]
        }"#;

        let versions = parse_catalog(feed).unwrap();
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].id.build, "15B42");
    }

    #[test]
    fn test_parse_skips_entry_missing_identity() {
        let feed = r#"{
            "versions": [
                {"download_url": "https://example.com/a.tar.gz"},
                {"version": "not-semver", "build": "x",
                 "download_url": "https://example.com/b.tar.gz"}
            ]
        }"#;

        let versions = parse_catalog(feed).unwrap();
        assert!(versions.is_empty());
    }

    #[test]
    fn test_parse_rejects_malformed_document() {
        assert!(parse_catalog("not json at all").is_err());
    }

    #[test]
    fn test_parse_preserves_feed_order() {
        let feed = r#"{
            "versions": [
                {"version": "15.2.0", "build": "15C500b",
                 "download_url": "https://example.com/new.tar.gz"},
                {"version": "15.1.0", "build": "15B42",
                 "download_url": "https://example.com/old.tar.gz"}
            ]
        }"#;

        let versions = parse_catalog(feed).unwrap();
        assert_eq!(versions[0].id.build, "15C500b");
        assert_eq!(versions[1].id.build, "15B42");
    }
}
