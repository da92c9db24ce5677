//! Manager configuration.
//!
//! Groups every path and tunable the lifecycle manager needs, with
//! sensible defaults and `with_*` builders for customization.
//!
//! # Example
//!
//! ```
//! use toolvault::config::ManagerConfig;
//! use std::time::Duration;
//!
//! let config = ManagerConfig::new()
//!     .with_catalog_url("https://releases.example.com/devkit/catalog.json")
//!     .with_max_concurrent_downloads(2)
//!     .with_refresh_staleness(Duration::from_secs(600));
//! assert_eq!(config.max_concurrent_downloads(), 2);
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use ed25519_dalek::VerifyingKey;
use thiserror::Error;

/// Error parsing an encoded trusted key.
#[derive(Debug, Error)]
pub enum KeyParseError {
    /// The value is not valid base64.
    #[error("trusted key is not valid base64: {0}")]
    Encoding(String),

    /// The decoded bytes are not a valid Ed25519 public key.
    #[error("trusted key is not a valid Ed25519 public key: {0}")]
    Key(String),
}

/// Default directory bundles are installed under.
pub const DEFAULT_INSTALL_ROOT: &str = "/opt/devkit";
/// Default catalog feed location.
pub const DEFAULT_CATALOG_URL: &str = "https://releases.example.com/devkit/catalog.json";
/// Default Unix socket the privileged helper listens on.
pub const DEFAULT_HELPER_SOCKET: &str = "/var/run/devkit-helper.sock";
/// Default number of downloads allowed to run at once.
pub const DEFAULT_MAX_CONCURRENT_DOWNLOADS: usize = 1;
/// Default age after which a cached catalog is considered stale.
pub const DEFAULT_REFRESH_STALENESS_SECS: u64 = 300;

/// Configuration for the version lifecycle manager.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    install_root: PathBuf,
    cache_dir: PathBuf,
    scratch_dir: PathBuf,
    catalog_url: String,
    helper_socket: PathBuf,
    max_concurrent_downloads: usize,
    refresh_staleness: Duration,
    trusted_keys: Vec<(String, VerifyingKey)>,
    revoked_keys: Vec<String>,
}

impl ManagerConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the directory installed bundles live under.
    ///
    /// Contains a `versions/` directory and the `current` selection
    /// symlink. Default: `/opt/devkit`.
    pub fn with_install_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.install_root = root.into();
        self
    }

    /// Set the directory downloaded archives and resume sidecars are kept in.
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = dir.into();
        self
    }

    /// Set the directory archives are extracted into before relocation.
    ///
    /// Should live on the same filesystem as the install root so the final
    /// move is an atomic rename.
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = dir.into();
        self
    }

    /// Set the catalog feed URL.
    pub fn with_catalog_url(mut self, url: impl Into<String>) -> Self {
        self.catalog_url = url.into();
        self
    }

    /// Set the Unix socket path of the privileged helper.
    pub fn with_helper_socket(mut self, path: impl Into<PathBuf>) -> Self {
        self.helper_socket = path.into();
        self
    }

    /// Set how many downloads may run concurrently. Default: 1.
    pub fn with_max_concurrent_downloads(mut self, n: usize) -> Self {
        self.max_concurrent_downloads = n.max(1);
        self
    }

    /// Set how old a catalog may get before `update_if_needed` refetches it.
    /// Default: 300 seconds.
    pub fn with_refresh_staleness(mut self, staleness: Duration) -> Self {
        self.refresh_staleness = staleness;
        self
    }

    /// Add a publisher signing key trusted for bundle verification.
    pub fn with_trusted_key(mut self, key_id: impl Into<String>, key: VerifyingKey) -> Self {
        self.trusted_keys.push((key_id.into(), key));
        self
    }

    /// Add a trusted publisher key from its base64-encoded 32-byte form,
    /// as distributed in release documentation.
    pub fn with_trusted_key_encoded(
        self,
        key_id: impl Into<String>,
        encoded: &str,
    ) -> Result<Self, KeyParseError> {
        let bytes = BASE64
            .decode(encoded.trim())
            .map_err(|e| KeyParseError::Encoding(e.to_string()))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|b: Vec<u8>| KeyParseError::Key(format!("expected 32 bytes, got {}", b.len())))?;
        let key = VerifyingKey::from_bytes(&bytes)
            .map_err(|e| KeyParseError::Key(e.to_string()))?;
        Ok(self.with_trusted_key(key_id, key))
    }

    /// Mark a publisher key identifier as revoked.
    ///
    /// Revocation beats trust: a key present in both lists is refused.
    pub fn with_revoked_key(mut self, key_id: impl Into<String>) -> Self {
        self.revoked_keys.push(key_id.into());
        self
    }

    /// Directory installed bundles live under.
    pub fn install_root(&self) -> &Path {
        &self.install_root
    }

    /// Directory downloaded archives are cached in.
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Directory archives are extracted into before relocation.
    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    /// Catalog feed URL.
    pub fn catalog_url(&self) -> &str {
        &self.catalog_url
    }

    /// Unix socket path of the privileged helper.
    pub fn helper_socket(&self) -> &Path {
        &self.helper_socket
    }

    /// Maximum number of concurrent downloads.
    pub fn max_concurrent_downloads(&self) -> usize {
        self.max_concurrent_downloads
    }

    /// Catalog staleness threshold.
    pub fn refresh_staleness(&self) -> Duration {
        self.refresh_staleness
    }

    /// Trusted publisher keys, as (key id, verifying key) pairs.
    pub fn trusted_keys(&self) -> &[(String, VerifyingKey)] {
        &self.trusted_keys
    }

    /// Revoked publisher key identifiers.
    pub fn revoked_keys(&self) -> &[String] {
        &self.revoked_keys
    }
}

impl Default for ManagerConfig {
    fn default() -> Self {
        let cache_dir = dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("toolvault");
        let scratch_dir = cache_dir.join("scratch");
        Self {
            install_root: PathBuf::from(DEFAULT_INSTALL_ROOT),
            cache_dir,
            scratch_dir,
            catalog_url: DEFAULT_CATALOG_URL.to_string(),
            helper_socket: PathBuf::from(DEFAULT_HELPER_SOCKET),
            max_concurrent_downloads: DEFAULT_MAX_CONCURRENT_DOWNLOADS,
            refresh_staleness: Duration::from_secs(DEFAULT_REFRESH_STALENESS_SECS),
            trusted_keys: Vec::new(),
            revoked_keys: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ManagerConfig::default();
        assert_eq!(config.install_root(), Path::new(DEFAULT_INSTALL_ROOT));
        assert_eq!(config.catalog_url(), DEFAULT_CATALOG_URL);
        assert_eq!(
            config.max_concurrent_downloads(),
            DEFAULT_MAX_CONCURRENT_DOWNLOADS
        );
        assert_eq!(
            config.refresh_staleness(),
            Duration::from_secs(DEFAULT_REFRESH_STALENESS_SECS)
        );
        assert!(config.trusted_keys().is_empty());
    }

    #[test]
    fn test_builder_chain() {
        let config = ManagerConfig::new()
            .with_install_root("/srv/devkit")
            .with_cache_dir("/var/cache/toolvault")
            .with_scratch_dir("/srv/devkit/.staging")
            .with_catalog_url("https://mirror.internal/catalog.json")
            .with_helper_socket("/tmp/helper.sock")
            .with_max_concurrent_downloads(4)
            .with_refresh_staleness(Duration::from_secs(60))
            .with_revoked_key("publisher-2019");

        assert_eq!(config.install_root(), Path::new("/srv/devkit"));
        assert_eq!(config.cache_dir(), Path::new("/var/cache/toolvault"));
        assert_eq!(config.scratch_dir(), Path::new("/srv/devkit/.staging"));
        assert_eq!(config.catalog_url(), "https://mirror.internal/catalog.json");
        assert_eq!(config.helper_socket(), Path::new("/tmp/helper.sock"));
        assert_eq!(config.max_concurrent_downloads(), 4);
        assert_eq!(config.refresh_staleness(), Duration::from_secs(60));
        assert_eq!(config.revoked_keys(), ["publisher-2019"]);
    }

    #[test]
    fn test_concurrency_floor_is_one() {
        let config = ManagerConfig::new().with_max_concurrent_downloads(0);
        assert_eq!(config.max_concurrent_downloads(), 1);
    }

    #[test]
    fn test_trusted_key_from_base64() {
        let key = ed25519_dalek::SigningKey::from_bytes(&[9u8; 32]).verifying_key();
        let encoded = BASE64.encode(key.as_bytes());

        let config = ManagerConfig::new()
            .with_trusted_key_encoded("publisher-2024", &encoded)
            .unwrap();
        assert_eq!(config.trusted_keys().len(), 1);
        assert_eq!(config.trusted_keys()[0].0, "publisher-2024");
    }

    #[test]
    fn test_trusted_key_rejects_garbage() {
        assert!(matches!(
            ManagerConfig::new().with_trusted_key_encoded("k", "not base64!!"),
            Err(KeyParseError::Encoding(_))
        ));
        assert!(matches!(
            ManagerConfig::new().with_trusted_key_encoded("k", "c2hvcnQ="),
            Err(KeyParseError::Key(_))
        ));
    }
}
