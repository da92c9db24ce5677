//! Remote catalog client: fetches the list of publishable DevKit versions.
//!
//! The client consumes an opaque [`AuthSession`] capability supplied by the
//! external authentication collaborator; it never collects credentials and
//! never retries auth failures itself. On [`CatalogError::AuthExpired`] the
//! caller must re-acquire a session externally and retry.
//!
//! The client does not cache; the orchestrator decides when stale data is
//! kept (a failed refresh leaves the previous merged view untouched).

mod feed;
mod http;

pub use feed::parse_catalog;
pub use http::HttpCatalogClient;

use async_trait::async_trait;
use thiserror::Error;

use crate::version::RemoteVersion;

/// Opaque authenticated-session capability for catalog and archive requests.
///
/// Produced by the external auth flow; this crate only forwards its bearer
/// token on HTTP requests and reacts to expiry signals.
#[derive(Debug, Clone)]
pub struct AuthSession {
    token: String,
}

impl AuthSession {
    /// Wrap a bearer token obtained from the external auth collaborator.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    /// The bearer token to attach to authenticated requests.
    pub(crate) fn bearer_token(&self) -> &str {
        &self.token
    }
}

/// Errors from catalog fetching.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// Transient network failure; the caller may retry.
    #[error("network error fetching catalog from {url}: {reason}")]
    Network { url: String, reason: String },

    /// The session capability has expired; re-authentication is required
    /// externally before retrying.
    #[error("authenticated session expired")]
    AuthExpired,

    /// The feed was fetched but does not parse. The failure applies to this
    /// refresh only; previously merged data stays valid.
    #[error("malformed catalog feed from {url}: {reason}")]
    Parse { url: String, reason: String },
}

/// Client for fetching the remote version catalog.
///
/// This trait abstracts the network fetch to enable testing without network
/// access.
#[async_trait]
pub trait CatalogClient: Send + Sync {
    /// Fetch the full catalog of publishable versions.
    ///
    /// # Arguments
    ///
    /// * `session` - A valid, non-expired authenticated session capability
    ///
    /// # Returns
    ///
    /// Versions in feed order. Entries missing an identity or download URL
    /// have already been skipped (with a warning), not treated as fatal.
    async fn fetch_catalog(&self, session: &AuthSession) -> Result<Vec<RemoteVersion>, CatalogError>;
}
