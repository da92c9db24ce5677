//! HTTP implementation of the catalog client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};

use crate::version::RemoteVersion;

use super::feed::parse_catalog;
use super::{AuthSession, CatalogClient, CatalogError};

/// Default HTTP request timeout (30 seconds).
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// HTTP-based implementation of [`CatalogClient`].
///
/// Fetches the version feed from a configured URL using the session's bearer
/// token. No caching; the orchestrator keeps the last good merge on failure.
#[derive(Clone)]
pub struct HttpCatalogClient {
    client: Client,
    catalog_url: String,
}

impl std::fmt::Debug for HttpCatalogClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpCatalogClient")
            .field("catalog_url", &self.catalog_url)
            .finish()
    }
}

impl HttpCatalogClient {
    /// Create a client for the given feed URL with default settings.
    pub fn new(catalog_url: impl Into<String>) -> Self {
        Self::with_timeout(catalog_url, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    /// Create a client with a custom request timeout.
    pub fn with_timeout(catalog_url: impl Into<String>, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("Toolvault/", env!("CARGO_PKG_VERSION")))
            .build()
            .expect("failed to create HTTP client");

        Self {
            client,
            catalog_url: catalog_url.into(),
        }
    }
}

#[async_trait]
impl CatalogClient for HttpCatalogClient {
    async fn fetch_catalog(
        &self,
        session: &AuthSession,
    ) -> Result<Vec<RemoteVersion>, CatalogError> {
        let response = self
            .client
            .get(&self.catalog_url)
            .bearer_auth(session.bearer_token())
            .send()
            .await
            .map_err(|e| CatalogError::Network {
                url: self.catalog_url.clone(),
                reason: e.to_string(),
            })?;

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(CatalogError::AuthExpired);
            }
            status if !status.is_success() => {
                return Err(CatalogError::Network {
                    url: self.catalog_url.clone(),
                    reason: format!("HTTP {}", status),
                });
            }
            _ => {}
        }

        let body = response.text().await.map_err(|e| CatalogError::Network {
            url: self.catalog_url.clone(),
            reason: e.to_string(),
        })?;

        parse_catalog(&body).map_err(|reason| CatalogError::Parse {
            url: self.catalog_url.clone(),
            reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = HttpCatalogClient::new("https://example.com/catalog.json");
        assert_eq!(client.catalog_url, "https://example.com/catalog.json");
    }

    #[test]
    fn test_client_with_timeout() {
        let client = HttpCatalogClient::with_timeout(
            "https://example.com/catalog.json",
            Duration::from_secs(60),
        );
        assert_eq!(client.catalog_url, "https://example.com/catalog.json");
    }

    // Network-dependent behavior is covered by the lifecycle integration
    // tests with a mock CatalogClient; these verify construction only.
}
