//! Lookup-and-install contract for external assistant integrations.
//!
//! A deliberately narrow surface: a read-only text query over the catalog,
//! and a fire-and-forget install by identity. Outcomes never return through
//! this interface; they surface on the manager's snapshot stream like any
//! other install.

use std::sync::Arc;

use crate::catalog::AuthSession;
use crate::lifecycle::LifecycleManager;
use crate::version::VersionId;

/// Gateway an assistant integration talks to.
pub struct AssistGateway {
    manager: Arc<LifecycleManager>,
    session: AuthSession,
}

impl AssistGateway {
    /// Create a gateway over a running manager and an authenticated session.
    pub fn new(manager: Arc<LifecycleManager>, session: AuthSession) -> Self {
        Self { manager, session }
    }

    /// Versions whose display string contains `matching`, as
    /// (identity, display string) pairs in catalog order.
    pub async fn find_versions(&self, matching: &str) -> Vec<(VersionId, String)> {
        self.manager
            .find_versions(matching)
            .await
            .into_iter()
            .map(|v| (v.id.clone(), v.display_string()))
            .collect()
    }

    /// Enqueue an install for `id` and return immediately.
    ///
    /// Refusals (unknown identity, already installed) are logged, not
    /// returned; the caller is a voice surface with no error channel.
    pub async fn install(&self, id: &VersionId) {
        match self.manager.request_install(id, &self.session).await {
            Ok(ticket) => {
                tracing::info!("assistant enqueued install of {}", ticket.id());
            }
            Err(e) => {
                tracing::warn!("assistant install request for {} refused: {}", id, e);
            }
        }
    }
}
