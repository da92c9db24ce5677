//! Lifecycle orchestration for DevKit versions.
//!
//! [`LifecycleManager`] is the single owner of per-version state. It merges
//! the remote catalog, the on-disk registry, and in-flight pipeline state
//! into one authoritative view, drives install pipelines, and enforces
//! selection exclusivity. Everything observable leaves through a `watch`
//! snapshot channel; everything mutable goes through the manager.

pub mod merge;
mod pipeline;
pub mod state;

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tokio::sync::{watch, Mutex, RwLock, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::catalog::{AuthSession, CatalogClient, CatalogError, HttpCatalogClient};
use crate::config::ManagerConfig;
use crate::install::{
    needs_elevation, Installer, LocalChannel, PrivilegedChannel, UnixSocketChannel,
};
use crate::registry::{InstalledCopy, InstalledRegistry, RegistryError, VERSIONS_DIR};
use crate::store::{ArchiveStore, HttpTransport};
use crate::verify::{Ed25519Verifier, SignatureVerifier};
use crate::version::{RemoteVersion, VersionId};

pub use state::{FailureCode, FailureReason, StateEvent, TransitionError, VersionState};

/// Errors from manager operations.
#[derive(Debug, Error)]
pub enum ManagerError {
    /// Catalog fetch failed; any previously fetched catalog is kept.
    #[error("catalog refresh failed: {0}")]
    Catalog(#[from] CatalogError),

    /// The on-disk registry could not be scanned.
    #[error("registry scan failed: {0}")]
    Registry(#[from] RegistryError),

    /// The requested identity is in neither the catalog nor the registry.
    #[error("unknown version {id}")]
    UnknownVersion { id: VersionId },

    /// Install requested for a version that is already on disk.
    #[error("version {id} is already installed")]
    AlreadyInstalled { id: VersionId },

    /// Select/uninstall requested for a version that is not on disk.
    #[error("version {id} is not installed")]
    NotInstalled { id: VersionId },

    /// Uninstall requested for the selected version.
    #[error("version {id} is currently selected; select another version first")]
    UninstallSelected { id: VersionId },

    /// Selection via the privileged channel failed.
    #[error(transparent)]
    Install(#[from] crate::install::InstallError),

    /// Local filesystem failure.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Point-in-time view of every known version.
#[derive(Debug, Clone, Default)]
pub struct StateSnapshot {
    /// State per identity.
    pub states: BTreeMap<VersionId, VersionState>,
    /// Installed copies whose embedded metadata could not be read. Visible
    /// but excluded from lifecycle operations.
    pub unknown_copies: Vec<InstalledCopy>,
}

impl StateSnapshot {
    /// State of one identity, `NotInstalled` when unknown.
    pub fn state_of(&self, id: &VersionId) -> VersionState {
        self.states
            .get(id)
            .cloned()
            .unwrap_or(VersionState::NotInstalled)
    }
}

/// Terminal result of one install attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallOutcome {
    /// The bundle is installed and visible in the registry.
    Installed { path: PathBuf },
    /// The attempt failed; the reason is retained in the version's state.
    Failed(FailureReason),
}

/// Handle onto an install attempt.
///
/// Requests for the same identity coalesce: every caller gets a ticket onto
/// the same pipeline and observes the same terminal outcome.
#[derive(Debug, Clone)]
pub struct InstallTicket {
    id: VersionId,
    outcome: watch::Receiver<Option<InstallOutcome>>,
}

impl InstallTicket {
    /// Identity this attempt is for.
    pub fn id(&self) -> &VersionId {
        &self.id
    }

    /// Wait for the attempt to reach a terminal outcome.
    pub async fn wait(mut self) -> InstallOutcome {
        loop {
            let current = self.outcome.borrow().clone();
            if let Some(outcome) = current {
                return outcome;
            }
            if self.outcome.changed().await.is_err() {
                return InstallOutcome::Failed(FailureReason::new(
                    FailureCode::Io,
                    "install pipeline ended without reporting an outcome",
                ));
            }
        }
    }
}

/// One pipeline currently running.
struct ActiveInstall {
    outcome_tx: watch::Sender<Option<InstallOutcome>>,
    cancel: CancellationToken,
}

impl ActiveInstall {
    fn ticket(&self, id: &VersionId) -> InstallTicket {
        InstallTicket {
            id: id.clone(),
            outcome: self.outcome_tx.subscribe(),
        }
    }
}

/// State behind the manager's lock.
struct Inner {
    states: BTreeMap<VersionId, VersionState>,
    remote: BTreeMap<VersionId, RemoteVersion>,
    unknown: Vec<InstalledCopy>,
    active: HashMap<VersionId, ActiveInstall>,
    last_refresh: Option<Instant>,
}

/// Everything the manager and its pipelines share.
struct Shared {
    config: ManagerConfig,
    catalog: Arc<dyn CatalogClient>,
    store: Arc<ArchiveStore>,
    registry: Arc<InstalledRegistry>,
    installer: Arc<Installer>,
    verifier: Arc<dyn SignatureVerifier>,
    inner: Mutex<Inner>,
    snapshot_tx: watch::Sender<StateSnapshot>,
    /// Caps concurrent downloads.
    download_gate: Arc<Semaphore>,
    /// Read side: registry scans. Write side: relocation, selection,
    /// uninstall. Keeps ground-truth reads from racing mutations.
    install_phase: RwLock<()>,
}

impl Shared {
    /// Final install location for an identity.
    fn install_location(&self, id: &VersionId) -> PathBuf {
        self.config
            .install_root()
            .join(VERSIONS_DIR)
            .join(id.bundle_dir_name())
    }

    /// Rebuild the published snapshot from `inner`. Caller holds the lock.
    fn publish(&self, inner: &Inner) {
        let snapshot = StateSnapshot {
            states: inner.states.clone(),
            unknown_copies: inner.unknown.clone(),
        };
        self.snapshot_tx.send_replace(snapshot);
    }
}

/// Orchestrator facade over catalog, store, registry, verification, and
/// installation.
pub struct LifecycleManager {
    shared: Arc<Shared>,
}

impl LifecycleManager {
    /// Create a manager with production components built from `config`.
    pub fn new(config: ManagerConfig) -> Self {
        let catalog: Arc<dyn CatalogClient> =
            Arc::new(HttpCatalogClient::new(config.catalog_url()));
        let store = Arc::new(ArchiveStore::new(
            config.cache_dir(),
            Arc::new(HttpTransport::new()),
        ));
        let registry = Arc::new(InstalledRegistry::new(config.install_root()));

        let channel: Arc<dyn PrivilegedChannel> = if needs_elevation(config.install_root()) {
            UnixSocketChannel::new(config.helper_socket())
        } else {
            LocalChannel::new()
        };
        let installer = Arc::new(Installer::new(channel));

        let mut verifier = Ed25519Verifier::new();
        for (key_id, key) in config.trusted_keys() {
            verifier = verifier.with_trusted_key(key_id.clone(), *key);
        }
        for key_id in config.revoked_keys() {
            verifier = verifier.with_revoked_key(key_id.clone());
        }

        Self::with_components(config, catalog, store, registry, installer, Arc::new(verifier))
    }

    /// Create a manager from explicit components.
    pub fn with_components(
        config: ManagerConfig,
        catalog: Arc<dyn CatalogClient>,
        store: Arc<ArchiveStore>,
        registry: Arc<InstalledRegistry>,
        installer: Arc<Installer>,
        verifier: Arc<dyn SignatureVerifier>,
    ) -> Self {
        let (snapshot_tx, _) = watch::channel(StateSnapshot::default());
        let download_gate = Arc::new(Semaphore::new(config.max_concurrent_downloads()));
        Self {
            shared: Arc::new(Shared {
                config,
                catalog,
                store,
                registry,
                installer,
                verifier,
                inner: Mutex::new(Inner {
                    states: BTreeMap::new(),
                    remote: BTreeMap::new(),
                    unknown: Vec::new(),
                    active: HashMap::new(),
                    last_refresh: None,
                }),
                snapshot_tx,
                download_gate,
                install_phase: RwLock::new(()),
            }),
        }
    }

    /// Subscribe to snapshot updates.
    ///
    /// A receiver obtained at any time immediately yields the current view.
    pub fn subscribe(&self) -> watch::Receiver<StateSnapshot> {
        self.snapshot_tx().subscribe()
    }

    /// Current view of every known version.
    pub fn snapshot(&self) -> StateSnapshot {
        self.snapshot_tx().borrow().clone()
    }

    fn snapshot_tx(&self) -> &watch::Sender<StateSnapshot> {
        &self.shared.snapshot_tx
    }

    /// Fetch the catalog, rescan the disk, and merge both into the view.
    ///
    /// A fetch failure keeps the previously fetched catalog: the local scan
    /// and merge still run, and the error is returned so the caller can
    /// surface it.
    pub async fn refresh(&self, session: &AuthSession) -> Result<(), ManagerError> {
        let fetched = self.shared.catalog.fetch_catalog(session).await;

        let fetch_error = match fetched {
            Ok(versions) => {
                let mut inner = self.shared.inner.lock().await;
                inner.remote = versions.into_iter().map(|v| (v.id.clone(), v)).collect();
                inner.last_refresh = Some(Instant::now());
                None
            }
            Err(e) => {
                tracing::warn!("catalog refresh failed, keeping stale catalog: {}", e);
                Some(e)
            }
        };

        self.refresh_local().await?;

        match fetch_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    /// Rescan the disk and remerge without touching the network.
    pub async fn refresh_local(&self) -> Result<(), ManagerError> {
        let copies = self.scan_registry().await?;

        let mut inner = self.shared.inner.lock().await;
        inner.states = merge::merge_states(&inner.states, &inner.remote, &copies);
        inner.unknown = copies.into_iter().filter(InstalledCopy::is_unknown).collect();
        self.shared.publish(&inner);
        Ok(())
    }

    /// Refresh only when the catalog is older than the configured staleness.
    ///
    /// # Returns
    ///
    /// `true` when a refresh actually ran.
    pub async fn update_if_needed(&self, session: &AuthSession) -> Result<bool, ManagerError> {
        let staleness = self.shared.config.refresh_staleness();
        let stale = {
            let inner = self.shared.inner.lock().await;
            match inner.last_refresh {
                Some(at) => at.elapsed() >= staleness,
                None => true,
            }
        };
        if !stale {
            return Ok(false);
        }
        self.refresh(session).await?;
        Ok(true)
    }

    /// Catalog entries whose display string contains `matching`
    /// (case-insensitive). An empty pattern returns everything.
    pub async fn find_versions(&self, matching: &str) -> Vec<RemoteVersion> {
        let needle = matching.to_lowercase();
        let inner = self.shared.inner.lock().await;
        inner
            .remote
            .values()
            .filter(|v| v.display_string().to_lowercase().contains(&needle))
            .cloned()
            .collect()
    }

    /// Request installation of `id`.
    ///
    /// Repeated requests while a pipeline for the same identity is running
    /// coalesce onto that pipeline; every returned ticket observes the same
    /// terminal outcome. A version in `Failed` is re-enterable; a version
    /// already on disk is refused.
    pub async fn request_install(
        &self,
        id: &VersionId,
        session: &AuthSession,
    ) -> Result<InstallTicket, ManagerError> {
        let mut inner = self.shared.inner.lock().await;

        if let Some(active) = inner.active.get(id) {
            tracing::debug!("coalescing install request for {}", id);
            return Ok(active.ticket(id));
        }

        let version = inner
            .remote
            .get(id)
            .cloned()
            .ok_or_else(|| ManagerError::UnknownVersion { id: id.clone() })?;

        let current = inner
            .states
            .get(id)
            .cloned()
            .unwrap_or(VersionState::NotInstalled);
        if current.is_installed() {
            return Err(ManagerError::AlreadyInstalled { id: id.clone() });
        }
        if current.is_pipeline_active() {
            // Leftover from a previous process; no pipeline owns it, so the
            // fresh request takes over.
            tracing::warn!("restarting stale in-flight state {:?} for {}", current, id);
        }

        inner.states.insert(
            id.clone(),
            VersionState::Downloading {
                bytes_received: 0,
                bytes_total: None,
            },
        );

        let (outcome_tx, _) = watch::channel(None);
        let cancel = CancellationToken::new();
        let active = ActiveInstall {
            outcome_tx,
            cancel: cancel.clone(),
        };
        let ticket = active.ticket(id);
        inner.active.insert(id.clone(), active);
        self.shared.publish(&inner);
        drop(inner);

        tracing::info!("starting install pipeline for {}", version.id);
        tokio::spawn(pipeline::run_pipeline(
            Arc::clone(&self.shared),
            version,
            session.clone(),
            cancel,
        ));

        Ok(ticket)
    }

    /// Cancel the in-flight install for `id`, if any.
    ///
    /// Cancellation is honored up to the start of installation; partial
    /// download state is kept for a later resume.
    ///
    /// # Returns
    ///
    /// `true` when there was a pipeline to cancel.
    pub async fn cancel(&self, id: &VersionId) -> bool {
        let inner = self.shared.inner.lock().await;
        match inner.active.get(id) {
            Some(active) => {
                tracing::info!("cancelling install of {}", id);
                active.cancel.cancel();
                self.shared.store.cancel(id);
                true
            }
            None => false,
        }
    }

    /// Make `id` the selected version.
    ///
    /// Atomically repoints the selection symlink via the privileged channel
    /// and demotes the previously selected version. At most one version is
    /// ever `Selected`. Selecting the already-selected version is a no-op.
    pub async fn select(&self, id: &VersionId) -> Result<(), ManagerError> {
        let _guard = self.shared.install_phase.write().await;

        let (path, already_selected) = {
            let inner = self.shared.inner.lock().await;
            match inner.states.get(id) {
                Some(VersionState::Installed { path }) => (path.clone(), false),
                Some(VersionState::Selected { path }) => (path.clone(), true),
                _ => return Err(ManagerError::NotInstalled { id: id.clone() }),
            }
        };
        if already_selected {
            return Ok(());
        }

        self.shared
            .installer
            .select(&path, self.shared.registry.selection_link())
            .await?;

        let mut inner = self.shared.inner.lock().await;
        let previous = inner.states.iter().find_map(|(other, state)| {
            matches!(state, VersionState::Selected { .. }).then(|| other.clone())
        });
        if let Some(previous) = previous {
            apply_event(&mut inner, &previous, StateEvent::Deselected);
        }
        apply_event(&mut inner, id, StateEvent::Selected);
        self.shared.publish(&inner);
        tracing::info!("selected {}", id);
        Ok(())
    }

    /// Remove an installed version from disk.
    ///
    /// The selected version cannot be uninstalled; select another version
    /// first.
    pub async fn uninstall(&self, id: &VersionId) -> Result<(), ManagerError> {
        let _guard = self.shared.install_phase.write().await;

        let path = {
            let inner = self.shared.inner.lock().await;
            match inner.states.get(id) {
                Some(VersionState::Installed { path }) => path.clone(),
                Some(VersionState::Selected { .. }) => {
                    return Err(ManagerError::UninstallSelected { id: id.clone() })
                }
                _ => return Err(ManagerError::NotInstalled { id: id.clone() }),
            }
        };

        // Removal mutates the install location, so it goes through the same
        // privileged channel as relocation and selection.
        self.shared.installer.uninstall(&path).await?;

        let mut inner = self.shared.inner.lock().await;
        if inner.remote.contains_key(id) {
            inner.states.insert(id.clone(), VersionState::NotInstalled);
        } else {
            inner.states.remove(id);
        }
        self.shared.publish(&inner);
        tracing::info!("uninstalled {} from {}", id, path.display());
        Ok(())
    }

    /// Scan the registry on the blocking pool, under the install-phase read
    /// guard so relocations never race the scan.
    async fn scan_registry(&self) -> Result<Vec<InstalledCopy>, ManagerError> {
        let _guard = self.shared.install_phase.read().await;
        let registry = Arc::clone(&self.shared.registry);
        tokio::task::spawn_blocking(move || registry.scan())
            .await
            .map_err(|e| ManagerError::Io {
                path: PathBuf::new(),
                source: io::Error::other(e),
            })?
            .map_err(Into::into)
    }
}

/// Apply a state-machine event to one identity inside the lock.
///
/// Transitions are validated; the pipeline and the manager are the only
/// writers, so a refused transition indicates a logic error and is logged
/// rather than applied.
fn apply_event(inner: &mut Inner, id: &VersionId, event: StateEvent) {
    let current = inner
        .states
        .get(id)
        .cloned()
        .unwrap_or(VersionState::NotInstalled);
    match current.transition(event) {
        Ok(next) => {
            inner.states.insert(id.clone(), next);
        }
        Err(e) => {
            tracing::error!("refusing invalid transition for {}: {}", id, e);
        }
    }
}
