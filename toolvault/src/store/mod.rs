//! Archive store: content-addressed local cache of downloaded archives with
//! resumable, cancellable transfers.
//!
//! The store guarantees at most one active transfer per version identity; a
//! second start request for the same identity attaches to the running
//! session instead of opening a parallel transfer. Cancellation stops
//! network I/O promptly but keeps the partial file and its resume metadata
//! on disk, so a later request continues where the transfer stopped.
//!
//! Layout in the cache directory, one pair per identity:
//!
//! - `<stem>.tar.gz.partial` - bytes written so far
//! - `<stem>.resume.json` - source URL, offset, remote validator
//!
//! On success the partial is renamed to `<stem>.tar.gz` and handed off as a
//! closed, fully written archive.

mod progress;
mod resume;
mod transport;

pub use progress::DownloadProgress;
pub use resume::ResumeMeta;
pub use transport::{ArchiveTransport, ByteStream, HttpTransport, TransferBody, TransportError};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::StreamExt;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::catalog::AuthSession;
use crate::version::{RemoteVersion, VersionId};

/// Persist a resume checkpoint after this many newly written bytes.
const CHECKPOINT_BYTES: u64 = 8 * 1024 * 1024;

/// Why a transfer did not complete.
///
/// Kept `Clone` so every attached handle observes the same outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadFailure {
    /// Transient network failure; partial file kept for resume.
    Network(String),
    /// The session capability expired mid-transfer.
    AuthExpired,
    /// Local filesystem failure writing the partial file.
    Io(String),
}

impl std::fmt::Display for DownloadFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Network(reason) => write!(f, "network error: {}", reason),
            Self::AuthExpired => write!(f, "authenticated session expired"),
            Self::Io(reason) => write!(f, "I/O error: {}", reason),
        }
    }
}

/// Terminal result of a transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// Closed, fully written archive, ready for checksum verification.
    Completed(PathBuf),
    /// Transfer failed; partial file and resume metadata remain on disk.
    Failed(DownloadFailure),
    /// Cancelled by request; partial file and resume metadata remain on
    /// disk. Cancellation is not abandonment.
    Cancelled,
}

/// Handle onto an in-flight (or already finished) transfer.
///
/// Multiple handles may refer to the same underlying session; all of them
/// observe the same progress stream and the same terminal outcome.
#[derive(Debug, Clone)]
pub struct DownloadHandle {
    id: VersionId,
    progress: watch::Receiver<DownloadProgress>,
    outcome: watch::Receiver<Option<DownloadOutcome>>,
    cancel: CancellationToken,
}

impl DownloadHandle {
    /// Identity this transfer belongs to.
    pub fn id(&self) -> &VersionId {
        &self.id
    }

    /// Live progress observations. A receiver obtained mid-transfer
    /// immediately yields the current cumulative progress.
    pub fn progress(&self) -> watch::Receiver<DownloadProgress> {
        self.progress.clone()
    }

    /// Request cancellation of the underlying transfer.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the transfer to reach a terminal outcome.
    pub async fn wait(mut self) -> DownloadOutcome {
        loop {
            let current = self.outcome.borrow().clone();
            if let Some(outcome) = current {
                return outcome;
            }
            if self.outcome.changed().await.is_err() {
                return DownloadOutcome::Failed(DownloadFailure::Io(
                    "download task ended without reporting an outcome".to_string(),
                ));
            }
        }
    }
}

/// One session tracked by the store.
struct ActiveSession {
    progress: watch::Receiver<DownloadProgress>,
    outcome: watch::Receiver<Option<DownloadOutcome>>,
    cancel: CancellationToken,
}

impl ActiveSession {
    fn handle(&self, id: &VersionId) -> DownloadHandle {
        DownloadHandle {
            id: id.clone(),
            progress: self.progress.clone(),
            outcome: self.outcome.clone(),
            cancel: self.cancel.clone(),
        }
    }

    fn is_active(&self) -> bool {
        self.outcome.borrow().is_none()
    }
}

/// Local cache of downloaded archives with resume support.
pub struct ArchiveStore {
    cache_dir: PathBuf,
    transport: Arc<dyn ArchiveTransport>,
    sessions: DashMap<VersionId, ActiveSession>,
}

impl ArchiveStore {
    /// Create a store over `cache_dir` using the given transport.
    pub fn new(cache_dir: impl Into<PathBuf>, transport: Arc<dyn ArchiveTransport>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            transport,
            sessions: DashMap::new(),
        }
    }

    /// Final archive path for an identity.
    pub fn archive_path(&self, id: &VersionId) -> PathBuf {
        self.cache_dir.join(format!("{}.tar.gz", id.cache_stem()))
    }

    fn partial_path(&self, id: &VersionId) -> PathBuf {
        self.cache_dir
            .join(format!("{}.tar.gz.partial", id.cache_stem()))
    }

    fn meta_path(&self, id: &VersionId) -> PathBuf {
        self.cache_dir
            .join(format!("{}.resume.json", id.cache_stem()))
    }

    /// Already-downloaded archive for an identity, if present.
    pub fn cached_archive(&self, id: &VersionId) -> Option<PathBuf> {
        let path = self.archive_path(id);
        path.is_file().then_some(path)
    }

    /// Start a transfer for `version`, or attach to the one already running
    /// for the same identity.
    ///
    /// If the final archive is already in the cache, the returned handle
    /// resolves immediately without touching the network.
    pub fn start_or_resume(
        &self,
        version: &RemoteVersion,
        session: &AuthSession,
    ) -> DownloadHandle {
        if let Some(path) = self.cached_archive(&version.id) {
            return finished_handle(&version.id, DownloadOutcome::Completed(path));
        }

        match self.sessions.entry(version.id.clone()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_active() {
                    tracing::debug!("attaching to active download for {}", version.id);
                    occupied.get().handle(&version.id)
                } else {
                    let fresh = self.spawn_session(version, session);
                    let handle = fresh.handle(&version.id);
                    *occupied.get_mut() = fresh;
                    handle
                }
            }
            Entry::Vacant(vacant) => {
                let fresh = self.spawn_session(version, session);
                let handle = fresh.handle(&version.id);
                vacant.insert(fresh);
                handle
            }
        }
    }

    /// Cancel the active transfer for `id`, if any.
    ///
    /// The partial file and resume metadata stay on disk for a later resume.
    pub fn cancel(&self, id: &VersionId) {
        if let Some(session) = self.sessions.get(id) {
            session.cancel.cancel();
        }
    }

    /// Remove the cached archive for an identity (after a checksum failure,
    /// so the retry re-downloads instead of re-verifying the same bytes).
    pub fn evict(&self, id: &VersionId) {
        for path in [
            self.archive_path(id),
            self.partial_path(id),
            self.meta_path(id),
        ] {
            if let Err(e) = std::fs::remove_file(&path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!("failed to evict {}: {}", path.display(), e);
                }
            }
        }
    }

    fn spawn_session(&self, version: &RemoteVersion, session: &AuthSession) -> ActiveSession {
        let (progress_tx, progress_rx) = watch::channel(DownloadProgress {
            bytes_received: 0,
            bytes_total: version.size_bytes,
        });
        let (outcome_tx, outcome_rx) = watch::channel(None);
        let cancel = CancellationToken::new();

        let ctx = TransferContext {
            transport: Arc::clone(&self.transport),
            url: version.download_url.clone(),
            session: session.clone(),
            size_hint: version.size_bytes,
            partial: self.partial_path(&version.id),
            meta: self.meta_path(&version.id),
            dest: self.archive_path(&version.id),
            cache_dir: self.cache_dir.clone(),
        };
        let id = version.id.clone();
        let token = cancel.clone();

        tokio::spawn(async move {
            let outcome = run_transfer(ctx, &progress_tx, &token).await;
            tracing::info!("download for {} finished: {:?}", id, outcome);
            let _ = outcome_tx.send(Some(outcome));
        });

        ActiveSession {
            progress: progress_rx,
            outcome: outcome_rx,
            cancel,
        }
    }
}

/// Everything a transfer task needs, owned.
struct TransferContext {
    transport: Arc<dyn ArchiveTransport>,
    url: String,
    session: AuthSession,
    size_hint: Option<u64>,
    partial: PathBuf,
    meta: PathBuf,
    dest: PathBuf,
    cache_dir: PathBuf,
}

fn finished_handle(id: &VersionId, outcome: DownloadOutcome) -> DownloadHandle {
    let (_, progress) = watch::channel(DownloadProgress::default());
    let (_, outcome_rx) = watch::channel(Some(outcome));
    DownloadHandle {
        id: id.clone(),
        progress,
        outcome: outcome_rx,
        cancel: CancellationToken::new(),
    }
}

/// Resume offset and validator for a transfer, from the partial file and its
/// sidecar. A partial without a matching, readable sidecar is discarded, and
/// so is one whose sidecar carries no validator: without a validator there
/// is no way to confirm the remote resource is still the same bytes, and a
/// blind range request would splice two representations together.
fn resume_point(partial: &Path, meta_path: &Path, url: &str) -> (u64, Option<String>) {
    let partial_len = match std::fs::metadata(partial) {
        Ok(m) => m.len(),
        Err(_) => return (0, None),
    };

    match ResumeMeta::load(meta_path) {
        Some(ResumeMeta {
            validator: None, ..
        }) => {
            tracing::warn!(
                "no validator recorded for {}, restarting from zero",
                partial.display()
            );
            (0, None)
        }
        Some(meta) if meta.url == url && partial_len > 0 => (partial_len, meta.validator),
        Some(meta) => {
            tracing::warn!(
                "resume metadata for {} does not match (recorded URL {}), restarting",
                partial.display(),
                meta.url
            );
            (0, None)
        }
        None => (0, None),
    }
}

async fn run_transfer(
    ctx: TransferContext,
    progress_tx: &watch::Sender<DownloadProgress>,
    cancel: &CancellationToken,
) -> DownloadOutcome {
    if let Err(e) = tokio::fs::create_dir_all(&ctx.cache_dir).await {
        return DownloadOutcome::Failed(DownloadFailure::Io(e.to_string()));
    }

    let (mut offset, validator) = resume_point(&ctx.partial, &ctx.meta, &ctx.url);
    if offset > 0 {
        tracing::info!("resuming {} from byte {}", ctx.url, offset);
    }
    let _ = progress_tx.send(DownloadProgress {
        bytes_received: offset,
        bytes_total: ctx.size_hint,
    });

    let open = tokio::select! {
        _ = cancel.cancelled() => return DownloadOutcome::Cancelled,
        open = ctx
            .transport
            .open(&ctx.url, &ctx.session, offset, validator.as_deref()) => open,
    };

    let mut body = match open {
        Ok(body) => body,
        Err(TransportError::AuthExpired) => {
            return DownloadOutcome::Failed(DownloadFailure::AuthExpired)
        }
        Err(TransportError::Network { reason, .. }) => {
            return DownloadOutcome::Failed(DownloadFailure::Network(reason))
        }
    };

    if offset > 0 && !body.resumed {
        // Remote resource changed or the validator was rejected: the server
        // sent the full body, so the stale partial must go.
        tracing::warn!("remote resource changed for {}, restarting from zero", ctx.url);
        offset = 0;
    }

    let total = body.total_len.or(ctx.size_hint);
    let mut file = match open_partial(&ctx.partial, offset > 0).await {
        Ok(file) => file,
        Err(e) => return DownloadOutcome::Failed(DownloadFailure::Io(e.to_string())),
    };

    let checkpoint = ResumeMeta {
        url: ctx.url.clone(),
        offset,
        validator: body.validator.clone(),
    };
    if let Err(e) = checkpoint.store(&ctx.meta) {
        return DownloadOutcome::Failed(DownloadFailure::Io(e.to_string()));
    }

    let mut written = offset;
    let mut last_checkpoint = offset;
    let _ = progress_tx.send(DownloadProgress {
        bytes_received: written,
        bytes_total: total,
    });

    loop {
        let chunk = tokio::select! {
            _ = cancel.cancelled() => {
                // Stop network I/O now, but leave everything needed for a
                // future resume in place.
                flush_checkpoint(&mut file, &ctx.meta, &checkpoint, written).await;
                return DownloadOutcome::Cancelled;
            }
            chunk = body.stream.next() => chunk,
        };

        match chunk {
            Some(Ok(bytes)) => {
                if let Err(e) = file.write_all(&bytes).await {
                    flush_checkpoint(&mut file, &ctx.meta, &checkpoint, written).await;
                    return DownloadOutcome::Failed(DownloadFailure::Io(e.to_string()));
                }
                written += bytes.len() as u64;
                let _ = progress_tx.send(DownloadProgress {
                    bytes_received: written,
                    bytes_total: total,
                });

                if written - last_checkpoint >= CHECKPOINT_BYTES {
                    flush_checkpoint(&mut file, &ctx.meta, &checkpoint, written).await;
                    last_checkpoint = written;
                }
            }
            Some(Err(e)) => {
                flush_checkpoint(&mut file, &ctx.meta, &checkpoint, written).await;
                return match e {
                    TransportError::AuthExpired => {
                        DownloadOutcome::Failed(DownloadFailure::AuthExpired)
                    }
                    TransportError::Network { reason, .. } => {
                        DownloadOutcome::Failed(DownloadFailure::Network(reason))
                    }
                };
            }
            None => break,
        }
    }

    if let Some(total) = total {
        if written < total {
            flush_checkpoint(&mut file, &ctx.meta, &checkpoint, written).await;
            return DownloadOutcome::Failed(DownloadFailure::Network(format!(
                "connection closed early: {} of {} bytes",
                written, total
            )));
        }
    }

    // Close the file fully before handing it off.
    if let Err(e) = file.sync_all().await {
        return DownloadOutcome::Failed(DownloadFailure::Io(e.to_string()));
    }
    drop(file);

    if let Err(e) = tokio::fs::rename(&ctx.partial, &ctx.dest).await {
        return DownloadOutcome::Failed(DownloadFailure::Io(e.to_string()));
    }
    ResumeMeta::remove(&ctx.meta);

    DownloadOutcome::Completed(ctx.dest)
}

async fn open_partial(path: &Path, append: bool) -> std::io::Result<File> {
    if append {
        OpenOptions::new().append(true).open(path).await
    } else {
        File::create(path).await
    }
}

/// Flush the partial file and persist the current offset so a later resume
/// continues from exactly what reached disk.
async fn flush_checkpoint(file: &mut File, meta_path: &Path, meta: &ResumeMeta, offset: u64) {
    if let Err(e) = file.flush().await {
        tracing::warn!("failed to flush partial file: {}", e);
    }
    let checkpoint = ResumeMeta {
        offset,
        ..meta.clone()
    };
    if let Err(e) = checkpoint.store(meta_path) {
        tracing::warn!("failed to persist resume metadata: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use semver::Version;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::TempDir;

    const VALIDATOR: &str = "\"etag-1\"";

    fn version(url: &str, size: Option<u64>) -> RemoteVersion {
        RemoteVersion {
            id: VersionId::new(Version::new(15, 2, 0), "15C500b"),
            name: "DevKit".to_string(),
            download_url: url.to_string(),
            release_notes_url: None,
            checksum: None,
            size_bytes: size,
            released_at: None,
            prerelease: false,
        }
    }

    fn session() -> AuthSession {
        AuthSession::new("token")
    }

    /// Scripted transport: serves `content`, optionally failing after
    /// `fail_after` bytes, optionally refusing range requests, optionally
    /// stalling forever after the scripted chunks.
    struct MockTransport {
        content: Vec<u8>,
        chunk_size: usize,
        fail_after: Mutex<Option<u64>>,
        honor_range: bool,
        stall_at_end: bool,
        serve_validator: bool,
        opens: AtomicUsize,
        offsets: Mutex<Vec<u64>>,
    }

    impl MockTransport {
        fn serving(content: Vec<u8>) -> Self {
            Self {
                content,
                chunk_size: 1024,
                fail_after: Mutex::new(None),
                honor_range: true,
                stall_at_end: false,
                serve_validator: true,
                opens: AtomicUsize::new(0),
                offsets: Mutex::new(Vec::new()),
            }
        }

        fn failing_after(mut self, bytes: u64) -> Self {
            self.fail_after = Mutex::new(Some(bytes));
            self
        }

        fn refusing_ranges(mut self) -> Self {
            self.honor_range = false;
            self
        }

        fn stalling(mut self) -> Self {
            self.stall_at_end = true;
            self
        }

        fn without_validator(mut self) -> Self {
            self.serve_validator = false;
            self
        }
    }

    #[async_trait::async_trait]
    impl ArchiveTransport for MockTransport {
        async fn open(
            &self,
            url: &str,
            _session: &AuthSession,
            offset: u64,
            validator: Option<&str>,
        ) -> Result<TransferBody, TransportError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            self.offsets.lock().unwrap().push(offset);

            let resumed = offset > 0 && self.honor_range && validator == Some(VALIDATOR);
            let start = if resumed { offset as usize } else { 0 };

            // Only the first open fails; a retry sees the full stream.
            let fail_after = self.fail_after.lock().unwrap().take();

            let mut items: Vec<Result<bytes::Bytes, TransportError>> = Vec::new();
            let mut sent = start as u64;
            for chunk in self.content[start..].chunks(self.chunk_size) {
                if let Some(limit) = fail_after {
                    if sent >= limit {
                        items.push(Err(TransportError::Network {
                            url: url.to_string(),
                            reason: "connection reset".to_string(),
                        }));
                        break;
                    }
                }
                items.push(Ok(bytes::Bytes::copy_from_slice(chunk)));
                sent += chunk.len() as u64;
            }

            let stream: ByteStream = if self.stall_at_end {
                Box::pin(futures::stream::iter(items).chain(futures::stream::pending()))
            } else {
                Box::pin(futures::stream::iter(items))
            };

            Ok(TransferBody {
                resumed,
                total_len: Some(self.content.len() as u64),
                validator: self.serve_validator.then(|| VALIDATOR.to_string()),
                stream,
            })
        }
    }

    fn content(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[tokio::test]
    async fn test_fresh_download_completes() {
        let temp = TempDir::new().unwrap();
        let data = content(10_000);
        let transport = Arc::new(MockTransport::serving(data.clone()));
        let store = ArchiveStore::new(temp.path(), transport);

        let v = version("https://example.com/devkit.tar.gz", None);
        let handle = store.start_or_resume(&v, &session());
        let outcome = handle.wait().await;

        let DownloadOutcome::Completed(path) = outcome else {
            panic!("expected completion, got {:?}", outcome);
        };
        assert_eq!(std::fs::read(&path).unwrap(), data);
        assert!(!store.meta_path(&v.id).exists());
        assert!(!store.partial_path(&v.id).exists());
    }

    #[tokio::test]
    async fn test_failure_leaves_partial_and_resume_metadata() {
        let temp = TempDir::new().unwrap();
        let data = content(10_000);
        let transport = Arc::new(MockTransport::serving(data).failing_after(4096));
        let store = ArchiveStore::new(temp.path(), transport);

        let v = version("https://example.com/devkit.tar.gz", None);
        let outcome = store.start_or_resume(&v, &session()).wait().await;

        assert!(matches!(
            outcome,
            DownloadOutcome::Failed(DownloadFailure::Network(_))
        ));
        let partial = store.partial_path(&v.id);
        assert!(partial.exists());
        let meta = ResumeMeta::load(&store.meta_path(&v.id)).unwrap();
        assert_eq!(meta.offset, std::fs::metadata(&partial).unwrap().len());
        assert_eq!(meta.validator.as_deref(), Some(VALIDATOR));
    }

    #[tokio::test]
    async fn test_resume_yields_byte_identical_file() {
        let temp = TempDir::new().unwrap();
        let data = content(50_000);

        // First attempt dies partway through.
        let failing = Arc::new(MockTransport::serving(data.clone()).failing_after(10_240));
        let store = ArchiveStore::new(temp.path(), failing);
        let v = version("https://example.com/devkit.tar.gz", Some(data.len() as u64));
        let outcome = store.start_or_resume(&v, &session()).wait().await;
        assert!(matches!(outcome, DownloadOutcome::Failed(_)));
        let resumed_from = std::fs::metadata(store.partial_path(&v.id)).unwrap().len();
        assert!(resumed_from > 0);

        // Second attempt resumes against a healthy server.
        let healthy = Arc::new(MockTransport::serving(data.clone()));
        let store = ArchiveStore::new(temp.path(), healthy.clone());
        let outcome = store.start_or_resume(&v, &session()).wait().await;

        let DownloadOutcome::Completed(path) = outcome else {
            panic!("expected completion, got {:?}", outcome);
        };
        assert_eq!(std::fs::read(&path).unwrap(), data);
        assert_eq!(healthy.offsets.lock().unwrap().as_slice(), &[resumed_from]);
    }

    #[tokio::test]
    async fn test_validator_mismatch_restarts_from_zero() {
        let temp = TempDir::new().unwrap();
        let data = content(20_000);

        let failing = Arc::new(MockTransport::serving(data.clone()).failing_after(4096));
        let store = ArchiveStore::new(temp.path(), failing);
        let v = version("https://example.com/devkit.tar.gz", Some(data.len() as u64));
        assert!(matches!(
            store.start_or_resume(&v, &session()).wait().await,
            DownloadOutcome::Failed(_)
        ));

        // Server refuses the range request: content changed remotely.
        let changed = content(20_000)
            .into_iter()
            .map(|b| b.wrapping_add(1))
            .collect::<Vec<u8>>();
        let refusing = Arc::new(MockTransport::serving(changed.clone()).refusing_ranges());
        let store = ArchiveStore::new(temp.path(), refusing);
        let outcome = store.start_or_resume(&v, &session()).wait().await;

        let DownloadOutcome::Completed(path) = outcome else {
            panic!("expected completion, got {:?}", outcome);
        };
        assert_eq!(std::fs::read(&path).unwrap(), changed);
    }

    #[tokio::test]
    async fn test_partial_without_validator_restarts_from_zero() {
        let temp = TempDir::new().unwrap();

        // First attempt dies partway through against a server that sends no
        // ETag or Last-Modified, so nothing ties the partial to the remote
        // representation.
        let data = content(20_000);
        let failing = Arc::new(
            MockTransport::serving(data)
                .without_validator()
                .failing_after(4096),
        );
        let store = ArchiveStore::new(temp.path(), failing);
        let v = version("https://example.com/devkit.tar.gz", Some(20_000));
        assert!(matches!(
            store.start_or_resume(&v, &session()).wait().await,
            DownloadOutcome::Failed(_)
        ));
        let meta = ResumeMeta::load(&store.meta_path(&v.id)).unwrap();
        assert!(meta.validator.is_none());
        assert!(meta.offset > 0);

        // The content changed remotely in the meantime. The retry must not
        // ask for a range at all; appending here would splice the two
        // representations into a file matching neither.
        let changed = content(20_000)
            .into_iter()
            .map(|b| b.wrapping_add(1))
            .collect::<Vec<u8>>();
        let fresh = Arc::new(MockTransport::serving(changed.clone()));
        let store = ArchiveStore::new(temp.path(), fresh.clone());
        let outcome = store.start_or_resume(&v, &session()).wait().await;

        let DownloadOutcome::Completed(path) = outcome else {
            panic!("expected completion, got {:?}", outcome);
        };
        assert_eq!(std::fs::read(&path).unwrap(), changed);
        assert_eq!(fresh.offsets.lock().unwrap().as_slice(), &[0]);
    }

    #[tokio::test]
    async fn test_second_start_attaches_to_running_session() {
        let temp = TempDir::new().unwrap();
        let transport = Arc::new(MockTransport::serving(content(4096)).stalling());
        let store = ArchiveStore::new(temp.path(), transport.clone());

        let v = version("https://example.com/devkit.tar.gz", Some(100_000));
        let first = store.start_or_resume(&v, &session());
        let second = store.start_or_resume(&v, &session());

        // Wait for the scripted bytes to arrive, then cancel.
        let mut progress = first.progress();
        while progress.borrow().bytes_received < 4096 {
            progress.changed().await.unwrap();
        }
        assert_eq!(transport.opens.load(Ordering::SeqCst), 1);

        store.cancel(&v.id);
        assert_eq!(first.wait().await, DownloadOutcome::Cancelled);
        assert_eq!(second.wait().await, DownloadOutcome::Cancelled);
    }

    #[tokio::test]
    async fn test_cancel_keeps_resume_state() {
        let temp = TempDir::new().unwrap();
        let transport = Arc::new(MockTransport::serving(content(100_000)).stalling());
        let store = ArchiveStore::new(temp.path(), transport);

        let v = version("https://example.com/devkit.tar.gz", Some(100_000));
        let handle = store.start_or_resume(&v, &session());
        let mut progress = handle.progress();
        while progress.borrow().bytes_received == 0 {
            progress.changed().await.unwrap();
        }

        handle.cancel();
        assert_eq!(handle.wait().await, DownloadOutcome::Cancelled);

        assert!(store.partial_path(&v.id).exists());
        let meta = ResumeMeta::load(&store.meta_path(&v.id)).unwrap();
        assert!(meta.offset > 0);
    }

    #[tokio::test]
    async fn test_cached_archive_short_circuits() {
        let temp = TempDir::new().unwrap();
        let transport = Arc::new(MockTransport::serving(content(1024)));
        let store = ArchiveStore::new(temp.path(), transport.clone());

        let v = version("https://example.com/devkit.tar.gz", None);
        std::fs::write(store.archive_path(&v.id), b"cached").unwrap();

        let outcome = store.start_or_resume(&v, &session()).wait().await;
        assert_eq!(
            outcome,
            DownloadOutcome::Completed(store.archive_path(&v.id))
        );
        assert_eq!(transport.opens.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_evict_removes_cache_files() {
        let temp = TempDir::new().unwrap();
        let transport = Arc::new(MockTransport::serving(content(1024)));
        let store = ArchiveStore::new(temp.path(), transport);

        let v = version("https://example.com/devkit.tar.gz", None);
        std::fs::write(store.archive_path(&v.id), b"cached").unwrap();
        store.evict(&v.id);
        assert!(store.cached_archive(&v.id).is_none());
    }

    #[tokio::test]
    async fn test_auth_expired_surfaces() {
        struct ExpiredTransport;

        #[async_trait::async_trait]
        impl ArchiveTransport for ExpiredTransport {
            async fn open(
                &self,
                _url: &str,
                _session: &AuthSession,
                _offset: u64,
                _validator: Option<&str>,
            ) -> Result<TransferBody, TransportError> {
                Err(TransportError::AuthExpired)
            }
        }

        let temp = TempDir::new().unwrap();
        let store = ArchiveStore::new(temp.path(), Arc::new(ExpiredTransport));
        let v = version("https://example.com/devkit.tar.gz", None);
        let outcome = store.start_or_resume(&v, &session()).wait().await;
        assert_eq!(
            outcome,
            DownloadOutcome::Failed(DownloadFailure::AuthExpired)
        );
    }
}
