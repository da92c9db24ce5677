//! Privileged execution channel.
//!
//! The manager process runs unprivileged; relocation into the shared install
//! location, selection-pointer updates, and ownership fixes are delegated to
//! a separately running elevated helper over a local IPC channel. The
//! protocol is a narrow, versioned request/response pair of newline
//! delimited JSON objects, one request per connection turn.
//!
//! The channel accepts one request at a time; concurrent callers queue on an
//! internal lock rather than failing.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::sync::Mutex;

/// Protocol version spoken by this client.
pub const PROTOCOL_VERSION: u32 = 1;

/// Operations the helper performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrivilegedOp {
    /// Move a bundle from the scratch area to its final location.
    Relocate,
    /// Point the toolchain-selection symlink at a bundle.
    Select,
    /// Fix ownership and permissions of an installed bundle.
    Chown,
    /// Remove an installed bundle from the install location.
    Remove,
}

/// One request to the helper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivilegedRequest {
    /// Protocol version.
    pub v: u32,
    /// Operation to perform.
    pub op: PrivilegedOp,
    /// Source path (bundle being acted on).
    pub src: PathBuf,
    /// Destination path (final location or selection link).
    pub dst: PathBuf,
}

impl PrivilegedRequest {
    /// Build a request for the current protocol version.
    pub fn new(op: PrivilegedOp, src: impl Into<PathBuf>, dst: impl Into<PathBuf>) -> Self {
        Self {
            v: PROTOCOL_VERSION,
            op,
            src: src.into(),
            dst: dst.into(),
        }
    }
}

/// Helper response. The helper echoes the paths it acted on; callers must
/// not trust `ok` without checking the echo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivilegedResponse {
    /// Whether the operation succeeded.
    pub ok: bool,
    /// Machine-readable error code when `ok` is false.
    #[serde(default)]
    pub code: Option<String>,
    /// Echo of the source path acted on.
    #[serde(default)]
    pub src: Option<PathBuf>,
    /// Echo of the destination path acted on.
    #[serde(default)]
    pub dst: Option<PathBuf>,
}

impl PrivilegedResponse {
    /// Successful response echoing the request's paths.
    pub fn success(request: &PrivilegedRequest) -> Self {
        Self {
            ok: true,
            code: None,
            src: Some(request.src.clone()),
            dst: Some(request.dst.clone()),
        }
    }

    /// Failure response with an error code.
    pub fn failure(code: impl Into<String>) -> Self {
        Self {
            ok: false,
            code: Some(code.into()),
            src: None,
            dst: None,
        }
    }
}

/// Errors talking to the helper.
#[derive(Debug, Error)]
pub enum PrivilegedError {
    /// The helper socket could not be reached. Treated as privilege denial,
    /// never as success.
    #[error("privileged helper unreachable at {path}: {source}")]
    Unreachable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The connection dropped mid-exchange or the reply was not parseable.
    /// Treated as privilege denial, never as success.
    #[error("privileged helper connection lost: {0}")]
    Disconnected(String),

    /// The helper explicitly refused the operation.
    #[error("privileged helper refused {op:?}: {code}")]
    Refused { op: PrivilegedOp, code: String },
}

/// Transport to the privileged helper.
///
/// Implementations only move bytes; response validation (path echo checks)
/// belongs to the caller, which treats the helper as untrusted but
/// cooperative.
#[async_trait]
pub trait PrivilegedChannel: Send + Sync {
    /// Execute one request and return the helper's response.
    async fn execute(&self, request: PrivilegedRequest)
        -> Result<PrivilegedResponse, PrivilegedError>;
}

/// Channel to the elevated helper over a Unix domain socket.
pub struct UnixSocketChannel {
    socket_path: PathBuf,
    // One request at a time; concurrent callers queue here.
    turn: Mutex<()>,
}

impl UnixSocketChannel {
    /// Create a channel for the helper socket at `socket_path`.
    pub fn new(socket_path: impl Into<PathBuf>) -> Arc<Self> {
        Arc::new(Self {
            socket_path: socket_path.into(),
            turn: Mutex::new(()),
        })
    }
}

impl std::fmt::Debug for UnixSocketChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnixSocketChannel")
            .field("socket_path", &self.socket_path)
            .finish()
    }
}

#[async_trait]
impl PrivilegedChannel for UnixSocketChannel {
    async fn execute(
        &self,
        request: PrivilegedRequest,
    ) -> Result<PrivilegedResponse, PrivilegedError> {
        let _turn = self.turn.lock().await;

        let stream =
            UnixStream::connect(&self.socket_path)
                .await
                .map_err(|e| PrivilegedError::Unreachable {
                    path: self.socket_path.clone(),
                    source: e,
                })?;
        let (read_half, mut write_half) = stream.into_split();

        let mut line = serde_json::to_string(&request)
            .map_err(|e| PrivilegedError::Disconnected(e.to_string()))?;
        line.push('\n');
        write_half
            .write_all(line.as_bytes())
            .await
            .map_err(|e| PrivilegedError::Disconnected(e.to_string()))?;

        let mut reply = String::new();
        let mut reader = BufReader::new(read_half);
        let read = reader
            .read_line(&mut reply)
            .await
            .map_err(|e| PrivilegedError::Disconnected(e.to_string()))?;
        if read == 0 {
            return Err(PrivilegedError::Disconnected(
                "helper closed the connection before replying".to_string(),
            ));
        }

        serde_json::from_str(&reply)
            .map_err(|e| PrivilegedError::Disconnected(format!("malformed reply: {}", e)))
    }
}

/// In-process channel for install roots the current user can write to.
///
/// Performs the same operations as the elevated helper, directly, with the
/// caller's own rights. Useful for per-user installs and for tests; the
/// response contract (path echo, error codes) matches the helper's.
#[derive(Debug, Default)]
pub struct LocalChannel;

impl LocalChannel {
    /// Create a local channel.
    pub fn new() -> Arc<Self> {
        Arc::new(Self)
    }

    fn perform(request: &PrivilegedRequest) -> Result<(), String> {
        match request.op {
            PrivilegedOp::Relocate => {
                if request.dst.exists() {
                    return Err("already_exists".to_string());
                }
                if let Some(parent) = request.dst.parent() {
                    std::fs::create_dir_all(parent).map_err(map_io_code)?;
                }
                std::fs::rename(&request.src, &request.dst).map_err(map_io_code)
            }
            PrivilegedOp::Select => {
                // Replace the selection link atomically: fresh link, rename
                // over the old one.
                let staged = request.dst.with_extension("staged");
                let _ = std::fs::remove_file(&staged);
                std::os::unix::fs::symlink(&request.src, &staged).map_err(map_io_code)?;
                std::fs::rename(&staged, &request.dst).map_err(map_io_code)
            }
            PrivilegedOp::Chown => {
                // Nothing to fix when installing with the caller's own
                // rights.
                Ok(())
            }
            PrivilegedOp::Remove => std::fs::remove_dir_all(&request.src).map_err(map_io_code),
        }
    }
}

fn map_io_code(e: io::Error) -> String {
    match e.kind() {
        io::ErrorKind::PermissionDenied => "permission_denied".to_string(),
        io::ErrorKind::AlreadyExists => "already_exists".to_string(),
        _ => format!("io:{}", e),
    }
}

#[async_trait]
impl PrivilegedChannel for LocalChannel {
    async fn execute(
        &self,
        request: PrivilegedRequest,
    ) -> Result<PrivilegedResponse, PrivilegedError> {
        let response = match tokio::task::spawn_blocking({
            let request = request.clone();
            move || LocalChannel::perform(&request)
        })
        .await
        {
            Ok(Ok(())) => PrivilegedResponse::success(&request),
            Ok(Err(code)) => PrivilegedResponse::failure(code),
            Err(e) => return Err(PrivilegedError::Disconnected(e.to_string())),
        };
        Ok(response)
    }
}

/// Validate a helper response against the request it answers.
///
/// A success whose echoed paths do not match the request is rejected; a
/// refusal is surfaced with its code.
pub fn check_response(
    request: &PrivilegedRequest,
    response: PrivilegedResponse,
) -> Result<(), PrivilegedError> {
    if !response.ok {
        return Err(PrivilegedError::Refused {
            op: request.op,
            code: response.code.unwrap_or_else(|| "unspecified".to_string()),
        });
    }

    let echo_matches = response.src.as_deref() == Some(request.src.as_path())
        && response.dst.as_deref() == Some(request.dst.as_path());
    if !echo_matches {
        return Err(PrivilegedError::Disconnected(
            "helper response did not echo the requested paths".to_string(),
        ));
    }

    Ok(())
}

/// True when the current process cannot create entries under `path` and
/// mutations of the install location must go through the elevated helper.
///
/// Permission bits alone cannot answer this (a root-owned 0755 directory is
/// unwritable for everyone else while carrying write bits), so the check
/// asks the kernel: attempt to create and immediately remove a scratch
/// entry. If `path` does not exist yet, the nearest existing ancestor is
/// checked instead, since installing would have to create the root there.
pub fn needs_elevation(path: &Path) -> bool {
    let mut target = path;
    loop {
        if target.is_dir() {
            break;
        }
        match target.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => target = parent,
            _ => return true,
        }
    }

    let marker = target.join(format!(".toolvault-access-{}", std::process::id()));
    match std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&marker)
    {
        Ok(file) => {
            drop(file);
            let _ = std::fs::remove_file(&marker);
            false
        }
        Err(_) => true,
    }
}
