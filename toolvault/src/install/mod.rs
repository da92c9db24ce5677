//! Installer: unpack a verified archive, relocate the bundle into the shared
//! install location, and perform privileged finalization.
//!
//! Extraction always writes to a scratch area first; only the relocation
//! into the install location and the selection-pointer update go through the
//! privileged channel. The channel is treated as untrusted but cooperative:
//! a success response is only believed when it echoes the requested paths,
//! and a lost connection maps to privilege denial, never to success.

mod privileged;

pub use privileged::{
    check_response, needs_elevation, LocalChannel, PrivilegedChannel, PrivilegedError,
    PrivilegedOp, PrivilegedRequest, PrivilegedResponse, UnixSocketChannel, PROTOCOL_VERSION,
};

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use flate2::read::GzDecoder;
use thiserror::Error;

/// ENOSPC, for mapping write failures to a distinct disk-full error.
const ENOSPC: i32 = 28;

/// Errors from extraction, relocation, and selection.
#[derive(Debug, Error)]
pub enum InstallError {
    /// The archive is not a valid gzip/tar stream.
    #[error("corrupt archive {path}: {reason}")]
    CorruptArchive { path: PathBuf, reason: String },

    /// The filesystem ran out of space while unpacking.
    #[error("disk full while extracting to {path}")]
    DiskFull { path: PathBuf },

    /// A destination for relocation already exists.
    #[error("destination already exists: {path}")]
    AlreadyExists { path: PathBuf },

    /// The helper refused for lack of rights on the target.
    #[error("permission denied for {path}")]
    PermissionDenied { path: PathBuf },

    /// The privileged channel refused, disconnected, or was unreachable.
    #[error("privileged operation failed: {0}")]
    PrivilegeDenied(#[source] PrivilegedError),

    /// Other local I/O failure.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Installer over a privileged execution channel.
pub struct Installer {
    channel: Arc<dyn PrivilegedChannel>,
}

impl Installer {
    /// Create an installer using `channel` for privileged operations.
    pub fn new(channel: Arc<dyn PrivilegedChannel>) -> Self {
        Self { channel }
    }

    /// Unpack `archive` into a fresh directory under `scratch_dir` and
    /// return the path of the extracted bundle root.
    ///
    /// Runs on the blocking pool; multi-gigabyte archives must not stall the
    /// async runtime.
    pub async fn extract(&self, archive: &Path, scratch_dir: &Path) -> Result<PathBuf, InstallError> {
        let archive = archive.to_path_buf();
        let scratch_dir = scratch_dir.to_path_buf();
        tokio::task::spawn_blocking(move || extract_archive(&archive, &scratch_dir))
            .await
            .map_err(|e| InstallError::Io {
                path: PathBuf::new(),
                source: io::Error::other(e),
            })?
    }

    /// Move the extracted bundle into its final location via the privileged
    /// channel.
    pub async fn relocate(&self, bundle: &Path, final_location: &Path) -> Result<(), InstallError> {
        if final_location.exists() {
            return Err(InstallError::AlreadyExists {
                path: final_location.to_path_buf(),
            });
        }

        let request = PrivilegedRequest::new(PrivilegedOp::Relocate, bundle, final_location);
        self.execute_checked(request, final_location).await
    }

    /// Fix ownership and permissions of an installed bundle.
    pub async fn fix_ownership(&self, final_location: &Path) -> Result<(), InstallError> {
        let request = PrivilegedRequest::new(PrivilegedOp::Chown, final_location, final_location);
        self.execute_checked(request, final_location).await
    }

    /// Remove an installed bundle from the install location via the
    /// privileged channel.
    pub async fn uninstall(&self, final_location: &Path) -> Result<(), InstallError> {
        let request = PrivilegedRequest::new(PrivilegedOp::Remove, final_location, final_location);
        self.execute_checked(request, final_location).await
    }

    /// Point the toolchain-selection symlink at `final_location`.
    pub async fn select(
        &self,
        final_location: &Path,
        selection_link: &Path,
    ) -> Result<(), InstallError> {
        let request = PrivilegedRequest::new(PrivilegedOp::Select, final_location, selection_link);
        self.execute_checked(request, final_location).await
    }

    async fn execute_checked(
        &self,
        request: PrivilegedRequest,
        subject: &Path,
    ) -> Result<(), InstallError> {
        tracing::debug!("privileged {:?}: {} -> {}", request.op, request.src.display(), request.dst.display());
        let response = self
            .channel
            .execute(request.clone())
            .await
            .map_err(InstallError::PrivilegeDenied)?;

        match check_response(&request, response) {
            Ok(()) => Ok(()),
            Err(PrivilegedError::Refused { code, .. }) if code == "permission_denied" => {
                Err(InstallError::PermissionDenied {
                    path: subject.to_path_buf(),
                })
            }
            Err(PrivilegedError::Refused { code, .. }) if code == "already_exists" => {
                Err(InstallError::AlreadyExists {
                    path: request.dst.clone(),
                })
            }
            Err(e) => Err(InstallError::PrivilegeDenied(e)),
        }
    }
}

/// Unpack a `.tar.gz` archive into `scratch_dir` and locate the bundle root.
fn extract_archive(archive_path: &Path, scratch_dir: &Path) -> Result<PathBuf, InstallError> {
    std::fs::create_dir_all(scratch_dir).map_err(|e| io_error(scratch_dir, e))?;

    let file = std::fs::File::open(archive_path).map_err(|e| io_error(archive_path, e))?;
    let decoder = GzDecoder::new(io::BufReader::new(file));
    let mut archive = tar::Archive::new(decoder);
    archive.set_preserve_permissions(true);

    if let Err(e) = archive.unpack(scratch_dir) {
        return Err(map_unpack_error(archive_path, scratch_dir, e));
    }

    bundle_root(scratch_dir).ok_or_else(|| InstallError::CorruptArchive {
        path: archive_path.to_path_buf(),
        reason: "archive does not contain a single bundle directory".to_string(),
    })
}

/// The single top-level directory the archive unpacked to, if exactly one.
fn bundle_root(scratch_dir: &Path) -> Option<PathBuf> {
    let mut dirs = std::fs::read_dir(scratch_dir)
        .ok()?
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_dir());

    let first = dirs.next()?;
    if dirs.next().is_some() {
        return None;
    }
    Some(first)
}

fn map_unpack_error(archive: &Path, scratch: &Path, e: io::Error) -> InstallError {
    if e.raw_os_error() == Some(ENOSPC) {
        return InstallError::DiskFull {
            path: scratch.to_path_buf(),
        };
    }
    match e.kind() {
        io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof => InstallError::CorruptArchive {
            path: archive.to_path_buf(),
            reason: e.to_string(),
        },
        _ => InstallError::Io {
            path: scratch.to_path_buf(),
            source: e,
        },
    }
}

fn io_error(path: &Path, e: io::Error) -> InstallError {
    if e.raw_os_error() == Some(ENOSPC) {
        InstallError::DiskFull {
            path: path.to_path_buf(),
        }
    } else {
        InstallError::Io {
            path: path.to_path_buf(),
            source: e,
        }
    }
}
