//! Resume metadata persisted alongside partial downloads.
//!
//! One `<stem>.resume.json` per partial file records the source URL, the
//! byte offset written so far, and the remote validator token (ETag or
//! Last-Modified) captured when the transfer began. On resume the validator
//! is presented to the server first; if the remote resource changed, the
//! partial file is discarded and the transfer restarts from zero.

use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Persisted state of a resumable transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeMeta {
    /// Source URL the partial file was fetched from.
    pub url: String,
    /// Bytes written to the partial file at the last checkpoint.
    pub offset: u64,
    /// Opaque remote validator captured at transfer start.
    pub validator: Option<String>,
}

impl ResumeMeta {
    /// Load resume metadata, returning `None` when the file is absent or
    /// unreadable (an unreadable sidecar means the partial cannot be trusted
    /// and the transfer restarts from zero).
    pub fn load(path: &Path) -> Option<Self> {
        let content = std::fs::read_to_string(path).ok()?;
        match serde_json::from_str(&content) {
            Ok(meta) => Some(meta),
            Err(e) => {
                tracing::warn!("discarding unreadable resume metadata {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Persist resume metadata atomically (write-then-rename).
    pub fn store(&self, path: &Path) -> io::Result<()> {
        let tmp = path.with_extension("json.tmp");
        let content = serde_json::to_string(self).map_err(io::Error::other)?;
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, path)
    }

    /// Remove resume metadata once a transfer completes.
    pub fn remove(path: &Path) {
        if let Err(e) = std::fs::remove_file(path) {
            if e.kind() != io::ErrorKind::NotFound {
                tracing::warn!("failed to remove resume metadata {}: {}", path.display(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn meta() -> ResumeMeta {
        ResumeMeta {
            url: "https://example.com/devkit.tar.gz".to_string(),
            offset: 4096,
            validator: Some("\"etag-abc\"".to_string()),
        }
    }

    #[test]
    fn test_store_and_load() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("devkit.resume.json");

        meta().store(&path).unwrap();
        assert_eq!(ResumeMeta::load(&path), Some(meta()));
    }

    #[test]
    fn test_load_missing_returns_none() {
        let temp = TempDir::new().unwrap();
        assert_eq!(ResumeMeta::load(&temp.path().join("nope.json")), None);
    }

    #[test]
    fn test_load_corrupt_returns_none() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("devkit.resume.json");
        std::fs::write(&path, "{broken").unwrap();
        assert_eq!(ResumeMeta::load(&path), None);
    }

    #[test]
    fn test_remove_is_quiet_when_absent() {
        let temp = TempDir::new().unwrap();
        ResumeMeta::remove(&temp.path().join("nope.json"));
    }
}
