//! Verification of downloaded archives and extracted bundles.
//!
//! Two gates, both fail-closed:
//!
//! 1. [`verify_checksum`] runs on the archive before extraction. Any
//!    mismatch or unreadable file is a failure, never a warning.
//! 2. [`SignatureVerifier::verify_signature`] runs after extraction, on the
//!    extracted bundle, because the trust chain is embedded in the unpacked
//!    payload rather than the archive wrapper.

mod signature;

pub use signature::{
    Ed25519Verifier, SignatureError, SignatureVerifier, SignerIdentity, TrustManifest,
    MANIFEST_FILE, SIGNATURE_DIR, SIGNATURE_FILE,
};

#[cfg(test)]
pub(crate) use signature::test_fixtures;

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use thiserror::Error;

/// Errors from archive checksum verification.
#[derive(Debug, Error)]
pub enum ChecksumError {
    /// The file could not be read. Fail-closed: unreadable means unverified.
    #[error("cannot read {path} for verification: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The computed digest does not match the expected one.
    #[error("checksum mismatch: expected {expected}, computed {actual}")]
    Mismatch { expected: String, actual: String },
}

impl ChecksumError {
    /// True for an actual digest mismatch (as opposed to an I/O failure).
    pub fn is_mismatch(&self) -> bool {
        matches!(self, Self::Mismatch { .. })
    }
}

/// Compute the SHA-256 digest of a file as lowercase hex.
pub fn file_sha256(path: &Path) -> std::io::Result<String> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];

    loop {
        let read = reader.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(hex_encode(&hasher.finalize()))
}

/// Verify the SHA-256 digest of `path` against `expected` (hex, case
/// insensitive).
///
/// The digest is computed over the exact bytes on disk at call time; the
/// pipeline extracts the same file immediately afterwards, so what was
/// verified is what gets unpacked.
pub fn verify_checksum(path: &Path, expected: &str) -> Result<(), ChecksumError> {
    let actual = file_sha256(path).map_err(|e| ChecksumError::Unreadable {
        path: path.to_path_buf(),
        source: e,
    })?;

    if actual.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(ChecksumError::Mismatch {
            expected: expected.to_lowercase(),
            actual,
        })
    }
}

pub(crate) fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push_str(&format!("{:02x}", byte));
    }
    out
}
