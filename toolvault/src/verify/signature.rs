//! Bundle signature verification.
//!
//! Every bundle embeds a trust manifest under `.signature/`:
//!
//! - `manifest.json` - signer name, key id, and a SHA-256 digest for each
//!   payload file it covers
//! - `manifest.sig` - base64 ed25519 signature over the raw manifest bytes
//!
//! Verification checks the signing key against the pinned trusted set,
//! rejects revoked keys, verifies the signature over the manifest, and then
//! re-hashes every covered file. Any gap is a hard failure for the install
//! attempt.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use ed25519_dalek::{Signature, VerifyingKey};
use serde::Deserialize;
use thiserror::Error;

use super::file_sha256;

/// Directory inside a bundle holding the trust chain.
pub const SIGNATURE_DIR: &str = ".signature";
/// Manifest file name inside [`SIGNATURE_DIR`].
pub const MANIFEST_FILE: &str = "manifest.json";
/// Signature file name inside [`SIGNATURE_DIR`].
pub const SIGNATURE_FILE: &str = "manifest.sig";

/// The signed manifest embedded in a bundle.
#[derive(Debug, Clone, Deserialize)]
pub struct TrustManifest {
    /// Human-readable signer name.
    pub signer: String,
    /// Identifier of the signing key.
    pub key_id: String,
    /// Relative path -> SHA-256 hex digest for every covered file.
    pub files: BTreeMap<String, String>,
}

/// Identity of the signer of a successfully verified bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignerIdentity {
    /// Human-readable signer name from the manifest.
    pub signer: String,
    /// Key id the signature verified against.
    pub key_id: String,
}

/// Signature verification failures. All of them are fatal for the install
/// attempt and security-relevant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    /// The signing key is not in the trusted set.
    #[error("bundle signed by untrusted key {key_id:?}")]
    Untrusted { key_id: String },

    /// The signing key has been revoked.
    #[error("bundle signed by revoked key {key_id:?}")]
    Revoked { key_id: String },

    /// The trust chain is missing, unreadable, tampered with, or does not
    /// cover the payload it claims to.
    #[error("bundle trust chain malformed: {0}")]
    Malformed(String),
}

/// Verifier of a bundle's embedded code-signing trust chain.
///
/// Runs post-extraction on the unpacked bundle; a failure must keep the
/// orchestrator from ever reaching the installer.
pub trait SignatureVerifier: Send + Sync {
    /// Verify the bundle at `bundle_path`.
    ///
    /// # Returns
    ///
    /// The signer identity on success.
    fn verify_signature(&self, bundle_path: &Path) -> Result<SignerIdentity, SignatureError>;
}

/// Ed25519-based [`SignatureVerifier`] with a pinned set of publisher keys.
#[derive(Debug, Default)]
pub struct Ed25519Verifier {
    trusted: HashMap<String, VerifyingKey>,
    revoked: HashSet<String>,
}

impl Ed25519Verifier {
    /// Create an empty verifier. With no trusted keys every bundle fails
    /// as untrusted; keys must be pinned explicitly.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pin a trusted publisher key.
    pub fn with_trusted_key(mut self, key_id: impl Into<String>, key: VerifyingKey) -> Self {
        self.trusted.insert(key_id.into(), key);
        self
    }

    /// Mark a key id as revoked. Revocation wins over trust.
    pub fn with_revoked_key(mut self, key_id: impl Into<String>) -> Self {
        self.revoked.insert(key_id.into());
        self
    }
}

impl SignatureVerifier for Ed25519Verifier {
    fn verify_signature(&self, bundle_path: &Path) -> Result<SignerIdentity, SignatureError> {
        let manifest_path = bundle_path.join(SIGNATURE_DIR).join(MANIFEST_FILE);
        let signature_path = bundle_path.join(SIGNATURE_DIR).join(SIGNATURE_FILE);

        let manifest_bytes = std::fs::read(&manifest_path)
            .map_err(|e| SignatureError::Malformed(format!("cannot read manifest: {}", e)))?;
        let signature_b64 = std::fs::read_to_string(&signature_path)
            .map_err(|e| SignatureError::Malformed(format!("cannot read signature: {}", e)))?;

        let manifest: TrustManifest = serde_json::from_slice(&manifest_bytes)
            .map_err(|e| SignatureError::Malformed(format!("manifest does not parse: {}", e)))?;

        if self.revoked.contains(&manifest.key_id) {
            return Err(SignatureError::Revoked {
                key_id: manifest.key_id,
            });
        }

        let key = self
            .trusted
            .get(&manifest.key_id)
            .ok_or_else(|| SignatureError::Untrusted {
                key_id: manifest.key_id.clone(),
            })?;

        let signature_bytes = BASE64
            .decode(signature_b64.trim())
            .map_err(|e| SignatureError::Malformed(format!("signature is not base64: {}", e)))?;
        let signature = Signature::from_slice(&signature_bytes)
            .map_err(|e| SignatureError::Malformed(format!("signature malformed: {}", e)))?;

        key.verify_strict(&manifest_bytes, &signature)
            .map_err(|_| SignatureError::Malformed("signature does not verify".to_string()))?;

        // The manifest is authentic; now confirm it covers what is actually
        // on disk.
        for (relative, expected) in &manifest.files {
            let file_path = bundle_path.join(relative);
            let actual = file_sha256(&file_path).map_err(|e| {
                SignatureError::Malformed(format!("covered file {} unreadable: {}", relative, e))
            })?;
            if !actual.eq_ignore_ascii_case(expected) {
                return Err(SignatureError::Malformed(format!(
                    "covered file {} does not match its signed digest",
                    relative
                )));
            }
        }

        Ok(SignerIdentity {
            signer: manifest.signer,
            key_id: manifest.key_id,
        })
    }
}

#[cfg(test)]
pub(crate) mod test_fixtures {
    //! Helpers for building signed bundles in tests, shared with the
    //! lifecycle integration tests.

    use super::*;
    use crate::verify::hex_encode;
    use ed25519_dalek::{Signer, SigningKey};
    use sha2::{Digest, Sha256};
    use std::fs;
    use std::path::Path;

    /// Deterministic signing key for tests.
    pub fn test_signing_key() -> SigningKey {
        SigningKey::from_bytes(&[7u8; 32])
    }

    /// Key id the fixtures sign with.
    pub const TEST_KEY_ID: &str = "publisher-2024";

    /// Write a `.signature/` trust chain covering `files` (relative path ->
    /// contents already on disk) into the bundle at `bundle_path`.
    pub fn sign_bundle(bundle_path: &Path, files: &[&str], key: &SigningKey) {
        let mut entries = Vec::new();
        for relative in files {
            let data = fs::read(bundle_path.join(relative)).unwrap();
            let digest = hex_encode(&Sha256::digest(&data));
            entries.push(format!("\"{}\":\"{}\"", relative, digest));
        }
        let manifest = format!(
            "{{\"signer\":\"DevKit Publishing\",\"key_id\":\"{}\",\"files\":{{{}}}}}",
            TEST_KEY_ID,
            entries.join(",")
        );

        let sig_dir = bundle_path.join(SIGNATURE_DIR);
        fs::create_dir_all(&sig_dir).unwrap();
        fs::write(sig_dir.join(MANIFEST_FILE), &manifest).unwrap();

        let signature = key.sign(manifest.as_bytes());
        fs::write(
            sig_dir.join(SIGNATURE_FILE),
            BASE64.encode(signature.to_bytes()),
        )
        .unwrap();
    }
}
