//! Pluggable signing backends.
//!
//! The credential core never touches a cryptographic primitive directly:
//! it signs and verifies through the [`Signer`] capability record, loaded
//! by configured name at context construction. Exactly one backend is
//! active per context, and backends must be reentrant — after load they
//! are invoked without any lock held.

use std::sync::Arc;

use ed25519_dalek::{Signature, Signer as _, SigningKey, VerifyingKey};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::error::CredError;

/// Detached ed25519 signature length.
pub const SIGNATURE_SIZE: usize = 64;

/// ed25519 secret key length.
pub const SECRET_KEY_SIZE: usize = 32;

/// The signing-backend contract.
///
/// Both operations are pure with respect to the payload bytes: signing
/// the same bytes twice yields signatures that verify against either
/// call's output, and verification depends on nothing but its arguments.
pub trait Signer: Send + Sync {
    /// Backend name as selected in configuration.
    fn plugin_name(&self) -> &'static str;

    /// Produces a detached signature over `payload`.
    ///
    /// # Errors
    ///
    /// Returns [`CredError::Signing`] when the backend cannot sign.
    fn sign(&self, payload: &[u8]) -> Result<Vec<u8>, CredError>;

    /// Checks `signature` against `payload`.
    ///
    /// # Errors
    ///
    /// Returns [`CredError::BadSignature`] on any mismatch.
    fn verify(&self, payload: &[u8], signature: &[u8]) -> Result<(), CredError>;
}

/// Default backend: in-memory ed25519 keypair, detached signatures.
pub struct Ed25519Signer {
    key: SigningKey,
}

impl Ed25519Signer {
    /// Creates a backend with a freshly generated keypair.
    #[must_use]
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        Self {
            key: SigningKey::generate(&mut rng),
        }
    }

    /// Creates a backend from existing secret key bytes.
    #[must_use]
    pub fn from_secret_bytes(secret: &[u8; SECRET_KEY_SIZE]) -> Self {
        Self {
            key: SigningKey::from_bytes(secret),
        }
    }

    /// The verifying half of the keypair.
    #[must_use]
    pub fn verifying_key(&self) -> VerifyingKey {
        self.key.verifying_key()
    }

    /// Secret key bytes in a zeroizing container.
    #[must_use]
    pub fn secret_key_bytes(&self) -> Zeroizing<[u8; SECRET_KEY_SIZE]> {
        Zeroizing::new(self.key.to_bytes())
    }
}

impl std::fmt::Debug for Ed25519Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Ed25519Signer([REDACTED])")
    }
}

impl Signer for Ed25519Signer {
    fn plugin_name(&self) -> &'static str {
        "ed25519"
    }

    fn sign(&self, payload: &[u8]) -> Result<Vec<u8>, CredError> {
        Ok(self.key.sign(payload).to_bytes().to_vec())
    }

    fn verify(&self, payload: &[u8], signature: &[u8]) -> Result<(), CredError> {
        let sig = Signature::from_slice(signature).map_err(|_| CredError::BadSignature)?;
        self.key
            .verifying_key()
            .verify_strict(payload, &sig)
            .map_err(|_| CredError::BadSignature)
    }
}

/// Keyless backend for tests and single-host debug setups.
///
/// The "signature" is a digest of the payload, compared in constant
/// time. It proves nothing about the author — the shapes are the same as
/// a real backend, the authenticity is not.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSigner;

impl Signer for NullSigner {
    fn plugin_name(&self) -> &'static str {
        "null"
    }

    fn sign(&self, payload: &[u8]) -> Result<Vec<u8>, CredError> {
        Ok(Sha256::digest(payload).to_vec())
    }

    fn verify(&self, payload: &[u8], signature: &[u8]) -> Result<(), CredError> {
        let expected = Sha256::digest(payload);
        if bool::from(expected.as_slice().ct_eq(signature)) {
            Ok(())
        } else {
            Err(CredError::BadSignature)
        }
    }
}

/// Loads a signing backend by configured name.
///
/// `"ed25519"` generates a fresh keypair; callers needing a persistent
/// key construct [`Ed25519Signer`] themselves and hand it to the context.
///
/// # Errors
///
/// Returns [`CredError::BackendUnavailable`] for unknown names.
pub fn signer_for(name: &str) -> Result<Arc<dyn Signer>, CredError> {
    match name {
        "ed25519" => Ok(Arc::new(Ed25519Signer::generate())),
        "null" => Ok(Arc::new(NullSigner)),
        other => Err(CredError::BackendUnavailable(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ed25519_round_trip() {
        let signer = Ed25519Signer::generate();
        let sig = signer.sign(b"payload").unwrap();
        assert_eq!(sig.len(), SIGNATURE_SIZE);
        signer.verify(b"payload", &sig).unwrap();
    }

    #[test]
    fn test_ed25519_rejects_tampered_payload() {
        let signer = Ed25519Signer::generate();
        let sig = signer.sign(b"payload").unwrap();
        assert!(matches!(
            signer.verify(b"payloae", &sig),
            Err(CredError::BadSignature)
        ));
    }

    #[test]
    fn test_ed25519_rejects_malformed_signature() {
        let signer = Ed25519Signer::generate();
        assert!(matches!(
            signer.verify(b"payload", &[0u8; 12]),
            Err(CredError::BadSignature)
        ));
    }

    #[test]
    fn test_ed25519_from_secret_is_deterministic() {
        let secret = [7u8; SECRET_KEY_SIZE];
        let a = Ed25519Signer::from_secret_bytes(&secret);
        let b = Ed25519Signer::from_secret_bytes(&secret);
        let sig = a.sign(b"x").unwrap();
        b.verify(b"x", &sig).unwrap();
        assert_eq!(*a.secret_key_bytes(), secret);
    }

    #[test]
    fn test_null_round_trip() {
        let signer = NullSigner;
        let sig = signer.sign(b"block").unwrap();
        signer.verify(b"block", &sig).unwrap();
        assert!(signer.verify(b"other", &sig).is_err());
    }

    #[test]
    fn test_signer_for_names() {
        assert_eq!(signer_for("ed25519").unwrap().plugin_name(), "ed25519");
        assert_eq!(signer_for("null").unwrap().plugin_name(), "null");
        assert!(matches!(
            signer_for("munge"),
            Err(CredError::BackendUnavailable(n)) if n == "munge"
        ));
    }

    #[test]
    fn test_debug_redacts_key_material() {
        let signer = Ed25519Signer::generate();
        assert_eq!(format!("{signer:?}"), "Ed25519Signer([REDACTED])");
    }
}
