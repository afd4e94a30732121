//! The injected signing capability and its in-memory implementation.

use crate::error::{SignerError, SignerResult};
use crate::key::KeyPair;
use base64::Engine;
use cofre_core::Rfc;
use ed25519_dalek::Signer as _;
use ed25519_dalek::Verifier;

/// The capability protocol code uses to sign request envelopes.
///
/// Implementations own whatever key material they need; protocol code never
/// reads private keys directly.
pub trait Signer: Send + Sync {
    /// The canonical taxpayer identity the credentials are bound to.
    fn rfc(&self) -> &Rfc;

    /// The certificate blob embedded in request envelopes, base64-encoded.
    fn certificate_b64(&self) -> &str;

    /// Produce a detached signature over the given bytes.
    fn sign(&self, data: &[u8]) -> SignerResult<Vec<u8>>;
}

/// In-memory Ed25519 signer for tests and local development.
pub struct MemorySigner {
    rfc: Rfc,
    keypair: KeyPair,
    certificate_b64: String,
}

impl MemorySigner {
    /// Create a signer from an existing key pair.
    pub fn new(rfc: Rfc, keypair: KeyPair) -> Self {
        let certificate_b64 =
            base64::engine::general_purpose::STANDARD.encode(keypair.public_key_bytes());
        Self {
            rfc,
            keypair,
            certificate_b64,
        }
    }

    /// Generate a signer with a fresh random key.
    pub fn generate(rfc: Rfc) -> Self {
        Self::new(rfc, KeyPair::generate())
    }

    /// Verify a detached signature produced by this signer.
    pub fn verify(&self, data: &[u8], signature: &[u8]) -> SignerResult<()> {
        let sig_array: [u8; 64] = signature
            .try_into()
            .map_err(|_| SignerError::InvalidSignature(format!("expected 64 bytes, got {}", signature.len())))?;
        let sig = ed25519_dalek::Signature::from_bytes(&sig_array);
        self.keypair
            .verifying_key()
            .verify(data, &sig)
            .map_err(|_| SignerError::VerificationFailed)
    }
}

impl Signer for MemorySigner {
    fn rfc(&self) -> &Rfc {
        &self.rfc
    }

    fn certificate_b64(&self) -> &str {
        &self.certificate_b64
    }

    fn sign(&self, data: &[u8]) -> SignerResult<Vec<u8>> {
        Ok(self.keypair.signing_key().sign(data).to_bytes().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rfc() -> Rfc {
        Rfc::parse("XAXX010101000").unwrap()
    }

    #[test]
    fn sign_and_verify() {
        let signer = MemorySigner::generate(rfc());
        let sig = signer.sign(b"request digest").unwrap();
        assert_eq!(sig.len(), 64);
        signer.verify(b"request digest", &sig).unwrap();
    }

    #[test]
    fn verify_rejects_tampered_data() {
        let signer = MemorySigner::generate(rfc());
        let sig = signer.sign(b"request digest").unwrap();
        assert!(matches!(
            signer.verify(b"tampered", &sig),
            Err(SignerError::VerificationFailed)
        ));
    }

    #[test]
    fn identity_and_certificate_exposed() {
        let signer = MemorySigner::generate(rfc());
        assert_eq!(signer.rfc().as_str(), "XAXX010101000");
        assert!(!signer.certificate_b64().is_empty());
    }
}
