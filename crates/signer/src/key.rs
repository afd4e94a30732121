//! Ed25519 key pair used by the in-memory signer.

use crate::error::{SignerError, SignerResult};
use base64::Engine;
use ed25519_dalek::{SigningKey, VerifyingKey};

/// A signing key pair.
#[derive(Debug)]
pub struct KeyPair {
    signing: SigningKey,
}

impl KeyPair {
    /// Generate a new random key pair.
    pub fn generate() -> Self {
        let mut rng = rand_core::OsRng;
        Self {
            signing: SigningKey::generate(&mut rng),
        }
    }

    /// Parse from base64-encoded 32-byte seed.
    pub fn from_base64_seed(s: &str) -> SignerResult<Self> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(s)
            .map_err(|e| SignerError::KeyParsing(format!("invalid base64: {e}")))?;
        let seed: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| SignerError::KeyParsing(format!("expected 32 bytes, got {}", bytes.len())))?;
        Ok(Self {
            signing: SigningKey::from_bytes(&seed),
        })
    }

    /// Encode the seed as base64.
    pub fn to_base64_seed(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(self.signing.as_bytes())
    }

    pub(crate) fn signing_key(&self) -> &SigningKey {
        &self.signing
    }

    /// The public half, as raw bytes.
    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.signing.verifying_key().to_bytes()
    }

    /// The public half.
    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing.verifying_key()
    }
}
