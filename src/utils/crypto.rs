//! Signing and verification for the cluster handshake.
//!
//! The coordinator only sees [`SignatureVerifier`], so any scheme can be
//! plugged in. Ed25519 is the default.

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use thiserror::Error;

pub const PUBLIC_KEY_SIZE: usize = 32;
pub const SIGNATURE_SIZE: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("Invalid signature encoding: expected {expected} bytes, found {found}")]
    MalformedSignature { expected: usize, found: usize },

    #[error("Signature verification failed")]
    VerifyFailed,
}

/// Checks a signature over `message` against a claimed public key
pub trait SignatureVerifier: Send + Sync {
    fn verify(
        &self,
        public_key: &[u8],
        message: &[u8],
        signature: &[u8],
    ) -> Result<(), SignatureError>;
}

/// Ed25519 with strict verification (rejects small-order keys and malleable signatures)
#[derive(Debug, Clone, Copy, Default)]
pub struct Ed25519Verifier;

impl SignatureVerifier for Ed25519Verifier {
    fn verify(
        &self,
        public_key: &[u8],
        message: &[u8],
        signature: &[u8],
    ) -> Result<(), SignatureError> {
        let key: [u8; PUBLIC_KEY_SIZE] = public_key.try_into().map_err(|_| {
            SignatureError::InvalidPublicKey(format!(
                "expected {PUBLIC_KEY_SIZE} bytes, found {}",
                public_key.len()
            ))
        })?;
        let key = VerifyingKey::from_bytes(&key)
            .map_err(|e| SignatureError::InvalidPublicKey(e.to_string()))?;

        let signature: [u8; SIGNATURE_SIZE] =
            signature
                .try_into()
                .map_err(|_| SignatureError::MalformedSignature {
                    expected: SIGNATURE_SIZE,
                    found: signature.len(),
                })?;
        let signature = Signature::from_bytes(&signature);

        key.verify_strict(message, &signature)
            .map_err(|_| SignatureError::VerifyFailed)
    }
}

/// Ed25519 identity of a node or coordinator
#[derive(Clone)]
pub struct NodeKeypair {
    signing_key: SigningKey,
}

impl NodeKeypair {
    pub fn generate() -> Self {
        Self::from_secret(rand::random::<[u8; 32]>())
    }

    pub fn from_secret(secret: [u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(&secret),
        }
    }

    pub fn public_key(&self) -> [u8; PUBLIC_KEY_SIZE] {
        self.signing_key.verifying_key().to_bytes()
    }

    pub fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_SIZE] {
        self.signing_key.sign(message).to_bytes()
    }
}

impl std::fmt::Debug for NodeKeypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeKeypair")
            .field("public_key", &self.public_key())
            .finish_non_exhaustive()
    }
}
