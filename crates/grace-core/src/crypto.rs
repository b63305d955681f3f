//! Signing and verification for every audited action in the control plane.
//!
//! Uses `ed25519-dalek` as the standard signature scheme for every signed payload.
//! The keypair is generated at boot unless a seed is configured; single calls run inline
//! since EdDSA sign/verify is cheap CPU work, rather than offloaded to a blocking task.

use std::sync::Arc;

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

use crate::error::{GraceError, GraceResult};

/// A signature plus the verifying key it was produced under, serializable for audit storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedPayload {
    pub signature: String,
    pub public_key: String,
}

#[derive(Clone)]
pub struct CryptoEngine {
    signing_key: Arc<SigningKey>,
}

impl CryptoEngine {
    /// Generates a fresh keypair. Production boots would load a seed from a secrets vault;
    /// out of scope here since reimplementing cryptographic primitives is a non-goal, and
    /// key custody is a deployment concern.
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self {
            signing_key: Arc::new(signing_key),
        }
    }

    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing_key: Arc::new(SigningKey::from_bytes(seed)),
        }
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.signing_key.verifying_key().to_bytes())
    }

    pub fn sign(&self, payload: &[u8]) -> SignedPayload {
        let signature: Signature = self.signing_key.sign(payload);
        SignedPayload {
            signature: hex::encode(signature.to_bytes()),
            public_key: self.public_key_hex(),
        }
    }

    /// Verifies `payload` against an explicit signature, independent of this engine's own
    /// keypair — used to check signatures produced elsewhere (e.g. a stored `SignedPayload`).
    pub fn verify(&self, payload: &[u8], signed: &SignedPayload) -> GraceResult<bool> {
        verify_detached(payload, signed)
    }
}

pub fn verify_detached(payload: &[u8], signed: &SignedPayload) -> GraceResult<bool> {
    let key_bytes = hex::decode(&signed.public_key).map_err(|_| GraceError::SignatureInvalid)?;
    let key_bytes: [u8; 32] = key_bytes
        .try_into()
        .map_err(|_| GraceError::SignatureInvalid)?;
    let verifying_key =
        VerifyingKey::from_bytes(&key_bytes).map_err(|_| GraceError::SignatureInvalid)?;

    let sig_bytes = hex::decode(&signed.signature).map_err(|_| GraceError::SignatureInvalid)?;
    let sig_bytes: [u8; 64] = sig_bytes
        .try_into()
        .map_err(|_| GraceError::SignatureInvalid)?;
    let signature = Signature::from_bytes(&sig_bytes);

    Ok(verifying_key.verify(payload, &signature).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_then_verify_round_trips() {
        let engine = CryptoEngine::generate();
        let signed = engine.sign(b"hello grace");
        assert!(engine.verify(b"hello grace", &signed).unwrap());
    }

    #[test]
    fn tampered_payload_fails_verification() {
        let engine = CryptoEngine::generate();
        let signed = engine.sign(b"hello grace");
        assert!(!engine.verify(b"goodbye grace", &signed).unwrap());
    }
}
