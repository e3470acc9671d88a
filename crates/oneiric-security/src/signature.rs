use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde_json::Value;

use crate::canonical::canonical_json;
use crate::error::SecurityError;

/// Verifies Ed25519 signatures over canonical manifest bytes and raw
/// artifact bytes.
#[derive(Debug, Clone)]
pub struct SignatureVerifier {
    key: VerifyingKey,
}

impl SignatureVerifier {
    /// Build from a base64-encoded 32-byte Ed25519 public key.
    pub fn from_base64(public_key: &str) -> Result<Self, SecurityError> {
        let bytes = B64
            .decode(public_key.trim())
            .map_err(|e| SecurityError::InvalidPublicKey(e.to_string()))?;
        let arr: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| SecurityError::InvalidPublicKey("expected 32 bytes".to_string()))?;
        let key = VerifyingKey::from_bytes(&arr)
            .map_err(|e| SecurityError::InvalidPublicKey(e.to_string()))?;
        Ok(Self { key })
    }

    /// Verify a base64 signature over arbitrary bytes (artifact signing).
    pub fn verify(&self, message: &[u8], signature_b64: &str) -> Result<(), SecurityError> {
        let sig_bytes = B64
            .decode(signature_b64.trim())
            .map_err(|e| SecurityError::SignatureInvalid(e.to_string()))?;
        let sig = Signature::from_slice(&sig_bytes)
            .map_err(|e| SecurityError::SignatureInvalid(e.to_string()))?;
        self.key
            .verify(message, &sig)
            .map_err(|e| SecurityError::SignatureInvalid(e.to_string()))
    }

    /// Verify a manifest document: the signature covers the canonical JSON
    /// of the document with the `signature` field removed.
    pub fn verify_manifest(&self, doc: &Value) -> Result<(), SecurityError> {
        let signature = doc
            .get("signature")
            .and_then(|v| v.as_str())
            .ok_or_else(|| SecurityError::SignatureInvalid("signature field missing".to_string()))?
            .to_string();

        let mut unsigned = doc.clone();
        if let Some(obj) = unsigned.as_object_mut() {
            obj.remove("signature");
        }
        self.verify(&canonical_json(&unsigned), &signature)
    }
}
