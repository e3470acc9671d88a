use thiserror::Error;

#[derive(Debug, Error)]
pub enum SecurityError {
    #[error("factory not allowlisted: {0}")]
    FactoryDenied(String),

    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("signature verification failed: {0}")]
    SignatureInvalid(String),

    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    #[error("path escapes cache root: {0:?}")]
    PathEscape(String),
}

impl SecurityError {
    /// Stable machine-readable kind, used by CLI JSON output and the HTTP
    /// status mapping.
    pub fn kind(&self) -> &'static str {
        match self {
            SecurityError::FactoryDenied(_) => "factory_denied",
            SecurityError::InvalidPublicKey(_) => "signature_invalid",
            SecurityError::SignatureInvalid(_) => "signature_invalid",
            SecurityError::DigestMismatch { .. } => "digest_mismatch",
            SecurityError::PathEscape(_) => "path_escape",
        }
    }
}
