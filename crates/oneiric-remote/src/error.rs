use oneiric_security::SecurityError;
use oneiric_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("fetch failed: {0}")]
    FetchFailed(String),

    #[error("manifest parse failed: {0}")]
    ParseFailed(String),

    /// Signature or digest mismatch. Never retried silently; the manifest
    /// URL is disabled until configuration changes.
    #[error("integrity failure: {0}")]
    IntegrityFailure(String),

    #[error("circuit open for {0}")]
    CircuitOpen(String),

    #[error("invalid manifest entry: {0}")]
    EntryInvalid(String),

    #[error(transparent)]
    Security(#[from] SecurityError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("artifact cache i/o error: {0}")]
    Io(String),
}

impl RemoteError {
    /// Signature and digest violations are never retried: they abort the
    /// whole manifest and disable its URL. Everything else is entry-level
    /// or transient.
    pub fn is_integrity(&self) -> bool {
        matches!(
            self,
            RemoteError::IntegrityFailure(_)
                | RemoteError::Security(SecurityError::DigestMismatch { .. })
                | RemoteError::Security(SecurityError::SignatureInvalid(_))
        )
    }

    pub fn kind(&self) -> &'static str {
        match self {
            RemoteError::FetchFailed(_) => "fetch_failed",
            RemoteError::ParseFailed(_) => "parse_failed",
            RemoteError::IntegrityFailure(_) => "integrity_failure",
            RemoteError::CircuitOpen(_) => "circuit_open",
            RemoteError::EntryInvalid(_) => "parse_failed",
            RemoteError::Security(e) => e.kind(),
            RemoteError::Store(_) => "internal",
            RemoteError::Io(_) => "internal",
        }
    }
}
