use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::timeout;

use crate::error::RemoteError;

/// Budget for one fetch.
#[derive(Debug, Clone)]
pub struct FetchLimits {
    pub timeout: Duration,
    pub max_bytes: usize,
}

impl Default for FetchLimits {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_bytes: 16 * 1024 * 1024,
        }
    }
}

/// Pluggable byte fetcher for manifests and artifacts.
#[async_trait]
pub trait ManifestTransport: Send + Sync + 'static {
    fn schemes(&self) -> &'static [&'static str];

    async fn fetch(&self, uri: &str, limits: &FetchLimits) -> Result<Vec<u8>, RemoteError>;
}

// ── HTTP ──────────────────────────────────────────────────────────────────────

pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self { client: reqwest::Client::new() }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ManifestTransport for HttpTransport {
    fn schemes(&self) -> &'static [&'static str] {
        &["http", "https"]
    }

    async fn fetch(&self, uri: &str, limits: &FetchLimits) -> Result<Vec<u8>, RemoteError> {
        let fetch = async {
            let response = self
                .client
                .get(uri)
                .send()
                .await
                .map_err(|e| RemoteError::FetchFailed(e.to_string()))?
                .error_for_status()
                .map_err(|e| RemoteError::FetchFailed(e.to_string()))?;

            // The size cap is enforced while the body streams in, not
            // after the fact.
            let mut body = Vec::new();
            let mut response = response;
            while let Some(chunk) = response
                .chunk()
                .await
                .map_err(|e| RemoteError::FetchFailed(e.to_string()))?
            {
                if body.len() + chunk.len() > limits.max_bytes {
                    return Err(RemoteError::FetchFailed(format!(
                        "{uri} exceeds the {} byte limit",
                        limits.max_bytes
                    )));
                }
                body.extend_from_slice(&chunk);
            }
            Ok(body)
        };

        timeout(limits.timeout, fetch)
            .await
            .map_err(|_| RemoteError::FetchFailed(format!("{uri} timed out")))?
    }
}

// ── File ──────────────────────────────────────────────────────────────────────

pub struct FileTransport;

#[async_trait]
impl ManifestTransport for FileTransport {
    fn schemes(&self) -> &'static [&'static str] {
        &["file"]
    }

    async fn fetch(&self, uri: &str, limits: &FetchLimits) -> Result<Vec<u8>, RemoteError> {
        let path = uri.strip_prefix("file://").unwrap_or(uri);
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| RemoteError::FetchFailed(format!("{path}: {e}")))?;
        if bytes.len() > limits.max_bytes {
            return Err(RemoteError::FetchFailed(format!(
                "{path} exceeds the {} byte limit",
                limits.max_bytes
            )));
        }
        Ok(bytes)
    }
}

// ── Dispatch ──────────────────────────────────────────────────────────────────

/// Scheme-keyed transport dispatch. URIs without a scheme are treated as
/// local file paths.
#[derive(Clone)]
pub struct TransportSet {
    transports: Vec<Arc<dyn ManifestTransport>>,
}

impl TransportSet {
    pub fn with_defaults() -> Self {
        Self {
            transports: vec![Arc::new(HttpTransport::new()), Arc::new(FileTransport)],
        }
    }

    pub fn push(&mut self, transport: Arc<dyn ManifestTransport>) {
        self.transports.push(transport);
    }

    pub fn for_uri(&self, uri: &str) -> Result<Arc<dyn ManifestTransport>, RemoteError> {
        let scheme = uri.split_once("://").map(|(s, _)| s).unwrap_or("file");
        self.transports
            .iter()
            .find(|t| t.schemes().contains(&scheme))
            .cloned()
            .ok_or_else(|| RemoteError::FetchFailed(format!("no transport for scheme {scheme:?}")))
    }

    pub async fn fetch(&self, uri: &str, limits: &FetchLimits) -> Result<Vec<u8>, RemoteError> {
        self.for_uri(uri)?.fetch(uri, limits).await
    }
}
