mod breaker;
mod error;
mod loader;
mod manifest;
mod transport;

pub use breaker::{BreakerConfig, BreakerState, CircuitBreaker};
pub use error::RemoteError;
pub use loader::{RemoteConfig, RemoteLoader, SyncSummary, UrlStatus};
pub use manifest::{parse_document, ManifestEntry, RemoteManifest};
pub use transport::{FetchLimits, FileTransport, HttpTransport, ManifestTransport, TransportSet};
