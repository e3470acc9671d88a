use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("unknown domain: {0}")]
    UnknownDomain(String),

    #[error("invalid key: {0:?}")]
    InvalidKey(String),

    #[error("invalid provider: {0:?}")]
    InvalidProvider(String),

    #[error("invalid factory reference: {0:?}")]
    InvalidFactory(String),
}
