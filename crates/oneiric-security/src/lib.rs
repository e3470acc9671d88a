mod allowlist;
mod canonical;
mod error;
mod paths;
mod signature;

pub use allowlist::FactoryAllowlist;
pub use canonical::{canonical_json, canonical_sha256, sha256_hex, verify_digest};
pub use error::SecurityError;
pub use paths::{contained_join, sanitize_file_name};
pub use signature::SignatureVerifier;
