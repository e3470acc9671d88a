use std::collections::BTreeMap;

use oneiric_domain::{Candidate, Domain, Key, Source};
use oneiric_security::FactoryAllowlist;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RemoteError;

/// Signed descriptor listing remote candidates and their artifacts.
///
/// The signature covers the canonical JSON of the document with the
/// `signature` field removed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteManifest {
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_timeout_seconds: Option<u64>,
    pub entries: Vec<ManifestEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub domain: Domain,
    pub key: String,
    pub provider: String,
    pub factory: String,
    /// Artifact download location, if this entry ships one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    /// Required whenever `uri` is present; 64 hex chars.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest_sha256: Option<String>,
    /// Optional per-artifact Ed25519 signature over the artifact bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(default)]
    pub settings: Value,
    #[serde(default)]
    pub priority: i64,
    #[serde(default)]
    pub stack_level: i64,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

impl RemoteManifest {
    pub fn from_value(doc: Value) -> Result<Self, RemoteError> {
        serde_json::from_value(doc).map_err(|e| RemoteError::ParseFailed(e.to_string()))
    }
}

impl ManifestEntry {
    /// Structural validation: non-empty ASCII key/provider, allowlisted
    /// factory, well-formed digest. Failures are entry-level: the loader
    /// skips the entry and keeps going.
    pub fn validate(&self, allowlist: &FactoryAllowlist) -> Result<(), RemoteError> {
        Key::parse(&self.key)
            .map_err(|_| RemoteError::EntryInvalid(format!("bad key {:?}", self.key)))?;
        if self.provider.is_empty()
            || !self.provider.is_ascii()
            || self.provider.chars().any(|c| c.is_control())
        {
            return Err(RemoteError::EntryInvalid(format!(
                "bad provider {:?}",
                self.provider
            )));
        }
        allowlist.check(&self.factory)?;

        if let Some(digest) = &self.digest_sha256 {
            if !is_sha256_hex(digest) {
                return Err(RemoteError::EntryInvalid(format!(
                    "digest for {}/{} is not 64 hex chars",
                    self.key, self.provider
                )));
            }
        }
        if self.uri.is_some() && self.digest_sha256.is_none() {
            return Err(RemoteError::EntryInvalid(format!(
                "entry {}/{} has an artifact uri but no digest",
                self.key, self.provider
            )));
        }
        Ok(())
    }

    /// Normalize into a registry candidate tagged `remote_manifest`, with
    /// the origin URL and digest recorded in metadata.
    pub fn to_candidate(&self, origin_url: &str) -> Candidate {
        let mut metadata = self.metadata.clone();
        metadata.insert("origin".to_string(), Value::String(origin_url.to_string()));
        if let Some(digest) = &self.digest_sha256 {
            metadata.insert("digest_sha256".to_string(), Value::String(digest.clone()));
        }

        Candidate {
            domain: self.domain,
            key: Key::new(&self.key),
            provider: self.provider.clone(),
            factory: self.factory.clone(),
            priority: self.priority,
            stack_level: self.stack_level,
            source: Source::RemoteManifest,
            settings: self.settings.clone(),
            capabilities: Default::default(),
            metadata,
        }
    }
}

/// Parse raw manifest bytes into a JSON value tree. JSON and YAML both map
/// to the same canonical model; JSON is tried first.
pub fn parse_document(bytes: &[u8]) -> Result<Value, RemoteError> {
    if let Ok(v) = serde_json::from_slice::<Value>(bytes) {
        return Ok(v);
    }
    serde_yaml::from_slice::<Value>(bytes).map_err(|e| RemoteError::ParseFailed(e.to_string()))
}

fn is_sha256_hex(s: &str) -> bool {
    s.len() == 64 && s.chars().all(|c| c.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use oneiric_security::sha256_hex;

    fn entry(key: &str, provider: &str) -> ManifestEntry {
        ManifestEntry {
            domain: Domain::Adapter,
            key: key.to_string(),
            provider: provider.to_string(),
            factory: format!("oneiric.adapters.{provider}:build"),
            uri: None,
            digest_sha256: None,
            signature: None,
            settings: Value::Null,
            priority: 0,
            stack_level: 0,
            metadata: Default::default(),
        }
    }

    #[test]
    fn valid_entry_passes() {
        let allowlist = FactoryAllowlist::builtin();
        entry("cache", "redis").validate(&allowlist).unwrap();
    }

    #[test]
    fn denied_factory_rejected() {
        let allowlist = FactoryAllowlist::builtin();
        let mut e = entry("cache", "redis");
        e.factory = "subprocess.run:main".to_string();
        assert!(matches!(e.validate(&allowlist), Err(RemoteError::Security(_))));
    }

    #[test]
    fn short_digest_rejected() {
        let allowlist = FactoryAllowlist::builtin();
        let mut e = entry("cache", "redis");
        e.digest_sha256 = Some("abc123".to_string());
        assert!(matches!(e.validate(&allowlist), Err(RemoteError::EntryInvalid(_))));

        e.digest_sha256 = Some(sha256_hex(b"payload"));
        e.validate(&allowlist).unwrap();
    }

    #[test]
    fn artifact_uri_requires_digest() {
        let allowlist = FactoryAllowlist::builtin();
        let mut e = entry("cache", "redis");
        e.uri = Some("https://example.com/redis.bin".to_string());
        assert!(e.validate(&allowlist).is_err());
    }

    #[test]
    fn empty_key_or_provider_rejected() {
        let allowlist = FactoryAllowlist::builtin();
        let mut e = entry("", "redis");
        assert!(e.validate(&allowlist).is_err());
        e = entry("cache", "");
        assert!(e.validate(&allowlist).is_err());
    }

    #[test]
    fn to_candidate_tags_remote_source_and_origin() {
        let c = entry("cache", "redis").to_candidate("https://example.com/m.json");
        assert_eq!(c.source, Source::RemoteManifest);
        assert_eq!(
            c.metadata.get("origin").and_then(|v| v.as_str()),
            Some("https://example.com/m.json")
        );
    }

    #[test]
    fn yaml_and_json_parse_to_same_document() {
        let json = br#"{"version":1,"entries":[]}"#;
        let yaml = b"version: 1\nentries: []\n";
        assert_eq!(parse_document(json).unwrap(), parse_document(yaml).unwrap());
    }
}
