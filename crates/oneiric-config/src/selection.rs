use std::collections::BTreeMap;

use oneiric_domain::{Domain, Key};
use serde::{Deserialize, Serialize};

/// Desired provider per `(domain, key)`: the document the selection
/// watcher observes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionDoc(pub BTreeMap<Domain, BTreeMap<Key, String>>);

/// One `(domain, key)` whose desired provider changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionChange {
    pub domain: Domain,
    pub key: Key,
    pub provider: String,
}

impl SelectionDoc {
    pub fn get(&self, domain: Domain, key: &Key) -> Option<&str> {
        self.0.get(&domain)?.get(key).map(String::as_str)
    }

    pub fn set(&mut self, domain: Domain, key: Key, provider: impl Into<String>) {
        self.0.entry(domain).or_default().insert(key, provider.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.values().all(BTreeMap::is_empty)
    }

    /// Entries in `newer` that differ from this document. Entries removed
    /// in `newer` produce no change; an absent selection means "leave the
    /// slot alone".
    pub fn diff(&self, newer: &SelectionDoc) -> Vec<SelectionChange> {
        let mut changes = Vec::new();
        for (domain, keys) in &newer.0 {
            for (key, provider) in keys {
                if self.get(*domain, key) != Some(provider.as_str()) {
                    changes.push(SelectionChange {
                        domain: *domain,
                        key: key.clone(),
                        provider: provider.clone(),
                    });
                }
            }
        }
        changes
    }

    /// All selections, flattened.
    pub fn entries(&self) -> Vec<SelectionChange> {
        SelectionDoc::default().diff(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diff_reports_new_and_changed_entries() {
        let mut old = SelectionDoc::default();
        old.set(Domain::Adapter, Key::new("cache"), "memory");
        old.set(Domain::Service, Key::new("worker"), "default");

        let mut new = old.clone();
        new.set(Domain::Adapter, Key::new("cache"), "redis");
        new.set(Domain::Adapter, Key::new("queue"), "memory");

        let mut changes = old.diff(&new);
        changes.sort_by(|a, b| a.key.cmp(&b.key));
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].key.as_str(), "cache");
        assert_eq!(changes[0].provider, "redis");
        assert_eq!(changes[1].key.as_str(), "queue");
    }

    #[test]
    fn diff_ignores_unchanged_and_removed() {
        let mut old = SelectionDoc::default();
        old.set(Domain::Adapter, Key::new("cache"), "memory");
        old.set(Domain::Adapter, Key::new("queue"), "memory");

        let mut new = SelectionDoc::default();
        new.set(Domain::Adapter, Key::new("cache"), "memory");

        assert!(old.diff(&new).is_empty());
    }

    #[test]
    fn yaml_round_trip() {
        let yaml = "adapter:\n  cache: redis\nservice:\n  worker: threaded\n";
        let doc: SelectionDoc = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(doc.get(Domain::Adapter, &Key::new("cache")), Some("redis"));
        assert_eq!(doc.get(Domain::Service, &Key::new("worker")), Some("threaded"));
    }
}
