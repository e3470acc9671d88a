use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};

use serde_json::Value;

use crate::instance::{BoxError, ProviderInstance};

pub type FactoryFuture =
    Pin<Box<dyn Future<Output = Result<Arc<dyn ProviderInstance>, BoxError>> + Send>>;
pub type FactoryFn = Arc<dyn Fn(Value) -> FactoryFuture + Send + Sync>;

/// Registry of pre-imported constructors keyed by canonical factory
/// string (`module.path:symbol`).
///
/// The lifecycle manager consults this only after the allowlist check has
/// passed, so an unlisted factory string never reaches a lookup.
#[derive(Default)]
pub struct FactoryRegistry {
    constructors: RwLock<HashMap<String, FactoryFn>>,
}

impl FactoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constructor. The closure receives the winning
    /// candidate's settings blob.
    pub fn register<F, Fut>(&self, factory: impl Into<String>, build: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Arc<dyn ProviderInstance>, BoxError>> + Send + 'static,
    {
        let wrapped: FactoryFn = Arc::new(move |settings| Box::pin(build(settings)));
        self.constructors
            .write()
            .expect("factory registry lock poisoned")
            .insert(factory.into(), wrapped);
    }

    pub fn lookup(&self, factory: &str) -> Option<FactoryFn> {
        self.constructors
            .read()
            .expect("factory registry lock poisoned")
            .get(factory)
            .cloned()
    }

    pub fn contains(&self, factory: &str) -> bool {
        self.constructors
            .read()
            .expect("factory registry lock poisoned")
            .contains_key(factory)
    }

    pub fn registered(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .constructors
            .read()
            .expect("factory registry lock poisoned")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for FactoryRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FactoryRegistry")
            .field("constructors", &self.registered())
            .finish()
    }
}
