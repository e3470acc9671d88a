use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use oneiric_domain::{Candidate, Domain, Key, Source};
use oneiric_lifecycle::{BoxError, FactoryRegistry, Health, ProviderInstance};
use serde_json::{json, Value};
use tokio::sync::RwLock;

/// Register the builtin provider constructors. These are the contract
/// surface needed to exercise every domain end to end; production
/// deployments register their own factories alongside.
pub fn register_builtins(factories: &FactoryRegistry) {
    factories.register("oneiric.adapters.memory:build", |_settings| async {
        Ok(Arc::new(MemoryAdapter::default()) as Arc<dyn ProviderInstance>)
    });
    factories.register("oneiric.adapters.noop:build", |_settings| async {
        Ok(Arc::new(NoopProvider) as Arc<dyn ProviderInstance>)
    });
    factories.register("oneiric.actions.echo:build", |_settings| async {
        Ok(Arc::new(EchoKit) as Arc<dyn ProviderInstance>)
    });
    factories.register("oneiric.actions.math:build", |_settings| async {
        Ok(Arc::new(MathKit) as Arc<dyn ProviderInstance>)
    });
    factories.register("oneiric.services.heartbeat:build", |_settings| async {
        Ok(Arc::new(HeartbeatService::default()) as Arc<dyn ProviderInstance>)
    });
    factories.register("oneiric.events.memory:build", |_settings| async {
        Ok(Arc::new(NoopProvider) as Arc<dyn ProviderInstance>)
    });
    factories.register("oneiric.workflows.dag:build", |_settings| async {
        Ok(Arc::new(NoopProvider) as Arc<dyn ProviderInstance>)
    });
    factories.register("oneiric.tasks.noop:build", |_settings| async {
        Ok(Arc::new(NoopProvider) as Arc<dyn ProviderInstance>)
    });
}

/// Auto-discovered candidates, registered at the lowest precedence tier.
/// Any inline, local-config or remote registration shadows them.
pub fn entry_point_candidates() -> Vec<Candidate> {
    fn candidate(domain: Domain, key: &str, provider: &str, factory: &str) -> Candidate {
        Candidate {
            domain,
            key: Key::new(key),
            provider: provider.to_string(),
            factory: factory.to_string(),
            priority: 0,
            stack_level: 0,
            source: Source::EntryPoint,
            settings: Value::Null,
            capabilities: Default::default(),
            metadata: Default::default(),
        }
    }

    vec![
        candidate(Domain::Adapter, "cache", "memory", "oneiric.adapters.memory:build"),
        candidate(Domain::Adapter, "cache", "noop", "oneiric.adapters.noop:build"),
        candidate(Domain::Action, "echo", "echo", "oneiric.actions.echo:build"),
        candidate(Domain::Action, "math", "math", "oneiric.actions.math:build"),
        candidate(Domain::Service, "heartbeat", "heartbeat", "oneiric.services.heartbeat:build"),
        candidate(Domain::Event, "bus", "memory", "oneiric.events.memory:build"),
    ]
}

// ── Providers ─────────────────────────────────────────────────────────────────

/// Does nothing, healthily. Placeholder instance for slots whose behavior
/// lives elsewhere (workflow dags, the event bus).
struct NoopProvider;

#[async_trait]
impl ProviderInstance for NoopProvider {}

/// In-process key/value adapter.
#[derive(Default)]
struct MemoryAdapter {
    data: RwLock<HashMap<String, Value>>,
}

#[async_trait]
impl ProviderInstance for MemoryAdapter {
    async fn invoke(&self, op: &str, args: Value) -> Result<Value, BoxError> {
        let key = field(&args, "key").and_then(|v| v.as_str().map(String::from));
        match op {
            "set" => {
                let key = key.ok_or("set requires a key")?;
                let value = field(&args, "value").cloned().unwrap_or(Value::Null);
                self.data.write().await.insert(key, value);
                Ok(Value::Bool(true))
            }
            "get" => {
                let key = key.ok_or("get requires a key")?;
                Ok(self.data.read().await.get(&key).cloned().unwrap_or(Value::Null))
            }
            "delete" => {
                let key = key.ok_or("delete requires a key")?;
                Ok(Value::Bool(self.data.write().await.remove(&key).is_some()))
            }
            other => Err(format!("unknown op {other:?}").into()),
        }
    }
}

/// Returns its call back to the caller. Useful for wiring tests and demo
/// workflows.
struct EchoKit;

#[async_trait]
impl ProviderInstance for EchoKit {
    async fn invoke(&self, op: &str, args: Value) -> Result<Value, BoxError> {
        Ok(json!({ "op": op, "args": args }))
    }
}

/// Small arithmetic kit.
struct MathKit;

#[async_trait]
impl ProviderInstance for MathKit {
    async fn invoke(&self, op: &str, args: Value) -> Result<Value, BoxError> {
        let a = field(&args, "a").and_then(Value::as_f64).ok_or("missing operand a")?;
        let b = field(&args, "b").and_then(Value::as_f64).ok_or("missing operand b")?;
        let result = match op {
            "add" => a + b,
            "sub" => a - b,
            "mul" => a * b,
            "div" => {
                if b == 0.0 {
                    return Err("division by zero".into());
                }
                a / b
            }
            other => return Err(format!("unknown op {other:?}").into()),
        };
        Ok(json!(result))
    }
}

/// Long-lived demo service that counts beats.
#[derive(Default)]
struct HeartbeatService {
    beats: AtomicU64,
}

#[async_trait]
impl ProviderInstance for HeartbeatService {
    async fn health(&self) -> Health {
        Health {
            ok: true,
            detail: format!("{} beats", self.beats.load(Ordering::Relaxed)),
        }
    }

    async fn invoke(&self, op: &str, _args: Value) -> Result<Value, BoxError> {
        match op {
            "beat" => Ok(json!(self.beats.fetch_add(1, Ordering::Relaxed) + 1)),
            other => Err(format!("unknown op {other:?}").into()),
        }
    }
}

/// Look up `name` in `args`, falling back to `args.args.name` so kits work
/// both when called directly and from a workflow node wrapper.
fn field<'a>(args: &'a Value, name: &str) -> Option<&'a Value> {
    args.get(name).or_else(|| args.get("args")?.get(name))
}
