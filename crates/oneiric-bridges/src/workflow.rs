use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use oneiric_domain::{Domain, Key};
use oneiric_lifecycle::LifecycleError;
use oneiric_resolver::Resolver;
use oneiric_store::{RuntimeStore, WorkflowCheckpoint};
use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use crate::action::ActionBridge;
use crate::activity::check_activity;
use crate::error::BridgeError;

/// A workflow definition: nodes with action calls and dependency edges.
/// Stored in the winning workflow candidate's settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDag {
    pub nodes: Vec<WorkflowNode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowNode {
    pub id: String,
    /// Action kit key this node invokes.
    pub kit: String,
    pub op: String,
    #[serde(default)]
    pub args: Value,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl WorkflowDag {
    fn node(&self, id: &str) -> Option<&WorkflowNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Validate dependency references and acyclicity; returns the
    /// topological execution order. Cycle detection is mandatory: an
    /// invalid dag never starts executing.
    pub fn execution_order(&self, workflow: &Key) -> Result<Vec<String>, BridgeError> {
        let mut graph: DiGraph<&str, ()> = DiGraph::new();
        let mut index = HashMap::new();
        for node in &self.nodes {
            index.insert(node.id.as_str(), graph.add_node(node.id.as_str()));
        }
        for node in &self.nodes {
            for dep in &node.depends_on {
                let from = index.get(dep.as_str()).ok_or_else(|| BridgeError::UnknownNode {
                    workflow: workflow.clone(),
                    node: dep.clone(),
                })?;
                graph.add_edge(*from, index[node.id.as_str()], ());
            }
        }

        toposort(&graph, None)
            .map(|order| order.iter().map(|i| graph[*i].to_string()).collect())
            .map_err(|_| BridgeError::WorkflowCycle { workflow: workflow.clone() })
    }
}

/// Workflow facade: DAG execution over the action bridge with a durable
/// checkpoint after every node.
#[derive(Clone)]
pub struct WorkflowBridge {
    resolver: Arc<Resolver>,
    actions: ActionBridge,
    store: Arc<dyn RuntimeStore>,
}

impl WorkflowBridge {
    pub fn new(resolver: Arc<Resolver>, actions: ActionBridge, store: Arc<dyn RuntimeStore>) -> Self {
        Self { resolver, actions, store }
    }

    /// The dag for a workflow key, read from the winning candidate's
    /// settings.
    pub fn dag_for(&self, workflow: &Key) -> Result<WorkflowDag, BridgeError> {
        let resolution = self
            .resolver
            .resolve(Domain::Workflow, workflow, None)
            .map_err(LifecycleError::from)?;
        serde_json::from_value(resolution.winner.settings)
            .map_err(|_| BridgeError::MissingDag { workflow: workflow.clone() })
    }

    /// Run a workflow to completion. The checkpoint survives node
    /// failures, so a failed run can be [`resume`](Self::resume)d.
    pub async fn run(&self, workflow: &Key, inputs: Value) -> Result<Uuid, BridgeError> {
        let (run_id, mut checkpoint, dag, order) = self.prepare(workflow, inputs).await?;
        self.execute(&dag, &order, &mut checkpoint).await?;
        Ok(run_id)
    }

    /// Run an explicit dag under a workflow key, bypassing the registry's
    /// stored definition. Same validation and checkpointing as `run`.
    pub async fn run_dag(
        &self,
        workflow: &Key,
        dag: &WorkflowDag,
        inputs: Value,
    ) -> Result<Uuid, BridgeError> {
        check_activity(&self.store, Domain::Workflow, workflow).await?;
        let order = dag.execution_order(workflow)?;
        let run_id = Uuid::new_v4();
        let mut checkpoint = WorkflowCheckpoint::new(run_id, workflow.clone(), inputs, Utc::now());
        self.store.put_checkpoint(&checkpoint).await?;
        self.execute(dag, &order, &mut checkpoint).await?;
        Ok(run_id)
    }

    /// Validate, persist the initial checkpoint and execute in the
    /// background. Returns the run id immediately.
    pub async fn submit(&self, workflow: &Key, inputs: Value) -> Result<Uuid, BridgeError> {
        let (run_id, mut checkpoint, dag, order) = self.prepare(workflow, inputs).await?;
        let bridge = self.clone();
        let workflow = workflow.clone();
        tokio::spawn(async move {
            if let Err(e) = bridge.execute(&dag, &order, &mut checkpoint).await {
                warn!(workflow = %workflow, run_id = %run_id, error = %e, "workflow run failed");
            }
        });
        Ok(run_id)
    }

    async fn prepare(
        &self,
        workflow: &Key,
        inputs: Value,
    ) -> Result<(Uuid, WorkflowCheckpoint, WorkflowDag, Vec<String>), BridgeError> {
        check_activity(&self.store, Domain::Workflow, workflow).await?;
        let dag = self.dag_for(workflow)?;
        let order = dag.execution_order(workflow)?;

        let run_id = Uuid::new_v4();
        let checkpoint = WorkflowCheckpoint::new(run_id, workflow.clone(), inputs, Utc::now());
        self.store.put_checkpoint(&checkpoint).await?;
        info!(workflow = %workflow, run_id = %run_id, nodes = order.len(), "workflow started");
        Ok((run_id, checkpoint, dag, order))
    }

    /// Resume a previous run: completed nodes are skipped, the rest
    /// execute in order against the workflow's current dag.
    pub async fn resume(&self, run_id: Uuid) -> Result<(), BridgeError> {
        let mut checkpoint = self
            .store
            .get_checkpoint(run_id)
            .await?
            .ok_or(BridgeError::UnknownRun(run_id))?;
        if checkpoint.finished {
            return Ok(());
        }
        check_activity(&self.store, Domain::Workflow, &checkpoint.workflow).await?;

        let workflow = checkpoint.workflow.clone();
        let dag = self.dag_for(&workflow)?;
        let order = dag.execution_order(&workflow)?;
        info!(workflow = %workflow, run_id = %run_id,
            completed = checkpoint.completed.len(), "workflow resumed");
        self.execute(&dag, &order, &mut checkpoint).await
    }

    pub async fn status(&self, run_id: Uuid) -> Result<Option<WorkflowCheckpoint>, BridgeError> {
        Ok(self.store.get_checkpoint(run_id).await?)
    }

    async fn execute(
        &self,
        dag: &WorkflowDag,
        order: &[String],
        checkpoint: &mut WorkflowCheckpoint,
    ) -> Result<(), BridgeError> {
        for node_id in order {
            if checkpoint.completed.iter().any(|c| c == node_id) {
                continue;
            }
            let node = dag.node(node_id).ok_or_else(|| BridgeError::UnknownNode {
                workflow: checkpoint.workflow.clone(),
                node: node_id.clone(),
            })?;

            let upstream: serde_json::Map<String, Value> = node
                .depends_on
                .iter()
                .filter_map(|dep| {
                    checkpoint
                        .node_outputs
                        .get(dep)
                        .map(|out| (dep.clone(), out.clone()))
                })
                .collect();
            let call_args = json!({
                "args": node.args,
                "inputs": checkpoint.inputs,
                "upstream": upstream,
            });

            let output = self
                .actions
                .invoke(&Key::new(&node.kit), &node.op, call_args)
                .await
                .map_err(|e| BridgeError::NodeFailed {
                    node: node_id.clone(),
                    reason: e.to_string(),
                });

            match output {
                Ok(output) => {
                    checkpoint.completed.push(node_id.clone());
                    checkpoint.node_outputs.insert(node_id.clone(), output);
                    checkpoint.updated_at = Utc::now();
                    self.store.put_checkpoint(checkpoint).await?;
                }
                Err(e) => {
                    // Progress so far is already durable; a resume picks up
                    // from the failed node.
                    checkpoint.updated_at = Utc::now();
                    self.store.put_checkpoint(checkpoint).await?;
                    return Err(e);
                }
            }
        }

        checkpoint.finished = true;
        checkpoint.updated_at = Utc::now();
        self.store.put_checkpoint(checkpoint).await?;
        info!(run_id = %checkpoint.run_id, "workflow finished");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use oneiric_domain::{ActivityRecord, ActivityState, Candidate, Source};
    use oneiric_lifecycle::{
        CancelToken, FactoryRegistry, LifecycleConfig, LifecycleManager, ProviderInstance,
    };
    use oneiric_security::FactoryAllowlist;
    use oneiric_store::InMemoryStore;

    struct EchoKit;

    #[async_trait::async_trait]
    impl ProviderInstance for EchoKit {
        async fn invoke(
            &self,
            op: &str,
            args: Value,
        ) -> Result<Value, oneiric_lifecycle::BoxError> {
            Ok(json!({"op": op, "received": args}))
        }
    }

    struct FlakyKit {
        failures_left: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl ProviderInstance for FlakyKit {
        async fn invoke(
            &self,
            _op: &str,
            _args: Value,
        ) -> Result<Value, oneiric_lifecycle::BoxError> {
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err("upstream unavailable".into());
            }
            Ok(json!("ok"))
        }
    }

    struct Fixture {
        bridge: WorkflowBridge,
        resolver: Arc<Resolver>,
        store: Arc<InMemoryStore>,
    }

    fn fixture(flaky_failures: usize) -> Fixture {
        let resolver = Arc::new(Resolver::new());
        let factories = Arc::new(FactoryRegistry::new());
        factories.register("oneiric.actions.echo:build", |_| async {
            Ok(Arc::new(EchoKit) as Arc<dyn ProviderInstance>)
        });
        factories.register("oneiric.actions.flaky:build", move |_| async move {
            Ok(Arc::new(FlakyKit { failures_left: AtomicUsize::new(flaky_failures) })
                as Arc<dyn ProviderInstance>)
        });

        let store = Arc::new(InMemoryStore::new());
        let lifecycle = Arc::new(LifecycleManager::new(
            resolver.clone(),
            factories,
            Arc::new(FactoryAllowlist::builtin()),
            LifecycleConfig::default(),
        ));
        let actions = ActionBridge::new(
            lifecycle,
            store.clone() as Arc<dyn RuntimeStore>,
            CancelToken::new(),
        );
        let bridge = WorkflowBridge::new(
            resolver.clone(),
            actions,
            store.clone() as Arc<dyn RuntimeStore>,
        );

        register_action(&resolver, "echo");
        register_action(&resolver, "flaky");
        Fixture { bridge, resolver, store }
    }

    fn register_action(resolver: &Resolver, provider: &str) {
        resolver.register(Candidate {
            domain: Domain::Action,
            key: Key::new(provider),
            provider: provider.to_string(),
            factory: format!("oneiric.actions.{provider}:build"),
            priority: 0,
            stack_level: 0,
            source: Source::Inline,
            settings: Value::Null,
            capabilities: Default::default(),
            metadata: Default::default(),
        });
    }

    fn register_workflow(resolver: &Resolver, key: &str, nodes: Value) {
        resolver.register(Candidate {
            domain: Domain::Workflow,
            key: Key::new(key),
            provider: "builtin".to_string(),
            factory: "oneiric.workflows.dag:build".to_string(),
            priority: 0,
            stack_level: 0,
            source: Source::Inline,
            settings: json!({ "nodes": nodes }),
            capabilities: Default::default(),
            metadata: Default::default(),
        });
    }

    #[tokio::test]
    async fn linear_workflow_runs_in_order() {
        let fx = fixture(0);
        register_workflow(
            &fx.resolver,
            "etl",
            json!([
                {"id": "extract", "kit": "echo", "op": "extract"},
                {"id": "load", "kit": "echo", "op": "load", "depends_on": ["extract"]},
            ]),
        );

        let run_id = fx.bridge.run(&Key::new("etl"), json!({"n": 1})).await.unwrap();
        let cp = fx.bridge.status(run_id).await.unwrap().unwrap();
        assert!(cp.finished);
        assert_eq!(cp.completed, vec!["extract", "load"]);
        // The downstream node saw its upstream's output.
        let load_out = &cp.node_outputs["load"];
        assert!(load_out["received"]["upstream"]["extract"].is_object());
    }

    #[tokio::test]
    async fn cycle_rejected_before_execution() {
        let fx = fixture(0);
        register_workflow(
            &fx.resolver,
            "loop",
            json!([
                {"id": "a", "kit": "echo", "op": "x", "depends_on": ["b"]},
                {"id": "b", "kit": "echo", "op": "x", "depends_on": ["a"]},
            ]),
        );

        let err = fx.bridge.run(&Key::new("loop"), Value::Null).await.unwrap_err();
        assert!(matches!(err, BridgeError::WorkflowCycle { .. }));
    }

    #[tokio::test]
    async fn unknown_dependency_rejected() {
        let fx = fixture(0);
        register_workflow(
            &fx.resolver,
            "broken",
            json!([{"id": "a", "kit": "echo", "op": "x", "depends_on": ["ghost"]}]),
        );

        let err = fx.bridge.run(&Key::new("broken"), Value::Null).await.unwrap_err();
        assert!(matches!(err, BridgeError::UnknownNode { .. }));
    }

    #[tokio::test]
    async fn failed_node_checkpoints_then_resume_completes() {
        let fx = fixture(1); // flaky kit fails exactly once
        register_workflow(
            &fx.resolver,
            "retryable",
            json!([
                {"id": "first", "kit": "echo", "op": "x"},
                {"id": "second", "kit": "flaky", "op": "x", "depends_on": ["first"]},
            ]),
        );

        let err = fx.bridge.run(&Key::new("retryable"), Value::Null).await.unwrap_err();
        assert!(matches!(err, BridgeError::NodeFailed { .. }));

        // Find the run via its persisted checkpoint and resume it.
        let checkpoints = fx.store.list_checkpoints().await.unwrap();
        assert_eq!(checkpoints.len(), 1);
        assert_eq!(checkpoints[0].completed, vec!["first"]);
        assert!(!checkpoints[0].finished);
        let run_id = checkpoints[0].run_id;

        fx.bridge.resume(run_id).await.unwrap();
        let cp = fx.bridge.status(run_id).await.unwrap().unwrap();
        assert!(cp.finished);
        assert_eq!(cp.completed, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn resume_of_finished_run_is_noop() {
        let fx = fixture(0);
        register_workflow(
            &fx.resolver,
            "once",
            json!([{"id": "a", "kit": "echo", "op": "x"}]),
        );
        let run_id = fx.bridge.run(&Key::new("once"), Value::Null).await.unwrap();
        fx.bridge.resume(run_id).await.unwrap();
    }

    #[tokio::test]
    async fn paused_workflow_rejects_run() {
        let fx = fixture(0);
        register_workflow(
            &fx.resolver,
            "etl",
            json!([{"id": "a", "kit": "echo", "op": "x"}]),
        );
        fx.store
            .set_activity(&ActivityRecord {
                domain: Domain::Workflow,
                key: Key::new("etl"),
                state: ActivityState::Paused,
                since: Utc::now(),
                reason: None,
            })
            .await
            .unwrap();

        let err = fx.bridge.run(&Key::new("etl"), Value::Null).await.unwrap_err();
        assert!(matches!(err, BridgeError::Paused { .. }));
    }

    #[tokio::test]
    async fn missing_dag_settings_rejected() {
        let fx = fixture(0);
        fx.resolver.register(Candidate {
            domain: Domain::Workflow,
            key: Key::new("empty"),
            provider: "builtin".to_string(),
            factory: "oneiric.workflows.dag:build".to_string(),
            priority: 0,
            stack_level: 0,
            source: Source::Inline,
            settings: Value::Null,
            capabilities: Default::default(),
            metadata: Default::default(),
        });

        let err = fx.bridge.run(&Key::new("empty"), Value::Null).await.unwrap_err();
        assert!(matches!(err, BridgeError::MissingDag { .. }));
    }
}
