//! In-memory mock implementation of the graph backend for testing.
//!
//! `MockGraph` keeps committed state behind a `std::sync::Mutex`. Each
//! transaction works on a snapshot taken at `begin`; its write statements
//! are logged and replayed onto the latest committed state at `commit`, so
//! a failed or dropped transaction leaves nothing behind.
//!
//! Statements are matched by their whitespace-normalized text. The
//! dependency and export statements used by the crate are pre-registered;
//! anything else is accepted as a no-op returning no rows unless a handler
//! is registered for it. Conditionally compiled with `#[cfg(test)]`.

use crate::backup::export::{nodes_cypher, RELATIONSHIPS_CYPHER};
use crate::error::{GraphError, Result};
use crate::graph::dependency::{link_cypher, successors_cypher, unlink_cypher};
use crate::neo4j::models::*;
use crate::neo4j::traits::{GraphConnector, GraphPool, GraphTransaction};
use crate::Neo4jSettings;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const CREATE_NODE_CYPHER: &str = "CREATE (n:{label} {id: $id}) SET n += $props RETURN n.id AS id";

#[derive(Debug, Clone)]
pub struct MockNode {
    pub kind: NodeKind,
    pub props: Params,
}

#[derive(Debug, Clone)]
pub struct MockEdge {
    pub from: String,
    pub to: String,
    pub rel_type: String,
    pub props: Params,
}

/// Committed graph contents
#[derive(Debug, Clone, Default)]
pub struct MockState {
    pub nodes: HashMap<String, MockNode>,
    pub edges: Vec<MockEdge>,
}

impl MockState {
    fn kind_of(&self, id: &str) -> Option<NodeKind> {
        self.nodes.get(id).map(|n| n.kind)
    }
}

/// Statement behaviour: mutate (or read) the transaction's view
pub type MockHandler = Arc<dyn Fn(&mut MockState, &Params) -> Result<Vec<Record>> + Send + Sync>;

#[derive(Clone)]
struct Registered {
    handler: MockHandler,
    writes: bool,
}

fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Shared in-memory store plus fault injection knobs
pub struct MockGraph {
    state: Mutex<MockState>,
    handlers: Mutex<HashMap<String, Registered>>,
    failing: Mutex<HashSet<String>>,
    outage: AtomicBool,
    fail_close: AtomicBool,
    fail_commit: AtomicBool,
    connect_delay: Mutex<Duration>,
    latency: Mutex<Duration>,
    finish_delay: Mutex<Duration>,
    pools_created: AtomicUsize,
    pools_closed: AtomicUsize,
    statements_run: AtomicUsize,
    commits: AtomicUsize,
}

impl MockGraph {
    pub fn new() -> Self {
        let graph = Self {
            state: Mutex::new(MockState::default()),
            handlers: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashSet::new()),
            outage: AtomicBool::new(false),
            fail_close: AtomicBool::new(false),
            fail_commit: AtomicBool::new(false),
            connect_delay: Mutex::new(Duration::ZERO),
            latency: Mutex::new(Duration::ZERO),
            finish_delay: Mutex::new(Duration::ZERO),
            pools_created: AtomicUsize::new(0),
            pools_closed: AtomicUsize::new(0),
            statements_run: AtomicUsize::new(0),
            commits: AtomicUsize::new(0),
        };
        graph.register_builtin();
        graph
    }

    // ------------------------------------------------------------------
    // Fault injection
    // ------------------------------------------------------------------

    pub fn set_outage(&self, outage: bool) {
        self.outage.store(outage, Ordering::SeqCst);
    }

    pub fn set_fail_close(&self, fail: bool) {
        self.fail_close.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_commit(&self, fail: bool) {
        self.fail_commit.store(fail, Ordering::SeqCst);
    }

    pub fn set_connect_delay(&self, delay: Duration) {
        *self.connect_delay.lock().unwrap() = delay;
    }

    /// Delay applied to every statement
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = latency;
    }

    /// Delay applied to every commit and rollback, as when the server stalls
    pub fn set_finish_delay(&self, delay: Duration) {
        *self.finish_delay.lock().unwrap() = delay;
    }

    /// Make every statement with this text fail
    pub fn fail_on(&self, text: &str) {
        self.failing.lock().unwrap().insert(normalize(text));
    }

    /// Register (or replace) a statement handler
    pub fn register<F>(&self, text: &str, writes: bool, handler: F)
    where
        F: Fn(&mut MockState, &Params) -> Result<Vec<Record>> + Send + Sync + 'static,
    {
        self.handlers.lock().unwrap().insert(
            normalize(text),
            Registered {
                handler: Arc::new(handler),
                writes,
            },
        );
    }

    // ------------------------------------------------------------------
    // Counters and inspection
    // ------------------------------------------------------------------

    pub fn pools_created(&self) -> usize {
        self.pools_created.load(Ordering::SeqCst)
    }

    pub fn pools_closed(&self) -> usize {
        self.pools_closed.load(Ordering::SeqCst)
    }

    pub fn statements_run(&self) -> usize {
        self.statements_run.load(Ordering::SeqCst)
    }

    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    pub fn node_count(&self) -> usize {
        self.state.lock().unwrap().nodes.len()
    }

    pub fn has_node(&self, id: &str) -> bool {
        self.state.lock().unwrap().nodes.contains_key(id)
    }

    /// Committed DEPENDS_ON edges within one scope
    pub fn dependency_edges(&self, scope: DependencyScope) -> Vec<(String, String)> {
        let state = self.state.lock().unwrap();
        state
            .edges
            .iter()
            .filter(|e| e.rel_type == RelationshipType::DependsOn.as_str())
            .filter(|e| state.kind_of(&e.from) == Some(scope.node_kind()))
            .map(|e| (e.from.clone(), e.to.clone()))
            .collect()
    }

    /// Insert a node directly into committed state
    pub fn seed_node(&self, kind: NodeKind, id: &str) {
        let mut props = Params::new();
        props.insert("id".into(), json!(id));
        self.state
            .lock()
            .unwrap()
            .nodes
            .insert(id.to_string(), MockNode { kind, props });
    }

    /// Insert an edge directly into committed state
    pub fn seed_edge(&self, from: &str, to: &str, rel: RelationshipType) {
        self.state.lock().unwrap().edges.push(MockEdge {
            from: from.to_string(),
            to: to.to_string(),
            rel_type: rel.as_str().to_string(),
            props: Params::new(),
        });
    }

    async fn stall(&self) {
        let delay = *self.finish_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    fn snapshot(&self) -> MockState {
        self.state.lock().unwrap().clone()
    }

    fn lookup(&self, text: &str) -> Option<Registered> {
        self.handlers.lock().unwrap().get(text).cloned()
    }

    // ------------------------------------------------------------------
    // Built-in statements
    // ------------------------------------------------------------------

    fn register_builtin(&self) {
        for kind in NodeKind::ALL {
            self.register(
                &CREATE_NODE_CYPHER.replace("{label}", kind.label()),
                true,
                move |state, params| {
                    let id = str_param(params, "id")?;
                    if state.nodes.contains_key(&id) {
                        return Err(GraphError::transaction(format!(
                            "Node already exists with label `{}` and property `id` = '{}'",
                            kind.label(),
                            id
                        )));
                    }
                    let mut props = params
                        .get("props")
                        .and_then(Value::as_object)
                        .cloned()
                        .unwrap_or_default();
                    props.insert("id".into(), json!(id));
                    state.nodes.insert(id.clone(), MockNode { kind, props });
                    Ok(vec![Record::new().with("id", id)])
                },
            );

            self.register(&nodes_cypher(kind), false, move |state, _| {
                let mut ids: Vec<&String> = state
                    .nodes
                    .iter()
                    .filter(|(_, n)| n.kind == kind)
                    .map(|(id, _)| id)
                    .collect();
                ids.sort();
                Ok(ids
                    .into_iter()
                    .map(|id| {
                        Record::new().with("props", Value::Object(state.nodes[id].props.clone()))
                    })
                    .collect())
            });
        }

        self.register(RELATIONSHIPS_CYPHER, false, |state, _| {
            Ok(state
                .edges
                .iter()
                .map(|e| {
                    Record::new()
                        .with("from", e.from.as_str())
                        .with("to", e.to.as_str())
                        .with("type", e.rel_type.as_str())
                        .with("props", Value::Object(e.props.clone()))
                })
                .collect())
        });

        for scope in [DependencyScope::Project, DependencyScope::Task] {
            let kind = scope.node_kind();

            self.register(&successors_cypher(scope), false, move |state, params| {
                let frontier: HashSet<String> = params
                    .get("frontier")
                    .and_then(Value::as_array)
                    .map(|ids| {
                        ids.iter()
                            .filter_map(Value::as_str)
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default();
                let mut seen = HashSet::new();
                Ok(state
                    .edges
                    .iter()
                    .filter(|e| e.rel_type == RelationshipType::DependsOn.as_str())
                    .filter(|e| frontier.contains(&e.from))
                    .filter(|e| state.kind_of(&e.from) == Some(kind))
                    .filter(|e| state.kind_of(&e.to) == Some(kind))
                    .filter(|e| seen.insert(e.to.clone()))
                    .map(|e| Record::new().with("id", e.to.as_str()))
                    .collect())
            });

            self.register(&link_cypher(scope), true, move |state, params| {
                let source = str_param(params, "source_id")?;
                let target = str_param(params, "target_id")?;
                if state.kind_of(&source) != Some(kind) || state.kind_of(&target) != Some(kind) {
                    return Ok(vec![]);
                }
                let dep_type = params.get("dependency_type").cloned().unwrap_or(Value::Null);
                let description = params.get("description").cloned().unwrap_or(Value::Null);

                let position = state.edges.iter().position(|e| {
                    e.from == source
                        && e.to == target
                        && e.rel_type == RelationshipType::DependsOn.as_str()
                });
                let index = match position {
                    Some(index) => index,
                    None => {
                        let mut props = Params::new();
                        props.insert(
                            "id".into(),
                            params.get("dependency_id").cloned().unwrap_or(Value::Null),
                        );
                        props.insert(
                            "createdAt".into(),
                            params.get("created_at").cloned().unwrap_or(Value::Null),
                        );
                        state.edges.push(MockEdge {
                            from: source.clone(),
                            to: target.clone(),
                            rel_type: RelationshipType::DependsOn.as_str().to_string(),
                            props,
                        });
                        state.edges.len() - 1
                    }
                };
                let edge = &mut state.edges[index];
                edge.props.insert("dependencyType".into(), dep_type.clone());
                edge.props.insert("description".into(), description);

                Ok(vec![Record::new()
                    .with("source_id", source)
                    .with("target_id", target)
                    .with(
                        "dependency_id",
                        edge.props.get("id").cloned().unwrap_or(Value::Null),
                    )
                    .with("dependency_type", dep_type)])
            });

            self.register(&unlink_cypher(scope), true, move |state, params| {
                let source = str_param(params, "source_id")?;
                let target = str_param(params, "target_id")?;
                let before = state.edges.len();
                let matches_scope = state.kind_of(&source) == Some(kind)
                    && state.kind_of(&target) == Some(kind);
                if matches_scope {
                    state.edges.retain(|e| {
                        !(e.from == source
                            && e.to == target
                            && e.rel_type == RelationshipType::DependsOn.as_str())
                    });
                }
                let removed = before - state.edges.len();
                Ok(vec![Record::new().with("removed", removed)])
            });
        }
    }
}

impl Default for MockGraph {
    fn default() -> Self {
        Self::new()
    }
}

fn str_param(params: &Params, key: &str) -> Result<String> {
    params
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| GraphError::transaction(format!("Expected parameter ${}", key)))
}

/// `CREATE` statement for one node, rejected if the id already exists
pub fn create_node_statement(kind: NodeKind, id: &str) -> Statement {
    Statement::new(CREATE_NODE_CYPHER.replace("{label}", kind.label()))
        .param("id", id)
        .param("props", Value::Object(Params::new()))
}

// ============================================================================
// Backend trait implementations
// ============================================================================

pub struct MockConnector {
    graph: Arc<MockGraph>,
}

impl MockConnector {
    pub fn new(graph: Arc<MockGraph>) -> Self {
        Self { graph }
    }
}

#[async_trait]
impl GraphConnector for MockConnector {
    async fn connect(&self, _settings: &Neo4jSettings) -> Result<Arc<dyn GraphPool>> {
        let delay = *self.graph.connect_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.graph.pools_created.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MockPool {
            graph: self.graph.clone(),
            closed: AtomicBool::new(false),
        }))
    }
}

struct MockPool {
    graph: Arc<MockGraph>,
    closed: AtomicBool,
}

#[async_trait]
impl GraphPool for MockPool {
    async fn verify_connectivity(&self) -> Result<()> {
        if self.graph.outage.load(Ordering::SeqCst) {
            return Err(GraphError::connection("Connection refused (mock outage)"));
        }
        Ok(())
    }

    async fn begin(
        &self,
        _database: Option<&str>,
        mode: AccessMode,
    ) -> Result<Box<dyn GraphTransaction>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(GraphError::connection("Pool is closed"));
        }
        if self.graph.outage.load(Ordering::SeqCst) {
            return Err(GraphError::connection("Connection refused (mock outage)"));
        }
        Ok(Box::new(MockTransaction {
            graph: self.graph.clone(),
            working: self.graph.snapshot(),
            log: Vec::new(),
            mode,
        }))
    }

    async fn close(&self) -> Result<()> {
        if self.graph.fail_close.load(Ordering::SeqCst) {
            return Err(GraphError::connection("Failed to close mock pool"));
        }
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.graph.pools_closed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

struct MockTransaction {
    graph: Arc<MockGraph>,
    working: MockState,
    log: Vec<(MockHandler, Params)>,
    mode: AccessMode,
}

#[async_trait]
impl GraphTransaction for MockTransaction {
    async fn run(&mut self, statement: &Statement) -> Result<Vec<Record>> {
        let latency = *self.graph.latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.graph.statements_run.fetch_add(1, Ordering::SeqCst);

        let text = normalize(&statement.text);
        if self.graph.failing.lock().unwrap().contains(&text) {
            return Err(GraphError::transaction("Injected statement failure"));
        }

        let Some(registered) = self.graph.lookup(&text) else {
            return Ok(Vec::new());
        };
        if registered.writes && self.mode == AccessMode::Read {
            return Err(GraphError::transaction(
                "Writing in read access mode not allowed",
            ));
        }

        let rows = (registered.handler)(&mut self.working, &statement.params)?;
        if registered.writes {
            self.log.push((registered.handler, statement.params.clone()));
        }
        Ok(rows)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.graph.stall().await;
        if self.graph.fail_commit.load(Ordering::SeqCst) {
            return Err(GraphError::transaction("Commit failed (mock)"));
        }
        if self.mode == AccessMode::Read || self.log.is_empty() {
            self.graph.commits.fetch_add(1, Ordering::SeqCst);
            return Ok(());
        }

        let mut state = self.graph.state.lock().unwrap();
        let mut next = state.clone();
        for (handler, params) in &self.log {
            handler(&mut next, params)?;
        }
        *state = next;
        self.graph.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.graph.stall().await;
        Ok(())
    }
}
