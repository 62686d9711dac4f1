//! Dependency-cycle enforcement for DEPENDS_ON edges.
//!
//! Project and Task dependencies form two separate DAGs. Before an edge
//! `source -> target` is written, a breadth-first search starting at
//! `target` looks for `source` inside the same scope; reaching it means
//! the new edge would close a cycle.
//!
//! The search runs through the caller's open transaction so it sees the
//! same committed state the insertion will be applied to. Each BFS level is
//! one `UNWIND` round-trip; a visited set keeps the total work proportional
//! to the number of edges in the scope.

use crate::error::{GraphError, Result};
use crate::neo4j::models::{DependencyRequest, DependencyScope, Record, Statement};
use crate::neo4j::traits::GraphTransaction;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Anything that can list DEPENDS_ON successors for a frontier of ids
#[async_trait]
pub trait DependencyEdges: Send {
    /// Ids reached by one DEPENDS_ON hop from any id in `frontier`
    async fn successors(&mut self, scope: DependencyScope, frontier: &[String])
        -> Result<Vec<String>>;
}

/// Successor lookups issued through an open graph transaction
pub struct TransactionEdges<'a> {
    tx: &'a mut dyn GraphTransaction,
    round_trips: usize,
}

impl<'a> TransactionEdges<'a> {
    pub fn new(tx: &'a mut dyn GraphTransaction) -> Self {
        Self { tx, round_trips: 0 }
    }

    pub fn round_trips(&self) -> usize {
        self.round_trips
    }
}

#[async_trait]
impl DependencyEdges for TransactionEdges<'_> {
    async fn successors(
        &mut self,
        scope: DependencyScope,
        frontier: &[String],
    ) -> Result<Vec<String>> {
        self.round_trips += 1;
        let rows = self.tx.run(&successors_statement(scope, frontier)).await?;
        Ok(rows
            .iter()
            .filter_map(|r| r.get_str("id").map(str::to_string))
            .collect())
    }
}

/// In-memory adjacency list (`source -> [targets]`), handy for planning and tests
#[async_trait]
impl DependencyEdges for HashMap<String, Vec<String>> {
    async fn successors(
        &mut self,
        _scope: DependencyScope,
        frontier: &[String],
    ) -> Result<Vec<String>> {
        Ok(frontier
            .iter()
            .filter_map(|id| self.get(id))
            .flatten()
            .cloned()
            .collect())
    }
}

/// Cycle checker for proposed DEPENDS_ON edges
#[derive(Debug, Default, Clone, Copy)]
pub struct DependencyValidator;

impl DependencyValidator {
    pub fn new() -> Self {
        Self
    }

    /// True if adding `source -> target` in `scope` would close a directed cycle.
    ///
    /// Self-loops are rejected without touching `edges`.
    pub async fn would_create_cycle<E>(
        &self,
        edges: &mut E,
        scope: DependencyScope,
        source_id: &str,
        target_id: &str,
    ) -> Result<bool>
    where
        E: DependencyEdges + ?Sized,
    {
        if source_id == target_id {
            return Ok(true);
        }
        path_exists(edges, scope, target_id, source_id).await
    }

    /// Validate, then MERGE the edge. Must run inside a write transaction
    /// whose scope is serialized by the caller.
    pub async fn link(
        &self,
        tx: &mut dyn GraphTransaction,
        request: &DependencyRequest,
    ) -> Result<Record> {
        let cyclic = {
            let mut edges = TransactionEdges::new(tx);
            let cyclic = self
                .would_create_cycle(
                    &mut edges,
                    request.scope,
                    &request.source_id,
                    &request.target_id,
                )
                .await?;
            debug!(
                scope = %request.scope,
                round_trips = edges.round_trips(),
                cyclic,
                "Dependency cycle check finished"
            );
            cyclic
        };

        if cyclic {
            return Err(cycle_error(request));
        }

        let rows = tx.run(&link_statement(request)).await?;
        rows.into_iter().next().ok_or_else(|| {
            GraphError::InvalidDependency(format!(
                "{} {} or {} does not exist",
                request.scope, request.source_id, request.target_id
            ))
        })
    }
}

pub(crate) fn cycle_error(request: &DependencyRequest) -> GraphError {
    GraphError::DependencyCycle {
        scope: request.scope,
        source_id: request.source_id.clone(),
        target_id: request.target_id.clone(),
    }
}

/// Breadth-first reachability `from ->* to` with a visited set
pub async fn path_exists<E>(
    edges: &mut E,
    scope: DependencyScope,
    from: &str,
    to: &str,
) -> Result<bool>
where
    E: DependencyEdges + ?Sized,
{
    if from == to {
        return Ok(true);
    }

    let mut visited: HashSet<String> = HashSet::from([from.to_string()]);
    let mut frontier = vec![from.to_string()];

    while !frontier.is_empty() {
        let mut next = Vec::new();
        for id in edges.successors(scope, &frontier).await? {
            if id == to {
                return Ok(true);
            }
            if visited.insert(id.clone()) {
                next.push(id);
            }
        }
        frontier = next;
    }

    Ok(false)
}

// ============================================================================
// Cypher
// ============================================================================

pub(crate) fn successors_cypher(scope: DependencyScope) -> String {
    format!(
        r#"
        UNWIND $frontier AS node_id
        MATCH (n:{label} {{id: node_id}})-[:DEPENDS_ON]->(m:{label})
        RETURN DISTINCT m.id AS id
        "#,
        label = scope.label()
    )
}

pub(crate) fn link_cypher(scope: DependencyScope) -> String {
    format!(
        r#"
        MATCH (source:{label} {{id: $source_id}}), (target:{label} {{id: $target_id}})
        MERGE (source)-[r:DEPENDS_ON]->(target)
        ON CREATE SET r.id = $dependency_id, r.createdAt = $created_at
        SET r.dependencyType = $dependency_type, r.description = $description
        RETURN source.id AS source_id, target.id AS target_id,
               r.id AS dependency_id, r.dependencyType AS dependency_type
        "#,
        label = scope.label()
    )
}

pub(crate) fn unlink_cypher(scope: DependencyScope) -> String {
    format!(
        r#"
        MATCH (source:{label} {{id: $source_id}})-[r:DEPENDS_ON]->(target:{label} {{id: $target_id}})
        DELETE r
        RETURN count(r) AS removed
        "#,
        label = scope.label()
    )
}

fn successors_statement(scope: DependencyScope, frontier: &[String]) -> Statement {
    Statement::new(successors_cypher(scope)).param("frontier", frontier.to_vec())
}

pub(crate) fn link_statement(request: &DependencyRequest) -> Statement {
    Statement::new(link_cypher(request.scope))
        .param("source_id", request.source_id.as_str())
        .param("target_id", request.target_id.as_str())
        .param("dependency_id", format!("dep_{}", uuid::Uuid::new_v4().simple()))
        .param("dependency_type", request.kind.as_str())
        .param("description", request.description.clone())
        .param("created_at", chrono::Utc::now().to_rfc3339())
}

pub(crate) fn unlink_statement(
    scope: DependencyScope,
    source_id: &str,
    target_id: &str,
) -> Statement {
    Statement::new(unlink_cypher(scope))
        .param("source_id", source_id)
        .param("target_id", target_id)
}
