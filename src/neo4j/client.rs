//! Neo4j backend built on `neo4rs`

use super::models::{AccessMode, Params, Record, Statement};
use super::traits::{GraphConnector, GraphPool, GraphTransaction};
use crate::error::{GraphError, Result};
use crate::Neo4jSettings;
use async_trait::async_trait;
use neo4rs::{
    query, BoltList, BoltMap, BoltNull, BoltString, BoltType, ConfigBuilder, Graph, Query, Txn,
};
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Connector that opens `neo4rs` pools
#[derive(Debug, Default, Clone)]
pub struct Neo4jConnector;

impl Neo4jConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl GraphConnector for Neo4jConnector {
    async fn connect(&self, settings: &Neo4jSettings) -> Result<Arc<dyn GraphPool>> {
        let mut builder = ConfigBuilder::default()
            .uri(settings.uri.as_str())
            .user(settings.user.as_str())
            .password(settings.password.as_str())
            .fetch_size(settings.fetch_size)
            .max_connections(settings.max_connection_pool_size);
        if let Some(db) = settings.database.as_deref() {
            builder = builder.db(db);
        }
        let config = builder
            .build()
            .map_err(|e| GraphError::Configuration(format!("Invalid Neo4j settings: {}", e)))?;

        let graph = Graph::connect(config)
            .await
            .map_err(|e| GraphError::connection_with("Failed to connect to Neo4j", e))?;

        Ok(Arc::new(Neo4jPool {
            graph: RwLock::new(Some(graph)),
        }))
    }
}

/// A live `neo4rs::Graph` (which pools connections internally)
pub struct Neo4jPool {
    graph: RwLock<Option<Graph>>,
}

impl Neo4jPool {
    async fn graph(&self) -> Result<Graph> {
        self.graph
            .read()
            .await
            .clone()
            .ok_or_else(|| GraphError::connection("Neo4j pool is closed"))
    }
}

#[async_trait]
impl GraphPool for Neo4jPool {
    async fn verify_connectivity(&self) -> Result<()> {
        let graph = self.graph().await?;
        graph
            .run(query("RETURN 1"))
            .await
            .map_err(|e| GraphError::connection_with("Neo4j connectivity check failed", e))
    }

    async fn begin(
        &self,
        database: Option<&str>,
        mode: AccessMode,
    ) -> Result<Box<dyn GraphTransaction>> {
        let graph = self.graph().await?;
        let txn = match database {
            Some(db) => graph.start_txn_on(db).await,
            None => graph.start_txn().await,
        }
        .map_err(|e| GraphError::connection_with("Failed to open Neo4j transaction", e))?;

        Ok(Box::new(Neo4jTransaction { txn, mode }))
    }

    async fn close(&self) -> Result<()> {
        // Dropping the last Graph handle closes the pooled connections.
        if self.graph.write().await.take().is_some() {
            tracing::debug!("Neo4j pool released");
        }
        Ok(())
    }
}

/// Transaction wrapper. Read transactions are never committed: they are
/// rolled back on completion so nothing they run can persist.
pub struct Neo4jTransaction {
    txn: Txn,
    mode: AccessMode,
}

#[async_trait]
impl GraphTransaction for Neo4jTransaction {
    async fn run(&mut self, statement: &Statement) -> Result<Vec<Record>> {
        let mut stream = self
            .txn
            .execute(to_query(statement))
            .await
            .map_err(|e| GraphError::transaction_with("Statement failed", e))?;

        let mut records = Vec::new();
        while let Some(row) = stream
            .next(self.txn.handle())
            .await
            .map_err(|e| GraphError::transaction_with("Failed to read result row", e))?
        {
            let columns: Map<String, Value> = row
                .to()
                .map_err(|e| GraphError::transaction_with("Failed to decode result row", e))?;
            records.push(Record::from(columns));
        }
        Ok(records)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        match self.mode {
            AccessMode::Write => self
                .txn
                .commit()
                .await
                .map_err(|e| GraphError::transaction_with("Commit failed", e)),
            AccessMode::Read => self
                .txn
                .rollback()
                .await
                .map_err(|e| GraphError::transaction_with("Failed to close read transaction", e)),
        }
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.txn
            .rollback()
            .await
            .map_err(|e| GraphError::transaction_with("Rollback failed", e))
    }
}

/// Build a `neo4rs::Query` from a statement, converting JSON params to Bolt values
fn to_query(statement: &Statement) -> Query {
    statement
        .params
        .iter()
        .fold(query(&statement.text), |q, (key, value)| {
            q.param(key, to_bolt(value))
        })
}

fn to_bolt(value: &Value) -> BoltType {
    match value {
        Value::Null => BoltType::Null(BoltNull),
        Value::Bool(b) => BoltType::from(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => BoltType::from(i),
            None => BoltType::from(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => BoltType::from(s.as_str()),
        Value::Array(items) => {
            BoltType::List(BoltList::from(items.iter().map(to_bolt).collect::<Vec<_>>()))
        }
        Value::Object(map) => BoltType::Map(to_bolt_map(map)),
    }
}

fn to_bolt_map(params: &Params) -> BoltMap {
    let mut map = BoltMap::new();
    for (key, value) in params {
        map.put(BoltString::from(key.as_str()), to_bolt(value));
    }
    map
}
