//! Backend seam for the graph store
//!
//! `ConnectionManager` and `TransactionExecutor` only talk to these traits.
//! `Neo4jConnector` implements them over `neo4rs`; the in-memory
//! `MockConnector` implements them for tests.

use super::models::{AccessMode, Record, Statement};
use crate::error::Result;
use crate::Neo4jSettings;
use async_trait::async_trait;
use std::sync::Arc;

/// Creates connection pools. Called once per pool lifetime by `ConnectionManager`.
#[async_trait]
pub trait GraphConnector: Send + Sync {
    /// Build a pool for the given settings. Does not verify reachability.
    async fn connect(&self, settings: &Neo4jSettings) -> Result<Arc<dyn GraphPool>>;
}

/// A pool of connections to one graph store
#[async_trait]
pub trait GraphPool: Send + Sync {
    /// Round-trip to the server to prove it is reachable
    async fn verify_connectivity(&self) -> Result<()>;

    /// Open a transaction on `database` (or the server default)
    async fn begin(
        &self,
        database: Option<&str>,
        mode: AccessMode,
    ) -> Result<Box<dyn GraphTransaction>>;

    /// Release every pooled connection. Must be safe to call twice.
    async fn close(&self) -> Result<()>;
}

/// An open transaction. Dropping it without `commit` discards its writes.
#[async_trait]
pub trait GraphTransaction: Send {
    /// Run one statement and collect every row
    async fn run(&mut self, statement: &Statement) -> Result<Vec<Record>>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}
