//! Transactional execution of caller statements with event publication

use super::connection::ConnectionManager;
use super::models::{AccessMode, DependencyRequest, DependencyScope, Record, Statement};
use super::traits::GraphTransaction;
use crate::error::{GraphError, Result};
use crate::events::{DomainEvent, EventBus};
use crate::graph::dependency::{cycle_error, link_statement, unlink_statement, DependencyValidator};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Runs statements inside managed transactions.
///
/// Every call opens its own session, runs one transaction and releases the
/// session on every exit path. Events are published after the outcome is
/// known and never extend the transaction:
/// - success: `WriteOperation` / `ReadOperation`, then `TransactionComplete`
/// - statement or commit failure: `Error`, then the original error is returned
///
/// Failing to get a session or start a transaction publishes nothing.
pub struct TransactionExecutor {
    connections: Arc<ConnectionManager>,
    events: Arc<EventBus>,
    validator: DependencyValidator,
    /// Last assigned write sequence. Held while the write event is published
    /// so subscribers observe strictly increasing numbers.
    write_sequence: std::sync::Mutex<u64>,
    project_dependencies: Mutex<()>,
    task_dependencies: Mutex<()>,
    transaction_timeout: Duration,
}

impl TransactionExecutor {
    pub fn new(connections: Arc<ConnectionManager>, events: Arc<EventBus>) -> Self {
        let transaction_timeout = connections.settings().transaction_timeout();
        Self {
            connections,
            events,
            validator: DependencyValidator::new(),
            write_sequence: std::sync::Mutex::new(0),
            project_dependencies: Mutex::new(()),
            task_dependencies: Mutex::new(()),
            transaction_timeout,
        }
    }

    pub fn with_transaction_timeout(mut self, timeout: Duration) -> Self {
        self.transaction_timeout = timeout;
        self
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    /// Run one statement in a write transaction, all-or-nothing
    pub async fn execute_write(
        &self,
        statement: &Statement,
        database: Option<&str>,
    ) -> Result<Vec<Record>> {
        let mut results = self
            .write_unit("execute_write", std::slice::from_ref(statement), database)
            .await?;
        Ok(results.pop().unwrap_or_default())
    }

    /// Run several statements in one write transaction.
    ///
    /// Returns one row set per statement. An empty batch is a no-op.
    pub async fn execute_batch(
        &self,
        statements: &[Statement],
        database: Option<&str>,
    ) -> Result<Vec<Vec<Record>>> {
        if statements.is_empty() {
            return Ok(Vec::new());
        }
        self.write_unit("execute_batch", statements, database).await
    }

    /// Run one statement in a read transaction. Never commits anything.
    pub async fn execute_read(
        &self,
        statement: &Statement,
        database: Option<&str>,
    ) -> Result<Vec<Record>> {
        let (mut tx, _session) = self.open(AccessMode::Read, database).await?;
        let started = Instant::now();

        let rows = match self
            .bounded(run_all(tx.as_mut(), std::slice::from_ref(statement)))
            .await
        {
            Ok(mut results) => results.pop().unwrap_or_default(),
            Err((_, e)) => {
                self.abandon(tx).await;
                return Err(self.fail("execute_read", e, Some(statement.text.as_str())));
            }
        };

        // Read transactions are closed, never committed
        if let Err(e) = self.within_timeout(tx.rollback()).await {
            return Err(self.fail("execute_read", e, Some(statement.text.as_str())));
        }

        let elapsed = started.elapsed();
        debug!(
            rows = rows.len(),
            database = ?database,
            duration_ms = elapsed.as_millis() as u64,
            "Read transaction finished"
        );
        self.events.publish(DomainEvent::read(&statement.text, rows.len()));
        self.events.publish(DomainEvent::transaction_complete(
            AccessMode::Read,
            1,
            elapsed.as_millis() as u64,
        ));
        Ok(rows)
    }

    /// Add a DEPENDS_ON edge after checking it keeps the scope acyclic.
    ///
    /// Mutations within a scope are serialized so two concurrent insertions
    /// that would jointly close a cycle cannot both commit.
    pub async fn add_dependency(
        &self,
        request: &DependencyRequest,
        database: Option<&str>,
    ) -> Result<Record> {
        if request.is_self_loop() {
            return Err(self.fail("add_dependency", cycle_error(request), None));
        }

        let _scope_guard = self.scope_lock(request.scope).lock().await;
        let statement = link_statement(request);

        let (mut tx, _session) = self.open(AccessMode::Write, database).await?;
        let started = Instant::now();

        let linked = match self
            .bounded(async {
                self.validator
                    .link(tx.as_mut(), request)
                    .await
                    .map_err(|e| (0, e))
            })
            .await
        {
            Ok(record) => record,
            Err((_, e)) => {
                self.abandon(tx).await;
                return Err(self.fail("add_dependency", e, Some(statement.text.as_str())));
            }
        };

        if let Err(e) = self.within_timeout(tx.commit()).await {
            return Err(self.fail("add_dependency", e, Some(statement.text.as_str())));
        }

        debug!(
            scope = %request.scope,
            source = %request.source_id,
            target = %request.target_id,
            "Dependency added"
        );
        self.committed(std::slice::from_ref(&statement), started);
        Ok(linked)
    }

    /// Delete the DEPENDS_ON edge `source -> target`. Returns whether one existed.
    pub async fn remove_dependency(
        &self,
        scope: DependencyScope,
        source_id: &str,
        target_id: &str,
        database: Option<&str>,
    ) -> Result<bool> {
        let _scope_guard = self.scope_lock(scope).lock().await;
        let rows = self
            .write_unit(
                "remove_dependency",
                &[unlink_statement(scope, source_id, target_id)],
                database,
            )
            .await?;

        let removed = rows
            .first()
            .and_then(|r| r.first())
            .and_then(|r| r.get("removed"))
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        Ok(removed > 0)
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn scope_lock(&self, scope: DependencyScope) -> &Mutex<()> {
        match scope {
            DependencyScope::Project => &self.project_dependencies,
            DependencyScope::Task => &self.task_dependencies,
        }
    }

    /// Session plus transaction. The session is returned so it lives as
    /// long as the transaction.
    async fn open(
        &self,
        mode: AccessMode,
        database: Option<&str>,
    ) -> Result<(Box<dyn GraphTransaction>, super::connection::Session)> {
        let mut session = self.connections.session(database).await?;
        let tx = session.begin(mode).await?;
        Ok((tx, session))
    }

    async fn write_unit(
        &self,
        operation: &'static str,
        statements: &[Statement],
        database: Option<&str>,
    ) -> Result<Vec<Vec<Record>>> {
        let (mut tx, _session) = self.open(AccessMode::Write, database).await?;
        let started = Instant::now();

        let results = match self.bounded(run_all(tx.as_mut(), statements)).await {
            Ok(results) => results,
            Err((index, e)) => {
                self.abandon(tx).await;
                let failed = statements.get(index).map(|s| s.text.as_str());
                return Err(self.fail(operation, e, failed));
            }
        };

        if let Err(e) = self.within_timeout(tx.commit()).await {
            let first = statements.first().map(|s| s.text.as_str());
            return Err(self.fail(operation, e, first));
        }

        self.committed(statements, started);
        Ok(results)
    }

    /// Apply the transaction timeout to a unit of work
    async fn bounded<T, F>(&self, work: F) -> std::result::Result<T, (usize, GraphError)>
    where
        F: std::future::Future<Output = std::result::Result<T, (usize, GraphError)>>,
    {
        match tokio::time::timeout(self.transaction_timeout, work).await {
            Ok(result) => result,
            Err(_) => Err((0, self.timed_out())),
        }
    }

    /// Apply the transaction timeout to a commit or rollback
    async fn within_timeout<F>(&self, finish: F) -> Result<()>
    where
        F: std::future::Future<Output = Result<()>>,
    {
        tokio::time::timeout(self.transaction_timeout, finish)
            .await
            .unwrap_or_else(|_| Err(self.timed_out()))
    }

    fn timed_out(&self) -> GraphError {
        GraphError::transaction(format!(
            "Transaction timed out after {:?}",
            self.transaction_timeout
        ))
    }

    /// Roll back after a failure. The original error wins over a rollback
    /// error, and a stalled rollback is dropped at the timeout.
    async fn abandon(&self, tx: Box<dyn GraphTransaction>) {
        if let Err(e) = self.within_timeout(tx.rollback()).await {
            debug!("Rollback after failure also failed: {}", e);
        }
    }

    /// Publish the write event under the sequence lock, then the completion
    fn committed(&self, statements: &[Statement], started: Instant) {
        let elapsed = started.elapsed().as_millis() as u64;
        let Some(first) = statements.first() else {
            return;
        };

        let sequence = {
            let mut last = self
                .write_sequence
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            *last += 1;
            self.events.publish(DomainEvent::write(
                *last,
                &first.text,
                first.param_summary(),
                statements.len(),
            ));
            *last
        };

        debug!(
            sequence,
            statements = statements.len(),
            duration_ms = elapsed,
            "Write transaction committed"
        );
        self.events.publish(DomainEvent::transaction_complete(
            AccessMode::Write,
            statements.len(),
            elapsed,
        ));
    }

    /// Publish an `Error` event and hand the error back to the caller
    fn fail(&self, operation: &str, error: GraphError, statement: Option<&str>) -> GraphError {
        warn!(operation, code = error.code(), "Graph operation failed: {}", error);
        self.events
            .publish(DomainEvent::error(operation, &error, statement));
        error
    }
}

/// Run statements in order, stopping at the first failure (returned with its index)
async fn run_all(
    tx: &mut dyn GraphTransaction,
    statements: &[Statement],
) -> std::result::Result<Vec<Vec<Record>>, (usize, GraphError)> {
    let mut results = Vec::with_capacity(statements.len());
    for (index, statement) in statements.iter().enumerate() {
        let rows = tx.run(statement).await.map_err(|e| (index, e))?;
        results.push(rows);
    }
    Ok(results)
}
