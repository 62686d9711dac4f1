//! Connection pool lifecycle and scoped sessions

use super::models::AccessMode;
use super::traits::{GraphConnector, GraphPool, GraphTransaction};
use crate::error::{GraphError, Result};
use crate::Neo4jSettings;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

struct PoolEntry {
    pool: Arc<dyn GraphPool>,
    created_at: Instant,
}

/// Owns the process-wide connection pool.
///
/// The pool is created lazily by the first `acquire`, under a mutex, so
/// concurrent first callers wait for one initialization instead of racing
/// to build their own. A pool older than `max_connection_lifetime` is
/// replaced on the next `acquire`. It is closed right away when idle;
/// otherwise holders keep using it and dropping the last handle releases
/// its connections.
pub struct ConnectionManager {
    settings: Neo4jSettings,
    connector: Arc<dyn GraphConnector>,
    pool: Mutex<Option<PoolEntry>>,
    open_sessions: Arc<AtomicUsize>,
}

impl ConnectionManager {
    pub fn new(settings: Neo4jSettings, connector: Arc<dyn GraphConnector>) -> Self {
        Self {
            settings,
            connector,
            pool: Mutex::new(None),
            open_sessions: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn settings(&self) -> &Neo4jSettings {
        &self.settings
    }

    /// Return the pool, creating and verifying it on first use
    pub async fn acquire(&self) -> Result<Arc<dyn GraphPool>> {
        let mut slot = self.pool.lock().await;

        if let Some(entry) = slot.as_ref() {
            if entry.created_at.elapsed() < self.settings.max_connection_lifetime() {
                return Ok(entry.pool.clone());
            }
            info!(
                age_secs = entry.created_at.elapsed().as_secs(),
                "Neo4j pool reached its maximum lifetime, recycling"
            );
            if let Some(retired) = slot.take() {
                self.retire(retired.pool).await;
            }
        }

        self.settings.validate()?;
        info!(uri = %self.settings.uri, "Initializing Neo4j connection pool");

        let pool = self.connector.connect(&self.settings).await.map_err(|e| {
            warn!("Failed to initialize Neo4j connection pool: {}", e);
            e
        })?;

        if let Err(e) = pool.verify_connectivity().await {
            warn!("Neo4j connectivity check failed: {}", e);
            if let Err(close_err) = pool.close().await {
                debug!("Closing unverified pool failed: {}", close_err);
            }
            return Err(e);
        }

        info!("Neo4j connection pool established");
        *slot = Some(PoolEntry {
            pool: pool.clone(),
            created_at: Instant::now(),
        });
        Ok(pool)
    }

    /// Open a single-use session bound to `database` (or the configured default).
    ///
    /// Bounded by the connection acquisition timeout.
    pub async fn session(&self, database: Option<&str>) -> Result<Session> {
        let timeout = self.settings.connection_acquisition_timeout();
        let pool = tokio::time::timeout(timeout, self.acquire())
            .await
            .map_err(|_| {
                GraphError::connection(format!(
                    "Timed out after {:?} acquiring a Neo4j connection",
                    timeout
                ))
            })??;

        let database = database
            .map(str::to_string)
            .or_else(|| self.settings.database.clone());

        Ok(Session::new(pool, database, self, timeout))
    }

    /// Close the pool. Safe to call when already closed.
    pub async fn shutdown(&self) -> Result<()> {
        let entry = self.pool.lock().await.take();
        match entry {
            Some(entry) => {
                entry.pool.close().await.map_err(|e| match e {
                    GraphError::Connection { .. } => e,
                    other => GraphError::connection_with("Failed to close Neo4j pool", other),
                })?;
                info!("Neo4j connection pool closed");
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Close a replaced pool now if nobody holds it. Otherwise the last
    /// session to drop it releases its connections.
    async fn retire(&self, pool: Arc<dyn GraphPool>) {
        if Arc::strong_count(&pool) > 1 {
            debug!("Recycled Neo4j pool still in use, released by its last session");
            return;
        }
        if let Err(e) = pool.close().await {
            debug!("Closing recycled pool failed: {}", e);
        }
    }

    pub async fn is_initialized(&self) -> bool {
        self.pool.lock().await.is_some()
    }

    /// Sessions currently checked out and not yet dropped
    pub fn open_sessions(&self) -> usize {
        self.open_sessions.load(Ordering::SeqCst)
    }
}

/// Decrements the open-session counter when the session goes away
struct SessionGuard {
    counter: Arc<AtomicUsize>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A scoped handle for exactly one transactional unit of work.
///
/// Released on drop, on every exit path.
pub struct Session {
    pool: Arc<dyn GraphPool>,
    database: Option<String>,
    begin_timeout: std::time::Duration,
    used: bool,
    _guard: SessionGuard,
}

impl Session {
    fn new(
        pool: Arc<dyn GraphPool>,
        database: Option<String>,
        manager: &ConnectionManager,
        begin_timeout: std::time::Duration,
    ) -> Self {
        manager.open_sessions.fetch_add(1, Ordering::SeqCst);
        Self {
            pool,
            database,
            begin_timeout,
            used: false,
            _guard: SessionGuard {
                counter: manager.open_sessions.clone(),
            },
        }
    }

    pub fn database(&self) -> Option<&str> {
        self.database.as_deref()
    }

    /// Start the session's transaction. A session can start only one.
    pub async fn begin(&mut self, mode: AccessMode) -> Result<Box<dyn GraphTransaction>> {
        if self.used {
            return Err(GraphError::transaction(
                "Session already ran its unit of work; open a new session",
            ));
        }
        self.used = true;

        tokio::time::timeout(
            self.begin_timeout,
            self.pool.begin(self.database.as_deref(), mode),
        )
        .await
        .map_err(|_| {
            GraphError::connection(format!(
                "Timed out after {:?} opening a transaction",
                self.begin_timeout
            ))
        })?
    }
}
