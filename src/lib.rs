//! Knowledge Graph Core
//!
//! Persistence and consistency layer for a Neo4j-backed Project / Task /
//! Knowledge graph:
//! - Lazily initialized, shared connection pool with scoped sessions
//! - Transactional execution of caller statements, all-or-nothing
//! - Cycle-free DEPENDS_ON edges per scope (Project, Task)
//! - Typed domain events for every read, write and failure
//! - Debounced, single-flight JSON backups with rotation

pub mod backup;
pub mod error;
pub mod events;
pub mod graph;
pub mod neo4j;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use error::{GraphError, Result};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use backup::{BackupOrchestrator, Neo4jExporter};
use events::EventBus;
use neo4j::{ConnectionManager, GraphConnector, Neo4jConnector, TransactionExecutor};

// ============================================================================
// YAML config structs (deserialization targets)
// ============================================================================

/// Top-level YAML configuration file structure
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub neo4j: Neo4jSettings,
    pub backup: BackupSettings,
    pub events: EventsSettings,
}

/// Neo4j connection and pool settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Neo4jSettings {
    pub uri: String,
    pub user: String,
    pub password: String,
    /// Target database; `None` uses the server default
    pub database: Option<String>,
    pub max_connection_pool_size: usize,
    pub max_connection_lifetime_secs: u64,
    pub connection_acquisition_timeout_secs: u64,
    pub transaction_timeout_secs: u64,
    /// Rows pulled per round-trip when streaming results
    pub fetch_size: usize,
}

impl Default for Neo4jSettings {
    fn default() -> Self {
        Self {
            uri: "bolt://localhost:7687".into(),
            user: "neo4j".into(),
            password: String::new(),
            database: None,
            max_connection_pool_size: 50,
            max_connection_lifetime_secs: 3 * 60 * 60,
            connection_acquisition_timeout_secs: 120,
            transaction_timeout_secs: 60,
            fetch_size: 500,
        }
    }
}

impl Neo4jSettings {
    /// Endpoint and credentials must be present before a pool is built
    pub fn validate(&self) -> Result<()> {
        let missing: Vec<&str> = [
            ("uri", self.uri.trim().is_empty()),
            ("user", self.user.trim().is_empty()),
            ("password", self.password.is_empty()),
        ]
        .into_iter()
        .filter_map(|(name, empty)| empty.then_some(name))
        .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(GraphError::Configuration(format!(
                "Neo4j {} not configured",
                missing.join(", ")
            )))
        }
    }

    pub fn max_connection_lifetime(&self) -> Duration {
        Duration::from_secs(self.max_connection_lifetime_secs)
    }

    pub fn connection_acquisition_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_acquisition_timeout_secs)
    }

    pub fn transaction_timeout(&self) -> Duration {
        Duration::from_secs(self.transaction_timeout_secs)
    }

    /// Copy safe to print or log
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if !copy.password.is_empty() {
            copy.password = "********".into();
        }
        copy
    }
}

/// Backup scheduling and retention
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupSettings {
    pub enabled: bool,
    pub directory: PathBuf,
    pub max_backups: usize,
    pub debounce_ms: u64,
}

impl Default for BackupSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            directory: PathBuf::from("./backups"),
            max_backups: 10,
            debounce_ms: 2000,
        }
    }
}

impl BackupSettings {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Backups kept after rotation, never less than one
    pub fn retention(&self) -> usize {
        self.max_backups.max(1)
    }
}

/// Event bus settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsSettings {
    /// Log WRITE_OPERATION and ERROR events at debug level
    pub log_events: bool,
}

// ============================================================================
// Runtime config
// ============================================================================

/// Effective configuration: YAML file overridden by environment variables
#[derive(Debug, Clone, Default, Serialize)]
pub struct Config {
    pub neo4j: Neo4jSettings,
    pub backup: BackupSettings,
    pub events: EventsSettings,
}

impl Config {
    /// Load configuration from environment variables only
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_yaml_and_env(None)
    }

    /// Load configuration from an optional YAML file, then override with env vars.
    ///
    /// Priority: env var > YAML > default
    ///
    /// If `yaml_path` is None, tries "config.yaml" in CWD. A missing file
    /// falls back to env vars / defaults; a file that fails to parse is an error.
    pub fn from_yaml_and_env(yaml_path: Option<&Path>) -> anyhow::Result<Self> {
        let yaml = Self::load_yaml(yaml_path)?;

        let mut neo4j = yaml.neo4j;
        if let Ok(v) = std::env::var("NEO4J_URI") {
            neo4j.uri = v;
        }
        if let Ok(v) = std::env::var("NEO4J_USER") {
            neo4j.user = v;
        }
        if let Ok(v) = std::env::var("NEO4J_PASSWORD") {
            neo4j.password = v;
        }
        if let Ok(v) = std::env::var("NEO4J_DATABASE") {
            neo4j.database = (!v.is_empty()).then_some(v);
        }

        let mut backup = yaml.backup;
        if let Some(v) = env_parse::<bool>("BACKUP_ENABLED")? {
            backup.enabled = v;
        }
        if let Ok(v) = std::env::var("BACKUP_FILE_DIR") {
            backup.directory = PathBuf::from(v);
        }
        if let Some(v) = env_parse::<usize>("BACKUP_MAX_COUNT")? {
            backup.max_backups = v;
        }
        if let Some(v) = env_parse::<u64>("BACKUP_DEBOUNCE_MS")? {
            backup.debounce_ms = v;
        }

        let mut events = yaml.events;
        if let Some(v) = env_parse::<bool>("LOG_EVENTS")? {
            events.log_events = v;
        }

        Ok(Self {
            neo4j,
            backup,
            events,
        })
    }

    fn load_yaml(yaml_path: Option<&Path>) -> anyhow::Result<YamlConfig> {
        let default_path = Path::new("config.yaml");
        let path = yaml_path.unwrap_or(default_path);

        match std::fs::read_to_string(path) {
            Ok(contents) => {
                let config = serde_yaml::from_str(&contents)
                    .with_context(|| format!("Failed to parse {}", path.display()))?;
                tracing::info!("Loaded config from {}", path.display());
                Ok(config)
            }
            Err(_) => {
                tracing::debug!(
                    "No config file at {}, using env vars / defaults",
                    path.display()
                );
                Ok(YamlConfig::default())
            }
        }
    }

    /// Copy with secrets masked, for display
    pub fn redacted(&self) -> Self {
        Self {
            neo4j: self.neo4j.redacted(),
            ..self.clone()
        }
    }
}

fn env_parse<T>(name: &str) -> anyhow::Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("Invalid value for {}: {:?}", name, raw)),
        Err(_) => Ok(None),
    }
}

// ============================================================================
// Wiring
// ============================================================================

/// The process-wide core: one pool, one bus, one executor, optional backups.
///
/// Nothing touches the network until the first operation.
pub struct GraphCore {
    pub config: Arc<Config>,
    pub connections: Arc<ConnectionManager>,
    pub events: Arc<EventBus>,
    pub executor: Arc<TransactionExecutor>,
    pub backups: Option<Arc<BackupOrchestrator>>,
}

impl GraphCore {
    /// Wire the core against Neo4j. Must be called inside a tokio runtime
    /// when backups are enabled.
    pub fn new(config: Config) -> Self {
        Self::with_connector(config, Arc::new(Neo4jConnector::new()))
    }

    /// Wire the core against any backend
    pub fn with_connector(config: Config, connector: Arc<dyn GraphConnector>) -> Self {
        let connections = Arc::new(ConnectionManager::new(config.neo4j.clone(), connector));
        let events = Arc::new(EventBus::default());
        let executor = Arc::new(TransactionExecutor::new(
            connections.clone(),
            events.clone(),
        ));

        if config.events.log_events {
            events::install_debug_logging(&events);
        }

        let backups = config.backup.enabled.then(|| {
            Arc::new(BackupOrchestrator::start(
                Arc::new(Neo4jExporter::new(connections.clone())),
                events.clone(),
                config.backup.clone(),
            ))
        });

        Self {
            config: Arc::new(config),
            connections,
            events,
            executor,
            backups,
        }
    }

    /// Stop backups (flushing a pending one), then close the pool
    pub async fn shutdown(&self) -> Result<()> {
        if let Some(backups) = &self.backups {
            backups.stop().await;
        }
        self.connections.shutdown().await
    }
}

// ============================================================================
// Tests
// ============================================================================
