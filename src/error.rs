//! Error taxonomy for the graph persistence layer

use crate::neo4j::models::DependencyScope;
use thiserror::Error;

/// Boxed source error carried by transport-level variants
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result alias used across the core
pub type Result<T> = std::result::Result<T, GraphError>;

/// Typed failures surfaced by the core.
///
/// Transport and validation errors propagate to the immediate caller.
/// `Backup` never reaches a write caller: it only shows up in logs and
/// `Error` events published by the backup orchestrator.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Connection error: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("Transaction error: {message}")]
    Transaction {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("Dependency cycle: {scope} {source_id} -> {target_id} would close a cycle")]
    DependencyCycle {
        scope: DependencyScope,
        source_id: String,
        target_id: String,
    },

    #[error("Invalid dependency: {0}")]
    InvalidDependency(String),

    #[error("Backup error: {0}")]
    Backup(String),
}

impl GraphError {
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            source: None,
        }
    }

    pub fn connection_with(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Connection {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub fn transaction(message: impl Into<String>) -> Self {
        Self::Transaction {
            message: message.into(),
            source: None,
        }
    }

    pub fn transaction_with(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Transaction {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Stable machine-readable code, shared with the tool layer's error responses
    pub fn code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::Connection { .. } => "CONNECTION_ERROR",
            Self::Transaction { .. } => "TRANSACTION_ERROR",
            Self::DependencyCycle { .. } => "DEPENDENCY_CYCLE",
            Self::InvalidDependency(_) => "INVALID_DEPENDENCY",
            Self::Backup(_) => "BACKUP_ERROR",
        }
    }

    /// Only connection failures are worth a caller-side retry with backoff
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }
}
