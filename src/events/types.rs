//! Domain event types published by the core

use crate::error::GraphError;
use crate::neo4j::models::AccessMode;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Discriminant used to route events to subscribers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    WriteOperation,
    ReadOperation,
    TransactionComplete,
    Error,
    BackupCompleted,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::WriteOperation => "write_operation",
            Self::ReadOperation => "read_operation",
            Self::TransactionComplete => "transaction_complete",
            Self::Error => "error",
            Self::BackupCompleted => "backup_completed",
        };
        f.write_str(s)
    }
}

/// Kind-specific event data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    WriteOperation {
        /// Process-local transaction sequence number, strictly increasing
        sequence: u64,
        statement: String,
        /// Parameter names and value shapes, never the values
        params: BTreeMap<String, String>,
        statement_count: usize,
    },
    ReadOperation {
        statement: String,
        row_count: usize,
    },
    TransactionComplete {
        mode: AccessMode,
        statement_count: usize,
        duration_ms: u64,
    },
    Error {
        operation: String,
        code: String,
        error: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        statement: Option<String>,
    },
    BackupCompleted {
        path: String,
        removed: usize,
        duration_ms: u64,
    },
}

/// An immutable notification about a finished core operation.
///
/// Must be Clone for `tokio::sync::broadcast`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainEvent {
    /// ISO 8601 timestamp
    pub timestamp: String,
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl DomainEvent {
    pub fn new(payload: EventPayload) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            payload,
        }
    }

    pub fn write(
        sequence: u64,
        statement: impl Into<String>,
        params: BTreeMap<String, String>,
        statement_count: usize,
    ) -> Self {
        Self::new(EventPayload::WriteOperation {
            sequence,
            statement: statement.into(),
            params,
            statement_count,
        })
    }

    pub fn read(statement: impl Into<String>, row_count: usize) -> Self {
        Self::new(EventPayload::ReadOperation {
            statement: statement.into(),
            row_count,
        })
    }

    pub fn transaction_complete(
        mode: AccessMode,
        statement_count: usize,
        duration_ms: u64,
    ) -> Self {
        Self::new(EventPayload::TransactionComplete {
            mode,
            statement_count,
            duration_ms,
        })
    }

    pub fn error(
        operation: impl Into<String>,
        error: &GraphError,
        statement: Option<&str>,
    ) -> Self {
        Self::new(EventPayload::Error {
            operation: operation.into(),
            code: error.code().to_string(),
            error: error.to_string(),
            statement: statement.map(str::to_string),
        })
    }

    pub fn backup_completed(path: impl Into<String>, removed: usize, duration_ms: u64) -> Self {
        Self::new(EventPayload::BackupCompleted {
            path: path.into(),
            removed,
            duration_ms,
        })
    }

    pub fn kind(&self) -> EventKind {
        match self.payload {
            EventPayload::WriteOperation { .. } => EventKind::WriteOperation,
            EventPayload::ReadOperation { .. } => EventKind::ReadOperation,
            EventPayload::TransactionComplete { .. } => EventKind::TransactionComplete,
            EventPayload::Error { .. } => EventKind::Error,
            EventPayload::BackupCompleted { .. } => EventKind::BackupCompleted,
        }
    }

    /// Sequence number of a write event
    pub fn sequence(&self) -> Option<u64> {
        match self.payload {
            EventPayload::WriteOperation { sequence, .. } => Some(sequence),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_matches_payload() {
        assert_eq!(
            DomainEvent::write(1, "CREATE ()", BTreeMap::new(), 1).kind(),
            EventKind::WriteOperation
        );
        assert_eq!(DomainEvent::read("MATCH (n) RETURN n", 0).kind(), EventKind::ReadOperation);
        assert_eq!(
            DomainEvent::transaction_complete(AccessMode::Read, 1, 3).kind(),
            EventKind::TransactionComplete
        );
        assert_eq!(
            DomainEvent::backup_completed("/tmp/b", 0, 10).kind(),
            EventKind::BackupCompleted
        );
    }

    #[test]
    fn test_error_event_carries_code() {
        let err = GraphError::transaction("constraint violated");
        let event = DomainEvent::error("execute_write", &err, Some("CREATE (p:Project)"));
        match &event.payload {
            EventPayload::Error {
                operation,
                code,
                error,
                statement,
            } => {
                assert_eq!(operation, "execute_write");
                assert_eq!(code, "TRANSACTION_ERROR");
                assert!(error.contains("constraint violated"));
                assert_eq!(statement.as_deref(), Some("CREATE (p:Project)"));
            }
            other => panic!("unexpected payload {:?}", other),
        }
        assert_eq!(event.sequence(), None);
    }

    #[test]
    fn test_event_json_shape() {
        let event = DomainEvent::write(7, "MERGE (n)", BTreeMap::new(), 1);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "write_operation");
        assert_eq!(json["sequence"], 7);
        assert!(json["timestamp"].is_string());

        let err = DomainEvent::error("execute_read", &GraphError::connection("down"), None);
        let json = serde_json::to_string(&err).unwrap();
        // None statement should be omitted
        assert!(!json.contains("\"statement\""));
    }
}
