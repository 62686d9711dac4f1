//! Test helper factories and mock core builders
//!
//! Provides settings with sensible defaults, an executor wired to the
//! in-memory `MockGraph`, and an `EventRecorder` for asserting on events.
#![allow(dead_code)]

use crate::events::{DomainEvent, EventBus, EventKind};
use crate::neo4j::mock::{MockConnector, MockGraph};
use crate::neo4j::{ConnectionManager, TransactionExecutor};
use crate::Neo4jSettings;
use std::sync::{Arc, Mutex};

/// Settings pointing at the mock backend
pub fn test_settings() -> Neo4jSettings {
    Neo4jSettings {
        uri: "bolt://mock:7687".to_string(),
        user: "neo4j".to_string(),
        password: "mock".to_string(),
        connection_acquisition_timeout_secs: 5,
        transaction_timeout_secs: 5,
        ..Default::default()
    }
}

/// Executor over `graph` with a fresh event bus
pub fn mock_executor(graph: Arc<MockGraph>) -> TransactionExecutor {
    let connections = Arc::new(ConnectionManager::new(
        test_settings(),
        Arc::new(MockConnector::new(graph)),
    ));
    TransactionExecutor::new(connections, Arc::new(EventBus::default()))
}

/// Collects every event published on a bus, in delivery order
pub struct EventRecorder {
    events: Arc<Mutex<Vec<DomainEvent>>>,
}

impl EventRecorder {
    pub fn attach(bus: &EventBus) -> Self {
        let events = Arc::new(Mutex::new(Vec::new()));
        for kind in [
            EventKind::WriteOperation,
            EventKind::ReadOperation,
            EventKind::TransactionComplete,
            EventKind::Error,
            EventKind::BackupCompleted,
        ] {
            let sink = events.clone();
            bus.subscribe(kind, move |event| {
                sink.lock().unwrap().push(event.clone());
                Ok(())
            });
        }
        Self { events }
    }

    pub fn all(&self) -> Vec<DomainEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn kinds(&self) -> Vec<EventKind> {
        self.all().iter().map(DomainEvent::kind).collect()
    }

    pub fn of(&self, kind: EventKind) -> Vec<DomainEvent> {
        self.all().into_iter().filter(|e| e.kind() == kind).collect()
    }
}
