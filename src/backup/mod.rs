//! Graph backups
//!
//! - [`export`]: `GraphExporter` trait, the Neo4j JSON exporter and rotation helpers
//! - [`orchestrator`]: `BackupOrchestrator`, debounced single-flight scheduling

pub mod export;
pub mod orchestrator;

pub use export::{list_backups, rotate, BackupArtifact, GraphExporter, Neo4jExporter};
pub use orchestrator::BackupOrchestrator;
