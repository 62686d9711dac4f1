//! Full-graph JSON export and artifact rotation

use crate::error::{GraphError, Result};
use crate::neo4j::connection::ConnectionManager;
use crate::neo4j::models::{AccessMode, NodeKind, Statement};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Prefix shared by every backup directory
pub const BACKUP_PREFIX: &str = "backup-";

const STAGING_PREFIX: &str = ".partial-";

pub(crate) const RELATIONSHIPS_CYPHER: &str = r#"
    MATCH (a)-[r]->(b)
    RETURN a.id AS from, b.id AS to, type(r) AS type, properties(r) AS props
"#;

pub(crate) fn nodes_cypher(kind: NodeKind) -> String {
    format!(
        "MATCH (n:{}) RETURN properties(n) AS props ORDER BY n.id",
        kind.label()
    )
}

/// One completed export
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackupArtifact {
    pub path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub node_count: usize,
    pub relationship_count: usize,
}

/// Writes a point-in-time copy of the graph under a directory
#[async_trait]
pub trait GraphExporter: Send + Sync {
    /// Create a new `backup-<timestamp>` directory inside `directory` and fill it.
    /// A failed export must not leave a `backup-*` directory behind.
    async fn export(&self, directory: &Path) -> Result<BackupArtifact>;
}

#[derive(Serialize)]
struct ExportedRelationship {
    from: Value,
    to: Value,
    #[serde(rename = "type")]
    rel_type: Value,
    properties: Value,
}

/// Exports every node kind to `<Label>.json` and all edges to `relationships.json`.
///
/// Reads go through a plain read session, so exports publish no events.
pub struct Neo4jExporter {
    connections: Arc<ConnectionManager>,
}

impl Neo4jExporter {
    pub fn new(connections: Arc<ConnectionManager>) -> Self {
        Self { connections }
    }

    /// Fill `target` with one file per node kind plus `relationships.json`
    async fn write_into(&self, target: &Path) -> Result<(usize, usize)> {
        let mut session = self.connections.session(None).await?;
        let mut tx = session.begin(AccessMode::Read).await?;

        let mut node_count = 0;
        for kind in NodeKind::ALL {
            let rows = tx.run(&Statement::new(nodes_cypher(kind))).await?;
            let nodes: Vec<Value> = rows
                .into_iter()
                .filter_map(|r| r.get("props").cloned())
                .collect();
            node_count += nodes.len();
            write_json(&target.join(format!("{}.json", kind.label())), &nodes).await?;
        }

        let rows = tx.run(&Statement::new(RELATIONSHIPS_CYPHER)).await?;
        let relationships: Vec<ExportedRelationship> = rows
            .into_iter()
            .map(|r| ExportedRelationship {
                from: r.get("from").cloned().unwrap_or(Value::Null),
                to: r.get("to").cloned().unwrap_or(Value::Null),
                rel_type: r.get("type").cloned().unwrap_or(Value::Null),
                properties: r.get("props").cloned().unwrap_or(Value::Null),
            })
            .collect();
        write_json(&target.join("relationships.json"), &relationships).await?;

        tx.rollback().await?;
        Ok((node_count, relationships.len()))
    }
}

#[async_trait]
impl GraphExporter for Neo4jExporter {
    async fn export(&self, directory: &Path) -> Result<BackupArtifact> {
        let (staging, created_at) = create_staging_dir(directory).await?;

        let (node_count, relationship_count) = match self.write_into(&staging).await {
            Ok(counts) => counts,
            Err(e) => {
                discard(&staging).await;
                return Err(e);
            }
        };
        let path = publish_staged(directory, &staging, created_at).await?;

        info!(
            path = %path.display(),
            nodes = node_count,
            relationships = relationship_count,
            "Graph exported"
        );
        Ok(BackupArtifact {
            path,
            created_at,
            node_count,
            relationship_count,
        })
    }
}

/// Directory name for a backup taken at `at`, e.g. `backup-20240301T101502.123Z`
pub fn backup_dir_name(at: DateTime<Utc>) -> String {
    format!("{}{}", BACKUP_PREFIX, at.format("%Y%m%dT%H%M%S%.3fZ"))
}

/// Create a fresh staging directory under `root` for an export in progress.
///
/// Staging directories never carry `BACKUP_PREFIX`, so a failed or
/// interrupted export is invisible to `list_backups` and `rotate`.
pub async fn create_staging_dir(root: &Path) -> Result<(PathBuf, DateTime<Utc>)> {
    tokio::fs::create_dir_all(root)
        .await
        .map_err(|e| backup_io("create backup root", root, e))?;

    // Names carry millisecond precision; wait out a collision
    loop {
        let now = Utc::now();
        let path = root.join(format!("{}{}", STAGING_PREFIX, backup_dir_name(now)));
        match tokio::fs::create_dir(&path).await {
            Ok(()) => return Ok((path, now)),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            Err(e) => return Err(backup_io("create staging directory", &path, e)),
        }
    }
}

/// Move a completed staging directory to its `backup-<timestamp>` name
pub async fn publish_staged(
    root: &Path,
    staging: &Path,
    created_at: DateTime<Utc>,
) -> Result<PathBuf> {
    let target = root.join(backup_dir_name(created_at));
    match tokio::fs::rename(staging, &target).await {
        Ok(()) => Ok(target),
        Err(e) => {
            discard(staging).await;
            Err(backup_io("publish backup", &target, e))
        }
    }
}

async fn discard(staging: &Path) {
    if let Err(e) = tokio::fs::remove_dir_all(staging).await {
        warn!(path = %staging.display(), "Failed to remove staged export: {}", e);
    }
}

/// Delete the oldest backups so at most `keep` remain. Returns how many were removed.
pub async fn rotate(root: &Path, keep: usize) -> Result<usize> {
    let mut backups = list_backups(root).await?;
    if backups.len() <= keep {
        return Ok(0);
    }

    let excess = backups.len() - keep;
    for path in backups.drain(..excess) {
        tokio::fs::remove_dir_all(&path)
            .await
            .map_err(|e| backup_io("remove old backup", &path, e))?;
        debug!(path = %path.display(), "Removed old backup");
    }
    Ok(excess)
}

/// Backup directories under `root`, oldest first
pub async fn list_backups(root: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = match tokio::fs::read_dir(root).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(backup_io("list backups", root, e)),
    };

    let mut backups = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| backup_io("list backups", root, e))?
    {
        let is_dir = entry
            .file_type()
            .await
            .map(|t| t.is_dir())
            .unwrap_or(false);
        let is_backup = entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with(BACKUP_PREFIX));
        if is_dir && is_backup {
            backups.push(entry.path());
        }
    }
    // Timestamped names sort chronologically
    backups.sort();
    Ok(backups)
}

async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)
        .map_err(|e| GraphError::Backup(format!("serialize {}: {}", path.display(), e)))?;
    tokio::fs::write(path, bytes)
        .await
        .map_err(|e| backup_io("write", path, e))
}

fn backup_io(action: &str, path: &Path, e: std::io::Error) -> GraphError {
    GraphError::Backup(format!("Failed to {} {}: {}", action, path.display(), e))
}
