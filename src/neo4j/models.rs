//! Graph models: node kinds, relationship types, statements and result records

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// Node kinds
// ============================================================================

/// Label of a node in the graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    Project,
    Task,
    Knowledge,
    User,
    TaskType,
    Domain,
    Citation,
}

impl NodeKind {
    pub const ALL: [NodeKind; 7] = [
        NodeKind::Project,
        NodeKind::Task,
        NodeKind::Knowledge,
        NodeKind::User,
        NodeKind::TaskType,
        NodeKind::Domain,
        NodeKind::Citation,
    ];

    /// Neo4j label (also used verbatim inside Cypher, never user-supplied)
    pub fn label(&self) -> &'static str {
        match self {
            Self::Project => "Project",
            Self::Task => "Task",
            Self::Knowledge => "Knowledge",
            Self::User => "User",
            Self::TaskType => "TaskType",
            Self::Domain => "Domain",
            Self::Citation => "Citation",
        }
    }

    fn id_prefix(&self) -> &'static str {
        match self {
            Self::Project => "proj",
            Self::Task => "task",
            Self::Knowledge => "know",
            Self::User => "user",
            Self::TaskType => "ttyp",
            Self::Domain => "dom",
            Self::Citation => "cite",
        }
    }

    /// Generate a system id such as `proj_3f2a9c1e0b7d4a65`
    pub fn generate_id(&self) -> String {
        let uuid = Uuid::new_v4().simple().to_string();
        format!("{}_{}", self.id_prefix(), &uuid[..16])
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for NodeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|k| k.label().eq_ignore_ascii_case(s))
            .copied()
            .ok_or_else(|| format!("Unknown node kind: {}", s))
    }
}

// ============================================================================
// Relationship types
// ============================================================================

/// Type of a directed edge between two nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationshipType {
    ContainsTask,
    ContainsKnowledge,
    DependsOn,
    AssignedTo,
    Cites,
    RelatedTo,
    HasType,
    BelongsToDomain,
    BelongsToProject,
}

impl RelationshipType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ContainsTask => "CONTAINS_TASK",
            Self::ContainsKnowledge => "CONTAINS_KNOWLEDGE",
            Self::DependsOn => "DEPENDS_ON",
            Self::AssignedTo => "ASSIGNED_TO",
            Self::Cites => "CITES",
            Self::RelatedTo => "RELATED_TO",
            Self::HasType => "HAS_TYPE",
            Self::BelongsToDomain => "BELONGS_TO_DOMAIN",
            Self::BelongsToProject => "BELONGS_TO_PROJECT",
        }
    }
}

impl fmt::Display for RelationshipType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Dependencies
// ============================================================================

/// Flavour of a DEPENDS_ON edge, stored as the `dependencyType` property
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyKind {
    Requires,
    Extends,
    Implements,
    References,
}

impl DependencyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Requires => "requires",
            Self::Extends => "extends",
            Self::Implements => "implements",
            Self::References => "references",
        }
    }
}

impl fmt::Display for DependencyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DependencyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "requires" => Ok(Self::Requires),
            "extends" => Ok(Self::Extends),
            "implements" => Ok(Self::Implements),
            "references" => Ok(Self::References),
            _ => Err(format!("Unknown dependency type: {}", s)),
        }
    }
}

/// Which dependency DAG an edge belongs to. Scopes are never mixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyScope {
    Project,
    Task,
}

impl DependencyScope {
    pub fn node_kind(&self) -> NodeKind {
        match self {
            Self::Project => NodeKind::Project,
            Self::Task => NodeKind::Task,
        }
    }

    pub fn label(&self) -> &'static str {
        self.node_kind().label()
    }
}

impl fmt::Display for DependencyScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Project => f.write_str("project"),
            Self::Task => f.write_str("task"),
        }
    }
}

/// A structured request to add a DEPENDS_ON edge `source -> target`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyRequest {
    pub scope: DependencyScope,
    pub source_id: String,
    pub target_id: String,
    pub kind: DependencyKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl DependencyRequest {
    pub fn new(
        scope: DependencyScope,
        source_id: impl Into<String>,
        target_id: impl Into<String>,
        kind: DependencyKind,
    ) -> Self {
        Self {
            scope,
            source_id: source_id.into(),
            target_id: target_id.into(),
            kind,
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn is_self_loop(&self) -> bool {
        self.source_id == self.target_id
    }
}

// ============================================================================
// Statements and records
// ============================================================================

/// Transaction access mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessMode {
    Read,
    Write,
}

/// Statement parameters: string keys, JSON values (scalars, arrays, nested maps)
pub type Params = Map<String, Value>;

/// A caller-supplied Cypher statement with its parameters
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Statement {
    pub text: String,
    pub params: Params,
}

impl Statement {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            params: Params::new(),
        }
    }

    /// Add a parameter (builder style, mirrors `neo4rs::Query::param`)
    pub fn param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    /// Short, value-free description of the parameters for events and logs.
    ///
    /// Values are never copied into events; only their shape is.
    pub fn param_summary(&self) -> BTreeMap<String, String> {
        self.params
            .iter()
            .map(|(k, v)| (k.clone(), describe_value(v)))
            .collect()
    }
}

fn describe_value(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(_) => "bool".to_string(),
        Value::Number(n) if n.is_f64() => "float".to_string(),
        Value::Number(_) => "int".to_string(),
        Value::String(_) => "string".to_string(),
        Value::Array(items) => format!("list[{}]", items.len()),
        Value::Object(map) => format!("map[{}]", map.len()),
    }
}

/// One result row: column name -> value, in projection order
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(pub Map<String, Value>);

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(column.into(), value.into());
        self
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.0.get(column)
    }

    pub fn get_str(&self, column: &str) -> Option<&str> {
        self.0.get(column).and_then(Value::as_str)
    }

    pub fn columns(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }
}

impl From<Map<String, Value>> for Record {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}
