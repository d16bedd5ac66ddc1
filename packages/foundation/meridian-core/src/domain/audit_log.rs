use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// A single metadata value attached to an audit log entry.
///
/// Mirrors the handful of concrete JSON-compatible shapes audit metadata is
/// allowed to take, instead of an open-ended `serde_json::Value`, so a
/// single serializer can format every field consistently for both CSV and
/// JSONL export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    String(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
    Timestamp(DateTime<Utc>),
    Null,
}

impl std::fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetadataValue::String(s) => f.write_str(s),
            MetadataValue::Integer(i) => write!(f, "{i}"),
            MetadataValue::Float(v) => write!(f, "{v}"),
            MetadataValue::Bool(b) => write!(f, "{b}"),
            MetadataValue::Timestamp(t) => write!(f, "{}", t.to_rfc3339()),
            MetadataValue::Null => Ok(()),
        }
    }
}

/// One audit log row. Column order on export (CSV/JSONL) is `Timestamp,
/// Actor ID, Actor Type, Action, Entity Type, Entity ID, Description,
/// Outcome, Error Message, Metadata`; `category` is carried for
/// audit-config resolution (action > category > tenant) but is not itself
/// an exported column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub actor: String,
    pub actor_type: String,
    pub action: String,
    pub category: String,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub description: String,
    pub outcome: String,
    pub error_message: Option<String>,
    pub metadata: HashMap<String, MetadataValue>,
    pub created_at: DateTime<Utc>,
}
