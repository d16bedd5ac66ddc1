use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A tenant boundary: every job, audit entry, slot counter and credential
/// lookup is scoped to exactly one `Tenant`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tenant {
    pub id: Uuid,
    pub display_name: String,
    pub max_concurrent_crawls: Option<u32>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}
