use uuid::Uuid;

/// A retention override. `tenant_id: None` marks a global default; an entry
/// with `tenant_id: Some(_)` wins over the global default for that tenant,
/// per entity kind. Resolution is a COALESCE: tenant override, else global
/// default, else the hard-coded fallback in `MeridianSettings`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub tenant_id: Option<Uuid>,
    pub entity_kind: String,
    pub retention_days: i64,
}

impl RetentionPolicy {
    pub fn applies_to(&self, tenant_id: Uuid, entity_kind: &str) -> bool {
        self.entity_kind == entity_kind
            && self.tenant_id.is_none_or(|id| id == tenant_id)
    }
}
