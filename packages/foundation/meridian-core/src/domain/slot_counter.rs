use uuid::Uuid;

/// Snapshot of a tenant's concurrent-crawl slot usage. The authoritative
/// copy lives in the coordinator (Redis); this is the value returned to
/// callers after an acquire/release/reconcile operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotCounter {
    pub tenant_id: Uuid,
    pub in_use: u32,
    pub max_concurrent: u32,
}

impl SlotCounter {
    pub fn has_capacity(&self) -> bool {
        self.in_use < self.max_concurrent
    }

    pub fn remaining(&self) -> u32 {
        self.max_concurrent.saturating_sub(self.in_use)
    }
}
