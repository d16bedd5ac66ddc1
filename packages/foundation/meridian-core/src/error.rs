use thiserror::Error;

/// Error kinds shared by every component in the orchestration core.
///
/// Component crates define their own narrower error enums (`CapacityError`,
/// `WatchdogError`, ...) and convert into this one at crate boundaries where
/// a caller only needs the coarse-grained category.
#[derive(Debug, Error)]
pub enum MeridianError {
    #[error("tenant {0} not found")]
    TenantNotFound(uuid::Uuid),

    #[error("job {0} not found")]
    JobNotFound(uuid::Uuid),

    #[error("concurrent modification: expected version/status did not match")]
    ConcurrencyConflict,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Backend-agnostic storage failure. Concrete crates (`meridian-jobs`,
/// `meridian-capacity`) wrap their `sqlx`/`redis` errors into this before
/// they cross into shared code paths.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(String),

    #[error("coordinator (redis) error: {0}")]
    Coordinator(String),

    #[error("record not found")]
    NotFound,
}
