//! Per-tenant credential resolution.
//!
//! Every provider lookup follows the same rule: if the tenant has stored
//! its own credential for a provider, use it (and never fall back to the
//! platform's own key for that provider); otherwise fall back to the
//! platform-wide credential, if one is configured at all.

mod credential;
mod envelope;
mod postgres;
mod resolver;

pub use credential::Credential;
pub use envelope::{CredentialEnvelope, EnvelopeError};
pub use postgres::PgCredentialSource;
pub use resolver::{CredentialResolver, CredentialSource, FederationConfig, StoredCredential};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("no credential configured for provider '{0}' (tenant has none, and no platform default exists)")]
    NotConfigured(String),
    #[error("tenant {tenant_id} has not configured a credential for provider '{provider}' (strict mode: platform default is never used)")]
    StrictModeNotConfigured { tenant_id: uuid::Uuid, provider: String },
    #[error("required field '{field}' missing on provider '{provider}' credential")]
    MissingField { provider: String, field: String },
    #[error("envelope error: {0}")]
    Envelope(#[from] EnvelopeError),
    #[error("source error: {0}")]
    Source(String),
}
