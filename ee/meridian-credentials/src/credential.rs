use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A resolved, decrypted provider credential.
///
/// Modeled as a tagged union rather than a free-form field map: each
/// provider's required fields are named so a caller gets a compile error,
/// not a runtime `KeyError`, if it reads the wrong one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "snake_case")]
pub enum Credential {
    OpenAi {
        api_key: String,
    },
    Azure {
        api_key: String,
        endpoint: String,
        deployment: String,
    },
    VLlm {
        base_url: String,
        api_key: Option<String>,
    },
    /// Escape hatch for providers the orchestration core does not need to
    /// understand structurally; fields are resolved (decrypted) but left
    /// untyped.
    Other {
        provider: String,
        fields: HashMap<String, String>,
    },
}

impl Credential {
    pub fn provider_name(&self) -> &str {
        match self {
            Credential::OpenAi { .. } => "openai",
            Credential::Azure { .. } => "azure",
            Credential::VLlm { .. } => "vllm",
            Credential::Other { provider, .. } => provider,
        }
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        match (self, name) {
            (Credential::OpenAi { api_key }, "api_key") => Some(api_key),
            (Credential::Azure { api_key, .. }, "api_key") => Some(api_key),
            (Credential::Azure { endpoint, .. }, "endpoint") => Some(endpoint),
            (Credential::Azure { deployment, .. }, "deployment") => Some(deployment),
            (Credential::VLlm { base_url, .. }, "base_url") => Some(base_url),
            (Credential::VLlm { api_key, .. }, "api_key") => api_key.as_deref(),
            (Credential::Other { fields, .. }, name) => fields.get(name).map(String::as_str),
            _ => None,
        }
    }
}
