//! Model-serving backends behind a single interface.
//!
//! The provider set is closed: each backend is one implementation of
//! [`Provider`], registered in [`ProviderRegistry::from_config`]. Adding a
//! backend means adding a variant and one registry arm, not new dispatch
//! logic.

mod gemini;
mod nvidia;

pub use gemini::GeminiProvider;
pub use nvidia::NvidiaProvider;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::ProviderConfig;
use crate::router::Tier;

/// Per-call timeout enforced on every provider request.
pub const PROVIDER_TIMEOUT: Duration = Duration::from_secs(15);

/// Identifier of an implemented backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderId {
    Gemini,
    Nvidia,
}

impl ProviderId {
    pub const ALL: [ProviderId; 2] = [ProviderId::Gemini, ProviderId::Nvidia];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::Gemini => "gemini",
            ProviderId::Nvidia => "nvidia",
        }
    }

    /// Parse a provider name (case-insensitive). Unknown names return None.
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "gemini" => Some(ProviderId::Gemini),
            "nvidia" => Some(ProviderId::Nvidia),
            _ => None,
        }
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the orchestrator asks a backend to run.
#[derive(Debug, Clone)]
pub struct GenerationRequest<'a> {
    pub system_prompt: &'a str,
    pub prompt: &'a str,
    pub tier: Tier,
}

/// Raw output of a single successful provider call.
#[derive(Debug, Clone)]
pub struct Generation {
    pub text: String,
    /// Model identifier the backend actually served.
    pub model: String,
    pub tokens_input: Option<u32>,
    pub tokens_output: Option<u32>,
}

/// Error from a single provider attempt.
///
/// Auth and missing-credential failures are fatal for that provider: retries
/// cannot fix them, so the orchestrator cascades immediately. Everything
/// else is retryable within the attempt budget.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("authentication rejected (HTTP {status})")]
    Auth { status: u16 },

    #[error("no API key configured")]
    MissingCredentials,

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("request timed out after {}s", PROVIDER_TIMEOUT.as_secs())]
    Timeout,

    #[error("network error: {0}")]
    Network(String),

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl ProviderError {
    /// Fatal errors abort the provider without retry.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ProviderError::Auth { .. } | ProviderError::MissingCredentials
        )
    }

    /// Classify a non-success HTTP status.
    pub fn from_status(status: u16, message: String) -> Self {
        match status {
            401 | 403 => ProviderError::Auth { status },
            _ => ProviderError::Http { status, message },
        }
    }

    /// Classify a transport-level reqwest error.
    pub fn from_transport(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout
        } else {
            ProviderError::Network(err.to_string())
        }
    }
}

/// A model-serving backend.
#[async_trait]
pub trait Provider: Send + Sync {
    fn id(&self) -> ProviderId;

    /// Execute one generation attempt. Exactly one upstream call; no
    /// internal retries.
    async fn generate(&self, request: &GenerationRequest<'_>)
        -> Result<Generation, ProviderError>;
}

/// Static table of constructed backends keyed by identifier.
pub struct ProviderRegistry {
    providers: Vec<(ProviderId, Arc<dyn Provider>)>,
}

impl ProviderRegistry {
    /// Build the registry from config. Config validation has already
    /// rejected unknown names, so unmatched entries are skipped with a
    /// warning rather than an error.
    pub fn from_config(configs: &[ProviderConfig], client: reqwest::Client) -> Self {
        let mut providers: Vec<(ProviderId, Arc<dyn Provider>)> = Vec::new();

        for cfg in configs {
            match ProviderId::parse(&cfg.name) {
                Some(ProviderId::Gemini) => {
                    providers.push((
                        ProviderId::Gemini,
                        Arc::new(GeminiProvider::new(cfg, client.clone())),
                    ));
                }
                Some(ProviderId::Nvidia) => {
                    providers.push((
                        ProviderId::Nvidia,
                        Arc::new(NvidiaProvider::new(cfg, client.clone())),
                    ));
                }
                None => {
                    tracing::warn!(provider = %cfg.name, "Skipping unknown provider");
                }
            }
        }

        Self { providers }
    }

    pub fn get(&self, id: ProviderId) -> Option<Arc<dyn Provider>> {
        self.providers
            .iter()
            .find(|(pid, _)| *pid == id)
            .map(|(_, p)| p.clone())
    }

    /// Registered provider ids in config order.
    pub fn ids(&self) -> Vec<ProviderId> {
        self.providers.iter().map(|(id, _)| *id).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_id_parse() {
        assert_eq!(ProviderId::parse("gemini"), Some(ProviderId::Gemini));
        assert_eq!(ProviderId::parse("NVIDIA"), Some(ProviderId::Nvidia));
        assert_eq!(ProviderId::parse("openai"), None);
    }

    #[test]
    fn test_error_classification_auth_is_fatal() {
        assert!(ProviderError::from_status(401, "unauthorized".into()).is_fatal());
        assert!(ProviderError::from_status(403, "forbidden".into()).is_fatal());
        assert!(ProviderError::MissingCredentials.is_fatal());
    }

    #[test]
    fn test_error_classification_retryable() {
        assert!(!ProviderError::from_status(429, "rate limited".into()).is_fatal());
        assert!(!ProviderError::from_status(500, "server error".into()).is_fatal());
        assert!(!ProviderError::from_status(503, "overloaded".into()).is_fatal());
        assert!(!ProviderError::Timeout.is_fatal());
        assert!(!ProviderError::Network("reset".into()).is_fatal());
        assert!(!ProviderError::Malformed("empty".into()).is_fatal());
    }

    #[test]
    fn test_registry_preserves_config_order() {
        let configs = vec![
            crate::config::ProviderConfig {
                name: "nvidia".into(),
                url: "https://example.com/v1".into(),
                api_key: None,
                fast_model: None,
                deep_model: None,
            },
            crate::config::ProviderConfig {
                name: "gemini".into(),
                url: "https://example.com".into(),
                api_key: None,
                fast_model: None,
                deep_model: None,
            },
        ];
        let registry = ProviderRegistry::from_config(&configs, reqwest::Client::new());
        assert_eq!(registry.ids(), vec![ProviderId::Nvidia, ProviderId::Gemini]);
        assert!(registry.get(ProviderId::Gemini).is_some());
    }

    #[test]
    fn test_registry_skips_unknown_names() {
        let configs = vec![crate::config::ProviderConfig {
            name: "acme".into(),
            url: "https://example.com".into(),
            api_key: None,
            fast_model: None,
            deep_model: None,
        }];
        let registry = ProviderRegistry::from_config(&configs, reqwest::Client::new());
        assert!(registry.is_empty());
    }
}
