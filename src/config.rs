//! Configuration parsing and validation for promptrelay.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::path::Path;

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: Option<DatabaseConfig>,
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub failover: FailoverConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub guardrail: GuardrailConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on (e.g., "127.0.0.1:8080")
    #[serde(default = "default_listen")]
    pub listen: String,
}

fn default_listen() -> String {
    "127.0.0.1:8080".to_string()
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String {
    "./promptrelay.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// API key wrapper that redacts in Debug/Display/Serialize and zeroizes on drop.
///
/// The inner `SecretString` ensures the key value is never exposed via Debug
/// or Display and is only accessible via `.expose_secret()`, keeping every
/// call site grep-auditable.
#[derive(Clone)]
pub struct ApiKey(SecretString);

impl ApiKey {
    /// Access the raw key value.
    pub fn expose_secret(&self) -> &str {
        self.0.expose_secret()
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl std::fmt::Display for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl Serialize for ApiKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str("[REDACTED]")
    }
}

impl<'de> serde::Deserialize<'de> for ApiKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(|s| ApiKey(SecretString::from(s)))
    }
}

impl From<String> for ApiKey {
    fn from(s: String) -> Self {
        ApiKey(SecretString::from(s))
    }
}

impl From<&str> for ApiKey {
    fn from(s: &str) -> Self {
        ApiKey(SecretString::from(s))
    }
}

/// How a provider's API key was resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum KeySource {
    /// Key was a literal string in config (no ${} references)
    Literal,
    /// Key contained ${VAR} references expanded from environment
    EnvExpanded,
    /// Key was auto-discovered from convention env var (holds var name)
    Convention(String),
    /// No key available
    None,
}

impl std::fmt::Display for KeySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeySource::Literal => write!(f, "config-literal"),
            KeySource::EnvExpanded => write!(f, "env-expanded"),
            KeySource::Convention(var) => write!(f, "convention ({})", var),
            KeySource::None => write!(f, "none"),
        }
    }
}

/// Provider configuration. `name` must be one of the implemented backends.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    /// Provider identifier ("gemini" or "nvidia")
    pub name: String,
    /// Base URL for the provider's API
    pub url: String,
    /// Optional API key
    pub api_key: Option<ApiKey>,
    /// Model served for the fast tier; empty means the backend default
    #[serde(default)]
    pub fast_model: Option<String>,
    /// Model served for the deep tier; empty means the backend default
    #[serde(default)]
    pub deep_model: Option<String>,
}

/// Tier routing and cost-accounting configuration.
///
/// Rates are micro-USD per token. Deep-tier rates are materially higher
/// than fast-tier rates so tier selection has a visible cost consequence.
#[derive(Debug, Clone, Deserialize)]
pub struct RoutingConfig {
    #[serde(default = "default_fast_input_rate")]
    pub fast_input_rate: f64,
    #[serde(default = "default_fast_output_rate")]
    pub fast_output_rate: f64,
    #[serde(default = "default_deep_input_rate")]
    pub deep_input_rate: f64,
    #[serde(default = "default_deep_output_rate")]
    pub deep_output_rate: f64,
}

fn default_fast_input_rate() -> f64 {
    0.075
}

fn default_fast_output_rate() -> f64 {
    0.30
}

fn default_deep_input_rate() -> f64 {
    1.25
}

fn default_deep_output_rate() -> f64 {
    5.0
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            fast_input_rate: default_fast_input_rate(),
            fast_output_rate: default_fast_output_rate(),
            deep_input_rate: default_deep_input_rate(),
            deep_output_rate: default_deep_output_rate(),
        }
    }
}

/// Failover configuration: which provider leads, and whether the sequence
/// extends past it.
#[derive(Debug, Clone, Deserialize)]
pub struct FailoverConfig {
    #[serde(default = "default_primary")]
    pub primary: String,
    #[serde(default = "default_true")]
    pub auto: bool,
}

fn default_primary() -> String {
    "gemini".to_string()
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            primary: default_primary(),
            auto: true,
        }
    }
}

/// Result cache configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Entry lifetime in seconds
    #[serde(default = "default_cache_ttl")]
    pub ttl_seconds: u64,
    /// Maximum number of cached results
    #[serde(default = "default_cache_capacity")]
    pub capacity: u64,
}

fn default_cache_ttl() -> u64 {
    3600
}

fn default_cache_capacity() -> u64 {
    10_000
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_seconds: default_cache_ttl(),
            capacity: default_cache_capacity(),
        }
    }
}

/// Fixed-window rate limit configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_rate_limit")]
    pub limit: u64,
    #[serde(default = "default_rate_window")]
    pub window_seconds: u64,
}

fn default_rate_limit() -> u64 {
    60
}

fn default_rate_window() -> u64 {
    60
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            limit: default_rate_limit(),
            window_seconds: default_rate_window(),
        }
    }
}

/// Guardrail configuration: terms blocked in request variables.
#[derive(Debug, Clone, Deserialize)]
pub struct GuardrailConfig {
    #[serde(default = "default_blocked_terms")]
    pub blocked_terms: Vec<String>,
}

fn default_blocked_terms() -> Vec<String> {
    ["fuck", "shit", "bitch", "asshole"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for GuardrailConfig {
    fn default() -> Self {
        Self {
            blocked_terms: default_blocked_terms(),
        }
    }
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Parse configuration from a TOML string.
    pub fn parse_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.providers.is_empty() {
            tracing::warn!("No providers configured - gateway will reject all requests");
        }

        for provider in &self.providers {
            if crate::providers::ProviderId::parse(&provider.name).is_none() {
                return Err(ConfigError::Validation(format!(
                    "Unknown provider '{}' (implemented: {})",
                    provider.name,
                    crate::providers::ProviderId::ALL
                        .iter()
                        .map(|id| id.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                )));
            }
            if provider.url.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "Provider '{}' has empty URL",
                    provider.name
                )));
            }
        }

        if crate::providers::ProviderId::parse(&self.failover.primary).is_none() {
            return Err(ConfigError::Validation(format!(
                "Unknown primary provider '{}'",
                self.failover.primary
            )));
        }

        if self.rate_limit.window_seconds == 0 {
            return Err(ConfigError::Validation(
                "rate_limit.window_seconds must be non-zero".to_string(),
            ));
        }

        Ok(())
    }

    /// Get database config with defaults.
    pub fn database(&self) -> DatabaseConfig {
        self.database.clone().unwrap_or_default()
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("Environment variable '{var}' not set for provider '{provider}': {message}")]
    EnvVar {
        var: String,
        provider: String,
        message: String,
    },
}

/// Raw provider config deserialized directly from TOML.
/// api_key is `Option<String>` so it may contain `${VAR}` references not yet expanded.
#[derive(Deserialize)]
pub struct RawProviderConfig {
    name: String,
    url: String,
    api_key: Option<String>,
    #[serde(default)]
    fast_model: Option<String>,
    #[serde(default)]
    deep_model: Option<String>,
}

/// Raw configuration deserialized directly from TOML.
#[derive(Deserialize)]
pub struct RawConfig {
    server: ServerConfig,
    database: Option<DatabaseConfig>,
    #[serde(default)]
    providers: Vec<RawProviderConfig>,
    #[serde(default)]
    routing: RoutingConfig,
    #[serde(default)]
    failover: FailoverConfig,
    #[serde(default)]
    cache: CacheConfig,
    #[serde(default)]
    rate_limit: RateLimitConfig,
    #[serde(default)]
    guardrail: GuardrailConfig,
}

/// Expand all `${VAR}` references in a string using a custom lookup function.
///
/// The closure-based design makes this testable without touching global env
/// state. Supports multiple `${VAR}` in one string. Fails on first missing
/// variable, unclosed `${`, or empty variable name.
fn expand_env_vars_with<F>(
    input: &str,
    provider_name: &str,
    lookup: F,
) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if !input.contains("${") {
        return Ok(input.to_string());
    }

    let mut result = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];

        let end = after.find('}').ok_or_else(|| ConfigError::EnvVar {
            var: "<unclosed>".to_string(),
            provider: provider_name.to_string(),
            message: format!("Unclosed '${{' in config value: {}", input),
        })?;

        let var_name = &after[..end];
        if var_name.is_empty() {
            return Err(ConfigError::EnvVar {
                var: "".to_string(),
                provider: provider_name.to_string(),
                message: "Empty variable name in '${}' reference".to_string(),
            });
        }

        let value = lookup(var_name).ok_or_else(|| ConfigError::EnvVar {
            var: var_name.to_string(),
            provider: provider_name.to_string(),
            message: format!(
                "Environment variable '{}' is not set (referenced in provider '{}')",
                var_name, provider_name
            ),
        })?;

        result.push_str(&value);
        rest = &after[end + 1..];
    }

    result.push_str(rest);
    Ok(result)
}

/// Expand all `${VAR}` references in a string using real environment variables.
fn expand_env_vars(input: &str, provider_name: &str) -> Result<String, ConfigError> {
    expand_env_vars_with(input, provider_name, |name| std::env::var(name).ok())
}

/// Derive the convention-based env var name for a provider:
/// `PROMPTRELAY_<UPPER_SNAKE_NAME>_API_KEY`.
pub fn convention_env_var_name(provider_name: &str) -> String {
    let upper_snake = provider_name.to_uppercase().replace(['-', ' '], "_");
    format!("PROMPTRELAY_{}_API_KEY", upper_snake)
}

/// Try convention-based env var lookup for a provider's API key.
fn convention_key_lookup(provider_name: &str) -> Option<(String, String)> {
    let var_name = convention_env_var_name(provider_name);
    std::env::var(&var_name).ok().map(|value| (var_name, value))
}

impl Config {
    /// Convert raw (deserialized) config to final config with env var expansion.
    ///
    /// For each provider:
    /// - If `api_key` contains `${VAR}`: expand from environment, source = `EnvExpanded`
    /// - If `api_key` is a literal string: wrap directly, source = `Literal`
    /// - If `api_key` is absent: try convention lookup
    ///   (`PROMPTRELAY_<NAME>_API_KEY`), source = `Convention(var)` or `None`
    pub fn from_raw(raw: RawConfig) -> Result<(Self, Vec<(String, KeySource)>), ConfigError> {
        let mut providers = Vec::with_capacity(raw.providers.len());
        let mut key_sources = Vec::with_capacity(raw.providers.len());

        for rp in raw.providers {
            let (api_key, source) = match rp.api_key {
                Some(ref raw_key) if raw_key.contains("${") => {
                    let expanded = expand_env_vars(raw_key, &rp.name)?;
                    (Some(ApiKey::from(expanded)), KeySource::EnvExpanded)
                }
                Some(ref raw_key) => (Some(ApiKey::from(raw_key.as_str())), KeySource::Literal),
                None => match convention_key_lookup(&rp.name) {
                    Some((var_name, value)) => {
                        (Some(ApiKey::from(value)), KeySource::Convention(var_name))
                    }
                    None => (None, KeySource::None),
                },
            };

            key_sources.push((rp.name.clone(), source));

            providers.push(ProviderConfig {
                name: rp.name,
                url: rp.url,
                api_key,
                fast_model: rp.fast_model,
                deep_model: rp.deep_model,
            });
        }

        let config = Config {
            server: raw.server,
            database: raw.database,
            providers,
            routing: raw.routing,
            failover: raw.failover,
            cache: raw.cache,
            rate_limit: raw.rate_limit,
            guardrail: raw.guardrail,
        };

        Ok((config, key_sources))
    }

    /// Load configuration from a TOML file with environment variable expansion.
    ///
    /// Returns the config and per-provider key source information.
    pub fn from_file_with_env(
        path: impl AsRef<Path>,
    ) -> Result<(Self, Vec<(String, KeySource)>), ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io {
            path: path.as_ref().display().to_string(),
            source: e,
        })?;

        let raw: RawConfig = toml::from_str(&content).map_err(ConfigError::Parse)?;
        let (config, key_sources) = Self::from_raw(raw)?;
        config.validate()?;

        Ok((config, key_sources))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_config() {
        let toml = r#"
            [server]
            listen = "127.0.0.1:9000"
        "#;

        let config = Config::parse_str(toml).unwrap();
        assert_eq!(config.server.listen, "127.0.0.1:9000");
        assert!(config.providers.is_empty());
        // Section defaults apply
        assert!(config.cache.enabled);
        assert_eq!(config.cache.ttl_seconds, 3600);
        assert_eq!(config.rate_limit.limit, 60);
        assert_eq!(config.failover.primary, "gemini");
        assert!(config.failover.auto);
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
            [server]
            listen = "0.0.0.0:8080"

            [database]
            path = "./test.db"

            [[providers]]
            name = "gemini"
            url = "https://generativelanguage.googleapis.com"
            fast_model = "gemini-2.5-flash"
            deep_model = "gemini-2.0-pro-exp-02-05"

            [[providers]]
            name = "nvidia"
            url = "https://integrate.api.nvidia.com/v1"

            [routing]
            fast_input_rate = 0.1
            deep_output_rate = 9.0

            [failover]
            primary = "nvidia"
            auto = false

            [cache]
            ttl_seconds = 120

            [rate_limit]
            limit = 5
            window_seconds = 60

            [guardrail]
            blocked_terms = ["badword"]
        "#;

        let config = Config::parse_str(toml).unwrap();
        assert_eq!(config.providers.len(), 2);
        assert_eq!(config.providers[0].name, "gemini");
        assert_eq!(
            config.providers[0].fast_model.as_deref(),
            Some("gemini-2.5-flash")
        );
        assert_eq!(config.routing.fast_input_rate, 0.1);
        assert_eq!(config.routing.deep_output_rate, 9.0);
        assert_eq!(config.failover.primary, "nvidia");
        assert!(!config.failover.auto);
        assert_eq!(config.cache.ttl_seconds, 120);
        assert_eq!(config.rate_limit.limit, 5);
        assert_eq!(config.guardrail.blocked_terms, vec!["badword"]);
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let toml = r#"
            [server]
            listen = "127.0.0.1:9000"

            [[providers]]
            name = "openrouter"
            url = "https://example.com/v1"
        "#;

        let result = Config::parse_str(toml);
        assert!(result.is_err());
        let err = result.unwrap_err().to_string();
        assert!(err.contains("openrouter"), "Error should name the provider");
        assert!(err.contains("gemini"), "Error should list implemented set");
    }

    #[test]
    fn test_unknown_primary_rejected() {
        let toml = r#"
            [server]
            listen = "127.0.0.1:9000"

            [failover]
            primary = "acme"
        "#;

        assert!(Config::parse_str(toml).is_err());
    }

    #[test]
    fn test_zero_rate_window_rejected() {
        let toml = r#"
            [server]
            listen = "127.0.0.1:9000"

            [rate_limit]
            window_seconds = 0
        "#;

        assert!(Config::parse_str(toml).is_err());
    }

    #[test]
    fn test_api_key_debug_redaction() {
        let key = ApiKey::from("super-secret-provider-token");
        let debug_output = format!("{:?}", key);
        assert_eq!(debug_output, "[REDACTED]");
        assert!(!debug_output.contains("super-secret"));
    }

    #[test]
    fn test_api_key_serialize_redaction() {
        let key = ApiKey::from("real-secret-value");
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, "\"[REDACTED]\"");
        assert!(!json.contains("real-secret"));
    }

    #[test]
    fn test_provider_config_debug_redaction() {
        let config = ProviderConfig {
            name: "gemini".to_string(),
            url: "https://example.com/v1".to_string(),
            api_key: Some(ApiKey::from("sk-abcd1234secret")),
            fast_model: None,
            deep_model: None,
        };
        let debug_output = format!("{:?}", config);
        assert!(debug_output.contains("[REDACTED]"));
        assert!(!debug_output.contains("sk-abcd1234secret"));
    }

    // ── Expansion tests (using expand_env_vars_with, no global env state) ──

    #[test]
    fn test_expand_single_var() {
        let lookup = |name: &str| match name {
            "MY_KEY" => Some("sk-resolved".to_string()),
            _ => None,
        };
        let result = expand_env_vars_with("${MY_KEY}", "gemini", lookup).unwrap();
        assert_eq!(result, "sk-resolved");
    }

    #[test]
    fn test_expand_mixed_literal_and_var() {
        let lookup = |name: &str| match name {
            "KEY" => Some("resolved".to_string()),
            _ => None,
        };
        let result = expand_env_vars_with("prefix-${KEY}-suffix", "gemini", lookup).unwrap();
        assert_eq!(result, "prefix-resolved-suffix");
    }

    #[test]
    fn test_expand_missing_var_fails() {
        let lookup = |_: &str| None;
        let result = expand_env_vars_with("${MISSING}", "nvidia", lookup);
        assert!(result.is_err());
        let err = result.unwrap_err().to_string();
        assert!(err.contains("MISSING"), "Error should name the variable");
        assert!(err.contains("nvidia"), "Error should name the provider");
    }

    #[test]
    fn test_expand_unclosed_brace_fails() {
        let lookup = |_: &str| -> Option<String> { panic!("should not be called") };
        let result = expand_env_vars_with("${UNCLOSED", "gemini", lookup);
        assert!(result.is_err());
    }

    #[test]
    fn test_expand_dollar_without_brace_passthrough() {
        let lookup = |_: &str| -> Option<String> { panic!("should not be called") };
        let result = expand_env_vars_with("$NOT_A_VAR", "gemini", lookup).unwrap();
        assert_eq!(result, "$NOT_A_VAR");
    }

    #[test]
    fn test_convention_env_var_name() {
        assert_eq!(
            convention_env_var_name("gemini"),
            "PROMPTRELAY_GEMINI_API_KEY"
        );
        assert_eq!(
            convention_env_var_name("nvidia"),
            "PROMPTRELAY_NVIDIA_API_KEY"
        );
    }

    /// Helper to construct a minimal RawConfig with a single provider.
    fn make_raw_config(provider_name: &str, api_key: Option<String>) -> RawConfig {
        RawConfig {
            server: ServerConfig {
                listen: "127.0.0.1:9000".to_string(),
            },
            database: None,
            providers: vec![RawProviderConfig {
                name: provider_name.to_string(),
                url: "https://example.com/v1".to_string(),
                api_key,
                fast_model: None,
                deep_model: None,
            }],
            routing: RoutingConfig::default(),
            failover: FailoverConfig::default(),
            cache: CacheConfig::default(),
            rate_limit: RateLimitConfig::default(),
            guardrail: GuardrailConfig::default(),
        }
    }

    #[test]
    fn test_from_raw_literal_key() {
        let raw = make_raw_config("gemini", Some("literal-key-value".to_string()));
        let (config, key_sources) = Config::from_raw(raw).unwrap();

        assert_eq!(key_sources.len(), 1);
        assert_eq!(key_sources[0].1, KeySource::Literal);
        assert_eq!(
            config.providers[0]
                .api_key
                .as_ref()
                .unwrap()
                .expose_secret(),
            "literal-key-value"
        );
    }

    #[test]
    fn test_from_raw_env_expanded_key() {
        // Use a unique env var name to avoid parallel test interference
        let var_name = "PR_TEST_EXPAND_KEY";
        let var_value = "sk-expanded-token-abc123";
        unsafe { std::env::set_var(var_name, var_value) };

        let raw = make_raw_config("gemini", Some(format!("${{{}}}", var_name)));
        let (config, key_sources) = Config::from_raw(raw).unwrap();

        assert_eq!(key_sources[0].1, KeySource::EnvExpanded);
        assert_eq!(
            config.providers[0]
                .api_key
                .as_ref()
                .unwrap()
                .expose_secret(),
            var_value
        );

        unsafe { std::env::remove_var(var_name) };
    }

    #[test]
    fn test_from_raw_no_key() {
        // Use a provider name whose convention var is certainly unset
        let provider_name = "nvidia-test-nokey";
        let var_name = convention_env_var_name(provider_name);
        unsafe { std::env::remove_var(&var_name) };

        let raw = make_raw_config(provider_name, None);
        let (config, key_sources) = Config::from_raw(raw).unwrap();

        assert_eq!(key_sources[0].1, KeySource::None);
        assert!(config.providers[0].api_key.is_none());
    }
}
