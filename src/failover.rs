//! Failover orchestration for generation requests.
//!
//! One provider at a time, never in parallel: up to three attempts with
//! fixed backoff, then cascade to the next provider in the health-ordered
//! sequence. Auth failures skip the retry budget entirely. Every attempt
//! outcome feeds the health tracker.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::RoutingConfig;
use crate::error::{Error, Result};
use crate::health::HealthTracker;
use crate::providers::{GenerationRequest, ProviderId, ProviderRegistry};
use crate::router::{self, RoutedPrompt};

/// Fixed backoff before the second and third attempt against one provider.
const BACKOFF_DELAYS: [Duration; 2] = [Duration::from_millis(500), Duration::from_millis(1000)];

/// Maximum retries per provider (3 total attempts).
const MAX_RETRIES: u32 = 2;

/// A completed generation, as cached and returned to callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub output: String,
    /// Provider that actually served the request; may differ from the
    /// caller's primary after failover.
    pub provider: String,
    pub model_used: String,
    pub tokens_input: u32,
    pub tokens_output: u32,
    pub cost_micro_usd: i64,
    pub cached: bool,
    /// Generation latency of the successful attempt.
    pub latency_ms: u64,
}

/// Error classification seam for the retry loop, so the loop is testable
/// without provider types.
pub(crate) trait AttemptError {
    /// Fatal errors abort the provider immediately; everything else retries
    /// within the attempt budget.
    fn is_fatal(&self) -> bool;
}

impl AttemptError for crate::providers::ProviderError {
    fn is_fatal(&self) -> bool {
        crate::providers::ProviderError::is_fatal(self)
    }
}

/// Run `send` up to `MAX_RETRIES + 1` times with fixed backoff.
///
/// A fatal error returns immediately with no sleep. The final error is
/// returned unchanged so the caller keeps the underlying message.
pub(crate) async fn attempt_with_retries<T, E, F, Fut>(send: F) -> std::result::Result<T, E>
where
    E: AttemptError,
    F: Fn(u32) -> Fut,
    Fut: std::future::Future<Output = std::result::Result<T, E>>,
{
    let mut attempt = 0;
    loop {
        match send(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if err.is_fatal() || attempt >= MAX_RETRIES {
                    return Err(err);
                }
                tokio::time::sleep(BACKOFF_DELAYS[attempt as usize]).await;
                attempt += 1;
            }
        }
    }
}

/// Sequential executor over the provider registry.
pub struct Orchestrator {
    registry: Arc<ProviderRegistry>,
    health: Arc<HealthTracker>,
    rates: RoutingConfig,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        health: Arc<HealthTracker>,
        rates: RoutingConfig,
    ) -> Self {
        Self {
            registry,
            health,
            rates,
        }
    }

    /// Execute a routed prompt, cascading through providers until one
    /// succeeds or the sequence is exhausted.
    ///
    /// With auto-failover disabled the sequence is just the primary;
    /// enabled, it is the health-prioritized ordering starting at the
    /// primary.
    pub async fn execute(
        &self,
        system_prompt: &str,
        routed: &RoutedPrompt,
        primary: ProviderId,
        auto_failover: bool,
    ) -> Result<ExecutionResult> {
        let sequence = if auto_failover {
            self.health.prioritize(primary).await
        } else {
            vec![primary]
        };

        let mut last_error: Option<String> = None;

        for provider_id in sequence {
            tracing::info!(provider = %provider_id, "Starting generation");

            match self.attempt_provider(provider_id, system_prompt, routed).await {
                Ok(result) => return Ok(result),
                Err(message) => {
                    tracing::warn!(
                        provider = %provider_id,
                        error = %message,
                        "Provider exhausted, moving to next if available"
                    );
                    last_error = Some(message);
                }
            }
        }

        tracing::error!("All failover attempts exhausted");
        Err(Error::Exhausted {
            last: last_error.unwrap_or_else(|| "no providers configured".to_string()),
        })
    }

    /// Try one provider to completion: up to three attempts, health recorded
    /// on the final outcome of each success or provider-level failure.
    async fn attempt_provider(
        &self,
        provider_id: ProviderId,
        system_prompt: &str,
        routed: &RoutedPrompt,
    ) -> std::result::Result<ExecutionResult, String> {
        let Some(provider) = self.registry.get(provider_id) else {
            return Err(format!("Provider '{}' is not configured", provider_id));
        };

        let request = GenerationRequest {
            system_prompt,
            prompt: &routed.final_prompt,
            tier: routed.tier,
        };

        let outcome = attempt_with_retries(|attempt| {
            let provider = provider.clone();
            let request = request.clone();
            async move {
                tracing::debug!(
                    provider = %provider_id,
                    attempt = attempt + 1,
                    total = MAX_RETRIES + 1,
                    "Provider attempt"
                );
                let start = std::time::Instant::now();
                provider
                    .generate(&request)
                    .await
                    .map(|generation| (generation, start.elapsed().as_millis() as u64))
            }
        })
        .await;

        match outcome {
            Ok((generation, latency_ms)) => {
                self.health.record_success(provider_id, latency_ms).await;

                // Length/4 approximation when the backend omits usage counts
                let tokens_input = generation
                    .tokens_input
                    .unwrap_or((routed.final_prompt.len() / 4) as u32);
                let tokens_output = generation
                    .tokens_output
                    .unwrap_or((generation.text.len() / 4) as u32);
                let cost_micro_usd =
                    router::cost_micro_usd(routed.tier, tokens_input, tokens_output, &self.rates);

                Ok(ExecutionResult {
                    output: generation.text,
                    provider: provider_id.as_str().to_string(),
                    model_used: generation.model,
                    tokens_input,
                    tokens_output,
                    cost_micro_usd,
                    cached: false,
                    latency_ms,
                })
            }
            Err(err) => {
                self.health.record_failure(provider_id).await;
                if err.is_fatal() {
                    Err(format!(
                        "Authentication error with {}: {}. Invalid API key?",
                        provider_id, err
                    ))
                } else {
                    Err(format!(
                        "{} failed after {} attempts: {}",
                        provider_id,
                        MAX_RETRIES + 1,
                        err
                    ))
                }
            }
        }
    }
}
