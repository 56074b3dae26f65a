//! The execution pipeline boundary.
//!
//! Ties the stages together for one request: shape validation, A/B variant
//! resolution, guardrail screening, exact-match caching around the failover
//! orchestrator, output schema validation, and detached telemetry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use sqlx::SqlitePool;

use crate::background::BackgroundQueue;
use crate::cache::{self, CacheLayer};
use crate::error::{Error, Result};
use crate::failover::{ExecutionResult, Orchestrator};
use crate::guardrail;
use crate::providers::ProviderId;
use crate::router;
use crate::storage::{submit_record_write, ExecutionRecord, PromptStore};

/// Upper bound on variables per request.
const MAX_VARIABLES: usize = 64;

/// Upper bound on id lengths.
const MAX_ID_LENGTH: usize = 128;

/// A validated execution request.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub version_id: String,
    pub ab_version_id: Option<String>,
    pub variables: HashMap<String, String>,
    /// Top-level keys the output must carry; empty means no check.
    pub required_schema: Vec<String>,
}

/// Result of a pipeline run.
#[derive(Debug)]
pub struct PipelineOutcome {
    pub result: ExecutionResult,
    /// The version actually served (the A/B winner when a variant was given).
    pub served_version: String,
    pub cached: bool,
    /// Wall-clock latency of the whole pipeline run.
    pub latency_ms: u64,
}

pub struct Pipeline {
    store: Arc<dyn PromptStore>,
    cache: CacheLayer,
    orchestrator: Orchestrator,
    telemetry: Option<SqlitePool>,
    background: Arc<BackgroundQueue>,
    blocked_terms: Vec<String>,
    cache_ttl: Duration,
    primary: ProviderId,
    auto_failover: bool,
}

impl Pipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn PromptStore>,
        cache: CacheLayer,
        orchestrator: Orchestrator,
        telemetry: Option<SqlitePool>,
        background: Arc<BackgroundQueue>,
        blocked_terms: Vec<String>,
        cache_ttl: Duration,
        primary: ProviderId,
        auto_failover: bool,
    ) -> Self {
        Self {
            store,
            cache,
            orchestrator,
            telemetry,
            background,
            blocked_terms,
            cache_ttl,
            primary,
            auto_failover,
        }
    }

    /// Run one request through the full pipeline.
    pub async fn execute(&self, request: &ExecutionRequest) -> Result<PipelineOutcome> {
        let start = std::time::Instant::now();

        validate_request(request)?;

        // Unweighted per-request coin flip; a caller repeating the same
        // request can be served either variant.
        let served_version = resolve_active_version(
            &request.version_id,
            request.ab_version_id.as_deref(),
            rand::random::<bool>(),
        )
        .to_string();

        // Guardrail runs before any cache lookup or provider contact
        let joined = concat_variable_values(&request.variables);
        let verdict = guardrail::check(&joined, &self.blocked_terms);
        if !verdict.passed {
            return Err(Error::Guardrail {
                reason: verdict
                    .reason
                    .unwrap_or_else(|| "Input rejected.".to_string()),
            });
        }

        let definition = self
            .store
            .fetch(&served_version)
            .await?
            .ok_or_else(|| Error::VersionNotFound {
                id: served_version.clone(),
            })?;

        let key = cache::cache_key(&served_version, &request.variables);

        let outcome = self
            .cache
            .with_cache(&key, self.cache_ttl, || async {
                let routed = router::select(
                    &definition.system_prompt,
                    &definition.template,
                    &request.variables,
                );
                self.orchestrator
                    .execute(
                        &definition.system_prompt,
                        &routed,
                        self.primary,
                        self.auto_failover,
                    )
                    .await
            })
            .await?;

        let cached = outcome.cached;
        let mut result = outcome.value;
        result.cached = cached;

        // The detached cache write was already scheduled on a miss, so a
        // result rejected here can still be served from cache by a later
        // identical request.
        if !request.required_schema.is_empty()
            && !guardrail::validate_schema(&result.output, &request.required_schema)
        {
            return Err(Error::Schema {
                reason: "output is not a JSON object carrying the required keys".to_string(),
            });
        }

        let latency_ms = start.elapsed().as_millis() as u64;

        if let Some(pool) = &self.telemetry {
            submit_record_write(
                &self.background,
                pool,
                ExecutionRecord {
                    request_id: uuid::Uuid::new_v4().to_string(),
                    timestamp: chrono::Utc::now().to_rfc3339(),
                    version_id: served_version.clone(),
                    provider: result.provider.clone(),
                    model: result.model_used.clone(),
                    cached,
                    latency_ms: latency_ms as i64,
                    tokens_input: result.tokens_input as i64,
                    tokens_output: result.tokens_output as i64,
                    cost_micro_usd: result.cost_micro_usd,
                },
            );
        }

        Ok(PipelineOutcome {
            result,
            served_version,
            cached,
            latency_ms,
        })
    }
}

/// Reject malformed requests before touching any collaborator.
fn validate_request(request: &ExecutionRequest) -> Result<()> {
    if request.version_id.trim().is_empty() {
        return Err(Error::Validation("version_id must not be empty".into()));
    }
    if request.version_id.len() > MAX_ID_LENGTH {
        return Err(Error::Validation("version_id is too long".into()));
    }
    if let Some(ab) = &request.ab_version_id {
        if ab.trim().is_empty() {
            return Err(Error::Validation(
                "ab_version_id must not be empty when present".into(),
            ));
        }
        if ab.len() > MAX_ID_LENGTH {
            return Err(Error::Validation("ab_version_id is too long".into()));
        }
    }
    if request.variables.len() > MAX_VARIABLES {
        return Err(Error::Validation(format!(
            "too many variables (max {})",
            MAX_VARIABLES
        )));
    }
    Ok(())
}

/// Pick the version to serve. Split out so both coin-flip outcomes are
/// covered by tests.
fn resolve_active_version<'a>(
    version_id: &'a str,
    ab_version_id: Option<&'a str>,
    flip: bool,
) -> &'a str {
    match ab_version_id {
        Some(ab) if flip => ab,
        _ => version_id,
    }
}

fn concat_variable_values(variables: &HashMap<String, String>) -> String {
    variables
        .values()
        .map(|v| v.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}
