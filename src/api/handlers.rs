//! HTTP request handlers.

use axum::{
    extract::rejection::JsonRejection,
    extract::State,
    http::HeaderMap,
    response::IntoResponse,
    Json,
};

use super::server::AppState;
use super::types::{AnalyzeRequest, ExecuteRequest, ExecuteResponse};
use crate::error::Error;
use crate::router;
use crate::storage::stats;

/// Header identifying the caller for rate limiting.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Identifier used when no API key header is present.
const ANONYMOUS_IDENTIFIER: &str = "anonymous";

/// Handle `POST /execute`.
pub async fn execute(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<ExecuteRequest>, JsonRejection>,
) -> Result<Json<ExecuteResponse>, Error> {
    // Malformed payloads are a 400, not axum's default rejection status
    let Json(request) = payload.map_err(|rejection| Error::Validation(rejection.body_text()))?;

    // Rate limit before any dispatch work
    if state.config.rate_limit.enabled {
        let identifier = headers
            .get(API_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or(ANONYMOUS_IDENTIFIER)
            .to_string();

        let allowed = state
            .limiter
            .allow(
                &identifier,
                state.config.rate_limit.limit,
                state.config.rate_limit.window_seconds,
            )
            .await;
        if !allowed {
            return Err(Error::RateLimited { identifier });
        }
    }

    tracing::info!(
        version_id = %request.version_id,
        ab_version_id = ?request.ab_version_id,
        variables = request.variables.len(),
        "Received execute request"
    );

    let outcome = state
        .pipeline
        .execute(&request.into_pipeline_request())
        .await?;

    Ok(Json(ExecuteResponse::from(outcome)))
}

/// Handle `POST /analyze` - heuristic prompt inspection.
pub async fn analyze(Json(request): Json<AnalyzeRequest>) -> impl IntoResponse {
    Json(router::analyze(&request.prompt))
}

/// Handle `GET /health` - liveness plus per-provider health snapshot.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let providers = state.health.snapshot().await;

    Json(serde_json::json!({
        "status": "ok",
        "service": "promptrelay",
        "providers": providers,
    }))
}

/// Handle `GET /providers` - the configured provider set and tier rates.
pub async fn list_providers(State(state): State<AppState>) -> impl IntoResponse {
    let providers: Vec<serde_json::Value> = state
        .config
        .providers
        .iter()
        .map(|p| {
            serde_json::json!({
                "name": p.name,
                "url": p.url,
                "fast_model": p.fast_model,
                "deep_model": p.deep_model,
                "has_api_key": p.api_key.is_some(),
            })
        })
        .collect();

    Json(serde_json::json!({
        "providers": providers,
        "rates_micro_usd_per_token": {
            "fast": {
                "input": state.config.routing.fast_input_rate,
                "output": state.config.routing.fast_output_rate,
            },
            "deep": {
                "input": state.config.routing.deep_input_rate,
                "output": state.config.routing.deep_output_rate,
            },
        },
    }))
}

/// Handle `GET /stats` - cost accounting over the telemetry log.
pub async fn stats_overview(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, Error> {
    let Some(pool) = &state.db else {
        // No database configured: nothing recorded, report zeroes
        return Ok(Json(serde_json::json!({
            "total_requests": 0,
            "cached_hits": 0,
            "total_cost_micro_usd": 0,
            "avg_latency_ms": 0,
            "models": [],
            "top_versions": [],
        })));
    };

    let aggregate = stats::query_aggregate(pool).await?;
    let models = stats::query_by_model(pool).await?;
    let top_versions = stats::query_top_versions(pool, 5).await?;

    Ok(Json(serde_json::json!({
        "total_requests": aggregate.total_requests,
        "cached_hits": aggregate.cached_hits,
        "total_cost_micro_usd": aggregate.total_cost_micro_usd,
        "total_tokens_input": aggregate.total_tokens_input,
        "total_tokens_output": aggregate.total_tokens_output,
        "avg_latency_ms": aggregate.avg_latency_ms,
        "models": models.iter().map(|m| serde_json::json!({
            "model": m.model,
            "total_requests": m.total_requests,
            "total_cost_micro_usd": m.total_cost_micro_usd,
            "avg_latency_ms": m.avg_latency_ms,
        })).collect::<Vec<_>>(),
        "top_versions": top_versions.iter().map(|v| serde_json::json!({
            "version_id": v.version_id,
            "total_cost_micro_usd": v.total_cost_micro_usd,
        })).collect::<Vec<_>>(),
    })))
}
