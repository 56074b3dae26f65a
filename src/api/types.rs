//! Wire types for the HTTP API.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::pipeline::{ExecutionRequest, PipelineOutcome};

/// Body of `POST /execute`.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecuteRequest {
    pub version_id: String,
    #[serde(default)]
    pub ab_version_id: Option<String>,
    #[serde(default)]
    pub variables: HashMap<String, String>,
    /// Object whose top-level keys the output must carry.
    #[serde(default)]
    pub required_schema: Option<serde_json::Map<String, serde_json::Value>>,
}

impl ExecuteRequest {
    /// Convert to the pipeline's request shape. Only the schema's key set
    /// matters; the values are ignored.
    pub fn into_pipeline_request(self) -> ExecutionRequest {
        let required_schema = self
            .required_schema
            .map(|schema| schema.keys().cloned().collect())
            .unwrap_or_default();

        ExecutionRequest {
            version_id: self.version_id,
            ab_version_id: self.ab_version_id,
            variables: self.variables,
            required_schema,
        }
    }
}

/// Body of a successful `POST /execute` response.
#[derive(Debug, Serialize)]
pub struct ExecuteResponse {
    pub success: bool,
    pub data: String,
    pub meta: ExecuteMeta,
}

#[derive(Debug, Serialize)]
pub struct ExecuteMeta {
    pub model: String,
    pub cached: bool,
    pub latency_ms: u64,
    pub tokens_input: u32,
    pub tokens_output: u32,
    pub cost_micro_usd: i64,
    pub served_version: String,
}

impl From<PipelineOutcome> for ExecuteResponse {
    fn from(outcome: PipelineOutcome) -> Self {
        Self {
            success: true,
            data: outcome.result.output,
            meta: ExecuteMeta {
                model: outcome.result.model_used,
                cached: outcome.cached,
                latency_ms: outcome.latency_ms,
                tokens_input: outcome.result.tokens_input,
                tokens_output: outcome.result.tokens_output,
                cost_micro_usd: outcome.result.cost_micro_usd,
                served_version: outcome.served_version,
            },
        }
    }
}

/// Body of `POST /analyze`.
#[derive(Debug, Deserialize)]
pub struct AnalyzeRequest {
    pub prompt: String,
}
