//! Aggregate cost and usage queries for the stats endpoint.

use sqlx::SqlitePool;

/// Overall execution statistics.
///
/// `TOTAL()` is used for nullable numeric columns (returns 0.0 instead of
/// NULL) and `COALESCE(AVG(), 0)` for latency, so rows are always non-null.
#[derive(Debug, sqlx::FromRow)]
pub struct AggregateRow {
    pub total_requests: i64,
    pub cached_hits: i64,
    pub total_cost_micro_usd: f64,
    pub total_tokens_input: f64,
    pub total_tokens_output: f64,
    pub avg_latency_ms: f64,
}

/// Per-model execution statistics.
#[derive(Debug, sqlx::FromRow)]
pub struct ModelRow {
    pub model: String,
    pub total_requests: i64,
    pub total_cost_micro_usd: f64,
    pub avg_latency_ms: f64,
}

/// Cost attributed to a single prompt version.
#[derive(Debug, sqlx::FromRow)]
pub struct VersionCostRow {
    pub version_id: String,
    pub total_cost_micro_usd: f64,
}

/// Query overall aggregates across all recorded executions.
pub async fn query_aggregate(pool: &SqlitePool) -> Result<AggregateRow, sqlx::Error> {
    sqlx::query_as::<_, AggregateRow>(
        "SELECT \
         COUNT(*) as total_requests, \
         COUNT(CASE WHEN cached = 1 THEN 1 END) as cached_hits, \
         TOTAL(cost_micro_usd) as total_cost_micro_usd, \
         TOTAL(tokens_input) as total_tokens_input, \
         TOTAL(tokens_output) as total_tokens_output, \
         COALESCE(AVG(latency_ms), 0.0) as avg_latency_ms \
         FROM execution_logs",
    )
    .fetch_one(pool)
    .await
}

/// Query per-model aggregates, most expensive model first.
pub async fn query_by_model(pool: &SqlitePool) -> Result<Vec<ModelRow>, sqlx::Error> {
    sqlx::query_as::<_, ModelRow>(
        "SELECT \
         model, \
         COUNT(*) as total_requests, \
         TOTAL(cost_micro_usd) as total_cost_micro_usd, \
         COALESCE(AVG(latency_ms), 0.0) as avg_latency_ms \
         FROM execution_logs \
         GROUP BY model \
         ORDER BY total_cost_micro_usd DESC",
    )
    .fetch_all(pool)
    .await
}

/// Query the most expensive prompt versions.
pub async fn query_top_versions(
    pool: &SqlitePool,
    limit: i64,
) -> Result<Vec<VersionCostRow>, sqlx::Error> {
    sqlx::query_as::<_, VersionCostRow>(
        "SELECT \
         version_id, \
         TOTAL(cost_micro_usd) as total_cost_micro_usd \
         FROM execution_logs \
         GROUP BY version_id \
         ORDER BY total_cost_micro_usd DESC \
         LIMIT ?",
    )
    .bind(limit)
    .fetch_all(pool)
    .await
}
