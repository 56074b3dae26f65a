//! Execution telemetry records and fire-and-forget persistence.

use sqlx::SqlitePool;

use crate::background::BackgroundQueue;

/// A completed execution ready for database insertion.
///
/// All fields are owned types to satisfy the `'static` requirement of
/// `tokio::spawn`.
pub struct ExecutionRecord {
    pub request_id: String,
    pub timestamp: String,
    /// The version actually served (the A/B winner when a variant was given).
    pub version_id: String,
    pub provider: String,
    pub model: String,
    pub cached: bool,
    pub latency_ms: i64,
    pub tokens_input: i64,
    pub tokens_output: i64,
    pub cost_micro_usd: i64,
}

impl ExecutionRecord {
    /// Insert this record into the database.
    pub async fn insert(&self, pool: &SqlitePool) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO execution_logs (
                request_id, timestamp, version_id, provider, model,
                cached, latency_ms, tokens_input, tokens_output, cost_micro_usd
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&self.request_id)
        .bind(&self.timestamp)
        .bind(&self.version_id)
        .bind(&self.provider)
        .bind(&self.model)
        .bind(self.cached)
        .bind(self.latency_ms)
        .bind(self.tokens_input)
        .bind(self.tokens_output)
        .bind(self.cost_micro_usd)
        .execute(pool)
        .await?;
        Ok(())
    }
}

/// Submit a fire-and-forget telemetry write to the background queue.
///
/// The response path never waits on this; a failed write is logged and lost.
pub fn submit_record_write(queue: &BackgroundQueue, pool: &SqlitePool, record: ExecutionRecord) {
    let pool = pool.clone();
    queue.submit("telemetry-write", async move {
        record
            .insert(&pool)
            .await
            .map_err(|e| format!("request '{}': {}", record.request_id, e))
    });
}
