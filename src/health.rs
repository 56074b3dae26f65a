//! Persisted per-provider health statistics.
//!
//! One row per provider, updated after every attempt and read to order the
//! failover sequence. Updates are single-statement UPSERTs, so concurrent
//! writers cannot lose increments. Reads fail open: a missing database or a
//! failed query degrades to zero-state defaults instead of failing the
//! request path.

use serde::Serialize;
use sqlx::SqlitePool;

use crate::providers::ProviderId;

/// Snapshot of one provider's recorded health.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ProviderHealth {
    pub provider: String,
    pub last_success: Option<String>,
    pub last_failure: Option<String>,
    /// Cumulative moving average over successful attempts only.
    pub avg_latency_ms: i64,
    pub success_count: i64,
    pub fail_count: i64,
    pub total_latency_ms: i64,
}

impl ProviderHealth {
    fn zero(provider: ProviderId) -> Self {
        Self {
            provider: provider.as_str().to_string(),
            last_success: None,
            last_failure: None,
            avg_latency_ms: 0,
            success_count: 0,
            fail_count: 0,
            total_latency_ms: 0,
        }
    }
}

/// Tracker over the `provider_health` table.
///
/// `providers` is the known set (config order); it anchors prioritization
/// and snapshots even when no rows exist yet.
pub struct HealthTracker {
    pool: Option<SqlitePool>,
    providers: Vec<ProviderId>,
}

impl HealthTracker {
    pub fn new(pool: Option<SqlitePool>, providers: Vec<ProviderId>) -> Self {
        Self { pool, providers }
    }

    /// Record a successful attempt: bump success count and total latency,
    /// recompute the average from successes only.
    pub async fn record_success(&self, provider: ProviderId, latency_ms: u64) {
        let Some(pool) = &self.pool else { return };

        let now = chrono::Utc::now().to_rfc3339();
        let latency = latency_ms as i64;
        let result = sqlx::query(
            "INSERT INTO provider_health \
             (provider, last_success, last_failure, avg_latency_ms, success_count, fail_count, total_latency_ms) \
             VALUES (?, ?, NULL, ?, 1, 0, ?) \
             ON CONFLICT(provider) DO UPDATE SET \
               last_success = excluded.last_success, \
               success_count = provider_health.success_count + 1, \
               total_latency_ms = provider_health.total_latency_ms + excluded.total_latency_ms, \
               avg_latency_ms = CAST(ROUND( \
                   (provider_health.total_latency_ms + excluded.total_latency_ms) * 1.0 \
                   / (provider_health.success_count + 1)) AS INTEGER)",
        )
        .bind(provider.as_str())
        .bind(&now)
        .bind(latency)
        .bind(latency)
        .execute(pool)
        .await;

        match result {
            Ok(_) => {
                tracing::debug!(provider = %provider, latency_ms, "Health tracking updated (success)");
            }
            Err(e) => {
                tracing::warn!(provider = %provider, error = %e, "Failed to record provider success");
            }
        }
    }

    /// Record a failed attempt: bump failure count only. Latency of failed
    /// attempts never feeds the average.
    pub async fn record_failure(&self, provider: ProviderId) {
        let Some(pool) = &self.pool else { return };

        let now = chrono::Utc::now().to_rfc3339();
        let result = sqlx::query(
            "INSERT INTO provider_health \
             (provider, last_success, last_failure, avg_latency_ms, success_count, fail_count, total_latency_ms) \
             VALUES (?, NULL, ?, 0, 0, 1, 0) \
             ON CONFLICT(provider) DO UPDATE SET \
               last_failure = excluded.last_failure, \
               fail_count = provider_health.fail_count + 1",
        )
        .bind(provider.as_str())
        .bind(&now)
        .execute(pool)
        .await;

        match result {
            Ok(_) => {
                tracing::debug!(provider = %provider, "Health tracking updated (failure)");
            }
            Err(e) => {
                tracing::warn!(provider = %provider, error = %e, "Failed to record provider failure");
            }
        }
    }

    /// Order providers for a failover sequence.
    ///
    /// The caller's primary always leads. Remaining known providers follow,
    /// sorted ascending by average latency; providers with no recorded
    /// successes sort last, original order otherwise.
    pub async fn prioritize(&self, primary: ProviderId) -> Vec<ProviderId> {
        let stats = self.read_all().await;

        let mut others: Vec<ProviderId> = self
            .providers
            .iter()
            .copied()
            .filter(|p| *p != primary)
            .collect();

        others.sort_by(|a, b| {
            let key = |id: &ProviderId| {
                stats
                    .iter()
                    .find(|h| h.provider == id.as_str())
                    .filter(|h| h.success_count > 0)
                    .map(|h| h.avg_latency_ms)
            };
            match (key(a), key(b)) {
                (Some(la), Some(lb)) => la.cmp(&lb),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => std::cmp::Ordering::Equal,
            }
        });

        let mut sequence = Vec::with_capacity(others.len() + 1);
        sequence.push(primary);
        sequence.extend(others);
        sequence
    }

    /// Health snapshot for every known provider, zero-state where no row
    /// exists.
    pub async fn snapshot(&self) -> Vec<ProviderHealth> {
        let stats = self.read_all().await;
        self.providers
            .iter()
            .map(|p| {
                stats
                    .iter()
                    .find(|h| h.provider == p.as_str())
                    .cloned()
                    .unwrap_or_else(|| ProviderHealth::zero(*p))
            })
            .collect()
    }

    async fn read_all(&self) -> Vec<ProviderHealth> {
        let Some(pool) = &self.pool else {
            return Vec::new();
        };

        match sqlx::query_as::<_, ProviderHealth>(
            "SELECT provider, last_success, last_failure, avg_latency_ms, \
             success_count, fail_count, total_latency_ms FROM provider_health",
        )
        .fetch_all(pool)
        .await
        {
            Ok(rows) => rows,
            Err(e) => {
                // Zero-state fallback; ordering degrades to config order
                tracing::warn!(error = %e, "Failed to read provider health, using defaults");
                Vec::new()
            }
        }
    }
}
