//! Prompt version lookup.
//!
//! Prompt definitions are authored elsewhere; the pipeline only reads them.
//! The store is a trait so tests substitute an in-memory map for the SQLite
//! table.

use async_trait::async_trait;
use sqlx::SqlitePool;

/// A stored prompt version: a system prompt plus a `{{name}}` template.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PromptDefinition {
    pub system_prompt: String,
    pub template: String,
}

/// Read-only source of prompt definitions.
#[async_trait]
pub trait PromptStore: Send + Sync {
    /// Fetch a definition by version id. `Ok(None)` means unknown version.
    async fn fetch(&self, version_id: &str) -> Result<Option<PromptDefinition>, sqlx::Error>;
}

/// SQLite-backed store over the `prompt_versions` table.
pub struct SqlitePromptStore {
    pool: SqlitePool,
}

impl SqlitePromptStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert or replace a version. Used by seeding and tests.
    pub async fn upsert(
        &self,
        version_id: &str,
        system_prompt: &str,
        template: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO prompt_versions (id, system_prompt, template) VALUES (?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET \
               system_prompt = excluded.system_prompt, \
               template = excluded.template",
        )
        .bind(version_id)
        .bind(system_prompt)
        .bind(template)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl PromptStore for SqlitePromptStore {
    async fn fetch(&self, version_id: &str) -> Result<Option<PromptDefinition>, sqlx::Error> {
        sqlx::query_as::<_, PromptDefinition>(
            "SELECT system_prompt, template FROM prompt_versions WHERE id = ?",
        )
        .bind(version_id)
        .fetch_optional(&self.pool)
        .await
    }
}

/// In-memory store for tests and ad-hoc setups.
#[derive(Default)]
pub struct MemoryPromptStore {
    versions: dashmap::DashMap<String, PromptDefinition>,
}

impl MemoryPromptStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, version_id: &str, system_prompt: &str, template: &str) {
        self.versions.insert(
            version_id.to_string(),
            PromptDefinition {
                system_prompt: system_prompt.to_string(),
                template: template.to_string(),
            },
        );
    }
}

#[async_trait]
impl PromptStore for MemoryPromptStore {
    async fn fetch(&self, version_id: &str) -> Result<Option<PromptDefinition>, sqlx::Error> {
        Ok(self.versions.get(version_id).map(|v| v.value().clone()))
    }
}
