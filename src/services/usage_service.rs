use crate::error::Result;
use crate::models::usage::{TokenUsage, UsageRecord, UsageStatus};
use crate::utils::time::epoch_seconds;
use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::PgPool;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Append-only sink for per-job usage rows.
#[async_trait]
pub trait UsageStore: Send + Sync {
    async fn append(&self, record: &UsageRecord) -> Result<()>;
}

#[derive(Clone)]
pub struct PgUsageStore {
    pool: PgPool,
}

impl PgUsageStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UsageStore for PgUsageStore {
    async fn append(&self, record: &UsageRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO usage_records (
                company_id, job_id, prompt_tokens, completion_tokens, total_tokens,
                attempts, session_id, status, errors, timestamp
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(&record.company_id)
        .bind(&record.job_id)
        .bind(record.prompt_tokens as i64)
        .bind(record.completion_tokens as i64)
        .bind(record.total_tokens as i64)
        .bind(record.attempts as i32)
        .bind(&record.session_id)
        .bind(record.status.as_str())
        .bind(Json(&record.errors))
        .bind(record.timestamp)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryUsageStore {
    records: RwLock<Vec<UsageRecord>>,
}

impl MemoryUsageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self) -> Vec<UsageRecord> {
        self.records.read().await.clone()
    }
}

#[async_trait]
impl UsageStore for MemoryUsageStore {
    async fn append(&self, record: &UsageRecord) -> Result<()> {
        self.records.write().await.push(record.clone());
        Ok(())
    }
}

/// What a finished job consumed.
#[derive(Debug, Clone)]
pub struct JobUsage<'a> {
    pub company_id: &'a str,
    pub job_id: &'a str,
    pub tokens: TokenUsage,
    pub attempts: u32,
    pub session_id: Option<&'a str>,
    pub status: UsageStatus,
    pub errors: Vec<String>,
}

#[derive(Clone)]
pub struct UsageService {
    store: Arc<dyn UsageStore>,
}

impl UsageService {
    pub fn new(store: Arc<dyn UsageStore>) -> Self {
        Self { store }
    }

    /// Writes one usage row. Failures are logged, never propagated, so the
    /// job outcome is unaffected.
    pub async fn track(&self, usage: JobUsage<'_>) {
        let record = UsageRecord {
            company_id: usage.company_id.to_string(),
            job_id: usage.job_id.to_string(),
            prompt_tokens: usage.tokens.prompt_tokens,
            completion_tokens: usage.tokens.completion_tokens,
            total_tokens: usage.tokens.total(),
            attempts: usage.attempts,
            session_id: usage.session_id.map(str::to_string),
            status: usage.status,
            errors: usage.errors,
            timestamp: epoch_seconds(),
        };
        match self.store.append(&record).await {
            Ok(()) => tracing::info!(
                company_id = %record.company_id,
                job_id = %record.job_id,
                status = %record.status,
                total_tokens = record.total_tokens,
                "API usage tracked"
            ),
            Err(e) => tracing::error!(
                company_id = %record.company_id,
                job_id = %record.job_id,
                error = %e,
                "failed to record API usage"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    struct BrokenStore;

    #[async_trait]
    impl UsageStore for BrokenStore {
        async fn append(&self, _record: &UsageRecord) -> Result<()> {
            Err(Error::Store("usage table unavailable".into()))
        }
    }

    #[tokio::test]
    async fn track_sums_tokens() {
        let store = Arc::new(MemoryUsageStore::new());
        let svc = UsageService::new(store.clone());
        svc.track(JobUsage {
            company_id: "acme",
            job_id: "job-1",
            tokens: TokenUsage {
                prompt_tokens: 120,
                completion_tokens: 80,
            },
            attempts: 2,
            session_id: Some("thread_1"),
            status: UsageStatus::Success,
            errors: vec![],
        })
        .await;

        let records = store.records().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].total_tokens, 200);
        assert_eq!(records[0].attempts, 2);
        assert_eq!(records[0].session_id.as_deref(), Some("thread_1"));
    }

    #[tokio::test]
    async fn store_failure_is_swallowed() {
        let svc = UsageService::new(Arc::new(BrokenStore));
        svc.track(JobUsage {
            company_id: "acme",
            job_id: "job-2",
            tokens: TokenUsage::default(),
            attempts: 3,
            session_id: None,
            status: UsageStatus::Failed,
            errors: vec!["boom".into()],
        })
        .await;
    }
}
