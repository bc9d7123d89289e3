use crate::database::kv_store::KeyValueStore;
use crate::error::{Error, Result};
use crate::models::job::{GenerationResult, JobStatus};
use serde::Serialize;
use std::sync::Arc;
use utoipa::ToSchema;

/// Latest known state of a job as read back from the store.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct JobView {
    pub job_id: String,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<GenerationResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Job status and result in the key-value store. Keys: `{id}:status`,
/// `{id}` for the result JSON and `{id}:error` for the classified failure.
#[derive(Clone)]
pub struct JobService {
    store: Arc<dyn KeyValueStore>,
}

impl JobService {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    fn status_key(job_id: &str) -> String {
        format!("{}:status", job_id)
    }

    fn error_key(job_id: &str) -> String {
        format!("{}:error", job_id)
    }

    pub async fn set_status(&self, job_id: &str, status: JobStatus) -> Result<()> {
        self.store
            .set(&Self::status_key(job_id), status.as_str(), None)
            .await
    }

    /// Writes the result before the status so a poller never sees a finished
    /// status without its payload.
    pub async fn complete(
        &self,
        job_id: &str,
        status: JobStatus,
        result: &GenerationResult,
    ) -> Result<()> {
        if !status.has_result() {
            return Err(Error::Internal(format!(
                "status {} does not carry a result",
                status
            )));
        }
        let raw = serde_json::to_string(result)?;
        self.store.set(job_id, &raw, None).await?;
        self.set_status(job_id, status).await
    }

    pub async fn fail(&self, job_id: &str, classified: &str) -> Result<()> {
        self.store
            .set(&Self::error_key(job_id), classified, None)
            .await?;
        self.set_status(job_id, JobStatus::Failed).await
    }

    pub async fn status(&self, job_id: &str) -> Result<Option<JobStatus>> {
        match self.store.get(&Self::status_key(job_id)).await? {
            Some(raw) => raw.parse().map(Some).map_err(Error::Store),
            None => Ok(None),
        }
    }

    pub async fn view(&self, job_id: &str) -> Result<JobView> {
        let status = self
            .status(job_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("No job found for ID: {}", job_id)))?;

        let data = if status.has_result() {
            let raw = self.store.get(job_id).await?.ok_or_else(|| {
                Error::Store(format!(
                    "job {} is marked {} but no data is available",
                    job_id, status
                ))
            })?;
            Some(serde_json::from_str(&raw).map_err(|e| {
                Error::Internal(format!("stored result for job {} is unreadable: {}", job_id, e))
            })?)
        } else {
            None
        };

        let error = if status == JobStatus::Failed {
            self.store.get(&Self::error_key(job_id)).await?
        } else {
            None
        };

        Ok(JobView {
            job_id: job_id.to_string(),
            status,
            data,
            error,
        })
    }
}
