use crate::error::{Error, Result};
use crate::models::generation::GenerationRequest;
use crate::models::question::Question;
use crate::services::generation_service::GenerationService;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Work handed to a generation worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedJob {
    pub job_id: String,
    /// Request narrowed to the count still missing.
    pub request: GenerationRequest,
    /// Corpus questions found before queueing, merged into the result.
    pub already_held: Vec<Question>,
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, job: QueuedJob) -> Result<()>;
}

async fn process(service: &GenerationService, job: QueuedJob, cancel: &CancellationToken) {
    let QueuedJob {
        job_id,
        request,
        already_held,
    } = job;
    match service.run(&request, &job_id, already_held, cancel).await {
        Ok(result) => tracing::info!(
            job_id = %job_id,
            status = ?result.status,
            questions = result.total_questions,
            "generation job finished"
        ),
        Err(e) => tracing::warn!(job_id = %job_id, error = %e, "generation job failed"),
    }
}

/// Durable queue on the `generation_jobs` table.
#[derive(Clone)]
pub struct PgJobQueue {
    pool: PgPool,
}

impl PgJobQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Claims the oldest pending job and runs it. Returns `false` when the
    /// queue was empty.
    pub async fn run_once(
        &self,
        service: &GenerationService,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let rec = sqlx::query(
            r#"
            UPDATE generation_jobs SET status='running', started_at=NOW()
            WHERE job_id = (
                SELECT job_id FROM generation_jobs WHERE status='pending' ORDER BY created_at ASC FOR UPDATE SKIP LOCKED LIMIT 1
            )
            RETURNING job_id, payload
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = rec else { return Ok(false) };
        let job_id: String = row.try_get("job_id")?;
        let job = match row.try_get::<Json<QueuedJob>, _>("payload") {
            Ok(Json(job)) => job,
            Err(e) => {
                let err = Error::Internal(format!("undecodable job payload: {}", e));
                tracing::error!(job_id = %job_id, error = %err, "dropping generation job");
                if let Err(mark) = service.jobs().fail(&job_id, err.classified()).await {
                    tracing::error!(job_id = %job_id, error = %mark, "failed to mark job failed");
                }
                self.finish(&job_id, "failed", Some(err.classified())).await?;
                return Ok(true);
            }
        };

        let outcome = service
            .run(&job.request, &job.job_id, job.already_held, cancel)
            .await;

        let (status, error) = match &outcome {
            Ok(_) => ("done", None),
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "generation job failed");
                ("failed", Some(e.classified()))
            }
        };
        self.finish(&job_id, status, error).await?;

        Ok(true)
    }

    async fn finish(&self, job_id: &str, status: &str, error: Option<&str>) -> Result<()> {
        sqlx::query(
            r#"UPDATE generation_jobs SET status=$1, error=$2, finished_at=NOW() WHERE job_id=$3"#,
        )
        .bind(status)
        .bind(error)
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Puts jobs left `running` by a previous process back in line.
    pub async fn requeue_stale(&self) -> Result<u64> {
        let res = sqlx::query(
            r#"UPDATE generation_jobs SET status='pending', started_at=NULL WHERE status='running'"#,
        )
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected())
    }

    pub fn spawn_worker(
        &self,
        service: GenerationService,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let queue = self.clone();
        tokio::spawn(async move {
            loop {
                if cancel.is_cancelled() {
                    break;
                }
                let idle = match queue.run_once(&service, &cancel).await {
                    Ok(true) => continue,
                    Ok(false) => Duration::from_millis(750),
                    Err(e) => {
                        tracing::error!(error = ?e, "generation queue worker error");
                        Duration::from_secs(1)
                    }
                };
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(idle) => {}
                }
            }
            tracing::info!("generation queue worker stopped");
        })
    }
}

#[async_trait]
impl JobQueue for PgJobQueue {
    async fn enqueue(&self, job: QueuedJob) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO generation_jobs (job_id, payload)
            VALUES ($1, $2)
            "#,
        )
        .bind(&job.job_id)
        .bind(Json(&job))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// In-process queue. Every received job runs on its own task.
#[derive(Clone)]
pub struct LocalJobQueue {
    tx: mpsc::UnboundedSender<QueuedJob>,
}

impl LocalJobQueue {
    pub fn start(service: GenerationService, cancel: CancellationToken) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<QueuedJob>();
        let handle = tokio::spawn(async move {
            let mut running = tokio::task::JoinSet::new();
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    next = rx.recv() => match next {
                        Some(job) => {
                            let service = service.clone();
                            let cancel = cancel.clone();
                            running.spawn(async move { process(&service, job, &cancel).await });
                        }
                        None => break,
                    },
                    Some(_) = running.join_next(), if !running.is_empty() => {}
                }
            }
            while running.join_next().await.is_some() {}
            tracing::info!("local generation worker stopped");
        });
        (Self { tx }, handle)
    }
}

#[async_trait]
impl JobQueue for LocalJobQueue {
    async fn enqueue(&self, job: QueuedJob) -> Result<()> {
        self.tx
            .send(job)
            .map_err(|e| Error::Internal(format!("generation worker is gone: {}", e)))
    }
}
