//! Generation orchestrator.
//!
//! A job moves `queued -> in-progress -> completed | completed_partial | failed`.
//! Work happens in one model session: each attempt asks for the questions
//! still missing, every returned candidate goes through the duplicate
//! detector, and rejected texts are fed back into the next prompt.

use crate::error::{Error, Result};
use crate::models::generation::GenerationRequest;
use crate::models::job::{GenerationResult, JobStatus, ResultStatus};
use crate::models::question::Question;
use crate::models::usage::{TokenUsage, UsageStatus};
use crate::services::ai_service::{
    parse_batch, GenerationBackend, RunState, ToolOutput, FORMAT_MCQS_TOOL,
};
use crate::services::corpus_service::FacetQuery;
use crate::services::dedup_service::{DedupOutcome, DedupService};
use crate::services::job_service::JobService;
use crate::services::queue_service::{JobQueue, QueuedJob};
use crate::services::usage_service::{JobUsage, UsageService};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Debug, Clone, Copy)]
pub struct GenerationSettings {
    pub max_attempts: u32,
    pub poll_max_iterations: u32,
    pub poll_interval: Duration,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            poll_max_iterations: 60,
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// How a single attempt against the model ended.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    Success(Vec<Question>),
    Timeout,
    TerminalFailure(String),
    PayloadError(String),
}

/// Result of submitting a request: served from the corpus, or queued.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    Ready {
        job_id: String,
        result: GenerationResult,
    },
    Queued {
        job_id: String,
    },
}

#[derive(Debug, Default)]
struct Tally {
    attempts: u32,
    tokens: TokenUsage,
    session_id: Option<String>,
    errors: Vec<String>,
}

#[derive(Clone)]
pub struct GenerationService {
    backend: Arc<dyn GenerationBackend>,
    dedup: DedupService,
    jobs: JobService,
    usage: UsageService,
    settings: GenerationSettings,
}

impl GenerationService {
    pub fn new(
        backend: Arc<dyn GenerationBackend>,
        dedup: DedupService,
        jobs: JobService,
        usage: UsageService,
        settings: GenerationSettings,
    ) -> Self {
        Self {
            backend,
            dedup,
            jobs,
            usage,
            settings,
        }
    }

    pub fn jobs(&self) -> &JobService {
        &self.jobs
    }

    /// Serves the request from unconsumed corpus questions when possible,
    /// otherwise queues generation of the missing count.
    pub async fn submit(
        &self,
        request: GenerationRequest,
        queue: &dyn JobQueue,
    ) -> Result<SubmitOutcome> {
        let wanted = request.number_of_questions;
        let held: Vec<Question> = self
            .dedup
            .corpus()
            .find_candidates(&FacetQuery {
                technology: request.technology,
                difficulty: request.difficulty,
                tags: request.concepts.clone(),
                tenant: request.company_id.clone(),
                strict: request.strict_question,
                limit: Some(wanted),
            })
            .await?
            .into_iter()
            .map(|record| record.question)
            .collect();

        let job_id = Uuid::new_v4().to_string();
        if held.len() >= wanted {
            let result = GenerationResult::new(
                ResultStatus::Success,
                request.technology,
                request.difficulty,
                held,
            );
            self.jobs
                .complete(&job_id, JobStatus::Completed, &result)
                .await?;
            tracing::info!(job_id = %job_id, questions = result.total_questions, "served from corpus");
            return Ok(SubmitOutcome::Ready { job_id, result });
        }

        let mut remaining = request;
        remaining.number_of_questions = wanted - held.len();
        tracing::info!(
            job_id = %job_id,
            held = held.len(),
            needed = remaining.number_of_questions,
            "queueing generation"
        );

        self.jobs.set_status(&job_id, JobStatus::Queued).await?;
        let job = QueuedJob {
            job_id: job_id.clone(),
            request: remaining,
            already_held: held,
        };
        if let Err(e) = queue.enqueue(job).await {
            if let Err(mark) = self.jobs.fail(&job_id, e.classified()).await {
                tracing::error!(job_id = %job_id, error = %mark, "failed to mark job failed");
            }
            return Err(e);
        }
        Ok(SubmitOutcome::Queued { job_id })
    }

    /// Runs one job to a terminal state. The returned error, if any, has
    /// already been recorded in the job store and the usage log.
    pub async fn run(
        &self,
        request: &GenerationRequest,
        job_id: &str,
        already_held: Vec<Question>,
        cancel: &CancellationToken,
    ) -> Result<GenerationResult> {
        let mut tally = Tally::default();
        if let Err(e) = self.jobs.set_status(job_id, JobStatus::InProgress).await {
            return self.finish_failed(request, job_id, &mut tally, e).await;
        }
        tracing::info!(job_id, "job started");

        let session_id = match self.backend.create_session().await {
            Ok(id) => id,
            Err(e) => return self.finish_failed(request, job_id, &mut tally, e).await,
        };
        tracing::info!(job_id, session_id = %session_id, "created model session");
        tally.session_id = Some(session_id.clone());

        let outcome = match self
            .drive(request, job_id, &session_id, cancel, &mut tally)
            .await
        {
            Ok(accepted) => {
                self.finish(request, job_id, accepted, already_held, &mut tally)
                    .await
            }
            Err(e) => self.finish_failed(request, job_id, &mut tally, e).await,
        };

        match self.backend.delete_session(&session_id).await {
            Ok(()) => tracing::info!(job_id, session_id = %session_id, "released model session"),
            Err(e) => tracing::error!(
                job_id,
                session_id = %session_id,
                error = %e,
                "error cleaning up model session"
            ),
        }

        outcome
    }

    async fn drive(
        &self,
        request: &GenerationRequest,
        job_id: &str,
        session_id: &str,
        cancel: &CancellationToken,
        tally: &mut Tally,
    ) -> Result<Vec<Question>> {
        let target = request.number_of_questions;
        let mut accepted: Vec<Question> = Vec::new();
        let mut rejected: Vec<String> = Vec::new();

        while tally.attempts < self.settings.max_attempts && accepted.len() < target {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let remaining = target - accepted.len();
            let prompt = if tally.attempts == 0 {
                initial_prompt(request)
            } else {
                retry_prompt(request, remaining, &rejected)
            };
            tracing::info!(job_id, attempt = tally.attempts + 1, remaining, "sending prompt");

            let outcome = self
                .run_attempt(request, session_id, &prompt, cancel, &mut tally.tokens)
                .await;
            tally.attempts += 1;
            let is_last = tally.attempts >= self.settings.max_attempts;

            let failure = match outcome {
                Ok(AttemptOutcome::Success(candidates)) => {
                    let before = rejected.len();
                    for candidate in candidates {
                        if accepted.len() >= target {
                            break;
                        }
                        let text = candidate.question.clone();
                        match self
                            .dedup
                            .accept(
                                candidate,
                                request.metadata(),
                                &request.company_id,
                                request.strict_question,
                            )
                            .await?
                        {
                            DedupOutcome::Accepted(record) => accepted.push(record.question),
                            DedupOutcome::Duplicate(reason) => {
                                tracing::debug!(job_id, ?reason, "duplicate rejected");
                                rejected.push(text);
                            }
                        }
                    }
                    tracing::info!(
                        job_id,
                        attempt = tally.attempts,
                        accepted = accepted.len(),
                        duplicates = rejected.len() - before,
                        "batch processed"
                    );
                    continue;
                }
                Ok(AttemptOutcome::Timeout) => Error::Timeout(self.settings.poll_max_iterations),
                Ok(AttemptOutcome::TerminalFailure(status)) => Error::TerminalSession(status),
                Ok(AttemptOutcome::PayloadError(msg)) => Error::Payload(msg),
                Err(e) if e.is_retryable() => e,
                Err(e) => return Err(e),
            };

            tracing::error!(
                job_id,
                attempt = tally.attempts,
                session_id,
                error = %failure,
                "generation attempt failed"
            );
            if is_last && accepted.is_empty() {
                return Err(failure);
            }
            tally.errors.push(failure.to_string());
        }

        Ok(accepted)
    }

    /// Posts the prompt, starts a run and polls it to an outcome.
    async fn run_attempt(
        &self,
        request: &GenerationRequest,
        session_id: &str,
        prompt: &str,
        cancel: &CancellationToken,
        tokens: &mut TokenUsage,
    ) -> Result<AttemptOutcome> {
        self.backend.post_message(session_id, prompt).await?;
        let run_id = self.backend.start_run(session_id, request.technology).await?;

        let mut batch: Option<Vec<Question>> = None;
        let mut payload_error: Option<String> = None;

        for poll in 0..self.settings.poll_max_iterations {
            tracing::debug!(session_id, run_id = %run_id, poll, "waiting for model response");
            match self.backend.poll_run(session_id, &run_id).await? {
                RunState::Completed(usage) => {
                    tokens.add(usage);
                    return Ok(match (batch, payload_error) {
                        (Some(questions), _) => AttemptOutcome::Success(questions),
                        (None, Some(msg)) => AttemptOutcome::PayloadError(msg),
                        (None, None) => AttemptOutcome::PayloadError(
                            "run completed without a format_mcqs call".to_string(),
                        ),
                    });
                }
                RunState::RequiresAction(calls) => {
                    let mut outputs = Vec::with_capacity(calls.len());
                    for call in calls {
                        let output = if call.name == FORMAT_MCQS_TOOL {
                            match parse_batch(&call.arguments) {
                                Ok(questions) => batch = Some(questions),
                                Err(e) => payload_error = Some(e.to_string()),
                            }
                            call.arguments
                        } else {
                            tracing::warn!(tool = %call.name, "model requested unknown tool");
                            serde_json::json!({ "error": "unsupported tool" }).to_string()
                        };
                        outputs.push(ToolOutput {
                            tool_call_id: call.id,
                            output,
                        });
                    }
                    self.backend
                        .submit_tool_outputs(session_id, &run_id, outputs)
                        .await?;
                    continue;
                }
                RunState::Terminal(status) => {
                    return Ok(AttemptOutcome::TerminalFailure(status));
                }
                RunState::Pending => {}
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep(self.settings.poll_interval) => {}
            }
        }

        Ok(AttemptOutcome::Timeout)
    }

    async fn finish(
        &self,
        request: &GenerationRequest,
        job_id: &str,
        accepted: Vec<Question>,
        already_held: Vec<Question>,
        tally: &mut Tally,
    ) -> Result<GenerationResult> {
        if accepted.is_empty() {
            let err = Error::Exhausted(format!(
                "Failed to generate unique questions after {} attempts",
                tally.attempts
            ));
            return self.finish_failed(request, job_id, tally, err).await;
        }

        let complete = accepted.len() >= request.number_of_questions;
        let (job_status, result_status, usage_status) = if complete {
            (JobStatus::Completed, ResultStatus::Success, UsageStatus::Success)
        } else {
            (
                JobStatus::CompletedPartial,
                ResultStatus::PartialSuccess,
                UsageStatus::PartialSuccess,
            )
        };

        let mut questions = accepted;
        questions.extend(already_held);
        let result = GenerationResult::new(
            result_status,
            request.technology,
            request.difficulty,
            questions,
        );

        if let Err(e) = self.jobs.complete(job_id, job_status, &result).await {
            return self.finish_failed(request, job_id, tally, e).await;
        }
        self.track(request, job_id, tally, usage_status).await;

        if complete {
            tracing::info!(job_id, questions = result.total_questions, "job completed");
        } else {
            tracing::warn!(job_id, questions = result.total_questions, "job completed partially");
        }
        Ok(result)
    }

    async fn finish_failed(
        &self,
        request: &GenerationRequest,
        job_id: &str,
        tally: &mut Tally,
        err: Error,
    ) -> Result<GenerationResult> {
        tracing::error!(job_id, error = %err, "job failed");
        tally.errors.push(err.to_string());
        if let Err(e) = self.jobs.fail(job_id, err.classified()).await {
            tracing::error!(job_id, error = %e, "failed to persist job failure");
        }
        self.track(request, job_id, tally, UsageStatus::Failed).await;
        Err(err)
    }

    async fn track(
        &self,
        request: &GenerationRequest,
        job_id: &str,
        tally: &Tally,
        status: UsageStatus,
    ) {
        self.usage
            .track(JobUsage {
                company_id: &request.company_id,
                job_id,
                tokens: tally.tokens,
                attempts: tally.attempts,
                session_id: tally.session_id.as_deref(),
                status,
                errors: tally.errors.clone(),
            })
            .await;
    }
}

pub fn initial_prompt(request: &GenerationRequest) -> String {
    format!(
        "Generate {} {} multiple-choice questions based on the {} Technology and the concepts: {}.",
        request.number_of_questions,
        request.difficulty,
        request.technology,
        request.concepts.join(", ")
    )
}

pub fn retry_prompt(request: &GenerationRequest, remaining: usize, rejected: &[String]) -> String {
    let duplicate_list = rejected
        .iter()
        .enumerate()
        .map(|(i, q)| format!("{}. {}", i + 1, q))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "I need {remaining} new {difficulty} multiple-choice questions about {technology} \
         Technology focusing on concepts: {concepts}.\n\n\
         Here are the duplicate questions to avoid:\n\
         {duplicate_list}\n\n\
         Please ensure the new questions:\n\
         1. Are substantially different from the duplicates above\n\
         2. Cover different aspects of the concepts\n\
         3. Use unique phrasing and structure\n\
         \nGenerate exactly {remaining} new questions meeting these criteria.",
        remaining = remaining,
        difficulty = request.difficulty,
        technology = request.technology,
        concepts = request.concepts.join(", "),
        duplicate_list = duplicate_list,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::kv_store::MemoryKeyValueStore;
    use crate::models::question::{Difficulty, Technology};
    use crate::services::ai_service::{MockGenerationBackend, ToolCall};
    use crate::services::corpus_service::MemoryCorpusIndex;
    use crate::services::dedup_service::DedupSettings;
    use crate::services::signature_cache::SignatureCache;
    use crate::services::usage_service::MemoryUsageStore;

    fn request(n: usize) -> GenerationRequest {
        GenerationRequest {
            technology: Technology::Golang,
            difficulty: Difficulty::Medium,
            concepts: vec!["channels".into(), "goroutines".into()],
            number_of_questions: n,
            company_id: "acme".into(),
            strict_question: false,
        }
    }

    fn service(
        backend: MockGenerationBackend,
        settings: GenerationSettings,
    ) -> (GenerationService, Arc<MemoryUsageStore>) {
        let kv = Arc::new(MemoryKeyValueStore::new());
        let usage_store = Arc::new(MemoryUsageStore::new());
        let dedup = DedupService::new(
            Arc::new(MemoryCorpusIndex::new()),
            SignatureCache::new(kv.clone(), None),
            DedupSettings::default(),
        );
        let svc = GenerationService::new(
            Arc::new(backend),
            dedup,
            JobService::new(kv),
            UsageService::new(usage_store.clone()),
            settings,
        );
        (svc, usage_store)
    }

    fn fast(max_attempts: u32, polls: u32) -> GenerationSettings {
        GenerationSettings {
            max_attempts,
            poll_max_iterations: polls,
            poll_interval: Duration::from_millis(1),
        }
    }

    fn session_basics(backend: &mut MockGenerationBackend) {
        backend
            .expect_create_session()
            .times(1)
            .returning(|| Ok("thread_1".to_string()));
        backend.expect_post_message().returning(|_, _| Ok(()));
        backend
            .expect_start_run()
            .returning(|_, _| Ok("run_1".to_string()));
        backend
            .expect_delete_session()
            .times(1)
            .returning(|_| Ok(()));
    }

    #[test]
    fn retry_prompt_lists_rejections() {
        let prompt = retry_prompt(
            &request(4),
            2,
            &["What is a channel?".to_string(), "What is a goroutine?".to_string()],
        );
        assert!(prompt.starts_with("I need 2 new medium multiple-choice questions about Golang"));
        assert!(prompt.contains("1. What is a channel?\n2. What is a goroutine?"));
        assert!(prompt.ends_with("Generate exactly 2 new questions meeting these criteria."));
    }

    #[test]
    fn initial_prompt_names_facet() {
        assert_eq!(
            initial_prompt(&request(3)),
            "Generate 3 medium multiple-choice questions based on the Golang Technology and the concepts: channels, goroutines."
        );
    }

    #[tokio::test]
    async fn terminal_sessions_exhaust_into_failure() {
        let mut backend = MockGenerationBackend::new();
        session_basics(&mut backend);
        backend
            .expect_poll_run()
            .times(3)
            .returning(|_, _| Ok(RunState::Terminal("expired".to_string())));

        let (svc, usage) = service(backend, fast(3, 5));
        let cancel = CancellationToken::new();
        let err = svc.run(&request(2), "job-t", vec![], &cancel).await.unwrap_err();
        assert!(matches!(err, Error::TerminalSession(_)));

        let view = svc.jobs().view("job-t").await.unwrap();
        assert_eq!(view.status, JobStatus::Failed);
        assert_eq!(view.error.as_deref(), Some("model_session_failed"));

        let records = usage.records().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, UsageStatus::Failed);
        assert_eq!(records[0].attempts, 3);
        assert_eq!(records[0].errors.len(), 3);
    }

    #[tokio::test]
    async fn polling_cap_times_out_each_attempt() {
        let mut backend = MockGenerationBackend::new();
        session_basics(&mut backend);
        backend
            .expect_poll_run()
            .times(4)
            .returning(|_, _| Ok(RunState::Pending));

        let (svc, _) = service(backend, fast(2, 2));
        let cancel = CancellationToken::new();
        let err = svc.run(&request(1), "job-p", vec![], &cancel).await.unwrap_err();
        assert!(matches!(err, Error::Timeout(2)));
    }

    #[tokio::test]
    async fn tool_call_batch_completes_job() {
        let mut backend = MockGenerationBackend::new();
        session_basics(&mut backend);
        let args = serde_json::json!({
            "mcq_set": {
                "technology": "Golang",
                "difficulty": "medium",
                "questions": [{
                    "question": "Which statement waits on multiple channel operations?",
                    "options": ["select", "switch", "defer", "go"],
                    "correct_answer": 0,
                    "tags": ["channels"]
                }]
            }
        })
        .to_string();
        let mut polls = 0;
        backend.expect_poll_run().returning(move |_, _| {
            polls += 1;
            Ok(match polls {
                1 => RunState::Pending,
                2 => RunState::RequiresAction(vec![ToolCall {
                    id: "call_1".into(),
                    name: FORMAT_MCQS_TOOL.into(),
                    arguments: args.clone(),
                }]),
                _ => RunState::Completed(TokenUsage {
                    prompt_tokens: 300,
                    completion_tokens: 120,
                }),
            })
        });
        backend
            .expect_submit_tool_outputs()
            .times(1)
            .withf(|_, run_id, outputs| run_id.to_string() == "run_1" && outputs[0].tool_call_id == "call_1")
            .returning(|_, _, _| Ok(()));

        let (svc, usage) = service(backend, fast(3, 10));
        let cancel = CancellationToken::new();
        let result = svc.run(&request(1), "job-ok", vec![], &cancel).await.unwrap();
        assert_eq!(result.status, ResultStatus::Success);
        assert_eq!(result.questions[0].id, 1);

        let records = usage.records().await;
        assert_eq!(records[0].total_tokens, 420);
        assert_eq!(records[0].attempts, 1);
        assert_eq!(records[0].session_id.as_deref(), Some("thread_1"));
    }

    #[tokio::test]
    async fn cancellation_fails_job_and_releases_session() {
        let mut backend = MockGenerationBackend::new();
        session_basics(&mut backend);
        backend
            .expect_poll_run()
            .returning(|_, _| Ok(RunState::Pending));

        let (svc, _) = service(
            backend,
            GenerationSettings {
                max_attempts: 3,
                poll_max_iterations: 1_000,
                poll_interval: Duration::from_millis(50),
            },
        );
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        let err = svc.run(&request(1), "job-c", vec![], &cancel).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        let view = svc.jobs().view("job-c").await.unwrap();
        assert_eq!(view.error.as_deref(), Some("cancelled"));
    }

    #[tokio::test]
    async fn session_creation_failure_is_recorded() {
        let mut backend = MockGenerationBackend::new();
        backend
            .expect_create_session()
            .returning(|| Err(Error::Internal("openai unreachable".into())));
        backend.expect_delete_session().never();

        let (svc, usage) = service(backend, fast(3, 5));
        let cancel = CancellationToken::new();
        assert!(svc.run(&request(1), "job-s", vec![], &cancel).await.is_err());
        assert_eq!(
            svc.jobs().status("job-s").await.unwrap(),
            Some(JobStatus::Failed)
        );
        assert_eq!(usage.records().await[0].status, UsageStatus::Failed);
    }
}
