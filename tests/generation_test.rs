mod common;

use async_trait::async_trait;
use common::{harness, question, request, seed, Step, SEEDED, UNIQUE};
use question_bank_backend::{
    error::{Error, Result},
    models::job::{JobStatus, ResultStatus},
    models::usage::UsageStatus,
    services::corpus_service::CorpusIndex,
    services::generation_service::SubmitOutcome,
    services::queue_service::{JobQueue, LocalJobQueue, QueuedJob},
};
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct RecordingQueue {
    jobs: Mutex<Vec<QueuedJob>>,
}

#[async_trait]
impl JobQueue for RecordingQueue {
    async fn enqueue(&self, job: QueuedJob) -> Result<()> {
        self.jobs.lock().unwrap().push(job);
        Ok(())
    }
}

fn tagged(text: &str) -> question_bank_backend::models::question::Question {
    question(text, &["concurrency"])
}

#[tokio::test]
async fn job_completes_after_retrying_around_duplicates() {
    let h = harness(vec![
        Step::Batch(vec![
            tagged(UNIQUE[0]),
            tagged(SEEDED[0]),
            tagged(UNIQUE[1]),
            tagged(SEEDED[1]),
            tagged(UNIQUE[2]),
        ]),
        Step::Batch(vec![tagged(UNIQUE[3]), tagged(UNIQUE[4])]),
    ]);
    seed(&h, SEEDED[0], "acme").await;
    seed(&h, SEEDED[1], "acme").await;

    let cancel = CancellationToken::new();
    let result = h
        .service
        .run(&request(5), "job-5", vec![], &cancel)
        .await
        .unwrap();

    assert_eq!(result.status, ResultStatus::Success);
    assert_eq!(result.total_questions, 5);
    let ids: Vec<i64> = result.questions.iter().map(|q| q.id).collect();
    assert_eq!(ids, vec![3, 4, 5, 6, 7]);
    assert!(result.note.is_none());

    let view = h.service.jobs().view("job-5").await.unwrap();
    assert_eq!(view.status, JobStatus::Completed);
    assert_eq!(view.data.as_ref().map(|d| d.total_questions), Some(5));

    let usage = h.usage.records().await;
    assert_eq!(usage.len(), 1);
    assert_eq!(usage[0].attempts, 2);
    assert_eq!(usage[0].status, UsageStatus::Success);
    assert_eq!(usage[0].total_tokens, 300);
    assert!(usage[0].errors.is_empty());

    let prompts = h.backend.prompts();
    assert_eq!(prompts.len(), 2);
    assert!(prompts[0].starts_with("Generate 5 medium"));
    assert!(prompts[1].starts_with("I need 2 new medium"));
    assert!(prompts[1].contains(SEEDED[0]));
    assert!(prompts[1].contains(SEEDED[1]));
    assert_eq!(h.backend.deleted_sessions(), vec!["thread_test".to_string()]);
}

#[tokio::test]
async fn job_fails_when_every_attempt_is_duplicate() {
    let dupes = || Step::Batch(vec![tagged(SEEDED[0]), tagged(SEEDED[1])]);
    let h = harness(vec![dupes(), dupes(), dupes()]);
    seed(&h, SEEDED[0], "acme").await;
    seed(&h, SEEDED[1], "acme").await;

    let cancel = CancellationToken::new();
    let err = h
        .service
        .run(&request(4), "job-dupes", vec![], &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Exhausted(_)));

    let view = h.service.jobs().view("job-dupes").await.unwrap();
    assert_eq!(view.status, JobStatus::Failed);
    assert_eq!(view.error.as_deref(), Some("no_unique_questions"));
    assert!(view.data.is_none());

    let usage = h.usage.records().await;
    assert_eq!(usage[0].status, UsageStatus::Failed);
    assert_eq!(usage[0].attempts, 3);
    assert!(!usage[0].errors.is_empty());
    assert_eq!(h.corpus.len().await, 2);
    assert_eq!(h.backend.deleted_sessions().len(), 1);
}

#[tokio::test]
async fn exhausted_budget_with_some_unique_questions_is_partial() {
    let h = harness(vec![
        Step::Batch(vec![tagged(UNIQUE[0]), tagged(SEEDED[0])]),
        Step::Terminal("expired"),
        Step::Batch(vec![tagged(UNIQUE[1])]),
    ]);
    let held = seed(&h, SEEDED[1], "globex").await;
    seed(&h, SEEDED[0], "acme").await;

    let cancel = CancellationToken::new();
    let result = h
        .service
        .run(&request(4), "job-partial", vec![held.clone()], &cancel)
        .await
        .unwrap();

    assert_eq!(result.status, ResultStatus::PartialSuccess);
    assert_eq!(result.total_questions, 3);
    let texts: Vec<&str> = result.questions.iter().map(|q| q.question.as_str()).collect();
    assert_eq!(texts, vec![UNIQUE[0], UNIQUE[1], SEEDED[1]]);
    assert_eq!(result.questions[2], held);
    assert!(result.note.is_some());

    let view = h.service.jobs().view("job-partial").await.unwrap();
    assert_eq!(view.status, JobStatus::CompletedPartial);

    let usage = h.usage.records().await;
    assert_eq!(usage[0].status, UsageStatus::PartialSuccess);
    assert_eq!(usage[0].attempts, 3);
    assert_eq!(usage[0].errors.len(), 1);
}

#[tokio::test]
async fn timeouts_and_bad_payloads_are_retried() {
    let h = harness(vec![
        Step::Hang,
        Step::Garbage,
        Step::Batch(vec![tagged(UNIQUE[5])]),
    ]);
    let cancel = CancellationToken::new();
    let result = h
        .service
        .run(&request(1), "job-retry", vec![], &cancel)
        .await
        .unwrap();
    assert_eq!(result.status, ResultStatus::Success);

    let usage = h.usage.records().await;
    assert_eq!(usage[0].attempts, 3);
    assert_eq!(usage[0].errors.len(), 2);
    // hung run reports no usage, the other two do
    assert_eq!(usage[0].total_tokens, 300);
}

#[tokio::test]
async fn submit_serves_from_corpus_when_enough_questions_exist() {
    let h = harness(vec![]);
    for text in UNIQUE.iter().take(3) {
        seed(&h, text, "globex").await;
    }
    let queue = RecordingQueue::default();

    let outcome = h.service.submit(request(2), &queue).await.unwrap();
    let SubmitOutcome::Ready { job_id, result } = outcome else {
        panic!("expected an immediate result");
    };
    assert_eq!(result.total_questions, 2);
    assert_eq!(
        h.service.jobs().status(&job_id).await.unwrap(),
        Some(JobStatus::Completed)
    );
    assert!(queue.jobs.lock().unwrap().is_empty());
    assert!(h.backend.prompts().is_empty());
}

#[tokio::test]
async fn submit_queues_the_missing_count_with_held_questions() {
    let h = harness(vec![Step::Batch(vec![tagged(UNIQUE[3]), tagged(UNIQUE[4])])]);
    let first = seed(&h, UNIQUE[0], "globex").await;
    let consumed = seed(&h, UNIQUE[1], "globex").await;
    h.corpus.mark_consumed(&[consumed.id], "acme").await.unwrap();

    let queue = RecordingQueue::default();
    let SubmitOutcome::Queued { job_id } = h.service.submit(request(3), &queue).await.unwrap()
    else {
        panic!("expected the job to be queued");
    };
    assert_eq!(
        h.service.jobs().status(&job_id).await.unwrap(),
        Some(JobStatus::Queued)
    );

    let job = queue.jobs.lock().unwrap().pop().unwrap();
    assert_eq!(job.job_id, job_id);
    assert_eq!(job.request.number_of_questions, 2);
    assert_eq!(job.already_held, vec![first.clone()]);

    let cancel = CancellationToken::new();
    let result = h
        .service
        .run(&job.request, &job.job_id, job.already_held, &cancel)
        .await
        .unwrap();
    assert_eq!(result.total_questions, 3);
    assert_eq!(result.questions.last(), Some(&first));
}

#[tokio::test]
async fn local_queue_runs_jobs_to_completion() {
    let h = harness(vec![Step::Batch(vec![tagged(UNIQUE[2])])]);
    let cancel = CancellationToken::new();
    let (queue, worker) = LocalJobQueue::start(h.service.clone(), cancel.clone());

    let SubmitOutcome::Queued { job_id } = h.service.submit(request(1), &queue).await.unwrap()
    else {
        panic!("expected the job to be queued");
    };

    let mut status = None;
    for _ in 0..200 {
        status = h.service.jobs().status(&job_id).await.unwrap();
        if status.map(|s| s.is_terminal()).unwrap_or(false) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(status, Some(JobStatus::Completed));

    cancel.cancel();
    tokio_test::assert_ok!(worker.await);
}

#[tokio::test]
async fn strict_requests_only_see_own_questions() {
    let h = harness(vec![]);
    h.dedup
        .accept(
            tagged(UNIQUE[0]),
            common::metadata(),
            "globex",
            true,
        )
        .await
        .unwrap();

    let mut strict = request(1);
    strict.strict_question = true;
    let queue = RecordingQueue::default();
    let outcome = h.service.submit(strict.clone(), &queue).await.unwrap();
    assert!(matches!(outcome, SubmitOutcome::Queued { .. }));

    strict.company_id = "globex".to_string();
    let outcome = h.service.submit(strict, &queue).await.unwrap();
    assert!(matches!(outcome, SubmitOutcome::Ready { .. }));
}
