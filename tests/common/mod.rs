#![allow(dead_code)]

use async_trait::async_trait;
use question_bank_backend::{
    build_generation_service,
    database::kv_store::MemoryKeyValueStore,
    error::Result,
    models::generation::GenerationRequest,
    models::question::{Difficulty, Question, QuestionMetadata, Technology},
    models::usage::TokenUsage,
    services::{
        ai_service::{GenerationBackend, RunState, ToolCall, ToolOutput, FORMAT_MCQS_TOOL},
        corpus_service::MemoryCorpusIndex,
        dedup_service::{DedupOutcome, DedupService, DedupSettings},
        generation_service::{GenerationService, GenerationSettings},
        signature_cache::SignatureCache,
        usage_service::MemoryUsageStore,
    },
    ServiceSettings, Stores,
};
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// What the fake model does for one run.
#[derive(Debug, Clone)]
pub enum Step {
    Batch(Vec<Question>),
    Terminal(&'static str),
    Hang,
    Garbage,
}

#[derive(Default)]
struct Inner {
    steps: VecDeque<Step>,
    runs: HashMap<String, (Step, u32)>,
    prompts: Vec<String>,
    deleted: Vec<String>,
    run_seq: u32,
}

/// Generation backend that plays back a fixed script, one step per run.
#[derive(Default)]
pub struct ScriptedBackend {
    inner: Mutex<Inner>,
}

impl ScriptedBackend {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                steps: steps.into(),
                ..Inner::default()
            }),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.inner.lock().unwrap().prompts.clone()
    }

    pub fn deleted_sessions(&self) -> Vec<String> {
        self.inner.lock().unwrap().deleted.clone()
    }
}

#[async_trait]
impl GenerationBackend for ScriptedBackend {
    async fn create_session(&self) -> Result<String> {
        Ok("thread_test".to_string())
    }

    async fn post_message(&self, _session_id: &str, content: &str) -> Result<()> {
        self.inner.lock().unwrap().prompts.push(content.to_string());
        Ok(())
    }

    async fn start_run(&self, _session_id: &str, _technology: Technology) -> Result<String> {
        let mut inner = self.inner.lock().unwrap();
        inner.run_seq += 1;
        let run_id = format!("run_{}", inner.run_seq);
        let step = inner.steps.pop_front().unwrap_or(Step::Terminal("failed"));
        inner.runs.insert(run_id.clone(), (step, 0));
        Ok(run_id)
    }

    async fn poll_run(&self, _session_id: &str, run_id: &str) -> Result<RunState> {
        let mut inner = self.inner.lock().unwrap();
        let (step, polls) = inner.runs.get_mut(run_id).expect("unknown run");
        *polls += 1;
        let done = RunState::Completed(TokenUsage {
            prompt_tokens: 100,
            completion_tokens: 50,
        });
        Ok(match step {
            Step::Batch(questions) if *polls == 1 => RunState::RequiresAction(vec![ToolCall {
                id: format!("call_{}", run_id),
                name: FORMAT_MCQS_TOOL.to_string(),
                arguments: json!({
                    "mcq_set": {
                        "technology": "Golang",
                        "difficulty": "medium",
                        "questions": questions,
                    }
                })
                .to_string(),
            }]),
            Step::Garbage if *polls == 1 => RunState::RequiresAction(vec![ToolCall {
                id: format!("call_{}", run_id),
                name: FORMAT_MCQS_TOOL.to_string(),
                arguments: "{\"mcq_set\": oops".to_string(),
            }]),
            Step::Batch(_) | Step::Garbage => done,
            Step::Terminal(status) => RunState::Terminal(status.to_string()),
            Step::Hang => RunState::Pending,
        })
    }

    async fn submit_tool_outputs(
        &self,
        _session_id: &str,
        _run_id: &str,
        _outputs: Vec<ToolOutput>,
    ) -> Result<()> {
        Ok(())
    }

    async fn delete_session(&self, session_id: &str) -> Result<()> {
        self.inner.lock().unwrap().deleted.push(session_id.to_string());
        Ok(())
    }
}

pub struct Harness {
    pub corpus: Arc<MemoryCorpusIndex>,
    pub usage: Arc<MemoryUsageStore>,
    pub kv: Arc<MemoryKeyValueStore>,
    pub backend: Arc<ScriptedBackend>,
    pub dedup: DedupService,
    pub service: GenerationService,
    pub stores: Stores,
}

pub fn settings() -> ServiceSettings {
    ServiceSettings {
        dedup: DedupSettings::default(),
        generation: GenerationSettings {
            max_attempts: 3,
            poll_max_iterations: 5,
            poll_interval: Duration::from_millis(1),
        },
        signature_cache_ttl: None,
    }
}

pub fn harness(steps: Vec<Step>) -> Harness {
    let corpus = Arc::new(MemoryCorpusIndex::new());
    let usage = Arc::new(MemoryUsageStore::new());
    let kv = Arc::new(MemoryKeyValueStore::new());
    let backend = Arc::new(ScriptedBackend::new(steps));
    let stores = Stores {
        kv: kv.clone(),
        corpus: corpus.clone(),
        usage: usage.clone(),
    };
    let settings = settings();
    let dedup = DedupService::new(
        corpus.clone(),
        SignatureCache::new(kv.clone(), None),
        settings.dedup,
    );
    let service = build_generation_service(&stores, backend.clone(), settings);
    Harness {
        corpus,
        usage,
        kv,
        backend,
        dedup,
        service,
        stores,
    }
}

pub fn metadata() -> QuestionMetadata {
    QuestionMetadata {
        technology: Technology::Golang,
        difficulty: Difficulty::Medium,
    }
}

pub fn question(text: &str, tags: &[&str]) -> Question {
    Question {
        id: 0,
        question: text.to_string(),
        options: vec![
            "first".to_string(),
            "second".to_string(),
            "third".to_string(),
            "fourth".to_string(),
        ],
        correct_answer: 1,
        explanation: Some("because".to_string()),
        tags: tags.iter().map(|t| t.to_string()).collect(),
    }
}

pub fn request(n: usize) -> GenerationRequest {
    GenerationRequest {
        technology: Technology::Golang,
        difficulty: Difficulty::Medium,
        concepts: vec!["concurrency".to_string()],
        number_of_questions: n,
        company_id: "acme".to_string(),
        strict_question: false,
    }
}

/// Stores a question in the corpus as if an earlier job had accepted it.
pub async fn seed(h: &Harness, text: &str, tenant: &str) -> Question {
    match h
        .dedup
        .accept(question(text, &["concurrency"]), metadata(), tenant, false)
        .await
        .expect("seed accept")
    {
        DedupOutcome::Accepted(record) => record.question,
        other => panic!("seed question rejected: {:?}", other),
    }
}

pub const UNIQUE: [&str; 6] = [
    "How does a Go closure capture loop variables before version 1.22?",
    "Which keyword launches a new goroutine?",
    "What happens when you send on a closed channel?",
    "Why would a program block on sync.WaitGroup forever?",
    "Which built-in function reports the capacity of a slice?",
    "What does the select statement do when several cases are ready?",
];

pub const SEEDED: [&str; 2] = [
    "What is the zero value of a map in Go?",
    "How do you declare a buffered channel with capacity ten?",
];
