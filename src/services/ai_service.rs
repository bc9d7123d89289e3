use crate::error::{Error, Result};
use crate::models::question::{Question, Technology};
use crate::models::usage::TokenUsage;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::time::Duration;

/// Name of the function the assistant calls to hand over a question batch.
pub const FORMAT_MCQS_TOOL: &str = "format_mcqs";

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolOutput {
    pub tool_call_id: String,
    pub output: String,
}

/// What one poll of a run reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunState {
    Pending,
    RequiresAction(Vec<ToolCall>),
    Completed(TokenUsage),
    /// failed, cancelled, expired or incomplete
    Terminal(String),
}

/// Conversational session API of the external model. One session spans all
/// attempts of a job so earlier rejections stay in context.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    async fn create_session(&self) -> Result<String>;

    async fn post_message(&self, session_id: &str, content: &str) -> Result<()>;

    async fn start_run(&self, session_id: &str, technology: Technology) -> Result<String>;

    async fn poll_run(&self, session_id: &str, run_id: &str) -> Result<RunState>;

    async fn submit_tool_outputs(
        &self,
        session_id: &str,
        run_id: &str,
        outputs: Vec<ToolOutput>,
    ) -> Result<()>;

    async fn delete_session(&self, session_id: &str) -> Result<()>;
}

#[derive(Debug, Clone, Deserialize)]
struct McqBatch {
    mcq_set: McqSet,
}

#[derive(Debug, Clone, Deserialize)]
struct McqSet {
    #[serde(default)]
    questions: Vec<JsonValue>,
}

/// Parses `format_mcqs` arguments into usable questions.
///
/// Malformed JSON is a payload error. Individual entries that cannot be read,
/// have empty text or fewer than two options are dropped; an out-of-range
/// correct answer falls back to the first option.
pub fn parse_batch(arguments: &str) -> Result<Vec<Question>> {
    let batch: McqBatch = serde_json::from_str(arguments)
        .map_err(|e| Error::Payload(format!("format_mcqs arguments: {}", e)))?;

    let mut questions = Vec::with_capacity(batch.mcq_set.questions.len());
    for raw in batch.mcq_set.questions {
        let mut q: Question = match serde_json::from_value(raw) {
            Ok(q) => q,
            Err(e) => {
                tracing::warn!(error = %e, "skipping unreadable question");
                continue;
            }
        };
        q.question = q.question.trim().to_string();
        if q.question.is_empty() || q.options.len() < 2 {
            continue;
        }
        if q.correct_answer >= q.options.len() {
            q.correct_answer = 0;
        }
        q.id = 0;
        q.normalize_tags();
        questions.push(q);
    }
    Ok(questions)
}

#[derive(Clone)]
pub struct OpenAiAssistantsClient {
    client: Client,
    api_key: String,
    base_url: String,
    assistants: HashMap<Technology, String>,
}

impl OpenAiAssistantsClient {
    pub fn new(api_key: String, client: Client, assistants: HashMap<Technology, String>) -> Self {
        Self {
            client,
            api_key,
            base_url: OPENAI_BASE_URL.to_string(),
            assistants,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn assistant_for(&self, technology: Technology) -> Result<&str> {
        self.assistants
            .get(&technology)
            .map(String::as_str)
            .ok_or_else(|| {
                Error::Config(format!("No assistant configured for technology: {}", technology))
            })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base_url, path))
            .bearer_auth(&self.api_key)
            .header("OpenAI-Beta", "assistants=v2")
            .timeout(Duration::from_secs(60))
    }

    async fn send(&self, builder: RequestBuilder) -> Result<JsonValue> {
        let res = builder.send().await?;
        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("OpenAI API Error {}: {}", status, text).into());
        }
        Ok(res.json().await?)
    }
}

#[derive(Deserialize)]
struct IdResponse {
    id: String,
}

#[derive(Deserialize)]
struct RunResponse {
    status: String,
    #[serde(default)]
    required_action: Option<RequiredAction>,
    #[serde(default)]
    usage: Option<RunUsage>,
}

#[derive(Deserialize)]
struct RequiredAction {
    submit_tool_outputs: Option<SubmitToolOutputs>,
}

#[derive(Deserialize)]
struct SubmitToolOutputs {
    #[serde(default)]
    tool_calls: Vec<RawToolCall>,
}

#[derive(Deserialize)]
struct RawToolCall {
    id: String,
    function: RawFunction,
}

#[derive(Deserialize)]
struct RawFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Deserialize)]
struct RunUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

fn run_state(run: RunResponse) -> RunState {
    match run.status.as_str() {
        "completed" => RunState::Completed(
            run.usage
                .map(|u| TokenUsage {
                    prompt_tokens: u.prompt_tokens,
                    completion_tokens: u.completion_tokens,
                })
                .unwrap_or_default(),
        ),
        "requires_action" => RunState::RequiresAction(
            run.required_action
                .and_then(|a| a.submit_tool_outputs)
                .map(|s| {
                    s.tool_calls
                        .into_iter()
                        .map(|c| ToolCall {
                            id: c.id,
                            name: c.function.name,
                            arguments: c.function.arguments,
                        })
                        .collect()
                })
                .unwrap_or_default(),
        ),
        "failed" | "cancelled" | "expired" | "incomplete" => RunState::Terminal(run.status),
        _ => RunState::Pending,
    }
}

#[async_trait]
impl GenerationBackend for OpenAiAssistantsClient {
    async fn create_session(&self) -> Result<String> {
        let body = self
            .send(self.request(reqwest::Method::POST, "/threads").json(&serde_json::json!({})))
            .await?;
        let created: IdResponse = serde_json::from_value(body)?;
        Ok(created.id)
    }

    async fn post_message(&self, session_id: &str, content: &str) -> Result<()> {
        let path = format!("/threads/{}/messages", session_id);
        self.send(
            self.request(reqwest::Method::POST, &path)
                .json(&serde_json::json!({ "role": "user", "content": content })),
        )
        .await?;
        Ok(())
    }

    async fn start_run(&self, session_id: &str, technology: Technology) -> Result<String> {
        let assistant_id = self.assistant_for(technology)?;
        let path = format!("/threads/{}/runs", session_id);
        let body = self
            .send(
                self.request(reqwest::Method::POST, &path)
                    .json(&serde_json::json!({ "assistant_id": assistant_id })),
            )
            .await?;
        let run: IdResponse = serde_json::from_value(body)?;
        Ok(run.id)
    }

    async fn poll_run(&self, session_id: &str, run_id: &str) -> Result<RunState> {
        let path = format!("/threads/{}/runs/{}", session_id, run_id);
        let body = self.send(self.request(reqwest::Method::GET, &path)).await?;
        let run: RunResponse = serde_json::from_value(body)?;
        Ok(run_state(run))
    }

    async fn submit_tool_outputs(
        &self,
        session_id: &str,
        run_id: &str,
        outputs: Vec<ToolOutput>,
    ) -> Result<()> {
        let path = format!("/threads/{}/runs/{}/submit_tool_outputs", session_id, run_id);
        self.send(
            self.request(reqwest::Method::POST, &path)
                .json(&serde_json::json!({ "tool_outputs": outputs })),
        )
        .await?;
        Ok(())
    }

    async fn delete_session(&self, session_id: &str) -> Result<()> {
        let path = format!("/threads/{}", session_id);
        self.send(self.request(reqwest::Method::DELETE, &path)).await?;
        Ok(())
    }
}
