pub mod health;
pub mod questions;

use crate::dto::question_dto::{
    CompletedJobResponse, ConsumeQuestionsPayload, GenerateQuestionsPayload, QueuedJobResponse,
};
use crate::middleware::auth::require_api_key;
use crate::models::corpus_record::ConsumeReport;
use crate::models::job::{GenerationResult, JobStatus, ResultStatus};
use crate::models::question::{Difficulty, Question, Technology};
use crate::services::job_service::JobView;
use crate::AppState;
use axum::{
    routing::{get, post},
    Json, Router,
};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        questions::generate_questions,
        questions::get_job,
        questions::consume_questions,
    ),
    components(schemas(
        GenerateQuestionsPayload,
        ConsumeQuestionsPayload,
        QueuedJobResponse,
        CompletedJobResponse,
        JobView,
        JobStatus,
        GenerationResult,
        ResultStatus,
        Question,
        Technology,
        Difficulty,
        ConsumeReport,
    )),
    tags((name = "questions", description = "Question generation and consumption"))
)]
pub struct ApiDoc;

async fn openapi() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Public health and docs routes plus the key-protected question API.
pub fn router(state: AppState) -> Router {
    let questions_api = Router::new()
        .route("/api/questions/generate", post(questions::generate_questions))
        .route("/api/questions/jobs/:job_id", get(questions::get_job))
        .route("/api/questions/consume", post(questions::consume_questions))
        .layer(axum::middleware::from_fn_with_state(
            state.api_key.clone(),
            require_api_key,
        ));

    Router::new()
        .route("/health", get(health::health))
        .route("/api/openapi.json", get(openapi))
        .merge(questions_api)
        .with_state(state)
}
