use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};

use crate::{
    dto::question_dto::{
        CompletedJobResponse, ConsumeQuestionsPayload, GenerateQuestionsPayload,
        QueuedJobResponse,
    },
    error::{Error, Result},
    models::corpus_record::ConsumeReport,
    models::job::JobStatus,
    services::generation_service::SubmitOutcome,
    services::job_service::JobView,
    AppState,
};

#[utoipa::path(
    post,
    path = "/api/questions/generate",
    request_body = GenerateQuestionsPayload,
    responses(
        (status = 200, description = "Enough unused questions were already stored", body = CompletedJobResponse),
        (status = 202, description = "Generation queued", body = QueuedJobResponse),
        (status = 400, description = "Invalid payload"),
        (status = 401, description = "Missing or invalid API key")
    ),
    tag = "questions"
)]
#[axum::debug_handler]
pub async fn generate_questions(
    State(state): State<AppState>,
    Json(payload): Json<GenerateQuestionsPayload>,
) -> Result<Response> {
    let request = payload.into_request(state.max_questions_per_request)?;
    tracing::info!(
        company_id = %request.company_id,
        technology = %request.technology,
        difficulty = %request.difficulty,
        number_of_questions = request.number_of_questions,
        "generation requested"
    );

    match state.generation.submit(request, state.queue.as_ref()).await? {
        SubmitOutcome::Ready { job_id, result } => Ok((
            StatusCode::OK,
            Json(CompletedJobResponse {
                job_id,
                status: JobStatus::Completed,
                data: result,
            }),
        )
            .into_response()),
        SubmitOutcome::Queued { job_id } => Ok((
            StatusCode::ACCEPTED,
            Json(QueuedJobResponse {
                job_id,
                status: JobStatus::Queued,
            }),
        )
            .into_response()),
    }
}

#[utoipa::path(
    get,
    path = "/api/questions/jobs/{job_id}",
    params(
        ("job_id" = String, Path, description = "Job ID returned by the generate call")
    ),
    responses(
        (status = 200, description = "Current job state", body = JobView),
        (status = 404, description = "Job not found")
    ),
    tag = "questions"
)]
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobView>> {
    let view = state.generation.jobs().view(&job_id).await?;
    Ok(Json(view))
}

#[utoipa::path(
    post,
    path = "/api/questions/consume",
    request_body = ConsumeQuestionsPayload,
    responses(
        (status = 200, description = "Questions marked as used", body = ConsumeReport),
        (status = 400, description = "No question IDs provided"),
        (status = 404, description = "No matching questions found")
    ),
    tag = "questions"
)]
#[axum::debug_handler]
pub async fn consume_questions(
    State(state): State<AppState>,
    Json(payload): Json<ConsumeQuestionsPayload>,
) -> Result<Json<ConsumeReport>> {
    let (questions, company_id) = payload.into_parts()?;
    let report = state.corpus.mark_consumed(&questions, &company_id).await?;
    if report.matched_count == 0 {
        return Err(Error::NotFound("No matching questions found".into()));
    }
    tracing::info!(
        company_id = %company_id,
        matched = report.matched_count,
        modified = report.modified_count,
        "questions marked as used"
    );
    Ok(Json(report))
}
