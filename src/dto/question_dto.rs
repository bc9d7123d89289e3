use crate::error::{Error, Result};
use crate::models::generation::GenerationRequest;
use crate::models::job::{GenerationResult, JobStatus};
use crate::models::question::{Difficulty, Technology};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct GenerateQuestionsPayload {
    /// React, Golang or Python.
    #[validate(length(min = 1))]
    pub technology_name: String,
    /// easy, medium or hard.
    #[validate(length(min = 1))]
    pub difficulty_level: String,
    #[validate(length(min = 1, message = "At least one concept is required"))]
    pub concepts: Vec<String>,
    #[validate(range(min = 1, message = "At least one question must be requested"))]
    pub number_of_questions: u32,
    #[validate(length(min = 1))]
    pub company_id: String,
    #[serde(default)]
    pub strict_question: bool,
}

impl GenerateQuestionsPayload {
    /// Validates the payload and turns it into a normalised request.
    pub fn into_request(self, max_questions: u32) -> Result<GenerationRequest> {
        self.validate()?;
        if self.number_of_questions > max_questions {
            return Err(Error::BadRequest(format!(
                "number_of_questions must be at most {}",
                max_questions
            )));
        }
        let technology: Technology = self.technology_name.parse().map_err(Error::BadRequest)?;
        let difficulty: Difficulty = self.difficulty_level.parse().map_err(Error::BadRequest)?;

        let mut concepts: Vec<String> = self
            .concepts
            .iter()
            .map(|c| c.trim().to_lowercase())
            .filter(|c| !c.is_empty())
            .collect();
        concepts.sort();
        concepts.dedup();
        if concepts.is_empty() {
            return Err(Error::BadRequest("concepts must not be blank".to_string()));
        }

        let company_id = self.company_id.trim().to_string();
        if company_id.is_empty() {
            return Err(Error::BadRequest("company_id must not be blank".to_string()));
        }

        Ok(GenerationRequest {
            technology,
            difficulty,
            concepts,
            number_of_questions: self.number_of_questions as usize,
            company_id,
            strict_question: self.strict_question,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct ConsumeQuestionsPayload {
    #[serde(default)]
    pub questions: Vec<i64>,
    #[validate(length(min = 1))]
    pub company_id: String,
}

impl ConsumeQuestionsPayload {
    /// Returns the question ids and the trimmed tenant.
    pub fn into_parts(self) -> Result<(Vec<i64>, String)> {
        self.validate()?;
        if self.questions.is_empty() {
            return Err(Error::BadRequest("No question IDs provided".into()));
        }
        let company_id = self.company_id.trim().to_string();
        if company_id.is_empty() {
            return Err(Error::BadRequest("company_id must not be blank".to_string()));
        }
        Ok((self.questions, company_id))
    }
}

/// Returned with 202 when generation was queued.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct QueuedJobResponse {
    pub job_id: String,
    pub status: JobStatus,
}

/// Returned with 200 when the corpus already held enough questions.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CompletedJobResponse {
    pub job_id: String,
    pub status: JobStatus,
    pub data: GenerationResult,
}
