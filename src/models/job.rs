use crate::models::question::{Difficulty, Question, Technology};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum JobStatus {
    #[serde(rename = "queued")]
    Queued,
    #[serde(rename = "in-progress")]
    InProgress,
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "completed_partial")]
    CompletedPartial,
    #[serde(rename = "failed")]
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::InProgress => "in-progress",
            JobStatus::Completed => "completed",
            JobStatus::CompletedPartial => "completed_partial",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::CompletedPartial | JobStatus::Failed
        )
    }

    pub fn has_result(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::CompletedPartial)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "in-progress" => Ok(JobStatus::InProgress),
            "completed" => Ok(JobStatus::Completed),
            "completed_partial" => Ok(JobStatus::CompletedPartial),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Success,
    PartialSuccess,
}

/// Payload stored under the job id once a job produced questions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct GenerationResult {
    pub status: ResultStatus,
    pub technology: Technology,
    pub difficulty: Difficulty,
    pub total_questions: usize,
    pub questions: Vec<Question>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl GenerationResult {
    pub fn new(
        status: ResultStatus,
        technology: Technology,
        difficulty: Difficulty,
        questions: Vec<Question>,
    ) -> Self {
        let note = match status {
            ResultStatus::PartialSuccess => Some(
                "Only partial questions could be generated due to duplicates".to_string(),
            ),
            ResultStatus::Success => None,
        };
        Self {
            status,
            technology,
            difficulty,
            total_questions: questions.len(),
            questions,
            note,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_strings_match_wire_format() {
        for status in [
            JobStatus::Queued,
            JobStatus::InProgress,
            JobStatus::Completed,
            JobStatus::CompletedPartial,
            JobStatus::Failed,
        ] {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status.as_str()));
            assert_eq!(status.as_str().parse::<JobStatus>(), Ok(status));
        }
    }

    #[test]
    fn only_finished_jobs_carry_results() {
        assert!(JobStatus::CompletedPartial.has_result());
        assert!(!JobStatus::Failed.has_result());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::InProgress.is_terminal());
    }
}
