use crate::models::question::{Difficulty, QuestionMetadata, Technology};
use serde::{Deserialize, Serialize};

/// A validated generation request as handed to the queue and the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub technology: Technology,
    pub difficulty: Difficulty,
    /// Lowercase, deduplicated concept tags.
    pub concepts: Vec<String>,
    pub number_of_questions: usize,
    pub company_id: String,
    pub strict_question: bool,
}

impl GenerationRequest {
    pub fn metadata(&self) -> QuestionMetadata {
        QuestionMetadata {
            technology: self.technology,
            difficulty: self.difficulty,
        }
    }
}
