use crate::models::question::{Question, QuestionMetadata};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// An accepted question as persisted in the corpus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorpusRecord {
    pub question: Question,
    pub hash: String,
    pub metadata: QuestionMetadata,
    /// Epoch seconds.
    pub created_at: i64,
    pub generated_by: String,
    pub strict_question: bool,
    #[serde(default)]
    pub companies_used_by: Vec<String>,
}

impl CorpusRecord {
    pub fn id(&self) -> i64 {
        self.question.id
    }

    pub fn is_consumed_by(&self, tenant: &str) -> bool {
        self.companies_used_by.iter().any(|c| c == tenant)
    }

    pub fn shares_tag_with(&self, tags: &[String]) -> bool {
        self.question.tags.iter().any(|t| tags.contains(t))
    }
}

/// Outcome of adding a tenant to the consumption set of several records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, ToSchema)]
pub struct ConsumeReport {
    pub matched_count: u64,
    pub modified_count: u64,
}
