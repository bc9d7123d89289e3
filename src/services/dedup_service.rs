//! Duplicate detection funnel for generated questions.
//!
//! Checks run cheapest first and stop at the first duplicate signal:
//! exact content hash, then MinHash signature similarity against the facet's
//! existing questions, then pairwise TF-IDF cosine similarity against the
//! same set. A question that passes all three is stored with the next id.

use crate::error::Result;
use crate::models::corpus_record::CorpusRecord;
use crate::models::question::{Question, QuestionMetadata};
use crate::services::corpus_service::{CorpusIndex, FacetQuery};
use crate::services::lexical_service::{normalize, LexicalService};
use crate::services::signature_cache::SignatureCache;
use crate::services::signature_service::SignatureService;
use crate::utils::{hashing::content_hash, time::epoch_seconds};
use std::sync::Arc;

pub const DEFAULT_DUPLICATE_THRESHOLD: f64 = 0.85;

#[derive(Debug, Clone, Copy)]
pub struct DedupSettings {
    /// Similarity strictly above this marks a duplicate, for both stages.
    pub threshold: f64,
    pub num_permutations: usize,
}

impl Default for DedupSettings {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_DUPLICATE_THRESHOLD,
            num_permutations: crate::services::signature_service::DEFAULT_PERMUTATIONS,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DuplicateReason {
    ExactHash { existing_id: i64 },
    Signature { existing_id: i64, similarity: f64 },
    Lexical { existing_id: i64, score: f64 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum DedupOutcome {
    Accepted(CorpusRecord),
    Duplicate(DuplicateReason),
}

impl DedupOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, DedupOutcome::Accepted(_))
    }
}

#[derive(Clone)]
pub struct DedupService {
    corpus: Arc<dyn CorpusIndex>,
    cache: SignatureCache,
    signatures: SignatureService,
    lexical: LexicalService,
    threshold: f64,
}

impl DedupService {
    pub fn new(corpus: Arc<dyn CorpusIndex>, cache: SignatureCache, settings: DedupSettings) -> Self {
        Self {
            corpus,
            cache,
            signatures: SignatureService::new(settings.num_permutations),
            lexical: LexicalService::new(),
            threshold: settings.threshold,
        }
    }

    pub fn corpus(&self) -> &Arc<dyn CorpusIndex> {
        &self.corpus
    }

    /// Classifies `candidate` and stores it when novel.
    pub async fn accept(
        &self,
        mut candidate: Question,
        metadata: QuestionMetadata,
        tenant: &str,
        strict: bool,
    ) -> Result<DedupOutcome> {
        candidate.normalize_tags();
        let hash = content_hash(&candidate.question, &metadata)?;

        if let Some(existing) = self.corpus.find_exact(&hash).await? {
            tracing::info!(hash = %hash, existing_id = existing.id(), "exact duplicate found");
            return Ok(DedupOutcome::Duplicate(DuplicateReason::ExactHash {
                existing_id: existing.id(),
            }));
        }

        let normalized = normalize(&candidate.question);
        let signature = self.signatures.signature_of_text(&normalized);

        let existing = self
            .corpus
            .find_candidates(&FacetQuery {
                technology: metadata.technology,
                difficulty: metadata.difficulty,
                tags: candidate.tags.clone(),
                tenant: tenant.to_string(),
                strict,
                limit: None,
            })
            .await?;

        if let Some(reason) = self.find_near_duplicate(&normalized, &signature, &existing).await? {
            return Ok(DedupOutcome::Duplicate(reason));
        }

        self.cache.put(&hash, &signature).await?;

        let record = self
            .corpus
            .insert_with_next_id(CorpusRecord {
                question: candidate,
                hash,
                metadata,
                created_at: epoch_seconds(),
                generated_by: tenant.to_string(),
                strict_question: strict,
                companies_used_by: Vec::new(),
            })
            .await?;
        tracing::info!(question_id = record.id(), hash = %record.hash, "stored new question");
        Ok(DedupOutcome::Accepted(record))
    }

    async fn find_near_duplicate(
        &self,
        normalized: &str,
        signature: &crate::services::signature_service::Signature,
        existing: &[CorpusRecord],
    ) -> Result<Option<DuplicateReason>> {
        if existing.is_empty() {
            return Ok(None);
        }

        let mut existing_texts = Vec::with_capacity(existing.len());
        for record in existing {
            let text = normalize(&record.question.question);
            let other = self
                .cache
                .get_or_compute(&self.signatures, &record.hash, &text)
                .await?;
            let similarity = SignatureService::similarity(signature, &other);
            if similarity > self.threshold {
                tracing::info!(existing_id = record.id(), similarity, "MinHash found duplicate");
                return Ok(Some(DuplicateReason::Signature {
                    existing_id: record.id(),
                    similarity,
                }));
            }
            existing_texts.push((record.id(), text));
        }
        tracing::debug!(candidates = existing.len(), "MinHash found no match, falling back to TF-IDF");

        for (existing_id, text) in existing_texts {
            let score = self.lexical.score(normalized, &text);
            if score > self.threshold {
                tracing::info!(existing_id, score, "TF-IDF found duplicate");
                return Ok(Some(DuplicateReason::Lexical { existing_id, score }));
            }
        }
        Ok(None)
    }
}
