use crate::error::{Error, Result};
use crate::models::corpus_record::{ConsumeReport, CorpusRecord};
use crate::models::question::{Difficulty, Question, QuestionMetadata, Technology};
use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::collections::HashSet;
use tokio::sync::RwLock;

/// Facet filter for previously accepted questions.
#[derive(Debug, Clone, PartialEq)]
pub struct FacetQuery {
    pub technology: Technology,
    pub difficulty: Difficulty,
    pub tags: Vec<String>,
    /// Records this tenant already consumed are excluded.
    pub tenant: String,
    /// Only records with the same strict flag match; strict queries are
    /// further limited to records generated by `tenant`.
    pub strict: bool,
    pub limit: Option<usize>,
}

impl FacetQuery {
    pub fn matches(&self, record: &CorpusRecord) -> bool {
        record.metadata.technology == self.technology
            && record.metadata.difficulty == self.difficulty
            && record.shares_tag_with(&self.tags)
            && !record.is_consumed_by(&self.tenant)
            && record.strict_question == self.strict
            && (!self.strict || record.generated_by == self.tenant)
    }
}

/// Read/write contract over the store of accepted questions.
#[async_trait]
pub trait CorpusIndex: Send + Sync {
    async fn find_exact(&self, hash: &str) -> Result<Option<CorpusRecord>>;

    async fn find_candidates(&self, query: &FacetQuery) -> Result<Vec<CorpusRecord>>;

    /// `1 + max(existing id)`, or 1 for an empty corpus.
    async fn next_id(&self) -> Result<i64>;

    /// Inserts a record whose question id is already assigned.
    async fn insert(&self, record: &CorpusRecord) -> Result<()>;

    /// Assigns `next_id()` to the record and inserts it as one atomic step.
    async fn insert_with_next_id(&self, record: CorpusRecord) -> Result<CorpusRecord>;

    async fn mark_consumed(&self, ids: &[i64], tenant: &str) -> Result<ConsumeReport>;
}

const ID_ALLOCATION_LOCK: i64 = 0x5155_4553_5449_4f4e;

const RECORD_COLUMNS: &str = "question_id, question, hash, technology, difficulty, tags, \
     created_at, generated_by, strict_question, companies_used_by";

#[derive(Clone)]
pub struct PgCorpusIndex {
    pool: PgPool,
}

impl PgCorpusIndex {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn insert_in(tx: &mut Transaction<'_, Postgres>, record: &CorpusRecord) -> Result<()> {
        let res = sqlx::query(
            r#"
            INSERT INTO corpus_records (
                question_id, question, hash, technology, difficulty, tags,
                created_at, generated_by, strict_question, companies_used_by
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(record.id())
        .bind(Json(&record.question))
        .bind(&record.hash)
        .bind(record.metadata.technology.as_str())
        .bind(record.metadata.difficulty.as_str())
        .bind(&record.question.tags)
        .bind(record.created_at)
        .bind(&record.generated_by)
        .bind(record.strict_question)
        .bind(&record.companies_used_by)
        .execute(&mut **tx)
        .await;

        match res {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Err(Error::Store(
                format!("question id {} already exists", record.id()),
            )),
            Err(e) => Err(e.into()),
        }
    }
}

fn record_from_row(row: &PgRow) -> Result<CorpusRecord> {
    let Json(mut question): Json<Question> = row.try_get("question")?;
    question.id = row.try_get("question_id")?;
    let technology: String = row.try_get("technology")?;
    let difficulty: String = row.try_get("difficulty")?;
    Ok(CorpusRecord {
        question,
        hash: row.try_get("hash")?,
        metadata: QuestionMetadata {
            technology: technology.parse().map_err(Error::Store)?,
            difficulty: difficulty.parse().map_err(Error::Store)?,
        },
        created_at: row.try_get("created_at")?,
        generated_by: row.try_get("generated_by")?,
        strict_question: row.try_get("strict_question")?,
        companies_used_by: row.try_get("companies_used_by")?,
    })
}

#[async_trait]
impl CorpusIndex for PgCorpusIndex {
    async fn find_exact(&self, hash: &str) -> Result<Option<CorpusRecord>> {
        let sql = format!(
            "SELECT {} FROM corpus_records WHERE hash = $1 LIMIT 1",
            RECORD_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(hash)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(record_from_row).transpose()
    }

    async fn find_candidates(&self, query: &FacetQuery) -> Result<Vec<CorpusRecord>> {
        let sql = format!(
            r#"
            SELECT {} FROM corpus_records
            WHERE technology = $1
              AND difficulty = $2
              AND tags && $3::text[]
              AND NOT ($4 = ANY(companies_used_by))
              AND strict_question = $5
              AND ($5 = FALSE OR generated_by = $4)
            ORDER BY question_id ASC
            LIMIT $6
            "#,
            RECORD_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(query.technology.as_str())
            .bind(query.difficulty.as_str())
            .bind(&query.tags)
            .bind(&query.tenant)
            .bind(query.strict)
            .bind(query.limit.map(|l| l as i64))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(record_from_row).collect()
    }

    async fn next_id(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COALESCE(MAX(question_id), 0) + 1 AS next_id FROM corpus_records")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("next_id")?)
    }

    async fn insert(&self, record: &CorpusRecord) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        Self::insert_in(&mut tx, record).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn insert_with_next_id(&self, mut record: CorpusRecord) -> Result<CorpusRecord> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(ID_ALLOCATION_LOCK)
            .execute(&mut *tx)
            .await?;
        let row = sqlx::query("SELECT COALESCE(MAX(question_id), 0) + 1 AS next_id FROM corpus_records")
            .fetch_one(&mut *tx)
            .await?;
        record.question.id = row.try_get("next_id")?;
        Self::insert_in(&mut tx, &record).await?;
        tx.commit().await?;
        Ok(record)
    }

    async fn mark_consumed(&self, ids: &[i64], tenant: &str) -> Result<ConsumeReport> {
        let mut tx = self.pool.begin().await?;
        let matched: i64 = sqlx::query(
            "SELECT COUNT(*) AS matched FROM corpus_records WHERE question_id = ANY($1)",
        )
        .bind(ids)
        .fetch_one(&mut *tx)
        .await?
        .try_get("matched")?;
        let updated = sqlx::query(
            r#"
            UPDATE corpus_records
            SET companies_used_by = array_append(companies_used_by, $2)
            WHERE question_id = ANY($1) AND NOT ($2 = ANY(companies_used_by))
            "#,
        )
        .bind(ids)
        .bind(tenant)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(ConsumeReport {
            matched_count: matched as u64,
            modified_count: updated.rows_affected(),
        })
    }
}

/// Corpus kept in process memory. Id assignment and insertion share one
/// write lock, so concurrent acceptances never collide.
#[derive(Default)]
pub struct MemoryCorpusIndex {
    records: RwLock<Vec<CorpusRecord>>,
}

impl MemoryCorpusIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn all(&self) -> Vec<CorpusRecord> {
        self.records.read().await.clone()
    }
}

fn max_id(records: &[CorpusRecord]) -> i64 {
    records.iter().map(CorpusRecord::id).max().unwrap_or(0)
}

#[async_trait]
impl CorpusIndex for MemoryCorpusIndex {
    async fn find_exact(&self, hash: &str) -> Result<Option<CorpusRecord>> {
        let records = self.records.read().await;
        Ok(records.iter().find(|r| r.hash == hash).cloned())
    }

    async fn find_candidates(&self, query: &FacetQuery) -> Result<Vec<CorpusRecord>> {
        let records = self.records.read().await;
        let mut found: Vec<CorpusRecord> =
            records.iter().filter(|r| query.matches(r)).cloned().collect();
        found.sort_by_key(CorpusRecord::id);
        if let Some(limit) = query.limit {
            found.truncate(limit);
        }
        Ok(found)
    }

    async fn next_id(&self) -> Result<i64> {
        Ok(max_id(&self.records.read().await) + 1)
    }

    async fn insert(&self, record: &CorpusRecord) -> Result<()> {
        let mut records = self.records.write().await;
        if records.iter().any(|r| r.id() == record.id()) {
            return Err(Error::Store(format!(
                "question id {} already exists",
                record.id()
            )));
        }
        records.push(record.clone());
        Ok(())
    }

    async fn insert_with_next_id(&self, mut record: CorpusRecord) -> Result<CorpusRecord> {
        let mut records = self.records.write().await;
        record.question.id = max_id(&records) + 1;
        records.push(record.clone());
        Ok(record)
    }

    async fn mark_consumed(&self, ids: &[i64], tenant: &str) -> Result<ConsumeReport> {
        let wanted: HashSet<i64> = ids.iter().copied().collect();
        let mut report = ConsumeReport::default();
        let mut records = self.records.write().await;
        for record in records.iter_mut().filter(|r| wanted.contains(&r.id())) {
            report.matched_count += 1;
            if !record.is_consumed_by(tenant) {
                record.companies_used_by.push(tenant.to_string());
                report.modified_count += 1;
            }
        }
        Ok(report)
    }
}
