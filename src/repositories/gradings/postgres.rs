use async_trait::async_trait;
use sqlx::PgPool;

use super::{GradingRepository, RepositoryError};
use crate::db::models::GradingRecord;

const COLUMNS: &str = "\
    id, subject, images, paper_image, answer_image, description, status, \
    score, ai_score, total_score, ocr_result, feedback, wrong_questions, \
    correct_answers, needs_review, submit_time, created_at, complete_time, \
    owner_username, owner_role";

#[derive(Clone)]
pub(crate) struct PgGradingRepository {
    pool: PgPool,
}

impl PgGradingRepository {
    pub(crate) fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl GradingRepository for PgGradingRepository {
    async fn find_by_id(&self, id: &str) -> Result<Option<GradingRecord>, RepositoryError> {
        let record = sqlx::query_as::<_, GradingRecord>(&format!(
            "SELECT {COLUMNS} FROM gradings WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn upsert(&self, record: &GradingRecord) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO gradings (
                id, subject, images, paper_image, answer_image, description, status,
                score, ai_score, total_score, ocr_result, feedback, wrong_questions,
                correct_answers, needs_review, submit_time, created_at, complete_time,
                owner_username, owner_role
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15,
                    $16, $17, $18, $19, $20)
            ON CONFLICT (id) DO UPDATE SET
                subject = EXCLUDED.subject,
                images = EXCLUDED.images,
                paper_image = EXCLUDED.paper_image,
                answer_image = EXCLUDED.answer_image,
                description = EXCLUDED.description,
                status = EXCLUDED.status,
                score = EXCLUDED.score,
                ai_score = EXCLUDED.ai_score,
                total_score = EXCLUDED.total_score,
                ocr_result = EXCLUDED.ocr_result,
                feedback = EXCLUDED.feedback,
                wrong_questions = EXCLUDED.wrong_questions,
                correct_answers = EXCLUDED.correct_answers,
                needs_review = EXCLUDED.needs_review,
                submit_time = EXCLUDED.submit_time,
                complete_time = EXCLUDED.complete_time,
                owner_username = EXCLUDED.owner_username,
                owner_role = EXCLUDED.owner_role",
        )
        .bind(&record.id)
        .bind(&record.subject)
        .bind(&record.images)
        .bind(&record.paper_image)
        .bind(&record.answer_image)
        .bind(&record.description)
        .bind(record.status)
        .bind(record.score)
        .bind(record.ai_score)
        .bind(record.total_score)
        .bind(&record.ocr_result)
        .bind(&record.feedback)
        .bind(&record.wrong_questions)
        .bind(&record.correct_answers)
        .bind(record.needs_review)
        .bind(record.submit_time)
        .bind(record.created_at)
        .bind(record.complete_time)
        .bind(&record.owner_username)
        .bind(&record.owner_role)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_recent(
        &self,
        owner: Option<&str>,
        limit: i64,
    ) -> Result<Vec<GradingRecord>, RepositoryError> {
        let records = sqlx::query_as::<_, GradingRecord>(&format!(
            "SELECT {COLUMNS} FROM gradings
             WHERE ($1::text IS NULL OR owner_username = $1)
             ORDER BY submit_time DESC
             LIMIT $2"
        ))
        .bind(owner)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn ping(&self) -> Result<(), RepositoryError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
