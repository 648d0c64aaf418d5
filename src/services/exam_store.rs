use crate::dto::generation_dto::GenerationRequest;
use crate::error::Result;
use crate::models::question::Question;
use crate::services::generation_service::AttemptEvent;
use serde_json::Value as JsonValue;
use sqlx::{PgPool, Row};
use uuid::Uuid;

/// Persistence collaborator: finalized batches, prior-question lookup for the
/// exclusion list, and the append-only generation event log. The pipeline
/// core never depends on the storage format chosen here.
#[derive(Clone)]
pub struct ExamStore {
    pool: PgPool,
}

impl ExamStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn store_batch(
        &self,
        user_id: Uuid,
        request: &GenerationRequest,
        questions: &[Question],
    ) -> Result<Uuid> {
        let questions_json = serde_json::to_value(questions)?;
        let row = sqlx::query(
            r#"
            INSERT INTO generated_exams
                (user_id, subject, exam_name, difficulty, language, requested_count, questions)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id
            "#,
        )
        .bind(user_id)
        .bind(&request.subject)
        .bind(&request.exam_name)
        .bind(request.difficulty.to_string())
        .bind(request.language.as_deref())
        .bind(request.count as i32)
        .bind(questions_json)
        .fetch_one(&self.pool)
        .await?;
        let id: Uuid = row.try_get("id")?;
        Ok(id)
    }

    /// Question texts of the user's most recent batches, newest first. Feeds
    /// the exclusion list of the next generation request.
    pub async fn recent_question_texts(&self, user_id: Uuid, exam_limit: i64) -> Result<Vec<String>> {
        let rows = sqlx::query(
            r#"
            SELECT questions FROM generated_exams
            WHERE user_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(exam_limit)
        .fetch_all(&self.pool)
        .await?;

        let mut texts = Vec::new();
        for row in rows {
            let questions: JsonValue = row.try_get("questions")?;
            if let Some(items) = questions.as_array() {
                for item in items {
                    if let Some(text) = item.get("question_text").and_then(JsonValue::as_str) {
                        texts.push(text.to_string());
                    }
                }
            }
        }
        Ok(texts)
    }

    pub async fn append_events(&self, exam_id: Option<Uuid>, events: &[AttemptEvent]) -> Result<()> {
        for event in events {
            sqlx::query(
                r#"
                INSERT INTO generation_events (exam_id, model, attempt, outcome)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(exam_id)
            .bind(&event.model)
            .bind(event.attempt as i32)
            .bind(event.outcome.to_string())
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    pub async fn recent_exams(&self, user_id: Uuid, limit: i64) -> Result<Vec<JsonValue>> {
        let rows = sqlx::query(
            r#"
            SELECT id, subject, exam_name, difficulty, language, requested_count, questions, created_at
            FROM generated_exams
            WHERE user_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut exams = Vec::new();
        for row in rows {
            exams.push(serde_json::json!({
                "id": row.try_get::<Uuid, _>("id")?,
                "subject": row.try_get::<String, _>("subject")?,
                "exam_name": row.try_get::<String, _>("exam_name")?,
                "difficulty": row.try_get::<String, _>("difficulty")?,
                "language": row.try_get::<Option<String>, _>("language")?,
                "requested_count": row.try_get::<i32, _>("requested_count")?,
                "questions": row.try_get::<JsonValue, _>("questions")?,
                "created_at": row.try_get::<chrono::DateTime<chrono::Utc>, _>("created_at")?,
            }));
        }
        Ok(exams)
    }
}
