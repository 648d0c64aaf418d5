use crate::dto::generation_dto::{GenerateExamPayload, GenerationRequest, TranslateExamPayload};
use crate::error::Result;
use crate::services::generation_service::GenerationOutput;
use crate::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;
use std::time::Duration;
use uuid::Uuid;
use validator::Validate;

const GENERATION_TIMEOUT: Duration = Duration::from_secs(300);

/// How many stored batches feed the exclusion list of a new request.
const AVOID_FETCH_EXAMS: i64 = 10;

#[axum::debug_handler]
pub async fn generate_exam(
    State(state): State<AppState>,
    Json(payload): Json<GenerateExamPayload>,
) -> Result<impl IntoResponse> {
    payload.validate()?;
    let config = crate::config::get_config();
    let count = payload
        .num_questions
        .unwrap_or(10)
        .min(config.max_questions as u32) as usize;

    let avoid_list = match payload.user_id {
        Some(user_id) => match state
            .exam_store
            .recent_question_texts(user_id, AVOID_FETCH_EXAMS)
            .await
        {
            Ok(texts) => texts,
            Err(err) => {
                tracing::warn!(error = %err, "could not load prior questions, generating without exclusion list");
                Vec::new()
            }
        },
        None => Vec::new(),
    };

    let request = GenerationRequest {
        subject: payload.subject.clone(),
        exam_name: payload.exam_name.clone(),
        count,
        difficulty: payload.difficulty.unwrap_or_default(),
        language: payload.language.clone(),
        avoid_list,
    };

    let generation = state.generation_service.generate(&request);
    let output = match tokio::time::timeout(GENERATION_TIMEOUT, generation).await {
        Ok(Ok(output)) => output,
        Ok(Err(err)) => return Err(err),
        Err(_) => {
            tracing::warn!("generation timed out");
            GenerationOutput::empty()
        }
    };

    let mut questions = output.questions;
    if let Some(language) = request.language.as_deref() {
        if !language.eq_ignore_ascii_case("english") && !questions.is_empty() {
            questions = state
                .generation_service
                .translate(&questions, language)
                .await;
        }
    }

    let mut exam_id = None;
    if let Some(user_id) = payload.user_id {
        if !questions.is_empty() {
            exam_id = Some(
                state
                    .exam_store
                    .store_batch(user_id, &request, &questions)
                    .await?,
            );
        }
    }
    state.exam_store.append_events(exam_id, &output.attempts).await?;

    let body = json!({
        "exam_id": exam_id,
        "requested": count,
        "returned": questions.len(),
        "partial": questions.len() < count,
        "questions": questions,
        "attempts": output.attempts,
    });
    Ok((StatusCode::OK, Json(body)))
}

#[axum::debug_handler]
pub async fn translate_exam(
    State(state): State<AppState>,
    Json(payload): Json<TranslateExamPayload>,
) -> Result<impl IntoResponse> {
    payload.validate()?;
    let translated = state
        .generation_service
        .translate(&payload.questions, &payload.target_language)
        .await;
    Ok(Json(json!({ "questions": translated })))
}

#[axum::debug_handler]
pub async fn recent_exams(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let exams = state.exam_store.recent_exams(user_id, 10).await?;
    Ok(Json(json!({ "exams": exams })))
}
