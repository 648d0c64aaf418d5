//! End-to-end exercises of the generation pipeline against a scripted model
//! double: malformed output recovery, the batch-size contract, duplicate
//! starvation, and fatal-error propagation.

use async_trait::async_trait;
use examgen_backend::dto::generation_dto::{Difficulty, GenerationRequest};
use examgen_backend::error::Error;
use examgen_backend::models::question::CorrectOption;
use examgen_backend::services::generation_service::{GenerationService, GenerationTuning};
use examgen_backend::services::llm_service::{ChatModel, LlmError};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Plays back a fixed sequence of responses, one per `complete` call. Once
/// the script runs out, every further call fails transiently.
struct ScriptedModel {
    responses: Mutex<Vec<Result<String, LlmError>>>,
}

impl ScriptedModel {
    fn new(responses: Vec<Result<String, LlmError>>) -> Self {
        Self {
            responses: Mutex::new(responses),
        }
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn complete(
        &self,
        _model: &str,
        _prompt: &str,
        _max_tokens: u32,
    ) -> Result<String, LlmError> {
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            return Err(LlmError::Api {
                status: 503,
                message: "script exhausted".to_string(),
            });
        }
        responses.remove(0)
    }
}

fn pipeline(responses: Vec<Result<String, LlmError>>) -> GenerationService {
    GenerationService::new(
        Arc::new(ScriptedModel::new(responses)),
        vec!["scripted-model".to_string()],
        GenerationTuning {
            backoff_unit: Duration::from_millis(1),
            ..GenerationTuning::default()
        },
    )
}

fn request(count: usize) -> GenerationRequest {
    GenerationRequest {
        subject: "Geography".to_string(),
        exam_name: "SSC CGL".to_string(),
        count,
        difficulty: Difficulty::Hard,
        language: None,
        avoid_list: Vec::new(),
    }
}

fn record(question: &str, suffix: &str) -> String {
    format!(
        concat!(
            r#"{{"question_text":"{q}","option_a":"Red {s}","option_b":"Blue {s}","#,
            r#""option_c":"Green {s}","option_d":"Yellow {s}","correct_option":"B","#,
            r#""explanation":"1. Eliminate the rest.","appeared_in":"CGL 2020"}}"#
        ),
        q = question,
        s = suffix,
    )
}

#[tokio::test]
async fn chatty_response_with_broken_record_still_yields_batch() {
    // Prose around a fenced block, one record truncated beyond use in the
    // middle, and the final bracket missing entirely.
    let body = format!(
        "Sure, here are your questions!\n```json\n[{},\n{{\"question_text\": }},\n{}\n```",
        record("Which strait separates the two southern continents?", "one"),
        record("Name the deepest lake on the planet", "two"),
    );
    let svc = pipeline(vec![Ok(body)]);

    let output = svc.generate(&request(2)).await.unwrap();

    assert_eq!(output.questions.len(), 2);
    assert_eq!(
        output.questions[0].question_text,
        "Which strait separates the two southern continents?"
    );
    assert_eq!(
        output.questions[1].question_text,
        "Name the deepest lake on the planet"
    );
    assert_eq!(output.questions[0].correct_option, CorrectOption::B);
}

#[tokio::test]
async fn unique_service_fills_the_batch_exactly() {
    let texts = [
        "Which mountain pass links the silk route to the plateau?",
        "Who painted the famous cave murals of the western ghats?",
        "What gas dominates the atmosphere of the red planet?",
    ];
    let body = format!(
        "[{},{},{}]",
        record(texts[0], "one"),
        record(texts[1], "two"),
        record(texts[2], "three"),
    );
    let svc = pipeline(vec![Ok(body)]);

    let output = svc.generate(&request(3)).await.unwrap();

    assert_eq!(output.questions.len(), 3);
    let ids: Vec<u32> = output.questions.iter().map(|q| q.id).collect();
    assert_eq!(ids, vec![0, 1, 2]);
    assert!(!output.attempts.is_empty());
}

#[tokio::test]
async fn duplicate_service_returns_partial_batch() {
    let body = format!(
        "[{}]",
        record("Which river carries the most silt to the delta?", "one")
    );
    // Same single question every round until the round cap.
    let svc = pipeline(vec![Ok(body.clone()), Ok(body.clone()), Ok(body)]);

    let output = svc.generate(&request(4)).await.unwrap();

    assert_eq!(output.questions.len(), 1);
    assert_eq!(output.questions[0].id, 0);
}

#[tokio::test]
async fn second_model_round_tops_up_the_batch() {
    let first = format!(
        "[{}]",
        record("Which desert lies in the rain shadow of the Andes?", "one")
    );
    let second = format!(
        "[{},{}]",
        record("Which desert lies in the rain shadow of the Andes?", "one"),
        record("What ocean current warms the north-western coast of Europe?", "two"),
    );
    let svc = pipeline(vec![Ok(first), Ok(second)]);

    let output = svc.generate(&request(2)).await.unwrap();

    assert_eq!(output.questions.len(), 2);
    assert_eq!(output.questions[1].id, 1);
}

#[tokio::test]
async fn fatal_upstream_error_propagates() {
    let svc = pipeline(vec![Err(LlmError::QuotaExhausted(
        "monthly quota spent".to_string(),
    ))]);

    let err = svc.generate(&request(2)).await.unwrap_err();
    assert!(matches!(err, Error::Llm(LlmError::QuotaExhausted(_))));
}

#[tokio::test]
async fn exhausted_script_degrades_to_empty_batch() {
    let svc = pipeline(Vec::new());

    let output = svc.generate(&request(2)).await.unwrap();
    assert!(output.questions.is_empty());
}

#[tokio::test]
async fn accepted_records_come_out_sanitized() {
    let body = concat!(
        r#"[{"question_text":"Which instrument measures atmospheric pressure at sea level?","#,
        r#""option_a":"(a) Barometer","option_b":"b) Hygrometer","option_c":"Anemometer","#,
        r#""option_d":"Thermometer","correct_option":"A","#,
        r#""explanation":"It measures air pressure.\nIt measures air pressure.\nIt measures air pressure.","#,
        r#""appeared_in":"NDA 2019"}]"#
    );
    let svc = pipeline(vec![Ok(body.to_string())]);

    let output = svc.generate(&request(1)).await.unwrap();

    let q = &output.questions[0];
    assert_eq!(q.option_a, "Barometer");
    assert_eq!(q.option_b, "Hygrometer");
    assert_eq!(q.explanation, "1. It measures air pressure.");
}
