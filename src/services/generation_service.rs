use crate::dto::generation_dto::GenerationRequest;
use crate::error::Result;
use crate::models::question::Question;
use crate::services::llm_service::{ChatModel, LlmError};
use crate::utils::json_recovery::parse_batch;
use crate::utils::sanitize::sanitize_question;
use crate::utils::similarity::{overlap_ratio, tokens};
use chrono::Utc;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

const GENERATION_PROMPT: &str = r#"You are an expert examiner for competitive exams.
Today's Date: {current_date}

Generate {num_questions} multiple-choice questions (MCQs) for the {exam_name} exam for the subject {subject}.
DIFFICULTY LEVEL: {difficulty}

STRICT REQUIREMENTS:
- The output MUST be a valid JSON list. In JSON strings, backslashes MUST be escaped (e.g., "\\frac").
- You MUST generate EXACTLY {num_questions} questions, every one directly related to {subject}.
- All four options MUST be different, and every question must be distinct from the others.
- Do NOT include option labels like '(a)' or 'A.' inside the option text.
- Use LaTeX surrounded by $ for mathematical expressions; NEVER use LaTeX markup for plain text or transliteration.

Each question object must have:
1. question_text: the question itself, without formulas or hints for solving it.
2. option_a, option_b, option_c, option_d: the four answer options, content only.
3. correct_option: the letter (A, B, C, or D).
4. explanation: a numbered step-by-step calculation for quantitative subjects, or one concise line proving the answer for everything else.
5. appeared_in: where the question was previously asked (e.g., "CDS 2022").
{avoid_context}
Format the output strictly as a JSON list of objects."#;

const TRANSLATION_PROMPT: &str = r#"You are a professional translator specializing in competitive exam content.
Translate the following list of multiple-choice questions into {target_language}.

IMPORTANT:
1. Translate everything EXCEPT LaTeX expressions (e.g., $E=mc^2$). Keep LaTeX exactly as is, including the $ delimiters.
2. NEVER use LaTeX markers for phonetic romanization; write words in their natural script.
3. Keep the EXACT same JSON structure, and keep 'correct_option' as a letter (A, B, C, or D).
4. Translate 'question_text', the four options, 'explanation', and 'appeared_in'.

Questions to translate:
{questions_json}

Return ONLY the translated raw JSON."#;

/// Configuration constants of the diversity and retry behavior. Fixed by
/// observation rather than derivation, so they live in one tunable struct.
#[derive(Debug, Clone)]
pub struct GenerationTuning {
    /// Reject a candidate whose token overlap with any accepted record
    /// reaches this ratio.
    pub similarity_threshold: f32,
    /// Candidates with fewer word tokens than this skip the similarity
    /// check: not enough signal.
    pub min_similarity_tokens: usize,
    /// Maximum top-up rounds per invocation.
    pub max_rounds: u32,
    /// Extra attempts on the same model after a rate-limit signal.
    pub retry_cap: u32,
    /// Backoff is (attempt + 1) x this unit.
    pub backoff_unit: Duration,
    /// Most-recent window of exclusion entries carried into the prompt.
    pub avoid_window: usize,
    /// Each exclusion entry is clipped to this many characters.
    pub avoid_prefix_chars: usize,
    /// Token budget per model attempt.
    pub max_tokens: u32,
}

impl Default for GenerationTuning {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.45,
            min_similarity_tokens: 5,
            max_rounds: 3,
            retry_cap: 1,
            backoff_unit: Duration::from_secs(3),
            avoid_window: 50,
            avoid_prefix_chars: 120,
            max_tokens: 4096,
        }
    }
}

/// One orchestration attempt, recorded for the operational log.
#[derive(Debug, Clone, Serialize)]
pub struct AttemptEvent {
    pub model: String,
    pub attempt: u32,
    pub outcome: AttemptOutcome,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "detail")]
pub enum AttemptOutcome {
    Parsed(usize),
    Empty,
    RateLimited,
    Transient(String),
    Fatal(String),
}

impl fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptOutcome::Parsed(count) => write!(f, "parsed {count} questions"),
            AttemptOutcome::Empty => write!(f, "no questions recovered"),
            AttemptOutcome::RateLimited => write!(f, "rate limited"),
            AttemptOutcome::Transient(msg) => write!(f, "transient failure: {msg}"),
            AttemptOutcome::Fatal(msg) => write!(f, "fatal failure: {msg}"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerationOutput {
    pub questions: Vec<Question>,
    pub attempts: Vec<AttemptEvent>,
}

impl GenerationOutput {
    pub fn empty() -> Self {
        Self {
            questions: Vec::new(),
            attempts: Vec::new(),
        }
    }
}

/// States of the fallback cascade. Terminal states are Fatal and Exhausted;
/// a successful parse returns out of the loop directly.
enum CascadeState {
    Trying { model: usize, attempt: u32 },
    Backoff { model: usize, attempt: u32 },
    NextModel { model: usize },
    Fatal(LlmError),
    Exhausted,
}

#[derive(Clone)]
pub struct GenerationService {
    llm: Arc<dyn ChatModel>,
    models: Vec<String>,
    tuning: GenerationTuning,
}

impl GenerationService {
    pub fn new(llm: Arc<dyn ChatModel>, models: Vec<String>, tuning: GenerationTuning) -> Self {
        Self { llm, models, tuning }
    }

    /// Runs generation rounds until the requested count is reached or the
    /// round cap is hit, filtering near-duplicates as candidates arrive.
    /// A short or empty batch is a valid outcome; only fatal upstream errors
    /// surface as `Err`.
    pub async fn generate(&self, request: &GenerationRequest) -> Result<GenerationOutput> {
        let mut accepted: Vec<Question> = Vec::new();
        let mut attempts: Vec<AttemptEvent> = Vec::new();

        for round in 0..self.tuning.max_rounds {
            if accepted.len() >= request.count {
                break;
            }
            let remaining = request.count - accepted.len();
            let avoid_context = self.build_avoid_context(request, &accepted);
            let prompt = render_generation_prompt(request, remaining, &avoid_context);

            let Some(candidates) = self.run_model_cascade(&prompt, &mut attempts).await? else {
                tracing::warn!(round, "all candidate models exhausted, stopping early");
                break;
            };

            let mut fresh = 0usize;
            for candidate in candidates {
                if accepted.len() >= request.count {
                    break;
                }
                if self.is_near_duplicate(&candidate, &accepted) {
                    continue;
                }
                accepted.push(candidate);
                fresh += 1;
            }
            tracing::info!(round, fresh, total = accepted.len(), "round finished");
        }

        accepted.truncate(request.count);
        for question in accepted.iter_mut() {
            sanitize_question(question);
        }
        for (idx, question) in accepted.iter_mut().enumerate() {
            question.id = idx as u32;
        }

        Ok(GenerationOutput {
            questions: accepted,
            attempts,
        })
    }

    /// Best-effort translation of a finished batch. Any failure — network,
    /// fatal upstream, unparseable or short output — returns the original
    /// records unchanged.
    pub async fn translate(&self, questions: &[Question], target_language: &str) -> Vec<Question> {
        if questions.is_empty()
            || target_language.trim().is_empty()
            || target_language.trim().eq_ignore_ascii_case("english")
        {
            return questions.to_vec();
        }
        let Some(primary) = self.models.first() else {
            return questions.to_vec();
        };
        let Ok(serialized) = serde_json::to_string(questions) else {
            return questions.to_vec();
        };

        let prompt = TRANSLATION_PROMPT
            .replace("{target_language}", target_language)
            .replace("{questions_json}", &serialized);

        let raw = match self
            .llm
            .complete(primary, &prompt, self.tuning.max_tokens)
            .await
        {
            Ok(raw) => raw,
            Err(err) => {
                tracing::warn!(error = %err, "translation failed, returning original batch");
                return questions.to_vec();
            }
        };

        let mut translated = coerce_candidates(&parse_batch(&raw));
        if translated.len() != questions.len() {
            tracing::warn!(
                expected = questions.len(),
                got = translated.len(),
                "translated batch has wrong length, returning original"
            );
            return questions.to_vec();
        }
        for (idx, question) in translated.iter_mut().enumerate() {
            question.id = questions[idx].id;
            sanitize_question(question);
        }
        translated
    }

    /// Tries candidate models strictly in order. Rate limits back off and
    /// retry the same model up to the retry cap; fatal errors abort the
    /// cascade; anything else moves on. `None` means every model was
    /// exhausted without a usable batch.
    async fn run_model_cascade(
        &self,
        prompt: &str,
        attempts: &mut Vec<AttemptEvent>,
    ) -> Result<Option<Vec<Question>>> {
        if self.models.is_empty() {
            return Ok(None);
        }
        let mut state = CascadeState::Trying {
            model: 0,
            attempt: 0,
        };
        loop {
            state = match state {
                CascadeState::Trying { model, attempt } => {
                    let model_id = &self.models[model];
                    tracing::info!(model = %model_id, attempt, "requesting question batch");
                    match self
                        .llm
                        .complete(model_id, prompt, self.tuning.max_tokens)
                        .await
                    {
                        Ok(raw) => {
                            let candidates = coerce_candidates(&parse_batch(&raw));
                            let outcome = if candidates.is_empty() {
                                AttemptOutcome::Empty
                            } else {
                                AttemptOutcome::Parsed(candidates.len())
                            };
                            attempts.push(AttemptEvent {
                                model: model_id.clone(),
                                attempt,
                                outcome,
                            });
                            if candidates.is_empty() {
                                CascadeState::NextModel { model }
                            } else {
                                return Ok(Some(candidates));
                            }
                        }
                        Err(err) if err.is_rate_limit() => {
                            attempts.push(AttemptEvent {
                                model: model_id.clone(),
                                attempt,
                                outcome: AttemptOutcome::RateLimited,
                            });
                            if attempt < self.tuning.retry_cap {
                                CascadeState::Backoff { model, attempt }
                            } else {
                                CascadeState::NextModel { model }
                            }
                        }
                        Err(err) if err.is_fatal() => {
                            attempts.push(AttemptEvent {
                                model: model_id.clone(),
                                attempt,
                                outcome: AttemptOutcome::Fatal(err.to_string()),
                            });
                            CascadeState::Fatal(err)
                        }
                        Err(err) => {
                            attempts.push(AttemptEvent {
                                model: model_id.clone(),
                                attempt,
                                outcome: AttemptOutcome::Transient(err.to_string()),
                            });
                            CascadeState::NextModel { model }
                        }
                    }
                }
                CascadeState::Backoff { model, attempt } => {
                    let wait = self.tuning.backoff_unit * (attempt + 1);
                    tracing::info!(model_index = model, wait_ms = wait.as_millis() as u64, "rate limited, backing off");
                    tokio::time::sleep(wait).await;
                    CascadeState::Trying {
                        model,
                        attempt: attempt + 1,
                    }
                }
                CascadeState::NextModel { model } => {
                    if model + 1 < self.models.len() {
                        CascadeState::Trying {
                            model: model + 1,
                            attempt: 0,
                        }
                    } else {
                        CascadeState::Exhausted
                    }
                }
                CascadeState::Fatal(err) => return Err(err.into()),
                CascadeState::Exhausted => return Ok(None),
            };
        }
    }

    fn is_near_duplicate(&self, candidate: &Question, accepted: &[Question]) -> bool {
        if tokens(&candidate.question_text).len() < self.tuning.min_similarity_tokens {
            return false;
        }
        accepted.iter().any(|existing| {
            overlap_ratio(&candidate.question_text, &existing.question_text)
                >= self.tuning.similarity_threshold
        })
    }

    /// Combines the caller's exclusion list with the questions accepted so
    /// far, clipped to a recent window with per-entry prefixes, so the prompt
    /// stays bounded no matter how long the history grows.
    fn build_avoid_context(&self, request: &GenerationRequest, accepted: &[Question]) -> String {
        let mut entries: Vec<&str> = request
            .avoid_list
            .iter()
            .map(String::as_str)
            .chain(accepted.iter().map(|q| q.question_text.as_str()))
            .collect();
        if entries.is_empty() {
            return String::new();
        }
        if entries.len() > self.tuning.avoid_window {
            entries = entries.split_off(entries.len() - self.tuning.avoid_window);
        }
        let lines: String = entries
            .iter()
            .map(|entry| format!("- {}\n", clip_chars(entry, self.tuning.avoid_prefix_chars)))
            .collect();
        format!("\nCRITICAL: AVOID THESE RECENTLY GENERATED QUESTIONS (DO NOT REPEAT TOPIC OR TEXT):\n{lines}")
    }
}

fn coerce_candidates(values: &[JsonValue]) -> Vec<Question> {
    values.iter().filter_map(Question::from_raw).collect()
}

fn render_generation_prompt(
    request: &GenerationRequest,
    remaining: usize,
    avoid_context: &str,
) -> String {
    GENERATION_PROMPT
        .replace("{current_date}", &Utc::now().format("%B %Y").to_string())
        .replace("{num_questions}", &remaining.to_string())
        .replace("{exam_name}", &request.exam_name)
        .replace("{subject}", &request.subject)
        .replace("{difficulty}", &request.difficulty.to_string())
        .replace("{avoid_context}", avoid_context)
}

fn clip_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
