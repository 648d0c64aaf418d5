use crate::models::question::Question;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Default for Difficulty {
    fn default() -> Self {
        Difficulty::Medium
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Difficulty::Easy => "Easy",
            Difficulty::Medium => "Medium",
            Difficulty::Hard => "Hard",
        })
    }
}

/// Immutable input of one pipeline invocation.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub subject: String,
    pub exam_name: String,
    pub count: usize,
    pub difficulty: Difficulty,
    pub language: Option<String>,
    pub avoid_list: Vec<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct GenerateExamPayload {
    #[validate(length(min = 1))]
    pub subject: String,
    #[validate(length(min = 1))]
    pub exam_name: String,
    #[validate(range(min = 1))]
    pub num_questions: Option<u32>,
    pub difficulty: Option<Difficulty>,
    pub language: Option<String>,
    pub user_id: Option<Uuid>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct TranslateExamPayload {
    pub questions: Vec<Question>,
    #[validate(length(min = 1))]
    pub target_language: String,
}
