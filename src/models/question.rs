use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    #[serde(default)]
    pub id: u32,
    pub question_text: String,
    pub option_a: String,
    pub option_b: String,
    pub option_c: String,
    pub option_d: String,
    pub correct_option: CorrectOption,
    #[serde(default)]
    pub explanation: String,
    #[serde(default)]
    pub appeared_in: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CorrectOption {
    A,
    B,
    C,
    D,
}

impl CorrectOption {
    /// Accepts the letter with whatever decoration the model wrapped it in:
    /// "A", "b", "(c)", "D.".
    pub fn parse(raw: &str) -> Option<Self> {
        let letter = raw
            .trim()
            .trim_matches(|c| c == '(' || c == ')' || c == '.' || c == ' ');
        match letter.to_ascii_uppercase().as_str() {
            "A" => Some(CorrectOption::A),
            "B" => Some(CorrectOption::B),
            "C" => Some(CorrectOption::C),
            "D" => Some(CorrectOption::D),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CorrectOption::A => "A",
            CorrectOption::B => "B",
            CorrectOption::C => "C",
            CorrectOption::D => "D",
        }
    }
}

impl Question {
    /// Structural validation of one recovered JSON object. Returns `None` for
    /// anything that cannot become a well-formed record: empty question text,
    /// a missing or repeated option, an unknown correct-option tag.
    pub fn from_raw(value: &JsonValue) -> Option<Question> {
        let question_text = non_empty_text(value, "question_text")?;
        let option_a = non_empty_text(value, "option_a")?;
        let option_b = non_empty_text(value, "option_b")?;
        let option_c = non_empty_text(value, "option_c")?;
        let option_d = non_empty_text(value, "option_d")?;

        let options = [&option_a, &option_b, &option_c, &option_d];
        for i in 0..options.len() {
            for j in (i + 1)..options.len() {
                if options[i].eq_ignore_ascii_case(options[j]) {
                    return None;
                }
            }
        }

        let correct_option =
            CorrectOption::parse(value.get("correct_option").and_then(JsonValue::as_str)?)?;

        Some(Question {
            id: 0,
            question_text,
            option_a,
            option_b,
            option_c,
            option_d,
            correct_option,
            explanation: non_empty_text(value, "explanation").unwrap_or_default(),
            appeared_in: non_empty_text(value, "appeared_in").unwrap_or_default(),
        })
    }
}

fn non_empty_text(value: &JsonValue, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(JsonValue::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
