//! Field-level cleanup of model-written text: stray LaTeX transliteration
//! markup, doubled option labels, and stuttering explanations. Every
//! transform is idempotent because translated batches run through it again.

use crate::models::question::Question;
use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

static BRACED_DIACRITIC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\\(?:bar|acute|grave|ddot|hat|tilde|check|breve|dot|vec)\{([^}]*)\}").unwrap()
});

static BARE_DIACRITIC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\\(?:bar|acute|grave|ddot|hat|tilde|check|breve|dot|vec)\s+([a-zA-Z])").unwrap()
});

static MATH_SPAN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\$([^$]+)\$").unwrap());

static PLAIN_TEXT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9\s.,%₹/\\]+$").unwrap());

static MATH_STRUCTURE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[\^_{}\\]").unwrap());

static OPTION_LABEL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\(?[a-dA-D]\)?[.)]\s*").unwrap());

static DIGIT_LABEL_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[1-4][.)]\s*").unwrap());

static STEP_NUMBER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d+[.)]\s*").unwrap());

/// Tokens that mark a field as genuinely mathematical.
const MATH_TOKENS: &[&str] = &[
    r"\frac", r"\sqrt", r"\alpha", r"\beta", r"\gamma", r"\delta", r"\theta", r"\pi", r"\infty",
    "^", "_{", r"\right", r"\left", r"\sum", r"\log", r"\sin", r"\cos", r"\tan", r"\int", r"\circ",
];

/// Previously observed transliteration artifacts the regexes miss once the
/// model has half-escaped them.
const EXACT_REPLACEMENTS: &[(&str, &str)] = &[
    (r"\bar{ā}", "ā"),
    (r"\bar{s}", "s"),
    (r"\bar{ū}", "ū"),
];

/// Lines that are speculative filler rather than explanation.
const SPECULATIVE_PHRASES: &[&str] = &[
    "let me think",
    "let me reconsider",
    "wait, let me",
    "thinking out loud",
    "i am not sure",
    "i'm not sure",
    "it might also be",
    "on second thought",
];

const MAX_EXPLANATION_LINES: usize = 15;
const MAX_LINE_WORDS: usize = 40;
const CONTINUATION_MARKER: &str = "... (Step-wise solution continues)";

/// Strips diacritic transliteration markup, wraps real math in `$` delimiters
/// and unwraps plain text the model over-wrapped.
pub fn normalize_math_markup(text: &str) -> String {
    let mut cleaned = BRACED_DIACRITIC_RE.replace_all(text, "$1").into_owned();
    cleaned = BARE_DIACRITIC_RE.replace_all(&cleaned, "$1").into_owned();

    if MATH_TOKENS.iter().any(|t| cleaned.contains(t)) && !cleaned.contains('$') {
        cleaned = format!("${cleaned}$");
    }

    cleaned = MATH_SPAN_RE
        .replace_all(&cleaned, |caps: &regex::Captures| {
            let inner = &caps[1];
            if PLAIN_TEXT_RE.is_match(inner) && !MATH_STRUCTURE_RE.is_match(inner) {
                inner.to_string()
            } else {
                format!("${inner}$")
            }
        })
        .into_owned();

    for (from, to) in EXACT_REPLACEMENTS {
        cleaned = cleaned.replace(from, to);
    }

    cleaned
}

/// Removes a leading enumeration label from option text. Only labels with an
/// explicit separator are touched — "(a) ", "A. ", "a) ", "1. " — so a real
/// word lead like "A tall building" survives. Iterates to a fixed point to
/// clear doubled labels such as "(a) (b) Paris".
pub fn strip_option_label(text: &str) -> String {
    let mut current = text.trim().to_string();
    loop {
        let once = OPTION_LABEL_RE.replace(&current, "");
        let stripped = DIGIT_LABEL_RE.replace(&once, "").trim().to_string();
        if stripped == current {
            return current;
        }
        current = stripped;
    }
}

/// Collapses repeated or speculative explanation lines, caps their number and
/// length, and renumbers what remains from 1.
pub fn clean_explanation(text: &str) -> String {
    let mut seen: HashSet<String> = HashSet::new();
    let mut kept: Vec<String> = Vec::new();
    let mut truncated = false;

    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let content = STEP_NUMBER_RE.replace(line, "").trim().to_string();
        if content == CONTINUATION_MARKER {
            continue;
        }

        let words: Vec<&str> = content.split_whitespace().collect();
        let capped = if words.len() > MAX_LINE_WORDS {
            format!("{} ...", words[..MAX_LINE_WORDS].join(" "))
        } else {
            content
        };

        let folded = capped.to_lowercase();
        if seen.contains(&folded) {
            continue;
        }
        if SPECULATIVE_PHRASES.iter().any(|p| folded.contains(p)) {
            continue;
        }

        seen.insert(folded);
        kept.push(capped);
        if kept.len() >= MAX_EXPLANATION_LINES {
            truncated = true;
            break;
        }
    }

    let mut numbered: Vec<String> = kept
        .iter()
        .enumerate()
        .map(|(i, line)| format!("{}. {}", i + 1, line))
        .collect();
    if truncated {
        numbered.push(CONTINUATION_MARKER.to_string());
    }
    numbered.join("\n")
}

/// Applies every transform to one accepted record, field by field, in place.
pub fn sanitize_question(question: &mut Question) {
    question.question_text = normalize_math_markup(&question.question_text);
    for option in [
        &mut question.option_a,
        &mut question.option_b,
        &mut question.option_c,
        &mut question.option_d,
    ] {
        *option = strip_option_label(&normalize_math_markup(option));
    }
    question.explanation = clean_explanation(&normalize_math_markup(&question.explanation));
}
