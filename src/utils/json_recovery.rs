//! Best-effort recovery of structured batches from raw model output.
//!
//! The stages form an ordered cascade: locate the JSON-shaped block, try a
//! strict parse, repair common model mistakes (broken escaping, truncation),
//! and finally salvage individual objects when the batch as a whole is beyond
//! repair. Each stage is a pure function that reports "still invalid" by
//! returning nothing rather than raising.

use regex::Regex;
use serde_json::Value as JsonValue;
use std::sync::LazyLock;

static FENCED_BLOCK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"```(?:json)?\s*([\s\S]*?)\s*```").unwrap());

static BACKSLASH_RUN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\\+)(.)").unwrap());

/// Characters that may legally follow a backslash inside a JSON string.
const JSON_ESCAPE_TARGETS: &str = "\"\\/bfnrtu";

/// Locates the substring most likely to be the intended JSON payload.
///
/// A fenced code block wins; otherwise the span from the first `[` to the
/// last `]`; otherwise the text as-is. Heuristic only — trailing or leading
/// junk is the repair stage's problem.
pub fn extract_block(content: &str) -> &str {
    if let Some(caps) = FENCED_BLOCK_RE.captures(content) {
        return caps.get(1).map(|m| m.as_str()).unwrap_or(content);
    }
    match (content.find('['), content.rfind(']')) {
        (Some(start), Some(end)) if start < end => &content[start..=end],
        _ => content,
    }
}

/// Fixes the malformations the models actually produce: unescaped LaTeX
/// backslashes, a quote lost to truncation, and missing closing delimiters.
///
/// The closing step is container-aware: a bare object span only gets `}`
/// balancing, while a list additionally gets its final `]`. That keeps the
/// same function usable on whole batches and on salvaged single objects.
pub fn repair_json(input: &str) -> String {
    let mut fixed = input.trim().to_string();

    fixed = BACKSLASH_RUN_RE
        .replace_all(&fixed, |caps: &regex::Captures| {
            let run = &caps[1];
            let next = &caps[2];
            if next.len() == 1 && JSON_ESCAPE_TARGETS.contains(next) {
                format!("{run}{next}")
            } else {
                // An unescaped markup command like \frac: double the run so it
                // survives as a literal backslash.
                format!("{run}{run}{next}")
            }
        })
        .into_owned();

    let mut prev = '\0';
    let mut quotes = 0usize;
    for ch in fixed.chars() {
        if ch == '"' && prev != '\\' {
            quotes += 1;
        }
        prev = ch;
    }
    if quotes % 2 == 1 {
        fixed.push('"');
    }

    let opens = fixed.matches('{').count();
    let closes = fixed.matches('}').count();
    if fixed.starts_with('[') {
        if !fixed.ends_with(']') {
            if opens > closes {
                fixed.push_str(&"}".repeat(opens - closes));
            }
            fixed.push(']');
        }
    } else if opens > closes {
        fixed.push_str(&"}".repeat(opens - closes));
    }

    fixed
}

/// Recovers individual objects from a batch whose overall structure is
/// unsalvageable. Spans are found by depth counting on `{`/`}` alone —
/// braces inside string literals are counted too. LaTeX braces come in
/// pairs, so in practice the counter still closes at the real object end;
/// an unbalanced brace inside a string loses that span and the ones after
/// it, which is the documented failure mode of this heuristic.
pub fn salvage_objects(input: &str) -> Vec<JsonValue> {
    let mut recovered = Vec::new();
    let mut pos = 0usize;

    while pos < input.len() {
        let Some(offset) = input[pos..].find('{') else {
            break;
        };
        let start = pos + offset;

        let mut depth = 0i32;
        let mut end = None;
        for (i, b) in input[start..].bytes().enumerate() {
            match b {
                b'{' => depth += 1,
                b'}' => {
                    depth -= 1;
                    if depth == 0 {
                        end = Some(start + i);
                        break;
                    }
                }
                _ => {}
            }
        }

        let Some(end) = end else {
            break;
        };
        let span = &input[start..=end];
        if let Ok(value) = serde_json::from_str::<JsonValue>(&repair_json(span)) {
            if value.is_object() {
                recovered.push(value);
            }
        }
        pos = end + 1;
    }

    recovered
}

/// Full recovery cascade for one raw model response: extract, strict parse,
/// repair, salvage. Accepts both a bare JSON list and the `{"questions":
/// [...]}` wrapper some models insist on. Returns the record objects found,
/// possibly none.
pub fn parse_batch(raw: &str) -> Vec<JsonValue> {
    let block = extract_block(raw);
    if let Some(records) = try_parse_records(block) {
        return records;
    }
    if let Some(records) = try_parse_records(&repair_json(block)) {
        return records;
    }
    salvage_objects(block)
}

fn try_parse_records(text: &str) -> Option<Vec<JsonValue>> {
    let value: JsonValue = serde_json::from_str(text).ok()?;
    let items = match value {
        JsonValue::Array(items) => items,
        JsonValue::Object(mut map) => match map.remove("questions") {
            Some(JsonValue::Array(items)) => items,
            _ => return None,
        },
        _ => return None,
    };
    Some(items.into_iter().filter(JsonValue::is_object).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASELINE: &str = concat!(
        r#"[{"question_text":"Evaluate the sum of the first ten odd numbers","option_a":"90","#,
        r#""option_b":"100","option_c":"110","option_d":"120","correct_option":"B","#,
        r#""explanation":"The sum of the first n odd numbers is n squared"},"#,
        r#"{"question_text":"Name the largest gulf","option_a":"Gulf of Mexico","#,
        r#""option_b":"Persian Gulf","option_c":"Gulf of Aden","option_d":"Gulf of Mannar","#,
        r#""correct_option":"A","explanation":"By surface area"}]"#
    );

    fn baseline_records() -> Vec<JsonValue> {
        serde_json::from_str::<JsonValue>(BASELINE)
            .unwrap()
            .as_array()
            .unwrap()
            .clone()
    }

    #[test]
    fn extracts_fenced_block() {
        let raw = "Here are the questions:\n```json\n[{\"a\":1}]\n```\nGood luck!";
        assert_eq!(extract_block(raw), "[{\"a\":1}]");
    }

    #[test]
    fn extracts_bracket_span_without_fence() {
        let raw = "Sure! [{\"a\":1}] Hope this helps.";
        assert_eq!(extract_block(raw), "[{\"a\":1}]");
    }

    #[test]
    fn passes_through_text_without_json_shape() {
        let raw = "I cannot generate questions right now.";
        assert_eq!(extract_block(raw), raw);
    }

    #[test]
    fn repairs_unescaped_markup_backslashes() {
        // The model wrote \alpha and \gamma with single backslashes, which
        // are not legal JSON escapes.
        let corrupted =
            r#"[{"question_text":"Evaluate \alpha + \gamma","correct_option":"A"}]"#;
        assert!(serde_json::from_str::<JsonValue>(corrupted).is_err());
        let records = parse_batch(corrupted);
        assert_eq!(records.len(), 1);
        assert_eq!(
            records[0]["question_text"].as_str().unwrap(),
            r"Evaluate \alpha + \gamma"
        );
    }

    #[test]
    fn repair_leaves_valid_escapes_alone() {
        let input = r#"["line\nbreak", "quote \" inside", "math \\frac{1}{2}"]"#;
        assert_eq!(repair_json(input), input);
    }

    #[test]
    fn repairs_missing_final_bracket() {
        let corrupted = BASELINE.strip_suffix(']').unwrap();
        let records = parse_batch(corrupted);
        assert_eq!(records, baseline_records());
    }

    #[test]
    fn repairs_truncation_mid_string() {
        // Output cut off inside the last string value: the closing quote and
        // every delimiter after it are gone.
        let cut = BASELINE.rfind('"').unwrap();
        let corrupted = &BASELINE[..cut];
        let records = parse_batch(corrupted);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0], baseline_records()[0]);
        assert_eq!(
            records[1]["explanation"].as_str().unwrap(),
            "By surface area"
        );
    }

    #[test]
    fn repairs_truncated_object_span() {
        assert_eq!(repair_json(r#"{"a": "b"#), r#"{"a": "b"}"#);
    }

    #[test]
    fn salvage_recovers_neighbors_of_a_broken_record() {
        let text = format!(
            "[{},{},{}]",
            r#"{"question_text":"First","correct_option":"A"}"#,
            r#"{"question_text": }"#,
            r#"{"question_text":"Third","correct_option":"C"}"#
        );
        let recovered = salvage_objects(&text);
        assert_eq!(recovered.len(), 2);
        assert_eq!(recovered[0]["question_text"], "First");
        assert_eq!(recovered[1]["question_text"], "Third");
    }

    #[test]
    fn salvage_counts_braces_inside_strings() {
        // Documented limitation of the depth counter: a lone { inside a
        // string swallows the rest of the input. Paired braces, the usual
        // LaTeX case, are fine.
        let paired = r#"{"question_text":"Evaluate \\frac{1}{2}","correct_option":"A"}"#;
        assert_eq!(salvage_objects(paired).len(), 1);

        let unbalanced = r#"{"question_text":"open { brace","correct_option":"A"}"#;
        assert!(salvage_objects(unbalanced).is_empty());
    }

    #[test]
    fn parse_batch_accepts_object_wrapper() {
        let raw = r#"{"questions":[{"question_text":"Q1"},{"question_text":"Q2"}]}"#;
        assert_eq!(parse_batch(raw).len(), 2);
    }

    #[test]
    fn parse_batch_returns_empty_for_hopeless_input() {
        assert!(parse_batch("no structure here at all").is_empty());
    }
}
