//! Word-token overlap used as a duplicate-topic proxy by the diversity
//! filter.

use std::collections::HashSet;

/// Case-folded word tokens, split on anything non-alphanumeric.
pub fn tokens(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

/// Fraction of the candidate's tokens that also appear in the accepted text.
/// The denominator is the candidate's own token count, so a short candidate
/// buried inside a long accepted record still scores high.
pub fn overlap_ratio(candidate: &str, accepted: &str) -> f32 {
    let candidate_tokens = tokens(candidate);
    if candidate_tokens.is_empty() {
        return 0.0;
    }
    let accepted_tokens: HashSet<String> = tokens(accepted).into_iter().collect();
    let shared = candidate_tokens
        .iter()
        .filter(|t| accepted_tokens.contains(t.as_str()))
        .count();
    shared as f32 / candidate_tokens.len() as f32
}
