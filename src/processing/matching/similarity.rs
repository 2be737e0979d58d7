//! Edit-distance similarity scores on a [0, 100] scale.

/// Similarity ratio between two strings: 100 for identical inputs,
/// scaled normalized Levenshtein otherwise.
pub fn ratio(a: &str, b: &str) -> f64 {
    if a == b {
        return 100.0;
    }
    strsim::normalized_levenshtein(a, b) * 100.0
}

/// Name similarity between two normalized names.
///
/// The full-string ratio catches small typos; the weighted last/first
/// split catches middle-name and initial differences. The higher of the
/// two wins.
pub fn name_similarity(a: &str, b: &str) -> f64 {
    let full = ratio(a, b);

    let a_tokens: Vec<&str> = a.split_whitespace().collect();
    let b_tokens: Vec<&str> = b.split_whitespace().collect();
    if a_tokens.is_empty() || b_tokens.is_empty() {
        return full;
    }

    let last_ratio = ratio(a_tokens[a_tokens.len() - 1], b_tokens[b_tokens.len() - 1]);
    let first_ratio = ratio(a_tokens[0], b_tokens[0]);
    let weighted = 0.6 * last_ratio + 0.4 * first_ratio;

    full.max(weighted)
}
