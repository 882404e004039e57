//! Keyword-level text similarity used for claim dedup, contradiction
//! targeting, citation matching and omission detection.

use std::collections::HashSet;

const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "is", "are", "was", "were", "be", "been", "being", "have", "has", "had",
    "do", "does", "did", "will", "would", "shall", "should", "may", "might", "must", "can",
    "could", "of", "in", "to", "for", "with", "on", "at", "from", "by", "about", "as", "into",
    "through", "during", "before", "after", "above", "below", "between", "this", "that",
    "these", "those", "it", "its", "and", "but", "or", "than", "their", "there", "which",
];

const NEGATION_WORDS: &[&str] = &[
    "not", "no", "never", "neither", "without", "lack", "doesn't", "don't", "isn't", "aren't",
    "wasn't", "weren't", "won't", "cannot", "fails", "failed",
];

const NULL_RESULT_PHRASES: &[&str] = &[
    "null result",
    "null effect",
    "null finding",
    "no effect",
    "no significant",
    "not significant",
    "nonsignificant",
    "non-significant",
    "failed to replicate",
    "failure to replicate",
    "did not replicate",
    "no evidence",
    "no association",
    "no relationship",
];

/// Extract keywords from text (lowercase, stop-words removed).
pub fn extract_keywords(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 2 && !STOP_WORDS.contains(w))
        .map(String::from)
        .collect()
}

/// Jaccard similarity of two keyword lists.
pub fn keyword_overlap(a: &[String], b: &[String]) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let set_a: HashSet<&str> = a.iter().map(|s| s.as_str()).collect();
    let set_b: HashSet<&str> = b.iter().map(|s| s.as_str()).collect();
    let intersection = set_a.intersection(&set_b).count();
    let union = set_a.union(&set_b).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

/// Keyword Jaccard similarity of two texts.
pub fn text_similarity(a: &str, b: &str) -> f64 {
    keyword_overlap(&extract_keywords(a), &extract_keywords(b))
}

/// Fraction of `needle`'s keywords that also appear in `haystack`.
pub fn keyword_containment(needle: &str, haystack: &str) -> f64 {
    let needle: HashSet<String> = extract_keywords(needle).into_iter().collect();
    if needle.is_empty() {
        return 0.0;
    }
    let haystack: HashSet<String> = extract_keywords(haystack).into_iter().collect();
    needle.iter().filter(|w| haystack.contains(*w)).count() as f64 / needle.len() as f64
}

/// Similarity of two work titles, over every alphanumeric token.
///
/// Titles are short, so stop-words are kept; case and punctuation are not.
pub fn title_similarity(a: &str, b: &str) -> f64 {
    let tokens = |s: &str| -> Vec<String> {
        s.to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(String::from)
            .collect()
    };
    let (ta, tb) = (tokens(a), tokens(b));
    if ta.is_empty() || tb.is_empty() {
        return 0.0;
    }
    if ta == tb {
        return 1.0;
    }
    keyword_overlap(&ta, &tb)
}

/// Whether the text carries negation language.
pub fn has_negation(text: &str) -> bool {
    let lower = text.to_lowercase();
    lower
        .split(|c: char| !c.is_alphanumeric() && c != '\'')
        .any(|w| NEGATION_WORDS.contains(&w))
}

/// Whether the text reports a null result or failed replication.
pub fn reports_null_result(text: &str) -> bool {
    let lower = text.to_lowercase();
    NULL_RESULT_PHRASES.iter().any(|p| lower.contains(p))
}

/// Normalize a DOI for comparison: lowercase, resolver prefixes stripped.
pub fn normalize_doi(doi: &str) -> String {
    let lower = doi.trim().to_lowercase();
    let stripped = ["https://doi.org/", "http://doi.org/", "https://dx.doi.org/", "doi:"]
        .iter()
        .find_map(|p| lower.strip_prefix(p))
        .unwrap_or(&lower);
    stripped.trim().trim_end_matches('.').to_string()
}

/// Extract numeric values from text.
pub fn extract_numbers(text: &str) -> Vec<f64> {
    text.split(|c: char| !c.is_ascii_digit() && c != '.' && c != '-')
        .filter_map(|s| s.trim_matches('.').parse::<f64>().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_keywords_drops_stop_words() {
        let words = extract_keywords("The effect of emotional appeals on protest turnout");
        assert_eq!(
            words,
            vec!["effect", "emotional", "appeals", "protest", "turnout"]
        );
    }

    #[test]
    fn test_text_similarity_near_duplicates() {
        let a = "Emotional appeals increase protest turnout among young adults";
        let b = "Emotional appeals increase protest turnout in young adults";
        assert!(text_similarity(a, b) >= 0.6);
        assert!(text_similarity(a, "Inflation reduces household savings") < 0.1);
    }

    #[test]
    fn test_title_similarity() {
        assert_eq!(
            title_similarity("Anger and Collective Action", "anger and collective action."),
            1.0
        );
        assert!(title_similarity("Anger and Collective Action", "Fear and Voting") < 0.8);
    }

    #[test]
    fn test_keyword_containment() {
        let c = keyword_containment("protest turnout", "Emotion, protest turnout and mobilization");
        assert_eq!(c, 1.0);
        assert_eq!(keyword_containment("", "anything"), 0.0);
    }

    #[test]
    fn test_negation_and_null_result() {
        assert!(has_negation("Anger does not predict turnout"));
        assert!(!has_negation("Anger predicts turnout"));
        assert!(reports_null_result(
            "A preregistered study failed to replicate the anger effect"
        ));
        assert!(!reports_null_result("A large positive effect was observed"));
    }

    #[test]
    fn test_normalize_doi() {
        assert_eq!(normalize_doi("https://doi.org/10.1037/ABC.123"), "10.1037/abc.123");
        assert_eq!(normalize_doi("doi:10.1037/abc.123 "), "10.1037/abc.123");
        assert_eq!(normalize_doi("10.1037/abc.123."), "10.1037/abc.123");
    }

    #[test]
    fn test_extract_numbers() {
        assert_eq!(extract_numbers("d = 0.67, n = 1200"), vec![0.67, 1200.0]);
    }
}
