/// Normalize free text for fuzzy matching: trim, case-fold, collapse
/// whitespace (tabs, newlines and non-breaking spaces included — PMS catalog
/// names carry all of these).
pub fn normalize_for_matching(text: &str) -> String {
    text.trim()
        .to_lowercase()
        .split(|c: char| c.is_whitespace() || c == '\u{a0}')
        .filter(|token| !token.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Similarity ratio in [0, 1] between two already-normalized strings.
pub fn similarity(a: &str, b: &str) -> f64 {
    strsim::normalized_levenshtein(a, b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_collapses_whitespace_quirks() {
        assert_eq!(normalize_for_matching("  Brendan\tSmith \n"), "brendan smith");
        assert_eq!(normalize_for_matching("City\u{a0}Clinic"), "city clinic");
        assert_eq!(normalize_for_matching(""), "");
    }

    #[test]
    fn similarity_is_symmetric_and_bounded() {
        let a = similarity("massage", "remedial massage");
        assert!(a > 0.0 && a < 1.0);
        assert_eq!(similarity("massage", "massage"), 1.0);
    }
}
