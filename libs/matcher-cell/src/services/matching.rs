use std::cmp::Ordering;

use tracing::debug;

use shared_utils::text::{normalize_for_matching, similarity};

use crate::models::{Candidate, EntityKind, MatchOutcome, MatchType, ScoredCandidate};

/// Two candidates this close to each other are indistinguishable over voice;
/// the caller gets options instead of a guess.
pub const AMBIGUITY_BAND: f64 = 0.05;

/// Spoken references to the primary location.
const PRIMARY_REFERENCES: [&str; 10] = [
    "main", "primary", "first", "central", "head", "office", "default", "usual", "regular",
    "normal",
];

/// Filler words stripped from location queries, unless the query is a single
/// word ("clinic" alone must still match something).
const LOCATION_FILLERS: [&str; 8] = [
    "the", "at", "in", "clinic", "location", "branch", "office", "place",
];

const ORDINAL_WORDS: [(&str, usize); 10] = [
    ("first", 1),
    ("second", 2),
    ("third", 3),
    ("fourth", 4),
    ("fifth", 5),
    ("1st", 1),
    ("2nd", 2),
    ("3rd", 3),
    ("4th", 4),
    ("5th", 5),
];

fn normalize_query(kind: EntityKind, raw: &str) -> String {
    let normalized = normalize_for_matching(raw);
    if kind != EntityKind::Location {
        return normalized;
    }
    let words: Vec<&str> = normalized.split(' ').filter(|w| !w.is_empty()).collect();
    if words.len() <= 1 {
        return normalized;
    }
    let kept: Vec<&str> = words
        .iter()
        .copied()
        .filter(|w| !LOCATION_FILLERS.contains(w))
        .collect();
    if kept.is_empty() {
        normalized
    } else {
        kept.join(" ")
    }
}

fn digits_in(text: &str) -> Option<usize> {
    let digits: String = text.chars().filter(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

/// Score one candidate against a query. Returns the best of several signals
/// plus the reason that produced it.
pub fn score_candidate(kind: EntityKind, query: &str, candidate: &Candidate) -> (f64, String) {
    let query_norm = normalize_query(kind, query);
    let name_norm = normalize_query(kind, &candidate.name);

    if query_norm.is_empty() {
        return (0.0, "empty_query".to_string());
    }

    let mut best = (0.0_f64, "no_match".to_string());
    let mut consider = |score: f64, reason: &str| {
        if score > best.0 {
            best = (score, reason.to_string());
        }
    };

    if query_norm == name_norm {
        consider(1.0, "exact_match");
    }

    for alias in &candidate.aliases {
        if query_norm == normalize_query(kind, alias) {
            consider(0.95, "alias_match");
        }
    }

    if kind == EntityKind::Location && candidate.is_primary {
        let refers_to_primary = query_norm
            .split(' ')
            .any(|token| PRIMARY_REFERENCES.contains(&token));
        if refers_to_primary {
            consider(0.8, "primary_reference");
        }
    }

    // Substring containment, scaled by how much of the longer string matched.
    if !name_norm.is_empty() {
        if name_norm.contains(&query_norm) {
            let ratio = query_norm.len() as f64 / name_norm.len() as f64;
            consider(0.8 * ratio, "partial_match");
        } else if query_norm.contains(&name_norm) {
            let ratio = name_norm.len() as f64 / query_norm.len() as f64;
            consider(0.8 * ratio, "contains_name");
        }
    }

    // Token-wise containment: every query token found in the name.
    let query_tokens: Vec<&str> = query_norm.split(' ').filter(|t| !t.is_empty()).collect();
    let name_tokens: Vec<&str> = name_norm.split(' ').filter(|t| !t.is_empty()).collect();
    if !query_tokens.is_empty() && !name_tokens.is_empty() {
        let hits = query_tokens
            .iter()
            .filter(|token| name_tokens.contains(*token))
            .count();
        if hits > 0 {
            consider(0.8 * hits as f64 / query_tokens.len() as f64, "token_match");
        }
    }

    // Numeric and ordinal references resolve against the deterministic
    // ordering ("location 2", "the second clinic").
    if kind == EntityKind::Location {
        let mut requested: Option<usize> = digits_in(&query_norm);
        if requested.is_none() {
            for (word, number) in ORDINAL_WORDS {
                if query_norm.split(' ').any(|t| t == word) {
                    requested = Some(number);
                    break;
                }
            }
        }
        if let Some(n) = requested {
            if candidate.ordinal == n {
                consider(0.8, "ordinal_match");
            }
            if digits_in(&name_norm) == Some(n) {
                consider(0.8, "number_match");
            }
        }
    }

    let fuzzy = similarity(&query_norm, &name_norm);
    if fuzzy > 0.6 {
        consider(fuzzy, "fuzzy_match");
    }

    // Primary location tie-breaker.
    if candidate.is_primary && best.0 > 0.0 {
        best.0 = (best.0 + 0.1).min(1.0);
    }

    best
}

/// Rank every candidate and classify the outcome against the per-kind
/// thresholds. Ambiguity near the top always produces clarification options.
pub fn match_entities(kind: EntityKind, query: &str, candidates: &[Candidate]) -> MatchOutcome {
    let mut ranked: Vec<ScoredCandidate> = candidates
        .iter()
        .map(|candidate| {
            let (score, reason) = score_candidate(kind, query, candidate);
            ScoredCandidate {
                candidate: candidate.clone(),
                score,
                reason,
            }
        })
        .collect();

    ranked.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| b.candidate.is_primary.cmp(&a.candidate.is_primary))
            .then_with(|| a.candidate.name.cmp(&b.candidate.name))
    });

    let match_type = classify(kind, &ranked);
    debug!(
        "matched '{}' against {} candidates: {:?} (top score {:.2})",
        query,
        candidates.len(),
        match_type,
        ranked.first().map(|s| s.score).unwrap_or(0.0)
    );

    MatchOutcome { ranked, match_type }
}

/// Classify a ranked candidate list against the per-kind thresholds. Callers
/// that mutate scores after matching (e.g. history boosts) re-run this rather
/// than re-deriving the cascade.
pub fn classify(kind: EntityKind, ranked: &[ScoredCandidate]) -> MatchType {
    let Some(top) = ranked.first() else {
        return MatchType::NoMatch;
    };
    if top.score <= 0.0 {
        return MatchType::NoMatch;
    }

    let ambiguous = ranked
        .iter()
        .skip(1)
        .any(|other| other.score > 0.0 && (top.score - other.score) < AMBIGUITY_BAND);

    if ambiguous {
        return MatchType::LowConfidence;
    }
    if top.score >= kind.resolve_threshold() {
        return MatchType::HighConfidence;
    }
    if top.score >= kind.confirm_threshold() {
        return MatchType::MediumConfidence;
    }
    MatchType::LowConfidence
}
