use matcher_cell::{match_entities, score_candidate, Candidate, EntityKind, MatchType};

fn location(id: &str, name: &str, is_primary: bool, ordinal: usize) -> Candidate {
    Candidate {
        id: id.to_string(),
        name: name.to_string(),
        aliases: Vec::new(),
        is_primary,
        ordinal,
    }
}

fn two_locations() -> Vec<Candidate> {
    vec![
        location("b1", "City Clinic", true, 1),
        location("b2", "Suburban Clinic", false, 2),
    ]
}

#[test]
fn exact_catalog_name_scores_one() {
    let candidates = vec![Candidate {
        id: "p1".to_string(),
        name: "Brendan Smith".to_string(),
        aliases: Vec::new(),
        is_primary: false,
        ordinal: 1,
    }];

    let outcome = match_entities(EntityKind::Practitioner, "Brendan Smith", &candidates);
    assert_eq!(outcome.match_type, MatchType::HighConfidence);
    let top = outcome.top().unwrap();
    assert!((top.score - 1.0).abs() < 1e-9);
    assert_eq!(top.candidate.id, "p1");
}

#[test]
fn exact_match_survives_case_and_whitespace() {
    let candidates = vec![location("b1", "  City   Clinic ", true, 1)];
    let (score, reason) = score_candidate(EntityKind::Location, "city clinic", &candidates[0]);
    assert!(score >= 1.0 - 1e-9);
    assert_eq!(reason, "exact_match");
}

#[test]
fn main_resolves_to_primary_with_boost() {
    let outcome = match_entities(EntityKind::Location, "main", &two_locations());
    assert_eq!(outcome.match_type, MatchType::HighConfidence);
    let top = outcome.top().unwrap();
    assert_eq!(top.candidate.name, "City Clinic");
    assert!((top.score - 0.9).abs() < 1e-9);
}

#[test]
fn generic_query_matching_both_is_not_resolved() {
    // "clinic" describes every location equally; the resolver turns this into
    // clarification options for the caller.
    let outcome = match_entities(EntityKind::Location, "clinic", &two_locations());
    assert!(!outcome.is_resolved());
    assert_eq!(outcome.ranked.len(), 2);
}

#[test]
fn alias_matches_score_just_below_exact() {
    let mut candidates = two_locations();
    candidates[1].aliases.push("the annex".to_string());

    let outcome = match_entities(EntityKind::Location, "the annex", &candidates);
    assert_eq!(outcome.match_type, MatchType::HighConfidence);
    let top = outcome.top().unwrap();
    assert_eq!(top.candidate.id, "b2");
    assert!((top.score - 0.95).abs() < 1e-9);
}

#[test]
fn numeric_references_use_deterministic_ordering() {
    let outcome = match_entities(EntityKind::Location, "location 2", &two_locations());
    let top = outcome.top().unwrap();
    assert_eq!(top.candidate.id, "b2");
    assert!(top.score >= 0.8);
}

#[test]
fn ordinal_words_resolve_like_numbers() {
    let outcome = match_entities(EntityKind::Location, "the second clinic", &two_locations());
    let top = outcome.top().unwrap();
    assert_eq!(top.candidate.id, "b2");
}

#[test]
fn ties_prefer_primary_then_name() {
    let candidates = vec![
        location("b2", "Harbour Clinic", false, 2),
        location("b1", "Harbour Clinic", true, 1),
    ];
    let outcome = match_entities(EntityKind::Location, "harbour clinic", &candidates);
    // Primary gets the +0.1 boost, so it wins outright.
    assert_eq!(outcome.top().unwrap().candidate.id, "b1");
}

#[test]
fn nonsense_query_matches_nothing() {
    let outcome = match_entities(EntityKind::Location, "xyzzy", &two_locations());
    assert_eq!(outcome.match_type, MatchType::NoMatch);
}

#[test]
fn practitioner_partial_name_asks_for_confirmation() {
    let candidates = vec![
        Candidate {
            id: "p1".to_string(),
            name: "Brendan Smith".to_string(),
            aliases: Vec::new(),
            is_primary: false,
            ordinal: 1,
        },
        Candidate {
            id: "p2".to_string(),
            name: "Alice Wong".to_string(),
            aliases: Vec::new(),
            is_primary: false,
            ordinal: 2,
        },
    ];

    let outcome = match_entities(EntityKind::Practitioner, "brendan", &candidates);
    assert_eq!(outcome.top().unwrap().candidate.id, "p1");
    assert_ne!(outcome.match_type, MatchType::NoMatch);
}

#[test]
fn service_threshold_is_looser() {
    let candidates = vec![Candidate {
        id: "s1".to_string(),
        name: "Remedial Massage".to_string(),
        aliases: Vec::new(),
        is_primary: false,
        ordinal: 1,
    }];

    let outcome = match_entities(EntityKind::Service, "massage", &candidates);
    assert!(
        outcome.match_type == MatchType::MediumConfidence
            || outcome.match_type == MatchType::HighConfidence,
        "expected at least a confirmable match, got {:?}",
        outcome.match_type
    );
}
