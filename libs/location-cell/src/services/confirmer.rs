use matcher_cell::{match_entities, Candidate, EntityKind, MatchType};
use shared_models::webhook::LocationData;
use shared_utils::text::normalize_for_matching;

/// What the caller's reply to a confirmation question meant.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfirmationOutcome {
    Confirmed(LocationData),
    Rejected,
    Unclear,
}

const AFFIRMATIVES: [&str; 8] = [
    "yes", "yeah", "yep", "correct", "right", "that one", "sure", "ok",
];
const NEGATIVES: [&str; 5] = ["no", "nope", "neither", "not that one", "none"];

/// Interpret a caller's reply against the options they were offered: yes/no,
/// an ordinal ("the first one"), or a location name.
pub fn interpret_response(user_response: &str, options: &[LocationData]) -> ConfirmationOutcome {
    let normalized = normalize_for_matching(user_response);
    if normalized.is_empty() || options.is_empty() {
        return ConfirmationOutcome::Unclear;
    }

    if AFFIRMATIVES.iter().any(|phrase| normalized == *phrase) {
        return ConfirmationOutcome::Confirmed(options[0].clone());
    }
    if NEGATIVES.iter().any(|phrase| normalized == *phrase) {
        return ConfirmationOutcome::Rejected;
    }

    if let Some(index) = ordinal_choice(&normalized) {
        if let Some(option) = options.get(index) {
            return ConfirmationOutcome::Confirmed(option.clone());
        }
    }

    // Fall back to matching the reply against the offered names.
    let candidates: Vec<Candidate> = options
        .iter()
        .enumerate()
        .map(|(index, option)| Candidate {
            id: option.id.to_string(),
            name: option.name.clone(),
            aliases: Vec::new(),
            is_primary: false,
            ordinal: index + 1,
        })
        .collect();

    let outcome = match_entities(EntityKind::Location, user_response, &candidates);
    let positives = outcome.ranked.iter().filter(|s| s.score > 0.0).count();
    let confident = matches!(
        outcome.match_type,
        MatchType::HighConfidence | MatchType::MediumConfidence
    );

    // The caller is choosing among options we just offered, so a unique
    // partial match is enough even below the normal confirm threshold.
    if confident || positives == 1 {
        if let Some(top) = outcome.top().filter(|top| top.score > 0.0) {
            if let Some(location) = options
                .iter()
                .find(|option| option.id.as_str() == top.candidate.id)
                .cloned()
            {
                return ConfirmationOutcome::Confirmed(location);
            }
        }
    }
    ConfirmationOutcome::Unclear
}

fn ordinal_choice(normalized: &str) -> Option<usize> {
    let table = [
        ("first", 0),
        ("1", 0),
        ("one", 0),
        ("second", 1),
        ("2", 1),
        ("two", 1),
        ("third", 2),
        ("3", 2),
        ("three", 2),
    ];
    for (word, index) in table {
        if normalized == word
            || normalized == format!("the {}", word)
            || normalized == format!("the {} one", word)
            || normalized == format!("{} one", word)
        {
            return Some(index);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_models::ids::BusinessId;

    fn options() -> Vec<LocationData> {
        vec![
            LocationData {
                id: BusinessId::new("b1"),
                name: "City Clinic".to_string(),
            },
            LocationData {
                id: BusinessId::new("b2"),
                name: "Suburban Clinic".to_string(),
            },
        ]
    }

    #[test]
    fn yes_takes_the_first_option() {
        let outcome = interpret_response("Yes", &options());
        assert_eq!(
            outcome,
            ConfirmationOutcome::Confirmed(options()[0].clone())
        );
    }

    #[test]
    fn no_rejects() {
        assert_eq!(interpret_response("no", &options()), ConfirmationOutcome::Rejected);
    }

    #[test]
    fn ordinals_select_by_position() {
        let outcome = interpret_response("the second one", &options());
        assert_eq!(
            outcome,
            ConfirmationOutcome::Confirmed(options()[1].clone())
        );
    }

    #[test]
    fn names_select_by_match() {
        let outcome = interpret_response("the city one", &options());
        assert_eq!(
            outcome,
            ConfirmationOutcome::Confirmed(options()[0].clone())
        );
    }

    #[test]
    fn gibberish_is_unclear() {
        assert_eq!(interpret_response("purple", &options()), ConfirmationOutcome::Unclear);
    }
}
