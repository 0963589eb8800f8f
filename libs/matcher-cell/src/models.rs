use serde::{Deserialize, Serialize};

/// What kind of catalog entity is being matched. Thresholds differ per kind:
/// wrong-service bookings are worse than a clarifying question, so services
/// match loosely for search but strictly at booking time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Location,
    Practitioner,
    Service,
}

impl EntityKind {
    /// Score at or above which the top candidate is taken without asking.
    pub fn resolve_threshold(self) -> f64 {
        0.8
    }

    /// Score at or above which the best candidate is offered for confirmation.
    pub fn confirm_threshold(self) -> f64 {
        match self {
            EntityKind::Location => 0.6,
            EntityKind::Practitioner => 0.6,
            EntityKind::Service => 0.5,
        }
    }
}

/// A catalog entry eligible for matching. `ordinal` is the entity's position
/// in the clinic's deterministic ordering (primary first, then name), used for
/// "location 2" style queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub is_primary: bool,
    #[serde(default)]
    pub ordinal: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredCandidate {
    pub candidate: Candidate,
    pub score: f64,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    HighConfidence,
    MediumConfidence,
    LowConfidence,
    NoMatch,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchOutcome {
    pub ranked: Vec<ScoredCandidate>,
    pub match_type: MatchType,
}

impl MatchOutcome {
    pub fn top(&self) -> Option<&ScoredCandidate> {
        self.ranked.first()
    }

    pub fn is_resolved(&self) -> bool {
        self.match_type == MatchType::HighConfidence
    }

    pub fn needs_confirmation(&self) -> bool {
        self.match_type == MatchType::MediumConfidence
    }

    pub fn needs_clarification(&self) -> bool {
        matches!(self.match_type, MatchType::LowConfidence)
    }
}
