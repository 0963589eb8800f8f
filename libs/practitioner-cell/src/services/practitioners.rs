use thiserror::Error;
use tracing::debug;

use matcher_cell::{match_entities, Candidate, EntityKind, MatchType};
use shared_database::{catalog, CoreContext};
use shared_models::clinic::{Clinic, Practitioner};

#[derive(Error, Debug)]
pub enum PractitionerResolveError {
    #[error("no practitioner matched '{0}'")]
    NotFound(String),

    #[error("several practitioners could match")]
    ClarificationNeeded(Vec<String>),

    #[error("lookup failed: {0}")]
    Lookup(#[from] anyhow::Error),
}

/// Resolve a spoken practitioner name against the clinic roster. Threshold
/// 0.6; near-ties come back as clarification options.
pub async fn resolve_practitioner(
    ctx: &CoreContext,
    clinic: &Clinic,
    query: &str,
) -> Result<Practitioner, PractitionerResolveError> {
    let practitioners = catalog::get_practitioners(&ctx.store, clinic.clinic_id).await?;
    if practitioners.is_empty() {
        return Err(PractitionerResolveError::NotFound(query.to_string()));
    }

    let candidates: Vec<Candidate> = practitioners
        .iter()
        .enumerate()
        .map(|(index, practitioner)| Candidate {
            id: practitioner.practitioner_id.to_string(),
            name: practitioner.full_name(),
            aliases: practitioner
                .title
                .as_ref()
                .map(|title| vec![format!("{} {}", title, practitioner.full_name())])
                .unwrap_or_default(),
            is_primary: false,
            ordinal: index + 1,
        })
        .collect();

    let outcome = match_entities(EntityKind::Practitioner, query, &candidates);
    debug!(
        "practitioner match for '{}': {:?}",
        query, outcome.match_type
    );

    match outcome.match_type {
        MatchType::HighConfidence | MatchType::MediumConfidence => {
            let top = outcome.top().expect("match implies a candidate");
            practitioners
                .into_iter()
                .find(|p| p.practitioner_id.as_str() == top.candidate.id)
                .ok_or_else(|| PractitionerResolveError::NotFound(query.to_string()))
        }
        MatchType::LowConfidence => {
            let options = outcome
                .ranked
                .iter()
                .filter(|scored| scored.score > 0.0)
                .map(|scored| scored.candidate.name.clone())
                .collect::<Vec<_>>();
            if options.is_empty() {
                Err(PractitionerResolveError::NotFound(query.to_string()))
            } else {
                Err(PractitionerResolveError::ClarificationNeeded(options))
            }
        }
        MatchType::NoMatch => Err(PractitionerResolveError::NotFound(query.to_string())),
    }
}
