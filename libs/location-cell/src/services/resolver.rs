use anyhow::Result;
use tracing::{debug, info};

use cache_cell::{BookingContextCache, PreferredLocation, ServiceMatchCache};
use matcher_cell::{classify, match_entities, Candidate, EntityKind, MatchType};
use shared_database::{catalog, CoreContext};
use shared_models::clinic::{Business, Clinic};
use shared_models::ids::BusinessId;
use shared_models::webhook::LocationData;
use shared_utils::phone::normalize_phone;

use crate::models::ResolutionOutcome;

/// Cache key for the clinic's location catalog in the service-match cache.
const LOCATIONS_CACHE_KEY: &str = "locations:_all";

/// Boost applied when the caller's usual location is among the candidates.
const HISTORY_BOOST: f64 = 0.3;
const HISTORY_BOOST_CAP: f64 = 0.9;

pub struct LocationResolver {
    ctx: CoreContext,
}

impl LocationResolver {
    pub fn new(ctx: CoreContext) -> Self {
        Self { ctx }
    }

    /// All locations for a clinic, via the service-match cache.
    pub async fn clinic_locations(&self, clinic: &Clinic) -> Result<Vec<Business>> {
        let cache = ServiceMatchCache::new(self.ctx.store.clone(), self.ctx.clock.clone());

        if let Some(cached) = cache.get(clinic.clinic_id, LOCATIONS_CACHE_KEY).await {
            if let Ok(locations) = serde_json::from_value::<Vec<Business>>(cached) {
                info!("location cache hit for clinic {}", clinic.clinic_id);
                return Ok(locations);
            }
        }

        let locations = catalog::get_locations(&self.ctx.store, clinic.clinic_id).await?;
        if let Ok(value) = serde_json::to_value(&locations) {
            cache.set(clinic.clinic_id, LOCATIONS_CACHE_KEY, value).await;
        }
        Ok(locations)
    }

    pub async fn resolve(
        &self,
        clinic: &Clinic,
        location_query: &str,
        caller_phone: Option<&str>,
    ) -> Result<ResolutionOutcome> {
        let locations = self.clinic_locations(clinic).await?;

        if locations.is_empty() {
            return Ok(ResolutionOutcome::NoLocations);
        }

        if locations.len() == 1 {
            let only = &locations[0];
            return Ok(ResolutionOutcome::Resolved {
                location: LocationData {
                    id: only.business_id.clone(),
                    name: only.business_name.clone(),
                },
                confidence: 1.0,
            });
        }

        let candidates: Vec<Candidate> = locations
            .iter()
            .enumerate()
            .map(|(index, business)| Candidate {
                id: business.business_id.to_string(),
                name: business.business_name.clone(),
                aliases: business.aliases.clone(),
                is_primary: business.is_primary,
                ordinal: index + 1,
            })
            .collect();

        let mut outcome = match_entities(EntityKind::Location, location_query, &candidates);

        // A returning caller's usual location breaks low-confidence ties.
        let top_score = outcome.top().map(|t| t.score).unwrap_or(0.0);
        if top_score < 0.7 {
            if let Some(phone) = caller_phone {
                if let Some(usual) = self.caller_usual_location(clinic, phone).await {
                    debug!("boosting caller's usual location {}", usual);
                    for scored in outcome.ranked.iter_mut() {
                        if scored.candidate.id == usual.as_str() && scored.score > 0.0 {
                            scored.score = (scored.score + HISTORY_BOOST).min(HISTORY_BOOST_CAP);
                            scored.reason = format!("{},usual_location", scored.reason);
                        }
                    }
                    outcome.ranked.sort_by(|a, b| {
                        b.score
                            .partial_cmp(&a.score)
                            .unwrap_or(std::cmp::Ordering::Equal)
                    });
                    outcome.match_type = classify(EntityKind::Location, &outcome.ranked);
                }
            }
        }

        let all_options: Vec<LocationData> = outcome
            .ranked
            .iter()
            .map(|scored| LocationData {
                id: BusinessId::new(scored.candidate.id.clone()),
                name: scored.candidate.name.clone(),
            })
            .collect();

        Ok(match outcome.match_type {
            MatchType::HighConfidence => {
                let top = outcome.top().expect("high confidence implies a candidate");
                ResolutionOutcome::Resolved {
                    location: LocationData {
                        id: BusinessId::new(top.candidate.id.clone()),
                        name: top.candidate.name.clone(),
                    },
                    confidence: top.score,
                }
            }
            MatchType::MediumConfidence => {
                let top = outcome.top().expect("medium confidence implies a candidate");
                let second = outcome.ranked.get(1).and_then(|second| {
                    if second.score >= top.score * 0.8 && second.score > 0.0 {
                        Some(LocationData {
                            id: BusinessId::new(second.candidate.id.clone()),
                            name: second.candidate.name.clone(),
                        })
                    } else {
                        None
                    }
                });
                ResolutionOutcome::NeedsConfirmation {
                    best: LocationData {
                        id: BusinessId::new(top.candidate.id.clone()),
                        name: top.candidate.name.clone(),
                    },
                    second,
                    confidence: top.score,
                }
            }
            MatchType::LowConfidence | MatchType::NoMatch => ResolutionOutcome::NeedsClarification {
                options: all_options,
            },
        })
    }

    /// The caller's most visited location, from the booking context cache with
    /// an appointment-history fallback.
    async fn caller_usual_location(&self, clinic: &Clinic, phone: &str) -> Option<BusinessId> {
        let phone_normalized = normalize_phone(phone);
        if phone_normalized.is_empty() {
            return None;
        }

        let context_cache =
            BookingContextCache::new(self.ctx.store.clone(), self.ctx.clock.clone());
        let context = context_cache.get(&phone_normalized).await;
        if let Some(preferred) = context.as_ref().and_then(|c| c.preferred_location.clone()) {
            return Some(preferred.business_id);
        }

        let (business_id, business_name) =
            catalog::most_visited_business(&self.ctx.store, clinic.clinic_id, &phone_normalized)
                .await
                .ok()
                .flatten()?;

        let mut updated = context.unwrap_or_default();
        updated.preferred_location = Some(PreferredLocation {
            business_id: business_id.clone(),
            business_name,
        });
        context_cache
            .set(&phone_normalized, clinic.clinic_id, &updated)
            .await;

        Some(business_id)
    }
}
