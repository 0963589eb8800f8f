use axum::{extract::State, Json};
use serde_json::{json, Value};
use tracing::{error, info};

use shared_database::{catalog, CoreContext};
use shared_models::clinic::Clinic;
use shared_models::error::codes;
use shared_models::ids::{BusinessId, SessionId};
use shared_models::webhook::{voice_error, voice_success};
use shared_utils::dates::parse_date_request;
use shared_utils::time::{format_date_for_voice, format_for_voice};

use crate::models::{
    AvailabilityCheckRequest, AvailablePractitionersRequest, FindNextAvailableRequest,
    ScanOutcome, SearchCriteria,
};
use crate::services::engine::{AvailabilityEngine, EngineError};

async fn clinic_for(ctx: &CoreContext, dialed_number: &str, session_id: &str) -> Result<Clinic, Value> {
    match catalog::get_clinic_by_dialed_number(&ctx.store, dialed_number).await {
        Ok(Some(clinic)) => Ok(clinic),
        Ok(None) => Err(voice_error(
            codes::CLINIC_NOT_FOUND,
            "I couldn't find a clinic for this number. Please contact the clinic directly.",
            session_id,
        )),
        Err(e) => {
            error!("clinic lookup failed: {}", e);
            Err(voice_error(
                codes::DATABASE_ERROR,
                "I'm having trouble right now. Please try again in a moment.",
                session_id,
            ))
        }
    }
}

fn engine_error_envelope(err: EngineError, session_id: &str) -> Value {
    match err {
        EngineError::PractitionerNotFound(query) => voice_error(
            codes::PRACTITIONER_NOT_FOUND,
            &format!("I couldn't find a practitioner called {}.", query),
            session_id,
        ),
        EngineError::PractitionerClarification(options) => {
            let mut envelope = voice_error(
                codes::PRACTITIONER_CLARIFICATION_NEEDED,
                &format!("Did you mean {}?", options.join(" or ")),
                session_id,
            );
            envelope["options"] = json!(options);
            envelope
        }
        EngineError::PractitionerLocationMismatch => voice_error(
            codes::PRACTITIONER_LOCATION_MISMATCH,
            "That practitioner doesn't work at the location you chose.",
            session_id,
        ),
        EngineError::ServiceNotFound(query) => voice_error(
            codes::SERVICE_NOT_FOUND,
            &format!("I couldn't find a service called {}.", query),
            session_id,
        ),
        EngineError::InvalidBusiness => voice_error(
            codes::INVALID_BUSINESS_ID,
            "I couldn't find that location.",
            session_id,
        ),
        EngineError::Pms(e) => {
            error!("PMS failure during availability scan: {}", e);
            voice_error(
                e.code(),
                "I'm having trouble reaching the booking system. Please try again shortly.",
                session_id,
            )
        }
        EngineError::Store(e) => {
            error!("store failure during availability scan: {}", e);
            voice_error(
                codes::DATABASE_ERROR,
                "I'm having trouble right now. Please try again in a moment.",
                session_id,
            )
        }
    }
}

#[axum::debug_handler]
pub async fn check_availability(
    State(ctx): State<CoreContext>,
    Json(request): Json<AvailabilityCheckRequest>,
) -> Json<Value> {
    info!(
        "availability check: session={}, practitioner='{}', date={:?}",
        request.session_id, request.practitioner, request.date
    );

    let clinic = match clinic_for(&ctx, &request.dialed_number, &request.session_id).await {
        Ok(clinic) => clinic,
        Err(envelope) => return Json(envelope),
    };

    // "The next one" is a different question; this endpoint must never guess
    // that an open-ended request means today.
    let Some(date_raw) = request.date.as_deref().filter(|raw| !raw.trim().is_empty()) else {
        return Json(voice_error(
            codes::USE_FIND_NEXT_AVAILABLE,
            "Let me look for the next available time instead.",
            &request.session_id,
        ));
    };

    let engine = AvailabilityEngine::new(ctx);
    let today = engine.today(&clinic);
    let date = match parse_date_request(date_raw, today) {
        Ok(date) => date,
        Err(_) => {
            return Json(voice_error(
                codes::INVALID_DATE,
                "I didn't catch that date. Could you say it again?",
                &request.session_id,
            ));
        }
    };

    let business_id = BusinessId::new(request.business_id.clone());
    let criteria = match engine
        .criteria_for_practitioner(
            &clinic,
            &request.practitioner,
            request.appointment_type.as_deref(),
            Some(&business_id),
        )
        .await
    {
        Ok(criteria) => criteria,
        Err(e) => return Json(engine_error_envelope(e, &request.session_id)),
    };
    let Some(criteria) = criteria.into_iter().next() else {
        return Json(voice_error(
            codes::PRACTITIONER_LOCATION_MISMATCH,
            "That practitioner doesn't work at the location you chose.",
            &request.session_id,
        ));
    };

    let session_id = SessionId::new(request.session_id.clone());
    let outcome = match engine
        .slots_for_date(&clinic, &criteria, date, &session_id)
        .await
    {
        Ok(outcome) => outcome,
        Err(e) => return Json(engine_error_envelope(e, &request.session_id)),
    };

    let tz = engine.clinic_tz(&clinic);
    if outcome.slots.is_empty() {
        let date_voice = date.format("%A, %B %-d").to_string();
        let mut envelope = voice_error(
            codes::NO_AVAILABILITY,
            &format!(
                "{} has no available times for {} on {}.",
                criteria.practitioner_name, criteria.service_name, date_voice
            ),
            &request.session_id,
        );
        envelope["available_times"] = json!([]);
        envelope["practitioner"] = json!({
            "id": criteria.practitioner_id,
            "name": criteria.practitioner_name,
        });
        envelope["service"] = json!(criteria.service_name);
        envelope["date"] = json!(date.to_string());
        envelope["location"] = json!({
            "id": criteria.business_id,
            "name": criteria.business_name,
        });
        return Json(envelope);
    }

    let times: Vec<String> = outcome
        .slots
        .iter()
        .map(|offer| format_for_voice(offer.starts_at, tz))
        .collect();
    let date_voice = format_date_for_voice(outcome.slots[0].starts_at, tz);
    let message = format!(
        "{}'s available times for {} on {} are {}.",
        criteria.practitioner_name,
        criteria.service_name,
        date_voice,
        times.join(", ")
    );

    let criteria_slice = std::slice::from_ref(&criteria);
    engine
        .record_offers(&clinic, &session_id, criteria_slice, &outcome.slots)
        .await;

    Json(voice_success(
        &request.session_id,
        &message,
        json!({
            "available_times": times,
            "practitioner": {
                "id": criteria.practitioner_id,
                "name": criteria.practitioner_name,
            },
            "service": criteria.service_name,
            "date": date.to_string(),
            "location": {
                "id": criteria.business_id,
                "name": criteria.business_name,
            },
        }),
    ))
}

#[axum::debug_handler]
pub async fn find_next_available(
    State(ctx): State<CoreContext>,
    Json(request): Json<FindNextAvailableRequest>,
) -> Json<Value> {
    info!(
        "find next available: session={}, practitioner={:?}, service={:?}, maxDays={}",
        request.session_id, request.practitioner, request.service, request.max_days
    );

    let clinic = match clinic_for(&ctx, &request.dialed_number, &request.session_id).await {
        Ok(clinic) => clinic,
        Err(envelope) => return Json(envelope),
    };

    if request.practitioner.is_none() && request.service.is_none() {
        return Json(voice_error(
            codes::MISSING_INFORMATION,
            "Who or what service would you like me to look for?",
            &request.session_id,
        ));
    }

    let engine = AvailabilityEngine::new(ctx);
    let max_days = request.max_days.min(30);
    let location_id = request.location_id.as_ref().map(|id| BusinessId::new(id.clone()));

    if max_days == 0 {
        let mut envelope = voice_error(
            codes::NO_AVAILABILITY,
            "I couldn't find any available appointments in that window.",
            &request.session_id,
        );
        envelope["found"] = json!(false);
        return Json(envelope);
    }

    let criteria = match &request.practitioner {
        Some(practitioner) => {
            engine
                .criteria_for_practitioner(
                    &clinic,
                    practitioner,
                    request.service.as_deref(),
                    location_id.as_ref(),
                )
                .await
        }
        None => {
            let service = request.service.as_deref().expect("checked above");
            engine
                .criteria_for_service(&clinic, service, location_id.as_ref())
                .await
        }
    };
    let criteria = match criteria {
        Ok(criteria) => criteria,
        Err(e) => return Json(engine_error_envelope(e, &request.session_id)),
    };

    let session_id = SessionId::new(request.session_id.clone());
    let outcome = match engine
        .find_next(&clinic, &criteria, max_days, &session_id)
        .await
    {
        Ok(outcome) => outcome,
        Err(e) => return Json(engine_error_envelope(e, &request.session_id)),
    };

    Json(render_find_next(&engine, &clinic, &request.session_id, &session_id, &criteria, outcome, max_days).await)
}

async fn render_find_next(
    engine: &AvailabilityEngine,
    clinic: &Clinic,
    session_raw: &str,
    session_id: &SessionId,
    criteria: &[SearchCriteria],
    outcome: ScanOutcome,
    max_days: u32,
) -> Value {
    if outcome.slots.is_empty() {
        let mut envelope = voice_error(
            codes::NO_AVAILABILITY,
            &format!(
                "I couldn't find any available appointments in the next {} days.",
                max_days
            ),
            session_raw,
        );
        envelope["found"] = json!(false);
        envelope["partial"] = json!(outcome.partial);
        return envelope;
    }

    let tz = engine.clinic_tz(clinic);
    let offers = &outcome.slots[..outcome.slots.len().min(2)];
    let descriptions: Vec<String> = offers
        .iter()
        .filter_map(|offer| {
            criteria.get(offer.criteria_index).map(|c| {
                format!(
                    "{} at {} at {}",
                    format_date_for_voice(offer.starts_at, tz),
                    format_for_voice(offer.starts_at, tz),
                    c.business_name
                )
            })
        })
        .collect();

    let first = &offers[0];
    let Some(first_criteria) = criteria.get(first.criteria_index) else {
        return voice_error(
            codes::NO_AVAILABILITY,
            "I couldn't find any available appointments.",
            session_raw,
        );
    };

    let message = match descriptions.as_slice() {
        [only] => format!(
            "{}'s next availability for {} is {}.",
            first_criteria.practitioner_name, first_criteria.service_name, only
        ),
        [a, b] => format!(
            "{}'s next availability for {} is {} and {}.",
            first_criteria.practitioner_name, first_criteria.service_name, a, b
        ),
        _ => unreachable!("offers are capped at two"),
    };

    engine
        .record_offers(clinic, session_id, criteria, offers)
        .await;

    voice_success(
        session_raw,
        &message,
        json!({
            "found": true,
            "slot": {
                "date": first.date.to_string(),
                "time": format_for_voice(first.starts_at, tz),
                "display": descriptions[0],
            },
            "practitioner": {
                "id": first_criteria.practitioner_id,
                "name": first_criteria.practitioner_name,
            },
            "service": first_criteria.service_name,
            "location": {
                "id": first_criteria.business_id,
                "name": first_criteria.business_name,
            },
            "partial": outcome.partial,
        }),
    )
}

#[axum::debug_handler]
pub async fn get_available_practitioners(
    State(ctx): State<CoreContext>,
    Json(request): Json<AvailablePractitionersRequest>,
) -> Json<Value> {
    info!(
        "available practitioners: session={}, business_id={}, date={}",
        request.session_id, request.business_id, request.date
    );

    let clinic = match clinic_for(&ctx, &request.dialed_number, &request.session_id).await {
        Ok(clinic) => clinic,
        Err(envelope) => return Json(envelope),
    };

    let engine = AvailabilityEngine::new(ctx);
    let today = engine.today(&clinic);
    let date = match parse_date_request(&request.date, today) {
        Ok(date) => date,
        Err(_) => {
            return Json(voice_error(
                codes::INVALID_DATE,
                "I didn't catch that date. Could you say it again?",
                &request.session_id,
            ));
        }
    };

    let business_id = BusinessId::new(request.business_id.clone());
    let criteria = match engine.criteria_for_business(&clinic, &business_id).await {
        Ok(criteria) => criteria,
        Err(e) => return Json(engine_error_envelope(e, &request.session_id)),
    };

    let session_id = SessionId::new(request.session_id.clone());
    let (available, partial) = match engine
        .available_practitioners(&clinic, &criteria, date, &session_id)
        .await
    {
        Ok(result) => result,
        Err(e) => return Json(engine_error_envelope(e, &request.session_id)),
    };

    let business_name = criteria
        .first()
        .map(|c| c.business_name.clone())
        .unwrap_or_default();
    let practitioners: Vec<Value> = available
        .iter()
        .filter_map(|index| criteria.get(*index))
        .map(|c| {
            json!({
                "id": c.practitioner_id,
                "name": c.practitioner_name,
            })
        })
        .collect();

    let message = if practitioners.is_empty() {
        format!("No practitioners have open times at {} on {}.", business_name, date)
    } else {
        let names: Vec<String> = available
            .iter()
            .filter_map(|index| criteria.get(*index))
            .map(|c| c.practitioner_name.clone())
            .collect();
        format!(
            "On {} at {}, {} available.",
            date,
            business_name,
            if names.len() == 1 {
                format!("{} is", names[0])
            } else {
                format!("{} are", names.join(" and "))
            }
        )
    };

    Json(voice_success(
        &request.session_id,
        &message,
        json!({
            "date": date.to_string(),
            "location": {
                "id": business_id,
                "name": business_name,
            },
            "practitioners": practitioners,
            "partial": partial,
        }),
    ))
}
