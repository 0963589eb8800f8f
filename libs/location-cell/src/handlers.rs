use axum::{extract::State, Json};
use serde_json::{json, Value};
use tracing::{error, info};

use shared_database::{catalog, CoreContext};
use shared_models::clinic::Clinic;
use shared_models::error::codes;
use shared_models::webhook::{voice_error, voice_success, LocationData};

use crate::models::{LocationConfirmerRequest, LocationResolverRequest, ResolutionOutcome};
use crate::services::confirmer::{interpret_response, ConfirmationOutcome};
use crate::services::resolver::LocationResolver;

async fn clinic_for(ctx: &CoreContext, dialed_number: &str) -> Result<Clinic, Value> {
    match catalog::get_clinic_by_dialed_number(&ctx.store, dialed_number).await {
        Ok(Some(clinic)) => Ok(clinic),
        Ok(None) => Err(voice_error(
            codes::CLINIC_NOT_FOUND,
            "I couldn't find a clinic for this number. Please contact the clinic directly.",
            "",
        )),
        Err(e) => {
            error!("clinic lookup failed: {}", e);
            Err(voice_error(
                codes::DATABASE_ERROR,
                "I'm having trouble right now. Please try again in a moment.",
                "",
            ))
        }
    }
}

fn clarification_message(options: &[LocationData]) -> String {
    let names: Vec<&str> = options.iter().map(|o| o.name.as_str()).collect();
    match names.as_slice() {
        [] => "Which location would you prefer?".to_string(),
        [a, b] => format!(
            "We have two locations: {} and {}. Which one would you prefer?",
            a, b
        ),
        [a, b, c] => format!(
            "We have locations at {}, {}, and {}. Which location would you prefer?",
            a, b, c
        ),
        _ => {
            let (last, rest) = names.split_last().expect("non-empty names");
            format!(
                "We have locations at {}, and {}. Which location would you prefer?",
                rest.join(", "),
                last
            )
        }
    }
}

#[axum::debug_handler]
pub async fn resolve_location(
    State(ctx): State<CoreContext>,
    Json(request): Json<LocationResolverRequest>,
) -> Json<Value> {
    info!(
        "location resolution: session={}, query='{}'",
        request.session_id, request.location_query
    );

    let clinic = match clinic_for(&ctx, &request.dialed_number).await {
        Ok(clinic) => clinic,
        Err(mut envelope) => {
            envelope["sessionId"] = json!(request.session_id);
            return Json(envelope);
        }
    };

    let resolver = LocationResolver::new(ctx);
    let outcome = match resolver
        .resolve(
            &clinic,
            &request.location_query,
            request.caller_phone.as_deref(),
        )
        .await
    {
        Ok(outcome) => outcome,
        Err(e) => {
            error!("location resolution failed: {}", e);
            return Json(voice_error(
                codes::DATABASE_ERROR,
                "I'm having trouble looking up our locations. Please try again.",
                &request.session_id,
            ));
        }
    };

    Json(match outcome {
        ResolutionOutcome::NoLocations => voice_error(
            codes::LOCATION_REQUIRED,
            "I couldn't find any locations for this clinic. Please contact the clinic directly.",
            &request.session_id,
        ),
        ResolutionOutcome::Resolved { location, confidence } => voice_success(
            &request.session_id,
            &format!("I'll book you at {}", location.name),
            json!({
                "resolved": true,
                "needsClarification": false,
                "location": location,
                "confidence": confidence,
            }),
        ),
        ResolutionOutcome::NeedsConfirmation { best, second, confidence } => {
            let message = match &second {
                Some(other) => format!("Did you mean our {} or {}?", best.name, other.name),
                None => format!("Did you mean our {}?", best.name),
            };
            let mut options = vec![best];
            options.extend(second);
            voice_success(
                &request.session_id,
                &message,
                json!({
                    "resolved": false,
                    "needsClarification": true,
                    "options": options,
                    "confidence": confidence,
                }),
            )
        }
        ResolutionOutcome::NeedsClarification { options } => {
            let message = clarification_message(&options);
            voice_success(
                &request.session_id,
                &message,
                json!({
                    "resolved": false,
                    "needsClarification": true,
                    "options": options,
                    "confidence": 0.0,
                }),
            )
        }
    })
}

#[axum::debug_handler]
pub async fn confirm_location(
    State(ctx): State<CoreContext>,
    Json(request): Json<LocationConfirmerRequest>,
) -> Json<Value> {
    info!(
        "location confirmation: session={}, response='{}'",
        request.session_id, request.user_response
    );

    if let Err(mut envelope) = clinic_for(&ctx, &request.dialed_number).await {
        envelope["sessionId"] = json!(request.session_id);
        return Json(envelope);
    }

    Json(match interpret_response(&request.user_response, &request.options) {
        ConfirmationOutcome::Confirmed(location) => voice_success(
            &request.session_id,
            &format!("I'll book you at {}", location.name),
            json!({
                "locationConfirmed": true,
                "location": location,
            }),
        ),
        ConfirmationOutcome::Rejected | ConfirmationOutcome::Unclear => {
            let message = clarification_message(&request.options);
            voice_success(
                &request.session_id,
                &message,
                json!({
                    "locationConfirmed": false,
                    "needsClarification": true,
                    "options": request.options,
                }),
            )
        }
    })
}
