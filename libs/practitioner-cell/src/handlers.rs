use axum::{extract::State, Json};
use serde_json::{json, Value};
use tracing::{error, info};

use shared_database::{catalog, CoreContext};
use shared_models::clinic::Clinic;
use shared_models::error::codes;
use shared_models::ids::BusinessId;
use shared_models::webhook::{voice_error, voice_success};

use crate::models::{
    LocationPractitionersRequest, PractitionerInfoRequest, PractitionerServicesRequest,
};
use crate::services::practitioners::{resolve_practitioner, PractitionerResolveError};

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

fn practitioner_error(err: PractitionerResolveError, query: &str, session_id: &str) -> Value {
    match err {
        PractitionerResolveError::NotFound(_) => voice_error(
            codes::PRACTITIONER_NOT_FOUND,
            &format!("I couldn't find a practitioner called {}.", query),
            session_id,
        ),
        PractitionerResolveError::ClarificationNeeded(options) => {
            let mut envelope = voice_error(
                codes::PRACTITIONER_CLARIFICATION_NEEDED,
                &format!("Did you mean {}?", options.join(" or ")),
                session_id,
            );
            envelope["options"] = json!(options);
            envelope
        }
        PractitionerResolveError::Lookup(e) => {
            error!("practitioner lookup failed: {}", e);
            voice_error(
                codes::DATABASE_ERROR,
                "I'm having trouble right now. Please try again in a moment.",
                session_id,
            )
        }
    }
}

#[axum::debug_handler]
pub async fn get_practitioner_services(
    State(ctx): State<CoreContext>,
    Json(request): Json<PractitionerServicesRequest>,
) -> Json<Value> {
    info!("practitioner services: '{}'", request.practitioner);

    let clinic = match clinic_for(&ctx, &request.dialed_number, &request.session_id).await {
        Ok(clinic) => clinic,
        Err(envelope) => return Json(envelope),
    };

    let practitioner = match resolve_practitioner(&ctx, &clinic, &request.practitioner).await {
        Ok(practitioner) => practitioner,
        Err(e) => return Json(practitioner_error(e, &request.practitioner, &request.session_id)),
    };

    let services =
        match catalog::get_practitioner_services(&ctx.store, &practitioner.practitioner_id).await {
            Ok(services) => services,
            Err(e) => {
                error!("service listing failed: {}", e);
                return Json(voice_error(
                    codes::DATABASE_ERROR,
                    "I'm having trouble right now. Please try again in a moment.",
                    &request.session_id,
                ));
            }
        };

    let names: Vec<&str> = services.iter().map(|s| s.name.as_str()).collect();
    let message = if names.is_empty() {
        format!("{} has no bookable services right now.", practitioner.full_name())
    } else {
        format!("{} offers {}.", practitioner.full_name(), names.join(", "))
    };

    let default_service = if services.len() == 1 {
        Some(&services[0])
    } else {
        None
    };

    Json(voice_success(
        &request.session_id,
        &message,
        json!({
            "practitioner": {
                "id": practitioner.practitioner_id,
                "name": practitioner.full_name(),
            },
            "services": services
                .iter()
                .map(|s| json!({
                    "id": s.service_id,
                    "name": s.name,
                    "duration_minutes": s.duration_minutes,
                }))
                .collect::<Vec<_>>(),
            "defaultService": default_service.map(|s| json!({
                "id": s.service_id,
                "name": s.name,
                "duration_minutes": s.duration_minutes,
            })),
        }),
    ))
}

#[axum::debug_handler]
pub async fn get_practitioner_info(
    State(ctx): State<CoreContext>,
    Json(request): Json<PractitionerInfoRequest>,
) -> Json<Value> {
    info!("practitioner info: '{}'", request.practitioner);

    let clinic = match clinic_for(&ctx, &request.dialed_number, &request.session_id).await {
        Ok(clinic) => clinic,
        Err(envelope) => return Json(envelope),
    };

    let practitioner = match resolve_practitioner(&ctx, &clinic, &request.practitioner).await {
        Ok(practitioner) => practitioner,
        Err(e) => return Json(practitioner_error(e, &request.practitioner, &request.session_id)),
    };

    let services =
        catalog::get_practitioner_services(&ctx.store, &practitioner.practitioner_id).await;
    let business_ids =
        catalog::get_practitioner_businesses(&ctx.store, &practitioner.practitioner_id).await;
    let all_locations = catalog::get_locations(&ctx.store, clinic.clinic_id).await;

    let (services, business_ids, all_locations) = match (services, business_ids, all_locations) {
        (Ok(s), Ok(b), Ok(l)) => (s, b, l),
        _ => {
            return Json(voice_error(
                codes::DATABASE_ERROR,
                "I'm having trouble right now. Please try again in a moment.",
                &request.session_id,
            ));
        }
    };

    let locations: Vec<Value> = all_locations
        .iter()
        .filter(|business| business_ids.contains(&business.business_id))
        .map(|business| {
            json!({
                "id": business.business_id,
                "name": business.business_name,
            })
        })
        .collect();

    let message = format!(
        "{} works at {} of our locations and offers {} services.",
        practitioner.full_name(),
        locations.len(),
        services.len()
    );

    Json(voice_success(
        &request.session_id,
        &message,
        json!({
            "practitioner": {
                "id": practitioner.practitioner_id,
                "name": practitioner.full_name(),
            },
            "services": services
                .iter()
                .map(|s| json!({
                    "id": s.service_id,
                    "name": s.name,
                    "duration_minutes": s.duration_minutes,
                }))
                .collect::<Vec<_>>(),
            "locations": locations,
        }),
    ))
}

#[axum::debug_handler]
pub async fn get_location_practitioners(
    State(ctx): State<CoreContext>,
    Json(request): Json<LocationPractitionersRequest>,
) -> Json<Value> {
    info!("location practitioners: business_id={}", request.business_id);

    let clinic = match clinic_for(&ctx, &request.dialed_number, &request.session_id).await {
        Ok(clinic) => clinic,
        Err(envelope) => return Json(envelope),
    };

    let business_id = BusinessId::new(request.business_id.clone());
    let business = match catalog::get_business(&ctx.store, clinic.clinic_id, &business_id).await {
        Ok(Some(business)) => business,
        Ok(None) => {
            return Json(voice_error(
                codes::INVALID_BUSINESS_ID,
                "I couldn't find that location.",
                &request.session_id,
            ));
        }
        Err(e) => {
            error!("business lookup failed: {}", e);
            return Json(voice_error(
                codes::DATABASE_ERROR,
                "I'm having trouble right now. Please try again in a moment.",
                &request.session_id,
            ));
        }
    };

    let practitioners = match catalog::get_business_practitioners(&ctx.store, &business_id).await {
        Ok(practitioners) => practitioners,
        Err(e) => {
            error!("practitioner listing failed: {}", e);
            return Json(voice_error(
                codes::DATABASE_ERROR,
                "I'm having trouble right now. Please try again in a moment.",
                &request.session_id,
            ));
        }
    };

    let names: Vec<String> = practitioners.iter().map(|p| p.full_name()).collect();
    let message = if names.is_empty() {
        format!("No practitioners are available at {} right now.", business.business_name)
    } else {
        format!("At {} we have {}.", business.business_name, names.join(", "))
    };

    Json(voice_success(
        &request.session_id,
        &message,
        json!({
            "location": {
                "id": business.business_id,
                "name": business.business_name,
            },
            "practitioners": practitioners
                .iter()
                .map(|p| json!({
                    "id": p.practitioner_id,
                    "name": p.full_name(),
                }))
                .collect::<Vec<_>>(),
        }),
    ))
}
