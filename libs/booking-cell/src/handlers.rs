use axum::{extract::State, Json};
use serde_json::{json, Value};
use tracing::{error, info};

use shared_database::{catalog, CoreContext};
use shared_models::clinic::Clinic;
use shared_models::error::codes;
use shared_models::webhook::{voice_error, voice_success};
use shared_utils::phone::mask_phone;
use shared_utils::time::{format_date_for_voice, format_for_voice, get_clinic_timezone};

use crate::models::{BookingAction, BookingError, BookingRequest};
use crate::services::booking::{BookingCoordinator, BookingSuccess, CancelSuccess};

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

fn booking_error_envelope(err: BookingError, session_id: &str) -> Value {
    let mut envelope = voice_error(err.code(), &err.voice_message(), session_id);
    if let BookingError::PractitionerClarification(options) = &err {
        envelope["options"] = json!(options);
    }
    envelope
}

fn booking_success_envelope(
    clinic: &Clinic,
    ctx: &CoreContext,
    session_id: &str,
    booked: &BookingSuccess,
    rescheduled: bool,
) -> Value {
    let tz = get_clinic_timezone(clinic, &ctx.config.default_timezone);
    let date_voice = format_date_for_voice(booked.starts_at, tz);
    let time_voice = format_for_voice(booked.starts_at, tz);

    let message = if rescheduled {
        format!(
            "All done, {}. I've moved your {} with {} to {} at {} at {}. Your confirmation number is {}.",
            booked.patient_name,
            booked.service_name,
            booked.practitioner_name,
            date_voice,
            time_voice,
            booked.business_name,
            booked.confirmation_number
        )
    } else {
        format!(
            "You're booked, {}. {} with {} on {} at {} at {}. Your confirmation number is {}.",
            booked.patient_name,
            booked.service_name,
            booked.practitioner_name,
            date_voice,
            time_voice,
            booked.business_name,
            booked.confirmation_number
        )
    };

    voice_success(
        session_id,
        &message,
        json!({
            "bookingId": booked.appointment_id,
            "confirmationNumber": booked.confirmation_number,
            "practitioner": {
                "id": booked.practitioner_id,
                "name": booked.practitioner_name,
            },
            "service": {
                "id": booked.service_id,
                "name": booked.service_name,
            },
            "location": {
                "id": booked.business_id,
                "name": booked.business_name,
            },
            "timeSlot": {
                "date": date_voice,
                "time": time_voice,
                "display": format!("{} at {}", date_voice, time_voice),
            },
            "patientName": booked.patient_name,
        }),
    )
}

fn cancel_success_envelope(
    clinic: &Clinic,
    ctx: &CoreContext,
    session_id: &str,
    cancelled: &CancelSuccess,
) -> Value {
    let tz = get_clinic_timezone(clinic, &ctx.config.default_timezone);
    let date_voice = format_date_for_voice(cancelled.appointment.starts_at, tz);
    let time_voice = format_for_voice(cancelled.appointment.starts_at, tz);

    voice_success(
        session_id,
        &format!(
            "Your appointment on {} at {} has been cancelled.",
            date_voice, time_voice
        ),
        json!({
            "cancelled": true,
            "appointmentId": cancelled.appointment.appointment_id,
            "timeSlot": {
                "date": date_voice,
                "time": time_voice,
                "display": format!("{} at {}", date_voice, time_voice),
            },
            "alreadyCancelled": cancelled.already_cancelled,
        }),
    )
}

#[axum::debug_handler]
pub async fn handle_appointment(
    State(ctx): State<CoreContext>,
    Json(request): Json<BookingRequest>,
) -> Json<Value> {
    info!(
        "appointment handler: session={}, action={:?}, caller={}",
        request.session_id,
        request.action,
        request
            .caller_phone
            .as_deref()
            .map(mask_phone)
            .unwrap_or_else(|| "unknown".to_string())
    );

    let clinic = match clinic_for(&ctx, &request.dialed_number, &request.session_id).await {
        Ok(clinic) => clinic,
        Err(envelope) => return Json(envelope),
    };

    let coordinator = BookingCoordinator::new(ctx.clone());
    Json(match request.action {
        BookingAction::Book => match coordinator.book(&clinic, &request).await {
            Ok(booked) => {
                booking_success_envelope(&clinic, &ctx, &request.session_id, &booked, false)
            }
            Err(e) => booking_error_envelope(e, &request.session_id),
        },
        BookingAction::Cancel => match coordinator.cancel(&clinic, &request).await {
            Ok(cancelled) => {
                cancel_success_envelope(&clinic, &ctx, &request.session_id, &cancelled)
            }
            Err(e) => booking_error_envelope(e, &request.session_id),
        },
        BookingAction::Reschedule | BookingAction::Modify => {
            match coordinator.reschedule(&clinic, &request).await {
                Ok(booked) => {
                    booking_success_envelope(&clinic, &ctx, &request.session_id, &booked, true)
                }
                Err(e) => booking_error_envelope(e, &request.session_id),
            }
        }
    })
}
