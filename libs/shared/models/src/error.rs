use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Stable error codes surfaced to the voice agent. These identifiers are part
/// of the webhook contract and must not change between releases.
pub mod codes {
    pub const CLINIC_NOT_FOUND: &str = "clinic_not_found";
    pub const LOCATION_REQUIRED: &str = "location_required";
    pub const INVALID_BUSINESS_ID: &str = "invalid_business_id";
    pub const PRACTITIONER_NOT_FOUND: &str = "practitioner_not_found";
    pub const PRACTITIONER_CLARIFICATION_NEEDED: &str = "practitioner_clarification_needed";
    pub const PRACTITIONER_LOCATION_MISMATCH: &str = "practitioner_location_mismatch";
    pub const SERVICE_NOT_FOUND: &str = "service_not_found";
    pub const MISSING_INFORMATION: &str = "missing_information";
    pub const INVALID_PHONE_NUMBER: &str = "invalid_phone_number";
    pub const INVALID_DATE: &str = "invalid_date";
    pub const INVALID_TIME: &str = "invalid_time";
    pub const NO_AVAILABILITY: &str = "no_availability";
    pub const TIME_NOT_AVAILABLE: &str = "time_not_available";
    pub const SLOT_TAKEN: &str = "slot_taken";
    pub const OUTSIDE_BUSINESS_HOURS: &str = "outside_business_hours";
    pub const PRACTITIONER_NOT_AVAILABLE: &str = "practitioner_not_available";
    pub const APPOINTMENT_NOT_FOUND: &str = "appointment_not_found";
    pub const DUPLICATE_BOOKING: &str = "duplicate_booking";
    pub const RATE_LIMITED: &str = "rate_limited";
    pub const UPSTREAM_ERROR: &str = "upstream_error";
    pub const DATABASE_ERROR: &str = "database_error";
    pub const NETWORK_ERROR: &str = "network_error";
    pub const USE_FIND_NEXT_AVAILABLE: &str = "use_find_next_available";
}

/// Transport-level failure, rejected before a handler runs. Domain failures
/// never use this - they travel as typed errors (`BookingError`, `EngineError`,
/// `PmsError`) and reach the agent inside a voice envelope with HTTP 200.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Authentication error: {0}")]
    Auth(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let AppError::Auth(message) = self;

        tracing::error!("Error: {}: {}", StatusCode::UNAUTHORIZED, message);

        let body = Json(json!({
            "success": false,
            "error": message
        }));

        (StatusCode::UNAUTHORIZED, body).into_response()
    }
}
