use thiserror::Error;

use shared_models::error::codes;

/// Typed outcomes of a PMS call. Upper layers translate these into
/// voice-friendly messages; this crate never rewrites them.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PmsError {
    #[error("PMS rejected credentials")]
    Unauthorized,

    #[error("PMS denied access")]
    Forbidden,

    #[error("PMS resource not found")]
    NotFound,

    #[error("PMS rate limit exceeded")]
    RateLimited,

    #[error("availability window invalid: {0}")]
    InvalidTimeFrame(String),

    #[error("appointment slot no longer available")]
    SlotTaken,

    #[error("requested time is outside business hours")]
    OutsideBusinessHours,

    #[error("transient PMS failure: {0}")]
    Transient(String),

    #[error("PMS error ({status}): {message}")]
    Upstream { status: u16, message: String },
}

impl PmsError {
    /// Stable error code for the webhook envelope.
    pub fn code(&self) -> &'static str {
        match self {
            PmsError::Unauthorized | PmsError::Forbidden => codes::UPSTREAM_ERROR,
            PmsError::NotFound => codes::UPSTREAM_ERROR,
            PmsError::RateLimited => codes::RATE_LIMITED,
            PmsError::InvalidTimeFrame(_) => codes::INVALID_DATE,
            PmsError::SlotTaken => codes::SLOT_TAKEN,
            PmsError::OutsideBusinessHours => codes::OUTSIDE_BUSINESS_HOURS,
            PmsError::Transient(_) => codes::NETWORK_ERROR,
            PmsError::Upstream { .. } => codes::UPSTREAM_ERROR,
        }
    }

    /// Whether a read may be retried. Booking writes are never retried
    /// regardless of this flag.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PmsError::RateLimited
                | PmsError::Transient(_)
                | PmsError::Upstream { status: 500..=599, .. }
        )
    }
}

/// Classify a terminal HTTP status + body into a typed error.
pub fn classify(status: u16, body: &str) -> PmsError {
    let lowered = body.to_lowercase();
    match status {
        401 => PmsError::Unauthorized,
        403 => PmsError::Forbidden,
        404 => PmsError::NotFound,
        409 => PmsError::SlotTaken,
        429 => PmsError::RateLimited,
        422 => {
            if lowered.contains("already booked") || lowered.contains("not available") {
                PmsError::SlotTaken
            } else if lowered.contains("business hours") {
                PmsError::OutsideBusinessHours
            } else if lowered.contains("time frame") || (lowered.contains("from") && lowered.contains("to")) {
                PmsError::InvalidTimeFrame(body.to_string())
            } else {
                PmsError::Upstream {
                    status,
                    message: body.to_string(),
                }
            }
        }
        500..=599 => PmsError::Transient(format!("status {}", status)),
        _ => PmsError::Upstream {
            status,
            message: body.to_string(),
        },
    }
}
