use serde::Deserialize;
use thiserror::Error;

use shared_models::error::codes;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingAction {
    Book,
    Cancel,
    Reschedule,
    Modify,
}

impl Default for BookingAction {
    fn default() -> Self {
        BookingAction::Book
    }
}

fn default_session() -> String {
    String::new()
}

/// The appointment-handler payload. One endpoint, action-routed; reschedule
/// fields are only read for that action.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BookingRequest {
    #[serde(default)]
    pub action: BookingAction,
    #[serde(rename = "sessionId", default = "default_session")]
    pub session_id: String,
    #[serde(rename = "dialedNumber")]
    pub dialed_number: String,
    #[serde(rename = "callerPhone", alias = "systemCallerID", default)]
    pub caller_phone: Option<String>,

    #[serde(rename = "patientName", default)]
    pub patient_name: Option<String>,
    #[serde(rename = "patientFirstName", default)]
    pub patient_first_name: Option<String>,
    #[serde(rename = "patientLastName", default)]
    pub patient_last_name: Option<String>,
    #[serde(rename = "patientPhone", default)]
    pub patient_phone: Option<String>,

    #[serde(default)]
    pub practitioner: Option<String>,
    #[serde(rename = "appointmentType", alias = "service", default)]
    pub appointment_type: Option<String>,
    #[serde(rename = "appointmentDate", default)]
    pub appointment_date: Option<String>,
    #[serde(rename = "appointmentTime", default)]
    pub appointment_time: Option<String>,
    #[serde(default)]
    pub business_id: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(rename = "appointmentId", default)]
    pub appointment_id: Option<String>,

    #[serde(rename = "currentAppointmentDetails", default)]
    pub current_appointment_details: Option<String>,
    #[serde(rename = "newDate", default)]
    pub new_date: Option<String>,
    #[serde(rename = "newTime", default)]
    pub new_time: Option<String>,
    #[serde(rename = "newPractitioner", default)]
    pub new_practitioner: Option<String>,
    #[serde(rename = "newAppointmentType", default)]
    pub new_appointment_type: Option<String>,
}

impl BookingRequest {
    /// The phone the appointment is for: an explicit patient phone wins,
    /// otherwise the caller's own number.
    pub fn booking_phone(&self) -> Option<&str> {
        self.patient_phone
            .as_deref()
            .or(self.caller_phone.as_deref())
    }

    /// {first, last} pair: explicit split fields win; a single name string is
    /// split at the first space so multi-word surnames survive.
    pub fn patient_name_parts(&self) -> Option<(String, String)> {
        if let (Some(first), Some(last)) = (
            self.patient_first_name.as_deref(),
            self.patient_last_name.as_deref(),
        ) {
            if !first.trim().is_empty() && !last.trim().is_empty() {
                return Some((first.trim().to_string(), last.trim().to_string()));
            }
        }
        let full = self.patient_name.as_deref()?.trim();
        if full.is_empty() {
            return None;
        }
        match full.split_once(' ') {
            Some((first, last)) => Some((first.to_string(), last.trim().to_string())),
            None => Some((full.to_string(), String::new())),
        }
    }
}

#[derive(Error, Debug)]
pub enum BookingError {
    #[error("missing information: {0}")]
    MissingInformation(String),

    #[error("invalid phone number")]
    InvalidPhoneNumber,

    #[error("invalid date")]
    InvalidDate,

    #[error("invalid time")]
    InvalidTime,

    #[error("location required")]
    LocationRequired,

    #[error("unknown location")]
    InvalidBusinessId,

    #[error("practitioner not found: {0}")]
    PractitionerNotFound(String),

    #[error("practitioner needs clarification")]
    PractitionerClarification(Vec<String>),

    #[error("practitioner does not work at that location")]
    PractitionerLocationMismatch,

    #[error("service not found: {0}")]
    ServiceNotFound(String),

    #[error("slot already taken")]
    SlotTaken,

    #[error("requested time is not offered")]
    TimeNotAvailable,

    #[error("outside business hours")]
    OutsideBusinessHours,

    #[error("patient already holds this booking")]
    DuplicateBooking,

    #[error("appointment not found")]
    AppointmentNotFound,

    #[error("PMS rate limit")]
    RateLimited,

    #[error("upstream failure: {0}")]
    Upstream(String),

    #[error("store failure: {0}")]
    Database(String),

    #[error("network failure: {0}")]
    Network(String),
}

impl BookingError {
    pub fn code(&self) -> &'static str {
        match self {
            BookingError::MissingInformation(_) => codes::MISSING_INFORMATION,
            BookingError::InvalidPhoneNumber => codes::INVALID_PHONE_NUMBER,
            BookingError::InvalidDate => codes::INVALID_DATE,
            BookingError::InvalidTime => codes::INVALID_TIME,
            BookingError::LocationRequired => codes::LOCATION_REQUIRED,
            BookingError::InvalidBusinessId => codes::INVALID_BUSINESS_ID,
            BookingError::PractitionerNotFound(_) => codes::PRACTITIONER_NOT_FOUND,
            BookingError::PractitionerClarification(_) => codes::PRACTITIONER_CLARIFICATION_NEEDED,
            BookingError::PractitionerLocationMismatch => codes::PRACTITIONER_LOCATION_MISMATCH,
            BookingError::ServiceNotFound(_) => codes::SERVICE_NOT_FOUND,
            BookingError::SlotTaken => codes::SLOT_TAKEN,
            BookingError::TimeNotAvailable => codes::TIME_NOT_AVAILABLE,
            BookingError::OutsideBusinessHours => codes::OUTSIDE_BUSINESS_HOURS,
            BookingError::DuplicateBooking => codes::DUPLICATE_BOOKING,
            BookingError::AppointmentNotFound => codes::APPOINTMENT_NOT_FOUND,
            BookingError::RateLimited => codes::RATE_LIMITED,
            BookingError::Upstream(_) => codes::UPSTREAM_ERROR,
            BookingError::Database(_) => codes::DATABASE_ERROR,
            BookingError::Network(_) => codes::NETWORK_ERROR,
        }
    }

    /// Voice-ready text; produced here at the boundary, never deeper.
    pub fn voice_message(&self) -> String {
        match self {
            BookingError::MissingInformation(what) => {
                format!("I still need your {} to book this.", what)
            }
            BookingError::InvalidPhoneNumber => {
                "That phone number doesn't look right. Could you repeat it?".to_string()
            }
            BookingError::InvalidDate => {
                "I didn't catch that date. Could you say it again?".to_string()
            }
            BookingError::InvalidTime => {
                "That time doesn't work on that date. Could you pick another time?".to_string()
            }
            BookingError::LocationRequired => {
                "Which of our locations would you like?".to_string()
            }
            BookingError::InvalidBusinessId => "I couldn't find that location.".to_string(),
            BookingError::PractitionerNotFound(query) => {
                format!("I couldn't find a practitioner called {}.", query)
            }
            BookingError::PractitionerClarification(options) => {
                format!("Did you mean {}?", options.join(" or "))
            }
            BookingError::PractitionerLocationMismatch => {
                "That practitioner doesn't work at the location you chose.".to_string()
            }
            BookingError::ServiceNotFound(query) => {
                format!("I couldn't find a service called {}.", query)
            }
            BookingError::SlotTaken => {
                "I'm sorry, that time was just taken. Would you like another time?".to_string()
            }
            BookingError::TimeNotAvailable => {
                "That time isn't available. Would you like me to check other times?".to_string()
            }
            BookingError::OutsideBusinessHours => {
                "That time is outside business hours.".to_string()
            }
            BookingError::DuplicateBooking => {
                "You already have this appointment booked.".to_string()
            }
            BookingError::AppointmentNotFound => {
                "I couldn't find that appointment.".to_string()
            }
            BookingError::RateLimited
            | BookingError::Upstream(_)
            | BookingError::Network(_) => {
                "I'm having trouble reaching the booking system. Please try again shortly."
                    .to_string()
            }
            BookingError::Database(_) => {
                "I'm having trouble right now. Please try again in a moment.".to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_request() -> BookingRequest {
        serde_json::from_value(serde_json::json!({
            "dialedNumber": "0478621276",
            "patientName": "Test Patient",
        }))
        .unwrap()
    }

    #[test]
    fn single_name_string_splits_at_first_space() {
        let mut request = base_request();
        request.patient_name = Some("Maria van der Berg".to_string());
        let (first, last) = request.patient_name_parts().unwrap();
        assert_eq!(first, "Maria");
        assert_eq!(last, "van der Berg");
    }

    #[test]
    fn explicit_split_fields_win() {
        let mut request = base_request();
        request.patient_first_name = Some("Jo".to_string());
        request.patient_last_name = Some("Ng".to_string());
        let (first, last) = request.patient_name_parts().unwrap();
        assert_eq!((first.as_str(), last.as_str()), ("Jo", "Ng"));
    }

    #[test]
    fn caller_id_alias_fills_caller_phone() {
        let request: BookingRequest = serde_json::from_value(serde_json::json!({
            "dialedNumber": "0478621276",
            "systemCallerID": "0478621276",
        }))
        .unwrap();
        assert_eq!(request.booking_phone(), Some("0478621276"));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let result: Result<BookingRequest, _> = serde_json::from_value(serde_json::json!({
            "dialedNumber": "0478621276",
            "surpriseField": true,
        }));
        assert!(result.is_err());
    }
}
