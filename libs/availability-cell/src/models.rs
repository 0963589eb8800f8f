use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use shared_models::ids::{BusinessId, PractitionerId, ServiceId};

fn default_session() -> String {
    String::new()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AvailabilityCheckRequest {
    pub practitioner: String,
    /// Spoken or literal date. Absent means the caller wants "the next one",
    /// which this endpoint must not guess at.
    #[serde(default)]
    pub date: Option<String>,
    #[serde(rename = "appointmentType", default)]
    pub appointment_type: Option<String>,
    pub business_id: String,
    #[serde(rename = "dialedNumber")]
    pub dialed_number: String,
    #[serde(rename = "sessionId", default = "default_session")]
    pub session_id: String,
}

fn default_max_days() -> u32 {
    14
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FindNextAvailableRequest {
    #[serde(default)]
    pub practitioner: Option<String>,
    #[serde(default)]
    pub service: Option<String>,
    #[serde(rename = "locationId", default)]
    pub location_id: Option<String>,
    #[serde(rename = "maxDays", default = "default_max_days")]
    pub max_days: u32,
    #[serde(rename = "dialedNumber")]
    pub dialed_number: String,
    #[serde(rename = "sessionId", default = "default_session")]
    pub session_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AvailablePractitionersRequest {
    pub business_id: String,
    pub date: String,
    #[serde(rename = "dialedNumber")]
    pub dialed_number: String,
    #[serde(rename = "sessionId", default = "default_session")]
    pub session_id: String,
}

/// One (practitioner, business, service) combination to scan. Both the
/// sequential and parallel paths are built from this same structure so their
/// filtering can never diverge.
#[derive(Debug, Clone, Serialize)]
pub struct SearchCriteria {
    pub practitioner_id: PractitionerId,
    pub practitioner_name: String,
    pub business_id: BusinessId,
    pub business_name: String,
    pub service_id: ServiceId,
    pub service_name: String,
    pub duration_minutes: i32,
}

/// A concrete offered slot, post-filtering.
#[derive(Debug, Clone)]
pub struct SlotOffer {
    pub criteria_index: usize,
    pub starts_at: DateTime<Utc>,
    pub date: NaiveDate,
}

/// Result of a multi-branch scan. `partial` is set when some branches timed
/// out; `filtered_out` distinguishes "everything was suppressed" from a truly
/// empty diary (surfaced in logs, not to the agent).
#[derive(Debug, Default)]
pub struct ScanOutcome {
    pub slots: Vec<SlotOffer>,
    pub partial: bool,
    pub filtered_out: usize,
}
