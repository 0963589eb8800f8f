use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use shared_models::ids::{BusinessId, PractitionerId};

// Cache TTLs per tier.
pub const AVAILABILITY_TTL_MINUTES: i64 = 15;
pub const PATIENT_TTL_HOURS: i64 = 24;
pub const SERVICE_MATCH_TTL_DAYS: i64 = 7;
pub const BOOKING_CONTEXT_TTL_HOURS: i64 = 1;
pub const REJECTED_SLOT_TTL_HOURS: i64 = 1;
pub const FAILED_ATTEMPT_TTL_HOURS: i64 = 2;

#[derive(Debug, Clone, Deserialize)]
pub struct AvailabilityCacheEntry {
    pub practitioner_id: PractitionerId,
    pub business_id: BusinessId,
    pub date: NaiveDate,
    #[serde(default)]
    pub available_slots: Vec<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub is_stale: bool,
}

impl AvailabilityCacheEntry {
    /// The canonical validity predicate: not stale and not expired.
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        !self.is_stale && self.expires_at > now
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedPatient {
    pub patient_id: String,
    pub first_name: String,
    pub last_name: String,
    pub phone_normalized: String,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreferredLocation {
    pub business_id: BusinessId,
    pub business_name: String,
}

/// Per-caller conversational context, keyed by normalized phone.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BookingContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_location: Option<PreferredLocation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_practitioner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_service: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_search: Option<serde_json::Value>,
}

/// Key for rejected-slot and failed-attempt suppression:
/// `practitioner:business:YYYY-MM-DD:HH:MM` in clinic-local time.
pub fn slot_key(
    practitioner_id: &PractitionerId,
    business_id: &BusinessId,
    date: NaiveDate,
    time_hhmm: &str,
) -> String {
    format!("{}:{}:{}:{}", practitioner_id, business_id, date, time_hhmm)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn validity_requires_fresh_and_not_stale() {
        let now = Utc.with_ymd_and_hms(2025, 7, 16, 0, 0, 0).unwrap();
        let mut entry = AvailabilityCacheEntry {
            practitioner_id: PractitionerId::new("p1"),
            business_id: BusinessId::new("b1"),
            date: NaiveDate::from_ymd_opt(2025, 7, 16).unwrap(),
            available_slots: vec![],
            expires_at: now + chrono::Duration::minutes(5),
            is_stale: false,
        };
        assert!(entry.is_valid(now));

        entry.is_stale = true;
        assert!(!entry.is_valid(now));

        entry.is_stale = false;
        entry.expires_at = now - chrono::Duration::seconds(1);
        assert!(!entry.is_valid(now));
    }

    #[test]
    fn slot_keys_are_stable() {
        let key = slot_key(
            &PractitionerId::new("p1"),
            &BusinessId::new("b1"),
            NaiveDate::from_ymd_opt(2025, 7, 16).unwrap(),
            "10:00",
        );
        assert_eq!(key, "p1:b1:2025-07-16:10:00");
    }
}
