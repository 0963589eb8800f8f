use std::collections::HashSet;
use std::sync::Arc;

use chrono::{Duration, NaiveDate};
use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, warn};

use shared_database::{Clock, StoreClient};
use shared_models::ids::{BusinessId, PractitionerId, SessionId};

use crate::models::{slot_key, FAILED_ATTEMPT_TTL_HOURS, REJECTED_SLOT_TTL_HOURS};

/// Session-scoped rejected slots plus the global failed-booking-attempt table.
/// Both feed the availability engine's suppression filter so a caller is never
/// re-offered a slot they declined or one the PMS just refused.
pub struct SessionState {
    store: Arc<StoreClient>,
    clock: Clock,
}

impl SessionState {
    pub fn new(store: Arc<StoreClient>, clock: Clock) -> Self {
        Self { store, clock }
    }

    /// Slot keys the caller has declined in this session.
    pub async fn rejected_slots(&self, session_id: &SessionId) -> HashSet<String> {
        let now = self.clock.now().to_rfc3339();
        let path = format!(
            "/rest/v1/session_rejected_slots?session_id=eq.{}&expires_at=gt.{}&select=slot_key",
            urlencoding::encode(session_id.as_str()),
            urlencoding::encode(&now)
        );
        let rows: Vec<Value> = match self.store.request(Method::GET, &path, None).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!("rejected slot read failed, treating as empty: {}", e);
                Vec::new()
            }
        };
        rows.iter()
            .filter_map(|row| row.get("slot_key").and_then(Value::as_str))
            .map(str::to_string)
            .collect()
    }

    /// Record slots the caller declined.
    pub async fn reject_slots(&self, session_id: &SessionId, keys: &[String]) {
        if keys.is_empty() {
            return;
        }
        let now = self.clock.now();
        let expires_at = now + Duration::hours(REJECTED_SLOT_TTL_HOURS);
        let rows: Vec<Value> = keys
            .iter()
            .map(|key| {
                json!({
                    "session_id": session_id,
                    "slot_key": key,
                    "created_at": now,
                    "expires_at": expires_at,
                })
            })
            .collect();

        if let Err(e) = self
            .store
            .upsert("session_rejected_slots", "session_id,slot_key", Value::Array(rows))
            .await
        {
            warn!("failed to record rejected slots: {}", e);
        } else {
            debug!("recorded {} rejected slots for session {}", keys.len(), session_id);
        }
    }

    /// Clear the session's rejections; called on booking success or when the
    /// caller changes search criteria.
    pub async fn clear_session(&self, session_id: &SessionId) {
        let path = format!(
            "/rest/v1/session_rejected_slots?session_id=eq.{}",
            urlencoding::encode(session_id.as_str())
        );
        let result: Result<Vec<Value>, _> = self.store.request(Method::DELETE, &path, None).await;
        if let Err(e) = result {
            warn!("failed to clear rejected slots: {}", e);
        }
    }

    /// Slot keys the PMS recently refused for this (practitioner, business, date).
    pub async fn failed_attempts(
        &self,
        practitioner_id: &PractitionerId,
        business_id: &BusinessId,
        date: NaiveDate,
    ) -> HashSet<String> {
        let now = self.clock.now().to_rfc3339();
        let path = format!(
            "/rest/v1/failed_booking_attempts?practitioner_id=eq.{}&business_id=eq.{}&date=eq.{}&expires_at=gt.{}&select=time_hhmm",
            practitioner_id,
            business_id,
            date,
            urlencoding::encode(&now)
        );
        let rows: Vec<Value> = match self.store.request(Method::GET, &path, None).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!("failed attempt read failed, treating as empty: {}", e);
                Vec::new()
            }
        };
        rows.iter()
            .filter_map(|row| row.get("time_hhmm").and_then(Value::as_str))
            .map(|time| slot_key(practitioner_id, business_id, date, time))
            .collect()
    }

    /// Failed-attempt keys across a date window, one read per criteria.
    pub async fn failed_attempts_range(
        &self,
        practitioner_id: &PractitionerId,
        business_id: &BusinessId,
        date_from: NaiveDate,
        date_to: NaiveDate,
    ) -> HashSet<String> {
        let now = self.clock.now().to_rfc3339();
        let path = format!(
            "/rest/v1/failed_booking_attempts?practitioner_id=eq.{}&business_id=eq.{}&date=gte.{}&date=lte.{}&expires_at=gt.{}&select=date,time_hhmm",
            practitioner_id,
            business_id,
            date_from,
            date_to,
            urlencoding::encode(&now)
        );
        let rows: Vec<Value> = match self.store.request(Method::GET, &path, None).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!("failed attempt range read failed, treating as empty: {}", e);
                Vec::new()
            }
        };
        rows.iter()
            .filter_map(|row| {
                let date = row
                    .get("date")
                    .and_then(Value::as_str)
                    .and_then(|raw| raw.parse::<NaiveDate>().ok())?;
                let time = row.get("time_hhmm").and_then(Value::as_str)?;
                Some(slot_key(practitioner_id, business_id, date, time))
            })
            .collect()
    }

    /// Record a PMS booking rejection so the slot is suppressed for a while.
    pub async fn record_failed_attempt(
        &self,
        practitioner_id: &PractitionerId,
        business_id: &BusinessId,
        date: NaiveDate,
        time_hhmm: &str,
    ) {
        let now = self.clock.now();
        let body = json!({
            "practitioner_id": practitioner_id,
            "business_id": business_id,
            "date": date,
            "time_hhmm": time_hhmm,
            "created_at": now,
            "expires_at": now + Duration::hours(FAILED_ATTEMPT_TTL_HOURS),
        });

        if let Err(e) = self
            .store
            .upsert(
                "failed_booking_attempts",
                "practitioner_id,business_id,date,time_hhmm",
                body,
            )
            .await
        {
            warn!("failed to record failed booking attempt: {}", e);
        }
    }
}
