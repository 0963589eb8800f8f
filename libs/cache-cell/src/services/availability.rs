use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, warn};

use shared_database::{Clock, StoreClient};
use shared_models::ids::{BusinessId, ClinicId, PractitionerId};

use crate::models::{AvailabilityCacheEntry, AVAILABILITY_TTL_MINUTES};
use crate::services::stats::CacheStatsRecorder;

/// Store-backed availability cache. Entries survive restarts and are shared
/// by every worker; validity is `!is_stale && expires_at > now`.
pub struct AvailabilityCache {
    store: Arc<StoreClient>,
    clock: Clock,
    stats: CacheStatsRecorder,
}

impl AvailabilityCache {
    pub fn new(store: Arc<StoreClient>, clock: Clock) -> Self {
        let stats = CacheStatsRecorder::new(Arc::clone(&store));
        Self { store, clock, stats }
    }

    /// Valid cached slots for one (practitioner, business, date), or None on
    /// miss. Read errors degrade to a miss; they never block the request.
    pub async fn get(
        &self,
        practitioner_id: &PractitionerId,
        business_id: &BusinessId,
        date: NaiveDate,
    ) -> Option<Vec<DateTime<Utc>>> {
        let started = Instant::now();
        let path = format!(
            "/rest/v1/availability_cache?practitioner_id=eq.{}&business_id=eq.{}&date=eq.{}&limit=1",
            practitioner_id, business_id, date
        );

        let result: Result<Vec<AvailabilityCacheEntry>, _> =
            self.store.request(Method::GET, &path, None).await;

        let entry = match result {
            Ok(rows) => rows.into_iter().next(),
            Err(e) => {
                warn!("availability cache read failed, treating as miss: {}", e);
                None
            }
        };

        let now = self.clock.now();
        let hit = entry.as_ref().map(|e| e.is_valid(now)).unwrap_or(false);
        self.stats
            .record("availability", hit, started.elapsed().as_secs_f64() * 1000.0)
            .await;

        entry.filter(|e| e.is_valid(now)).map(|e| e.available_slots)
    }

    /// Valid entries across a date window, keyed by date. Used by multi-day
    /// scans to avoid one read per day.
    pub async fn get_range(
        &self,
        practitioner_id: &PractitionerId,
        business_id: &BusinessId,
        date_from: NaiveDate,
        date_to: NaiveDate,
    ) -> HashMap<NaiveDate, Vec<DateTime<Utc>>> {
        let path = format!(
            "/rest/v1/availability_cache?practitioner_id=eq.{}&business_id=eq.{}&date=gte.{}&date=lte.{}",
            practitioner_id, business_id, date_from, date_to
        );

        let rows: Vec<AvailabilityCacheEntry> =
            match self.store.request(Method::GET, &path, None).await {
                Ok(rows) => rows,
                Err(e) => {
                    warn!("availability cache range read failed, treating as miss: {}", e);
                    return HashMap::new();
                }
            };

        let now = self.clock.now();
        rows.into_iter()
            .filter(|entry| entry.is_valid(now))
            .map(|entry| (entry.date, entry.available_slots))
            .collect()
    }

    /// Write fresh slots for a key, clearing staleness. Slots are normalized
    /// to sorted, deduplicated UTC instants. Write errors are swallowed.
    pub async fn set(
        &self,
        clinic_id: ClinicId,
        practitioner_id: &PractitionerId,
        business_id: &BusinessId,
        date: NaiveDate,
        mut slots: Vec<DateTime<Utc>>,
    ) {
        slots.sort();
        slots.dedup();

        let now = self.clock.now();
        let expires_at = now + Duration::minutes(AVAILABILITY_TTL_MINUTES);
        let body = json!({
            "clinic_id": clinic_id,
            "practitioner_id": practitioner_id,
            "business_id": business_id,
            "date": date,
            "available_slots": slots,
            "cached_at": now,
            "expires_at": expires_at,
            "is_stale": false,
        });

        if let Err(e) = self
            .store
            .upsert("availability_cache", "practitioner_id,business_id,date", body)
            .await
        {
            warn!("failed to cache availability: {}", e);
        }
    }

    /// Mark one key stale. Called whenever an appointment touching that
    /// (practitioner, business, date) is written or deleted.
    pub async fn invalidate_key(
        &self,
        practitioner_id: &PractitionerId,
        business_id: &BusinessId,
        date: NaiveDate,
    ) {
        let path = format!(
            "/rest/v1/availability_cache?practitioner_id=eq.{}&business_id=eq.{}&date=eq.{}",
            practitioner_id, business_id, date
        );
        let result: Result<Vec<Value>, _> = self
            .store
            .request(Method::PATCH, &path, Some(json!({ "is_stale": true })))
            .await;
        match result {
            Ok(_) => debug!(
                "invalidated availability for {} at {} on {}",
                practitioner_id, business_id, date
            ),
            Err(e) => warn!("failed to invalidate availability: {}", e),
        }
    }

    /// Mark every entry for a clinic stale.
    pub async fn invalidate_clinic(&self, clinic_id: ClinicId) {
        let path = format!("/rest/v1/availability_cache?clinic_id=eq.{}", clinic_id);
        let result: Result<Vec<Value>, _> = self
            .store
            .request(Method::PATCH, &path, Some(json!({ "is_stale": true })))
            .await;
        if let Err(e) = result {
            warn!("failed to invalidate clinic availability: {}", e);
        }
    }

    /// Most recent cache write for a clinic; drives the incremental refresh
    /// window.
    pub async fn last_cached_at(&self, clinic_id: ClinicId) -> Option<DateTime<Utc>> {
        let path = format!(
            "/rest/v1/availability_cache?clinic_id=eq.{}&select=cached_at&order=cached_at.desc&limit=1",
            clinic_id
        );
        let rows: Vec<Value> = self.store.request(Method::GET, &path, None).await.ok()?;
        rows.first()
            .and_then(|row| row.get("cached_at"))
            .and_then(Value::as_str)
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }
}
