use std::sync::Arc;
use std::time::Instant;

use chrono::Duration;
use reqwest::Method;
use serde_json::{json, Value};
use tracing::warn;

use shared_database::{Clock, StoreClient};
use shared_models::ids::ClinicId;
use shared_utils::phone::mask_phone;

use crate::models::{CachedPatient, PATIENT_TTL_HOURS};
use crate::services::stats::CacheStatsRecorder;

/// Caches the PMS patient id and profile per (phone, clinic) so first-booking
/// lookups are a single read.
pub struct PatientCache {
    store: Arc<StoreClient>,
    clock: Clock,
    stats: CacheStatsRecorder,
}

impl PatientCache {
    pub fn new(store: Arc<StoreClient>, clock: Clock) -> Self {
        let stats = CacheStatsRecorder::new(Arc::clone(&store));
        Self { store, clock, stats }
    }

    pub async fn get(&self, phone_normalized: &str, clinic_id: ClinicId) -> Option<CachedPatient> {
        let started = Instant::now();
        let now = self.clock.now().to_rfc3339();
        let path = format!(
            "/rest/v1/patient_cache?phone_normalized=eq.{}&clinic_id=eq.{}&expires_at=gt.{}&limit=1",
            urlencoding::encode(phone_normalized),
            clinic_id,
            urlencoding::encode(&now)
        );

        let rows: Vec<Value> = match self.store.request(Method::GET, &path, None).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!("patient cache read failed, treating as miss: {}", e);
                Vec::new()
            }
        };

        let patient = rows
            .first()
            .and_then(|row| row.get("patient_data"))
            .and_then(|data| serde_json::from_value::<CachedPatient>(data.clone()).ok());

        self.stats
            .record(
                "patient",
                patient.is_some(),
                started.elapsed().as_secs_f64() * 1000.0,
            )
            .await;

        if patient.is_some() {
            tracing::info!("patient cache hit for {}", mask_phone(phone_normalized));
        }
        patient
    }

    pub async fn set(&self, phone_normalized: &str, clinic_id: ClinicId, patient: &CachedPatient) {
        let now = self.clock.now();
        let body = json!({
            "phone_normalized": phone_normalized,
            "clinic_id": clinic_id,
            "patient_id": patient.patient_id,
            "patient_data": patient,
            "cached_at": now,
            "expires_at": now + Duration::hours(PATIENT_TTL_HOURS),
        });

        if let Err(e) = self
            .store
            .upsert("patient_cache", "phone_normalized,clinic_id", body)
            .await
        {
            warn!("failed to cache patient: {}", e);
        }
    }
}
