use std::sync::Arc;
use std::time::Instant;

use chrono::Duration;
use reqwest::Method;
use serde_json::{json, Value};
use tracing::warn;

use shared_database::{Clock, StoreClient};
use shared_models::ids::ClinicId;

use crate::models::SERVICE_MATCH_TTL_DAYS;
use crate::services::stats::CacheStatsRecorder;

/// Caches fuzzy-match results per (clinic, normalized query). Reference
/// counted by usage_count; rarely used entries are evicted during cleanup.
pub struct ServiceMatchCache {
    store: Arc<StoreClient>,
    clock: Clock,
    stats: CacheStatsRecorder,
}

impl ServiceMatchCache {
    pub fn new(store: Arc<StoreClient>, clock: Clock) -> Self {
        let stats = CacheStatsRecorder::new(Arc::clone(&store));
        Self { store, clock, stats }
    }

    fn cache_key(clinic_id: ClinicId, search_term: &str) -> String {
        format!("{}:{}", clinic_id, search_term.to_lowercase())
    }

    pub async fn get(&self, clinic_id: ClinicId, search_term: &str) -> Option<Value> {
        let started = Instant::now();
        let key = Self::cache_key(clinic_id, search_term);
        let now = self.clock.now().to_rfc3339();
        let path = format!(
            "/rest/v1/service_match_cache?cache_key=eq.{}&expires_at=gt.{}&limit=1",
            urlencoding::encode(&key),
            urlencoding::encode(&now)
        );

        let rows: Vec<Value> = match self.store.request(Method::GET, &path, None).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!("service match cache read failed, treating as miss: {}", e);
                Vec::new()
            }
        };

        let matches = rows.first().and_then(|row| row.get("matches")).cloned();

        self.stats
            .record(
                "service_match",
                matches.is_some(),
                started.elapsed().as_secs_f64() * 1000.0,
            )
            .await;

        if matches.is_some() {
            let bump_path = format!(
                "/rest/v1/service_match_cache?cache_key=eq.{}",
                urlencoding::encode(&key)
            );
            let usage = rows
                .first()
                .and_then(|row| row.get("usage_count"))
                .and_then(Value::as_i64)
                .unwrap_or(0);
            let _: Result<Vec<Value>, _> = self
                .store
                .request(
                    Method::PATCH,
                    &bump_path,
                    Some(json!({ "usage_count": usage + 1 })),
                )
                .await;
        }

        matches
    }

    pub async fn set(&self, clinic_id: ClinicId, search_term: &str, matches: Value) {
        let key = Self::cache_key(clinic_id, search_term);
        let now = self.clock.now();
        let body = json!({
            "cache_key": key,
            "clinic_id": clinic_id,
            "search_term": search_term,
            "matches": matches,
            "cached_at": now,
            "expires_at": now + Duration::days(SERVICE_MATCH_TTL_DAYS),
        });

        if let Err(e) = self.store.upsert("service_match_cache", "cache_key", body).await {
            warn!("failed to cache service matches: {}", e);
        }
    }
}
