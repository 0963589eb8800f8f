use std::sync::Arc;
use std::time::Instant;

use chrono::Duration;
use reqwest::Method;
use serde_json::{json, Value};
use tracing::warn;

use shared_database::{Clock, StoreClient};
use shared_models::ids::ClinicId;

use crate::models::{BookingContext, BOOKING_CONTEXT_TTL_HOURS};
use crate::services::stats::CacheStatsRecorder;

/// Per-caller booking context, updated opportunistically during a call so a
/// returning caller's preferences survive between webhooks.
pub struct BookingContextCache {
    store: Arc<StoreClient>,
    clock: Clock,
    stats: CacheStatsRecorder,
}

impl BookingContextCache {
    pub fn new(store: Arc<StoreClient>, clock: Clock) -> Self {
        let stats = CacheStatsRecorder::new(Arc::clone(&store));
        Self { store, clock, stats }
    }

    pub async fn get(&self, phone_normalized: &str) -> Option<BookingContext> {
        let started = Instant::now();
        let now = self.clock.now().to_rfc3339();
        let path = format!(
            "/rest/v1/booking_context_cache?phone_normalized=eq.{}&expires_at=gt.{}&limit=1",
            urlencoding::encode(phone_normalized),
            urlencoding::encode(&now)
        );

        let rows: Vec<Value> = match self.store.request(Method::GET, &path, None).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!("booking context read failed, treating as miss: {}", e);
                Vec::new()
            }
        };

        let context = rows
            .first()
            .and_then(|row| row.get("context_data"))
            .and_then(|data| serde_json::from_value::<BookingContext>(data.clone()).ok());

        self.stats
            .record(
                "booking_context",
                context.is_some(),
                started.elapsed().as_secs_f64() * 1000.0,
            )
            .await;

        if context.is_some() {
            let hit_count = rows
                .first()
                .and_then(|row| row.get("hit_count"))
                .and_then(Value::as_i64)
                .unwrap_or(0);
            let bump_path = format!(
                "/rest/v1/booking_context_cache?phone_normalized=eq.{}",
                urlencoding::encode(phone_normalized)
            );
            let _: Result<Vec<Value>, _> = self
                .store
                .request(
                    Method::PATCH,
                    &bump_path,
                    Some(json!({
                        "hit_count": hit_count + 1,
                        "last_accessed": self.clock.now(),
                    })),
                )
                .await;
        }

        context
    }

    pub async fn set(&self, phone_normalized: &str, clinic_id: ClinicId, context: &BookingContext) {
        let now = self.clock.now();
        let body = json!({
            "phone_normalized": phone_normalized,
            "clinic_id": clinic_id,
            "context_data": context,
            "cached_at": now,
            "last_accessed": now,
            "expires_at": now + Duration::hours(BOOKING_CONTEXT_TTL_HOURS),
        });

        if let Err(e) = self
            .store
            .upsert("booking_context_cache", "phone_normalized", body)
            .await
        {
            warn!("failed to cache booking context: {}", e);
        }
    }
}
