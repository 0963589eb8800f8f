use std::sync::Arc;

use reqwest::Method;
use serde_json::{json, Value};
use tracing::debug;

use shared_database::StoreClient;

/// Best-effort cache hit/miss accounting. Statistics must never affect the
/// request path, so every failure here is swallowed.
pub struct CacheStatsRecorder {
    store: Arc<StoreClient>,
}

impl CacheStatsRecorder {
    pub fn new(store: Arc<StoreClient>) -> Self {
        Self { store }
    }

    pub async fn record(&self, cache_type: &str, is_hit: bool, response_time_ms: f64) {
        let body = json!({
            "p_cache_type": cache_type,
            "p_is_hit": is_hit,
            "p_response_time_ms": response_time_ms,
        });
        if let Err(e) = self
            .store
            .request::<Value>(Method::POST, "/rest/v1/rpc/record_cache_stat", Some(body))
            .await
        {
            debug!("failed to record cache stat: {}", e);
        }
    }
}
