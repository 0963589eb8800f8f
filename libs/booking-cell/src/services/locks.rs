use chrono::{DateTime, Duration, Utc};
use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, warn};

use shared_database::CoreContext;
use shared_models::ids::{PractitionerId, SessionId};

/// Lock TTL. Long enough to cover the PMS round-trip plus local persistence,
/// short enough that an abandoned call frees the slot quickly.
const LOCK_TTL_SECONDS: i64 = 120;

/// Short-lived mutual exclusion on (practitioner, appointment start). The
/// unique lock_key row in the store totally orders booking attempts for the
/// same slot across every worker.
pub struct BookingLockService {
    ctx: CoreContext,
}

pub enum LockAttempt {
    Acquired,
    HeldElsewhere,
}

impl BookingLockService {
    pub fn new(ctx: CoreContext) -> Self {
        Self { ctx }
    }

    fn lock_key(practitioner_id: &PractitionerId, starts_at: DateTime<Utc>) -> String {
        format!("{}:{}", practitioner_id, starts_at.to_rfc3339())
    }

    pub async fn acquire(
        &self,
        practitioner_id: &PractitionerId,
        starts_at: DateTime<Utc>,
        session_id: &SessionId,
    ) -> anyhow::Result<LockAttempt> {
        let key = Self::lock_key(practitioner_id, starts_at);
        let now = self.ctx.now();

        // Clear an expired holder first so the insert below can win.
        let now_str = now.to_rfc3339();
        let sweep = format!(
            "/rest/v1/booking_locks?lock_key=eq.{}&expires_at=lt.{}",
            urlencoding::encode(&key),
            urlencoding::encode(&now_str)
        );
        let _: Result<Vec<Value>, _> = self.ctx.store.request(Method::DELETE, &sweep, None).await;

        let body = json!({
            "lock_key": key,
            "session_id": session_id,
            "acquired_at": now,
            "expires_at": now + Duration::seconds(LOCK_TTL_SECONDS),
        });

        match self.ctx.store.insert("booking_locks", body).await {
            Ok(_) => {
                debug!("booking lock acquired: {}", key);
                Ok(LockAttempt::Acquired)
            }
            Err(e) => {
                let message = e.to_string();
                // Unique violation on lock_key means someone else holds it.
                if message.contains("409") || message.contains("duplicate") {
                    debug!("booking lock contended: {}", key);
                    Ok(LockAttempt::HeldElsewhere)
                } else {
                    Err(e)
                }
            }
        }
    }

    /// Release is best-effort; the TTL reclaims anything we miss.
    pub async fn release(
        &self,
        practitioner_id: &PractitionerId,
        starts_at: DateTime<Utc>,
        session_id: &SessionId,
    ) {
        let key = Self::lock_key(practitioner_id, starts_at);
        let path = format!(
            "/rest/v1/booking_locks?lock_key=eq.{}&session_id=eq.{}",
            urlencoding::encode(&key),
            urlencoding::encode(session_id.as_str())
        );
        let result: Result<Vec<Value>, _> =
            self.ctx.store.request(Method::DELETE, &path, None).await;
        if let Err(e) = result {
            warn!("failed to release booking lock {}: {}", key, e);
        }
    }
}
