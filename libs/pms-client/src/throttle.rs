use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::debug;

use crate::error::PmsError;

/// Per-clinic throttle: a sliding-window call budget plus a concurrency
/// semaphore. Shared by every request handler touching the same clinic so the
/// documented per-minute PMS budget holds across workers in one process.
pub struct ClinicThrottle {
    window: Mutex<VecDeque<Instant>>,
    max_calls: usize,
    period: Duration,
    semaphore: Arc<Semaphore>,
}

impl ClinicThrottle {
    pub fn new(max_calls_per_minute: usize, max_concurrent: usize) -> Self {
        Self {
            window: Mutex::new(VecDeque::new()),
            max_calls: max_calls_per_minute.max(1),
            period: Duration::from_secs(60),
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    /// Wait until a call fits in the sliding window, then take a concurrency
    /// permit. The permit must be held for the duration of the HTTP call.
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit, PmsError> {
        loop {
            let wait = {
                let mut window = self.window.lock().await;
                let now = Instant::now();
                while let Some(front) = window.front() {
                    if now.duration_since(*front) >= self.period {
                        window.pop_front();
                    } else {
                        break;
                    }
                }
                if window.len() < self.max_calls {
                    window.push_back(now);
                    None
                } else {
                    let oldest = *window.front().expect("window is non-empty");
                    Some(self.period - now.duration_since(oldest))
                }
            };

            match wait {
                None => break,
                Some(delay) => {
                    debug!("PMS rate window full, waiting {:?}", delay);
                    tokio::time::sleep(delay).await;
                }
            }
        }

        Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| PmsError::Transient("throttle closed".to_string()))
    }
}

/// Registry of clinic throttles, created once at startup and shared via the
/// request context.
pub struct PmsGateway {
    throttles: Mutex<HashMap<String, Arc<ClinicThrottle>>>,
    max_calls_per_minute: usize,
    max_concurrent: usize,
}

impl PmsGateway {
    pub fn new(max_calls_per_minute: usize, max_concurrent: usize) -> Self {
        Self {
            throttles: Mutex::new(HashMap::new()),
            max_calls_per_minute,
            max_concurrent,
        }
    }

    pub async fn throttle_for(&self, clinic_id: &str) -> Arc<ClinicThrottle> {
        let mut throttles = self.throttles.lock().await;
        Arc::clone(throttles.entry(clinic_id.to_string()).or_insert_with(|| {
            Arc::new(ClinicThrottle::new(
                self.max_calls_per_minute,
                self.max_concurrent,
            ))
        }))
    }
}
