use std::sync::Arc;

use chrono::{DateTime, Utc};

use pms_client::{PmsClient, PmsGateway};
use shared_config::AppConfig;
use shared_models::clinic::Clinic;

use crate::store::StoreClient;

/// Time source. Operations take their notion of "now" from here so tests can
/// pin the clock.
#[derive(Debug, Clone)]
pub enum Clock {
    System,
    Fixed(DateTime<Utc>),
}

impl Clock {
    pub fn now(&self) -> DateTime<Utc> {
        match self {
            Clock::System => Utc::now(),
            Clock::Fixed(instant) => *instant,
        }
    }
}

/// Everything an operation needs, built once at startup and passed explicitly:
/// config, store handle, PMS throttle registry and the clock. No component
/// reaches for process-wide singletons.
#[derive(Clone)]
pub struct CoreContext {
    pub config: Arc<AppConfig>,
    pub store: Arc<StoreClient>,
    pub pms: Arc<PmsGateway>,
    pub clock: Clock,
}

impl CoreContext {
    pub fn new(config: AppConfig) -> Self {
        let store = Arc::new(StoreClient::new(&config));
        let pms = Arc::new(PmsGateway::new(
            config.pms_rate_limit_per_minute,
            config.pms_max_concurrent_calls,
        ));
        Self {
            config: Arc::new(config),
            store,
            pms,
            clock: Clock::System,
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// PMS client for one clinic, sharing that clinic's throttle with every
    /// other in-flight request.
    pub async fn pms_for(&self, clinic: &Clinic) -> PmsClient {
        let throttle = self.pms.throttle_for(&clinic.clinic_id.to_string()).await;
        PmsClient::for_clinic(clinic, &self.config, throttle)
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}
