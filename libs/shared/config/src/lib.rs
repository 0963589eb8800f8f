use std::env;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub store_url: String,
    pub store_service_key: String,
    pub webhook_api_key: String,
    pub default_timezone: String,
    pub pms_host: String,
    pub pms_max_concurrent_calls: usize,
    pub pms_rate_limit_per_minute: usize,
    pub pms_max_retries: u32,
    pub pms_timeout_secs: u64,
    pub request_deadline_secs: u64,
    pub cache_refresh_interval_secs: u64,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let config = Self {
            store_url: env::var("STORE_URL")
                .unwrap_or_else(|_| {
                    warn!("STORE_URL not set, using empty value");
                    String::new()
                }),
            store_service_key: env::var("STORE_SERVICE_KEY")
                .unwrap_or_else(|_| {
                    warn!("STORE_SERVICE_KEY not set, using empty value");
                    String::new()
                }),
            webhook_api_key: env::var("WEBHOOK_API_KEY")
                .unwrap_or_else(|_| {
                    warn!("WEBHOOK_API_KEY not set - webhook auth disabled (dev mode)");
                    String::new()
                }),
            default_timezone: env::var("DEFAULT_TIMEZONE")
                .unwrap_or_else(|_| "Australia/Sydney".to_string()),
            pms_host: env::var("PMS_HOST")
                .unwrap_or_else(|_| "cliniko.com".to_string()),
            pms_max_concurrent_calls: parse_env("PMS_MAX_CONCURRENT_CALLS", 6),
            pms_rate_limit_per_minute: parse_env("PMS_RATE_LIMIT_PER_MINUTE", 59),
            pms_max_retries: parse_env("PMS_MAX_RETRIES", 3),
            pms_timeout_secs: parse_env("PMS_TIMEOUT_SECS", 30),
            request_deadline_secs: parse_env("REQUEST_DEADLINE_SECS", 25),
            cache_refresh_interval_secs: parse_env("CACHE_REFRESH_INTERVAL_SECS", 300),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.store_url.is_empty() && !self.store_service_key.is_empty()
    }

    pub fn webhook_auth_enabled(&self) -> bool {
        !self.webhook_api_key.is_empty()
    }
}

fn parse_env<T: std::str::FromStr + Copy>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("{} has invalid value '{}', using default", name, raw);
            default
        }),
        Err(_) => default,
    }
}
