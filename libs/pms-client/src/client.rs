use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use rand::Rng;
use reqwest::{Method, StatusCode};
use serde_json::Value;
use tracing::{debug, error, warn};

use shared_config::AppConfig;
use shared_models::clinic::Clinic;

use crate::error::{classify, PmsError};
use crate::models::{
    AvailableTime, NewPmsAppointment, NewPmsPatient, PmsAppointment, PmsPatient,
};
use crate::throttle::ClinicThrottle;

const BACKOFF_BASE_MS: u64 = 500;
const BACKOFF_CAP_MS: u64 = 8_000;
const BACKOFF_JITTER_MS: u64 = 250;

/// Single entry point for all outbound PMS calls for one clinic. Credentials
/// are per-clinic; process-wide configuration is never consulted for auth.
pub struct PmsClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    user_agent: String,
    throttle: Arc<ClinicThrottle>,
    max_retries: u32,
}

impl PmsClient {
    pub fn for_clinic(clinic: &Clinic, config: &AppConfig, throttle: Arc<ClinicThrottle>) -> Self {
        // A full URL in PMS_HOST points every shard at that server (dev/test).
        let base_url = if config.pms_host.starts_with("http://")
            || config.pms_host.starts_with("https://")
        {
            format!("{}/v1", config.pms_host.trim_end_matches('/'))
        } else {
            format!("https://api.{}.{}/v1", clinic.pms_shard, config.pms_host)
        };
        Self::from_base_url(
            base_url,
            clinic.pms_api_key.clone(),
            format!("VoiceBookingSystem ({})", clinic.contact_email),
            throttle,
            config.pms_timeout_secs,
            config.pms_max_retries,
        )
    }

    pub fn from_base_url(
        base_url: String,
        api_key: String,
        user_agent: String,
        throttle: Arc<ClinicThrottle>,
        timeout_secs: u64,
        max_retries: u32,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_default();

        Self {
            http,
            base_url,
            api_key,
            user_agent,
            throttle,
            max_retries,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    // === Patients ===

    /// Find a patient by phone. The PMS returns partial matches; only an exact
    /// phone-number match counts.
    pub async fn find_patient(&self, phone: &str) -> Result<Option<PmsPatient>, PmsError> {
        let url = format!("{}/patients", self.base_url);
        let body = self
            .send(Method::GET, &url, &[("phone", phone)], None, true)
            .await?;

        let patients: Vec<PmsPatient> = parse_items(&body, "patients")?;
        for patient in patients {
            if patient.phone_numbers.iter().any(|p| p.number == phone) {
                debug!("found exact phone match for patient {}", patient.id);
                return Ok(Some(patient));
            }
        }
        Ok(None)
    }

    pub async fn create_patient(&self, patient: &NewPmsPatient) -> Result<PmsPatient, PmsError> {
        let url = format!("{}/patients", self.base_url);
        let payload = serde_json::to_value(patient)
            .map_err(|e| PmsError::Transient(e.to_string()))?;
        let body = self.send(Method::POST, &url, &[], Some(payload), false).await?;
        serde_json::from_value(body).map_err(|e| PmsError::Upstream {
            status: 200,
            message: format!("unparseable patient response: {}", e),
        })
    }

    // === Availability ===

    /// Offered slots for a (business, practitioner, appointment type) over a
    /// date window. The PMS only accepts date-only spans of at most 7 days;
    /// longer windows are rejected here before any network traffic.
    pub async fn get_available_times(
        &self,
        business_id: &str,
        practitioner_id: &str,
        appointment_type_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<AvailableTime>, PmsError> {
        if to < from {
            return Err(PmsError::InvalidTimeFrame(format!(
                "to {} precedes from {}",
                to, from
            )));
        }
        let span_days = (to - from).num_days() + 1;
        if span_days > 7 {
            return Err(PmsError::InvalidTimeFrame(format!(
                "span of {} days exceeds the 7-day maximum",
                span_days
            )));
        }

        let url = format!(
            "{}/businesses/{}/practitioners/{}/appointment_types/{}/available_times",
            self.base_url, business_id, practitioner_id, appointment_type_id
        );
        let from_param = from.format("%Y-%m-%d").to_string();
        let to_param = to.format("%Y-%m-%d").to_string();
        let body = self
            .send(
                Method::GET,
                &url,
                &[("from", from_param.as_str()), ("to", to_param.as_str())],
                None,
                true,
            )
            .await?;

        parse_items(&body, "available_times")
    }

    // === Appointments ===

    /// Create an appointment. This call is NOT idempotent on the PMS side and
    /// is therefore never retried.
    pub async fn create_appointment(
        &self,
        appointment: &NewPmsAppointment,
    ) -> Result<PmsAppointment, PmsError> {
        let url = format!("{}/appointments", self.base_url);
        let payload = serde_json::to_value(appointment)
            .map_err(|e| PmsError::Transient(e.to_string()))?;
        let body = self.send(Method::POST, &url, &[], Some(payload), false).await?;
        serde_json::from_value(body).map_err(|e| PmsError::Upstream {
            status: 200,
            message: format!("unparseable appointment response: {}", e),
        })
    }

    pub async fn get_appointment(&self, id: &str) -> Result<Option<PmsAppointment>, PmsError> {
        let url = format!("{}/appointments/{}", self.base_url, id);
        match self.send(Method::GET, &url, &[], None, true).await {
            Ok(body) => serde_json::from_value(body)
                .map(Some)
                .map_err(|e| PmsError::Upstream {
                    status: 200,
                    message: format!("unparseable appointment response: {}", e),
                }),
            Err(PmsError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Cancel an appointment. Already-cancelled and already-deleted
    /// appointments count as success.
    pub async fn cancel_appointment(&self, id: &str) -> Result<(), PmsError> {
        let url = format!("{}/appointments/{}", self.base_url, id);
        match self.send(Method::DELETE, &url, &[], None, false).await {
            Ok(_) => Ok(()),
            Err(PmsError::NotFound) => Ok(()),
            Err(PmsError::Upstream { message, .. })
                if message.to_lowercase().contains("already cancelled") =>
            {
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    // === Catalog listings (paginated) ===

    pub async fn get_businesses(&self) -> Result<Vec<Value>, PmsError> {
        self.get_all_pages("businesses", &[]).await
    }

    pub async fn get_practitioners(&self) -> Result<Vec<Value>, PmsError> {
        self.get_all_pages("practitioners", &[]).await
    }

    pub async fn get_business_practitioners(&self, business_id: &str) -> Result<Vec<Value>, PmsError> {
        self.get_all_pages(&format!("businesses/{}/practitioners", business_id), &[])
            .await
    }

    pub async fn get_appointment_types(&self) -> Result<Vec<Value>, PmsError> {
        self.get_all_pages("appointment_types", &[]).await
    }

    pub async fn get_practitioner_appointment_types(
        &self,
        practitioner_id: &str,
    ) -> Result<Vec<Value>, PmsError> {
        self.get_all_pages(
            &format!("practitioners/{}/appointment_types", practitioner_id),
            &[],
        )
        .await
    }

    pub async fn get_practitioner_businesses(
        &self,
        practitioner_id: &str,
    ) -> Result<Vec<Value>, PmsError> {
        self.get_all_pages(&format!("practitioners/{}/businesses", practitioner_id), &[])
            .await
    }

    /// Updated appointments since a cutoff; used by the incremental cache
    /// refresh task.
    pub async fn get_updated_appointments(&self, since: &str) -> Result<Vec<Value>, PmsError> {
        let filter = format!("updated_at:>{}", since);
        self.get_all_pages("appointments", &[("q[]", filter.as_str()), ("per_page", "100")])
            .await
    }

    /// Follow `links.next` until the collection is exhausted. The collection
    /// key matches the endpoint name; responses that deviate fall back to the
    /// first array value in the body.
    pub async fn get_all_pages(
        &self,
        endpoint: &str,
        query: &[(&str, &str)],
    ) -> Result<Vec<Value>, PmsError> {
        let root = endpoint
            .rsplit('/')
            .next()
            .unwrap_or(endpoint)
            .to_string();
        let mut url = format!("{}/{}", self.base_url, endpoint);
        let mut first = true;
        let mut items = Vec::new();

        loop {
            let body = if first {
                self.send(Method::GET, &url, query, None, true).await?
            } else {
                self.send(Method::GET, &url, &[], None, true).await?
            };
            first = false;

            match body.get(&root).and_then(Value::as_array) {
                Some(page) => items.extend(page.iter().cloned()),
                None => {
                    warn!("no '{}' key in PMS page, scanning for an array", root);
                    if let Some(page) = body
                        .as_object()
                        .and_then(|map| {
                            map.iter()
                                .find(|(key, value)| key.as_str() != "links" && value.is_array())
                        })
                        .and_then(|(_, value)| value.as_array())
                    {
                        items.extend(page.iter().cloned());
                    }
                }
            }

            match body
                .get("links")
                .and_then(|links| links.get("next"))
                .and_then(Value::as_str)
            {
                Some(next) => url = next.to_string(),
                None => break,
            }
        }

        Ok(items)
    }

    // === Transport ===

    async fn send(
        &self,
        method: Method,
        url: &str,
        query: &[(&str, &str)],
        body: Option<Value>,
        retry_allowed: bool,
    ) -> Result<Value, PmsError> {
        let mut attempt: u32 = 0;
        loop {
            let _permit = self.throttle.acquire().await?;

            let mut request = self
                .http
                .request(method.clone(), url)
                .basic_auth(&self.api_key, Some(""))
                .header(reqwest::header::ACCEPT, "application/json")
                .header(reqwest::header::USER_AGENT, &self.user_agent);
            if !query.is_empty() {
                request = request.query(query);
            }
            if let Some(ref payload) = body {
                request = request.json(payload);
            }

            let outcome = request.send().await;
            drop(_permit);

            match outcome {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        if status == StatusCode::NO_CONTENT {
                            return Ok(Value::Null);
                        }
                        let text = response.text().await.unwrap_or_default();
                        if text.is_empty() {
                            return Ok(Value::Null);
                        }
                        return serde_json::from_str(&text).map_err(|e| PmsError::Upstream {
                            status: status.as_u16(),
                            message: format!("unparseable body: {}", e),
                        });
                    }

                    let retry_after = response
                        .headers()
                        .get(reqwest::header::RETRY_AFTER)
                        .and_then(|v| v.to_str().ok())
                        .and_then(|v| v.parse::<u64>().ok());
                    let text = response.text().await.unwrap_or_default();
                    let classified = classify(status.as_u16(), &text);
                    error!("PMS error ({}): {}", status, text);

                    if classified.is_retryable() && retry_allowed && attempt < self.max_retries {
                        let delay = retry_after
                            .map(Duration::from_secs)
                            .unwrap_or_else(|| backoff_delay(attempt));
                        debug!("retrying PMS call in {:?} (attempt {})", delay, attempt + 1);
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(classified);
                }
                Err(e) => {
                    if retry_allowed && attempt < self.max_retries {
                        let delay = backoff_delay(attempt);
                        warn!("PMS network error, retrying in {:?}: {}", delay, e);
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(PmsError::Transient(e.to_string()));
                }
            }
        }
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    let exp = BACKOFF_BASE_MS.saturating_mul(1 << attempt.min(4));
    let jitter = rand::thread_rng().gen_range(0..BACKOFF_JITTER_MS);
    Duration::from_millis(exp.min(BACKOFF_CAP_MS) + jitter)
}

fn parse_items<T: serde::de::DeserializeOwned>(body: &Value, key: &str) -> Result<Vec<T>, PmsError> {
    let items = body.get(key).cloned().unwrap_or(Value::Array(Vec::new()));
    serde_json::from_value(items).map_err(|e| PmsError::Upstream {
        status: 200,
        message: format!("unparseable '{}' collection: {}", key, e),
    })
}
