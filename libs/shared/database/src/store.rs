use anyhow::{anyhow, Result};
use reqwest::{
    header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE},
    Client, Method,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, error};

use shared_config::AppConfig;

/// REST adapter for the persistent store. All tables - catalog, appointments
/// and the cache tier - are reached through this one client; no component
/// talks to the store any other way.
pub struct StoreClient {
    client: Client,
    base_url: String,
    service_key: String,
}

impl StoreClient {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.store_url.clone(),
            service_key: config.store_service_key.clone(),
        }
    }

    fn get_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(&self.service_key) {
            headers.insert("apikey", value);
        }
        if let Ok(value) = HeaderValue::from_str(&format!("Bearer {}", self.service_key)) {
            headers.insert(AUTHORIZATION, value);
        }
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers
    }

    pub async fn request<T>(&self, method: Method, path: &str, body: Option<Value>) -> Result<T>
    where
        T: DeserializeOwned,
    {
        self.request_with_headers(method, path, body, None).await
    }

    pub async fn request_with_headers<T>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        extra_headers: Option<HeaderMap>,
    ) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        debug!("store request: {} {}", method, url);

        let mut headers = self.get_headers();
        if let Some(extra) = extra_headers {
            headers.extend(extra);
        }

        let mut req = self.client.request(method, &url).headers(headers);
        if let Some(body_data) = body {
            req = req.json(&body_data);
        }

        let response = req.send().await?;
        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await?;
            error!("store error ({}): {}", status, error_text);
            return Err(anyhow!("store error ({}): {}", status, error_text));
        }

        if status == reqwest::StatusCode::NO_CONTENT {
            return serde_json::from_value(Value::Array(Vec::new()))
                .map_err(|e| anyhow!("empty response not deserializable: {}", e));
        }

        let data = response.json::<T>().await?;
        Ok(data)
    }

    /// Insert-or-update through the store's conflict resolution, returning the
    /// affected rows.
    pub async fn upsert(
        &self,
        table: &str,
        on_conflict: &str,
        body: Value,
    ) -> Result<Vec<Value>> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "Prefer",
            HeaderValue::from_static("resolution=merge-duplicates,return=representation"),
        );
        let path = format!("/rest/v1/{}?on_conflict={}", table, on_conflict);
        self.request_with_headers(Method::POST, &path, Some(body), Some(headers))
            .await
    }

    /// Insert, returning the created rows.
    pub async fn insert(&self, table: &str, body: Value) -> Result<Vec<Value>> {
        let mut headers = HeaderMap::new();
        headers.insert("Prefer", HeaderValue::from_static("return=representation"));
        let path = format!("/rest/v1/{}", table);
        self.request_with_headers(Method::POST, &path, Some(body), Some(headers))
            .await
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}
