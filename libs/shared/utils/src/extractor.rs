use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::Response,
};
use tracing::warn;

use shared_config::AppConfig;
use shared_models::error::AppError;

/// Middleware enforcing the static webhook API key. When no key is configured
/// the check is skipped with a warning (dev mode).
pub async fn api_key_middleware(
    State(config): State<Arc<AppConfig>>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    if !config.webhook_auth_enabled() {
        warn!("webhook auth disabled - accepting unauthenticated request");
        return Ok(next.run(request).await);
    }

    let provided = request
        .headers()
        .get("X-API-Key")
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| AppError::Auth("Missing API key header".to_string()))?;

    if provided != config.webhook_api_key {
        return Err(AppError::Auth("Invalid API key".to_string()));
    }

    Ok(next.run(request).await)
}
