use axum::{middleware, routing::post, Router};

use shared_database::CoreContext;
use shared_utils::extractor::api_key_middleware;

use crate::handlers;

pub fn practitioner_routes(ctx: CoreContext) -> Router {
    Router::new()
        .route(
            "/get-practitioner-services",
            post(handlers::get_practitioner_services),
        )
        .route(
            "/get-practitioner-info",
            post(handlers::get_practitioner_info),
        )
        .route(
            "/get-location-practitioners",
            post(handlers::get_location_practitioners),
        )
        .layer(middleware::from_fn_with_state(
            ctx.config.clone(),
            api_key_middleware,
        ))
        .with_state(ctx)
}
