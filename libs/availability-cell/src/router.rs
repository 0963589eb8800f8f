use axum::{middleware, routing::post, Router};

use shared_database::CoreContext;
use shared_utils::extractor::api_key_middleware;

use crate::handlers;

pub fn availability_routes(ctx: CoreContext) -> Router {
    Router::new()
        .route("/availability-checker", post(handlers::check_availability))
        .route("/find-next-available", post(handlers::find_next_available))
        .route(
            "/get-available-practitioners",
            post(handlers::get_available_practitioners),
        )
        .layer(middleware::from_fn_with_state(
            ctx.config.clone(),
            api_key_middleware,
        ))
        .with_state(ctx)
}
