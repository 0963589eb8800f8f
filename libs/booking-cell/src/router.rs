use axum::{middleware, routing::post, Router};

use shared_database::CoreContext;
use shared_utils::extractor::api_key_middleware;

use crate::handlers;

pub fn booking_routes(ctx: CoreContext) -> Router {
    Router::new()
        .route("/appointment-handler", post(handlers::handle_appointment))
        .layer(middleware::from_fn_with_state(
            ctx.config.clone(),
            api_key_middleware,
        ))
        .with_state(ctx)
}
