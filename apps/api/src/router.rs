use axum::{routing::get, Router};

use availability_cell::availability_routes;
use booking_cell::booking_routes;
use location_cell::location_routes;
use practitioner_cell::practitioner_routes;
use shared_database::CoreContext;

pub fn create_router(ctx: CoreContext) -> Router {
    Router::new()
        .route("/", get(|| async { "Voice Booking API is running!" }))
        .merge(location_routes(ctx.clone()))
        .merge(practitioner_routes(ctx.clone()))
        .merge(availability_routes(ctx.clone()))
        .merge(booking_routes(ctx))
}
