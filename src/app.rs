use crate::broker::Publisher;
use crate::routes::{
    health::healthz,
    telemetry::{ingest_car, ingest_charge, method_not_allowed},
};
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub publisher: Publisher,
}

pub fn build_router(publisher: Publisher) -> Router {
    let state = AppState { publisher };

    // Ingest routes answer any non-POST method with 405 before the body is read.
    // Bodies are not size-limited.
    let ingest = Router::new()
        .route(
            "/api/iot/car",
            post(ingest_car).fallback(method_not_allowed),
        )
        .route(
            "/api/iot/charge",
            post(ingest_charge).fallback(method_not_allowed),
        )
        .layer(DefaultBodyLimit::disable());

    Router::new()
        .route("/healthz", get(healthz))
        .merge(ingest)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
