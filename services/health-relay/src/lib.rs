use axum::{Router, body::Body, http::Request, routing::get};
use tower_http::request_id::{
    MakeRequestUuid, PropagateRequestIdLayer, RequestId, SetRequestIdLayer,
};
use tower_http::trace::TraceLayer;
use tracing::Span;

pub mod config;
pub mod forwarder;
pub mod handlers;
pub mod normalize;
pub mod relay;
pub mod store;
pub mod types;

use crate::handlers::AppState;

/// Ops surface: liveness, relay counters and the last normalized reading.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(handlers::healthz))
        .route("/stats", get(handlers::stats))
        .route("/latest", get(handlers::latest))
        .with_state(state)
        .layer(TraceLayer::new_for_http().make_span_with(request_span))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
}

// SetRequestIdLayer runs first, so every request reaching here carries an id
fn request_span(req: &Request<Body>) -> Span {
    let request_id = req
        .extensions()
        .get::<RequestId>()
        .and_then(|id| id.header_value().to_str().ok())
        .unwrap_or("-");
    tracing::info_span!(
        "relay-http",
        %request_id,
        method = %req.method(),
        path = req.uri().path()
    )
}
