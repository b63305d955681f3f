//! Library half of the gateway crate: boot wiring and the HTTP surface, split out of `main`
//! so integration tests can exercise the real `Router` via `tower::ServiceExt::oneshot`
//! instead of binding a TCP listener.

pub mod boot;
pub mod config;
pub mod error;
pub mod routes;
pub mod state;

use std::sync::Arc;

use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use state::AppState;

/// Assembles every route module into one `Router`.
pub fn build_app(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(routes::logic_hub::router())
        .merge(routes::memory::router())
        .merge(routes::components::router())
        .merge(routes::ports::router())
        .merge(routes::missions::router())
        .merge(routes::governance::router())
        .merge(routes::audit::router())
        .route("/health", axum::routing::get(|| async { "ok" }))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
