//! Job manager and HTTP/WS boundary (§6). `build_router` is exposed
//! separately from `main.rs` so integration tests can drive it in-process
//! with `tower::ServiceExt::oneshot` instead of binding a real socket.

pub mod config;
pub mod error;
pub mod job_manager;
pub mod routes;
pub mod state;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use state::AppState;

pub fn build_router(state: AppState) -> Router {
    routes::router()
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
