//! Library surface for the HTTP gateway: router construction and state
//! wiring, split out of `main.rs` so integration tests under `tests/`
//! can drive the real `Router` in-process with `tower::ServiceExt`,
//! the same separation the teacher's testable crates use (see
//! `crates/pagi-core`, which is a pure lib with no binary at all).
//! `main.rs` stays a thin binary: load config, build `AppState`, call
//! `build_app`, serve.

pub mod handlers;
pub mod job_queue;
pub mod personas;
pub mod run_store;
pub mod scrape;
pub mod settings;
pub mod state;

use axum::http::Method;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

pub use state::AppState;

/// Builds the full route tree with CORS and request tracing layered on,
/// bound to the given state. Shared by `main` and by integration tests.
pub fn build_app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(|origin: &axum::http::HeaderValue, _| {
            let s = origin.to_str().unwrap_or("");
            if s == "http://localhost:3000" || s == "http://127.0.0.1:3000" {
                return true;
            }
            let port = s.split(':').last().and_then(|p| p.parse::<u16>().ok()).unwrap_or(0);
            (3000..=3099).contains(&port) || (8000..=8099).contains(&port)
        }))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(tower_http::cors::Any);

    Router::new()
        .route("/runs", post(handlers::runs::create_run))
        .route("/runs/:run_id/start", post(handlers::runs::start_run))
        .route("/runs/:run_id/paste", post(handlers::runs::paste_html))
        .route("/runs/:run_id/status", get(handlers::runs::get_status))
        .route("/runs/:run_id/report", get(handlers::runs::get_report))
        .route("/runs/:run_id/live-status", get(handlers::runs::get_live_status))
        .route("/ai/runtime-status", get(handlers::ai_status::runtime_status))
        .route("/ai/invalidate-cache", post(handlers::ai_status::invalidate_cache))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
