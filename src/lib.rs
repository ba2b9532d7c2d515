//! Relay between mobile clients, generative-AI providers and a hosted
//! account store, with every business route behind request admission
//! (bearer authentication, per-identity rate limiting, usage telemetry).

pub mod admission;
pub mod apple;
pub mod auth;
pub mod clock;
pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod rate_limit;
pub mod state;
pub mod supabase;
pub mod upstream;
pub mod usage;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::admission::{Admission, admission_middleware};
use crate::state::AppState;

/// Build the full router. Admission wraps every route; exempt paths are
/// decided inside the middleware.
pub fn app(state: Arc<AppState>, admission: Arc<Admission>) -> Router {
    let body_limit = DefaultBodyLimit::max(state.max_upload_bytes);

    Router::new()
        .route("/health", get(handlers::health_handler))
        .route("/metrics", get(handlers::metrics_handler))
        .route("/signin/apple", post(handlers::sign_in_with_apple))
        .route("/delete", post(handlers::delete_account))
        .route("/event", post(handlers::process_event))
        .route("/search", post(handlers::search))
        .layer(body_limit)
        .with_state(state)
        .layer(middleware::from_fn_with_state(admission, admission_middleware))
        .layer(TraceLayer::new_for_http())
}
