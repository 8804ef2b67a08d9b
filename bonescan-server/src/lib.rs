//! Router assembly for the bone scan inference service.
//!
//! Split out of the binary so integration tests can drive the full HTTP
//! surface with an in-memory service.

/// Browser presentation page.
pub mod pages;
/// Inference and region crop handlers.
pub mod routes;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use tower_http::cors::{Any, CorsLayer};

pub use routes::AppState;

/// Upload size ceiling; whole-body scans can be far larger than axum's
/// 2 MB default.
const MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

/// Build the service router over shared read-only state.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(pages::index))
        .route("/predict", post(routes::predict))
        .route("/regions/{region}/{file}", get(routes::region_image))
        .route("/healthz", get(routes::healthz))
        .with_state(state)
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}
