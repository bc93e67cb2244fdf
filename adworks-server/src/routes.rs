use std::sync::Arc;

use axum::routing::{delete, get, post};
use axum::Router;

use crate::handlers::{assets, composites, system};
use crate::state::AppState;

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Generation
        .route(
            "/api/categories/{id}/composites/generate",
            post(composites::generate),
        )
        // Assets
        .route("/api/categories/{id}/assets", post(assets::upload_asset))
        .route(
            "/api/categories/{id}/assets/{*path}",
            get(assets::download_asset),
        )
        .route("/api/assets", delete(assets::delete_asset))
        // System
        .route("/api/health", get(system::health))
        .with_state(state)
}
