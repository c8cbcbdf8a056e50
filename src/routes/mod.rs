use axum::{
    http::{header::CACHE_CONTROL, HeaderValue, StatusCode},
    middleware,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, set_header::SetResponseHeaderLayer, trace::TraceLayer};

use crate::{
    middleware::{make_span_with_request_id, request_id_middleware},
    services::{CatalogueCache, RecommendationService, SessionEngine},
};

pub mod catalogue;
pub mod recommendations;
pub mod sessions;

/// Shared handler state
pub struct AppState {
    pub catalogue: Arc<CatalogueCache>,
    pub sessions: Arc<SessionEngine>,
    pub recommendations: RecommendationService,
}

/// Creates the application router with all routes
///
/// Every response is marked non-cacheable since session state changes on
/// each call.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .nest("/api/v1", api_routes())
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(CorsLayer::permissive())
                .layer(SetResponseHeaderLayer::overriding(
                    CACHE_CONTROL,
                    HeaderValue::from_static("no-store, no-cache, must-revalidate"),
                ))
                .layer(middleware::from_fn(request_id_middleware))
                .layer(TraceLayer::new_for_http().make_span_with(make_span_with_request_id)),
        )
}

/// API routes under /api/v1
fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/catalogue/status", get(catalogue::status))
        .route("/catalogue/display", get(catalogue::display))
        .route("/catalogue/refresh", post(catalogue::refresh))
        .route("/sessions", post(sessions::start))
        .route("/sessions/:id/round", get(sessions::round))
        .route("/sessions/:id/choice", post(sessions::choose))
        .route("/sessions/:id/skip", post(sessions::skip))
        .route(
            "/sessions/:id/recommendations",
            get(recommendations::recommendations),
        )
        .route(
            "/sessions/:id/recommendations/replace",
            post(recommendations::replace),
        )
}

/// Health check endpoint
async fn health_check() -> (StatusCode, Json<Value>) {
    (StatusCode::OK, Json(json!({ "status": "healthy" })))
}
