use axum::{
    extract::{Query, State},
    http::StatusCode,
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::{
    error::AppResult,
    middleware::RequestId,
    models::{CatalogueStatus, Movie},
    routes::AppState,
};

#[derive(Debug, Deserialize)]
pub struct DisplayQuery {
    per_bucket: Option<usize>,
    limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct DisplayResponse {
    pub count: usize,
    pub movies: Vec<Movie>,
}

pub async fn status(State(state): State<Arc<AppState>>) -> Json<CatalogueStatus> {
    Json(state.catalogue.status().await)
}

/// Shuffled cross-bucket sample for browsing
pub async fn display(
    State(state): State<Arc<AppState>>,
    Query(params): Query<DisplayQuery>,
) -> AppResult<Json<DisplayResponse>> {
    let settings = state.catalogue.settings();
    let per_bucket = params.per_bucket.unwrap_or(settings.display_per_bucket);
    let limit = params.limit.unwrap_or(settings.display_limit);

    let movies = state.catalogue.sample_display(per_bucket, limit).await?;
    Ok(Json(DisplayResponse {
        count: movies.len(),
        movies,
    }))
}

/// Starts a background rebuild; the current pool keeps serving meanwhile
pub async fn refresh(
    State(state): State<Arc<AppState>>,
    Extension(request_id): Extension<RequestId>,
) -> (StatusCode, Json<Value>) {
    if state.catalogue.status().await.building {
        return (
            StatusCode::ACCEPTED,
            Json(json!({ "status": "already_building" })),
        );
    }

    tracing::info!(request_id = %request_id, "Catalogue refresh requested");
    state.catalogue.spawn_refresh();

    (StatusCode::ACCEPTED, Json(json!({ "status": "refresh_started" })))
}
