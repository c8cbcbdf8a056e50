use axum::{
    extract::{Path, State},
    Extension, Json,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::{
    error::AppResult,
    middleware::RequestId,
    models::{MovieId, Recommendation, RecommendationSet},
    routes::AppState,
};

#[derive(Debug, Default, Deserialize)]
pub struct ReplaceRequest {
    /// Movies the user has already seen or was already recommended
    #[serde(default)]
    pub exclude_ids: Vec<MovieId>,
}

/// Recommendations for a completed session
pub async fn recommendations(
    State(state): State<Arc<AppState>>,
    Extension(request_id): Extension<RequestId>,
    Path(session_id): Path<String>,
) -> AppResult<Json<RecommendationSet>> {
    tracing::info!(
        request_id = %request_id,
        session_id = %session_id,
        "Recommendations requested"
    );

    let set = state.recommendations.recommendations(&session_id).await?;
    Ok(Json(set))
}

/// One substitute for a recommendation the user has already seen
pub async fn replace(
    State(state): State<Arc<AppState>>,
    Extension(request_id): Extension<RequestId>,
    Path(session_id): Path<String>,
    Json(request): Json<ReplaceRequest>,
) -> AppResult<Json<Recommendation>> {
    tracing::info!(
        request_id = %request_id,
        session_id = %session_id,
        excluded = request.exclude_ids.len(),
        "Replacement requested"
    );

    let replacement = state
        .recommendations
        .replace(&session_id, request.exclude_ids)
        .await?;
    Ok(Json(replacement))
}
