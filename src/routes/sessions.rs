use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::{
    error::{AppError, AppResult},
    middleware::RequestId,
    models::{MovieId, PairFilters, RoundView},
    routes::AppState,
    services::session_engine::ChoiceOutcome,
};

#[derive(Debug, Serialize)]
pub struct StartSessionResponse {
    pub session_id: String,
    pub total_rounds: u32,
    pub filters: PairFilters,
}

#[derive(Debug, Deserialize)]
pub struct ChoiceRequest {
    pub movie_id: MovieId,
}

pub async fn start(
    State(state): State<Arc<AppState>>,
    Extension(request_id): Extension<RequestId>,
    Json(filters): Json<PairFilters>,
) -> AppResult<(StatusCode, Json<StartSessionResponse>)> {
    let session = state.sessions.create_session(filters)?;

    tracing::info!(
        request_id = %request_id,
        session_id = %session.id,
        "Session started"
    );

    Ok((
        StatusCode::CREATED,
        Json(StartSessionResponse {
            session_id: session.id,
            total_rounds: session.total_rounds,
            filters: session.filters,
        }),
    ))
}

/// Current round, generating its pair on first read
///
/// A finished session answers with its final state rather than an error.
pub async fn round(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> AppResult<Json<RoundView>> {
    let pool = state.catalogue.pool().await?;

    match state.sessions.get_or_create_pair(&session_id, &pool) {
        Err(AppError::SessionComplete) => Ok(Json(state.sessions.round_view(&session_id)?)),
        result => result.map(Json),
    }
}

pub async fn choose(
    State(state): State<Arc<AppState>>,
    Extension(request_id): Extension<RequestId>,
    Path(session_id): Path<String>,
    Json(request): Json<ChoiceRequest>,
) -> AppResult<Json<ChoiceOutcome>> {
    let pool = state.catalogue.pool().await?;
    let outcome = state
        .sessions
        .submit_choice(&session_id, request.movie_id, &pool)?;

    tracing::debug!(
        request_id = %request_id,
        session_id = %session_id,
        movie_id = request.movie_id,
        is_complete = outcome.is_complete,
        "Choice recorded"
    );

    Ok(Json(outcome))
}

pub async fn skip(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> AppResult<Json<RoundView>> {
    let pool = state.catalogue.pool().await?;
    Ok(Json(state.sessions.skip(&session_id, &pool)?))
}
