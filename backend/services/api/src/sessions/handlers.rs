use axum::extract::rejection::{PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::Json;
use uuid::Uuid;

use crate::error::ApiError;
use crate::extractors::CurrentUser;
use crate::AppState;

use super::responses::{SessionDetailResponse, SessionListResponse, SessionsQuery};

const DEFAULT_PAGE: i64 = 20;
const MAX_PAGE: i64 = 100;

pub async fn list_sessions(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    query: Result<Query<SessionsQuery>, QueryRejection>,
) -> Result<Json<SessionListResponse>, ApiError> {
    let Query(query) = query?;
    let limit = query.limit.unwrap_or(DEFAULT_PAGE).clamp(1, MAX_PAGE);
    let offset = query.offset.unwrap_or(0).max(0);

    let data = state
        .service
        .list_sessions(user, Some(limit), Some(offset))
        .await?;
    let count = data.len();
    Ok(Json(SessionListResponse { data, count }))
}

pub async fn get_session(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<SessionDetailResponse>, ApiError> {
    let Path(id) = id?;
    let data = state.service.get_session(user, id).await?;
    Ok(Json(SessionDetailResponse { data }))
}
