use axum::extract::multipart::MultipartRejection;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::Json;
use labelcheck_analysis::TextSubmission;
use labelcheck_common::error::LabelError;

use crate::error::ApiError;
use crate::extractors::CurrentUser;
use crate::AppState;

use super::requests::{AnalysisForm, ChatRequest};
use super::responses::{AnalysisResponse, ChatResponse};

/// 201 when the upload started a new session, 200 otherwise.
pub async fn analyze_image(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<(StatusCode, Json<AnalysisResponse>), ApiError> {
    let form = AnalysisForm::read(multipart?).await?;
    let upload = form
        .file
        .ok_or_else(|| LabelError::Validation("file is required".to_string()))?;

    let outcome = state
        .service
        .analyze_image(user, form.session_id, upload, form.file_ref)
        .await?;

    let status = if outcome.session_created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(outcome.into())))
}

pub async fn analyze_text(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<AnalysisResponse>, ApiError> {
    let form = AnalysisForm::read(multipart?).await?;
    let session_id = form
        .session_id
        .ok_or_else(|| LabelError::Validation("session_id is required".to_string()))?;

    let submission = match (form.text, form.file) {
        (Some(_), Some(_)) => {
            return Err(LabelError::Validation(
                "send either text or a PDF file, not both".to_string(),
            )
            .into());
        }
        (Some(text), None) => TextSubmission::Text(text),
        (None, Some(file)) => TextSubmission::Pdf(file),
        (None, None) => {
            return Err(LabelError::Validation("text or file is required".to_string()).into());
        }
    };

    let outcome = state
        .service
        .analyze_text(user, session_id, submission)
        .await?;
    Ok(Json(outcome.into()))
}

pub async fn chat(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, ApiError> {
    let Json(body) = body?;

    let outcome = state
        .service
        .chat(user, body.session_id, &body.message, body.parent_iteration_id)
        .await?;
    Ok(Json(outcome.into()))
}
