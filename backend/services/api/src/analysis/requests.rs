use axum::extract::Multipart;
use labelcheck_analysis::Upload;
use labelcheck_common::error::{LabelError, LabelResult};
use serde::Deserialize;
use uuid::Uuid;

/// Fields of an `analyze-image` or `analyze-text` multipart form.
#[derive(Debug, Default)]
pub struct AnalysisForm {
    pub session_id: Option<Uuid>,
    pub file_ref: Option<String>,
    pub text: Option<String>,
    pub file: Option<Upload>,
}

fn multipart_error(e: axum::extract::multipart::MultipartError) -> LabelError {
    LabelError::Validation(format!("malformed multipart body: {}", e.body_text()))
}

impl AnalysisForm {
    pub async fn read(mut multipart: Multipart) -> LabelResult<Self> {
        let mut form = Self::default();

        while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
            let name = field.name().unwrap_or_default().to_string();
            match name.as_str() {
                "session_id" | "sessionId" => {
                    let raw = field.text().await.map_err(multipart_error)?;
                    let raw = raw.trim();
                    if !raw.is_empty() {
                        form.session_id = Some(Uuid::parse_str(raw).map_err(|_| {
                            LabelError::Validation(format!("invalid session_id: {raw}"))
                        })?);
                    }
                }
                "file_ref" | "fileRef" => {
                    let raw = field.text().await.map_err(multipart_error)?;
                    form.file_ref = Some(raw.trim().to_string()).filter(|s| !s.is_empty());
                }
                "text" => {
                    form.text = Some(field.text().await.map_err(multipart_error)?);
                }
                "file" | "pdf" | "image" => {
                    let file_name = field.file_name().map(str::to_string);
                    let declared_media_type = field.content_type().map(str::to_string);
                    let bytes = field.bytes().await.map_err(multipart_error)?;
                    form.file = Some(Upload {
                        file_name,
                        declared_media_type,
                        bytes: bytes.to_vec(),
                    });
                }
                other => {
                    tracing::debug!(field = other, "ignoring unknown form field");
                }
            }
        }

        Ok(form)
    }
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(alias = "sessionId")]
    pub session_id: Uuid,
    pub message: String,
    #[serde(default, alias = "parentIterationId")]
    pub parent_iteration_id: Option<Uuid>,
}
