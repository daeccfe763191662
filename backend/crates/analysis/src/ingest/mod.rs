//! Turns an uploaded artifact into either text or an encoded image that a
//! vision model can read.

pub mod media;
pub mod pdf;

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use labelcheck_common::error::{LabelError, LabelResult};
use labelcheck_config::AnalysisLimits;
use labelcheck_db::sessions::models::FileMetadata;

use media::SniffedType;
use pdf::{PdfRasterizer, PdfTextExtractor};

/// A file as received from the caller.
#[derive(Debug, Clone)]
pub struct Upload {
    pub file_name: Option<String>,
    pub declared_media_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl Upload {
    pub fn metadata(&self, media_type: &str) -> FileMetadata {
        FileMetadata {
            file_name: self.file_name.clone(),
            media_type: media_type.to_string(),
            size_bytes: self.bytes.len() as u64,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Artifact {
    /// Label text typed or pasted by the user.
    Text(String),
    Binary(Upload),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePayload {
    pub media_type: String,
    pub data_base64: String,
}

impl ImagePayload {
    pub fn encode(media_type: &str, bytes: &[u8]) -> Self {
        Self {
            media_type: media_type.to_string(),
            data_base64: STANDARD.encode(bytes),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentOrigin {
    Typed,
    Image,
    PdfText,
    /// First page of a PDF without a usable text layer.
    PdfImage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Text,
    Image,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentPayload {
    /// Text as it goes to the model.
    Text(String),
    Image(ImagePayload),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedContent {
    pub origin: ContentOrigin,
    pub payload: ContentPayload,
    pub file: Option<FileMetadata>,
    /// Characters of text received, before any cut. Zero for images.
    pub text_chars: usize,
    /// Copy of the text kept in iteration history.
    pub stored_excerpt: Option<String>,
    pub excerpt_truncated: bool,
}

impl NormalizedContent {
    pub fn kind(&self) -> ContentKind {
        match self.payload {
            ContentPayload::Text(_) => ContentKind::Text,
            ContentPayload::Image(_) => ContentKind::Image,
        }
    }

    pub fn text(&self) -> Option<&str> {
        match &self.payload {
            ContentPayload::Text(text) => Some(text),
            ContentPayload::Image(_) => None,
        }
    }

    pub fn image(&self) -> Option<&ImagePayload> {
        match &self.payload {
            ContentPayload::Image(image) => Some(image),
            ContentPayload::Text(_) => None,
        }
    }
}

/// Cut `text` to at most `max` characters on a char boundary.
pub(crate) fn truncate_chars(text: &str, max: usize) -> (&str, bool) {
    match text.char_indices().nth(max) {
        Some((byte_idx, _)) => (&text[..byte_idx], true),
        None => (text, false),
    }
}

pub struct IngestionNormalizer {
    text_extractor: Arc<dyn PdfTextExtractor>,
    rasterizer: Arc<dyn PdfRasterizer>,
    limits: AnalysisLimits,
}

impl IngestionNormalizer {
    pub fn new(
        text_extractor: Arc<dyn PdfTextExtractor>,
        rasterizer: Arc<dyn PdfRasterizer>,
        limits: AnalysisLimits,
    ) -> Self {
        Self {
            text_extractor,
            rasterizer,
            limits,
        }
    }

    /// Never writes to storage; the only side effect is running the PDF tools.
    pub async fn normalize(&self, artifact: Artifact) -> LabelResult<NormalizedContent> {
        match artifact {
            Artifact::Text(text) => self.typed_text(text, None),
            Artifact::Binary(upload) => self.binary(upload).await,
        }
    }

    fn typed_text(&self, text: String, file: Option<FileMetadata>) -> LabelResult<NormalizedContent> {
        if text.trim().is_empty() {
            return Err(LabelError::Validation("label text is empty".to_string()));
        }
        let chars = text.chars().count();
        if chars > self.limits.max_text_chars {
            return Err(LabelError::Validation(format!(
                "label text is {chars} characters; the limit is {}",
                self.limits.max_text_chars
            )));
        }
        let (excerpt, truncated) = truncate_chars(&text, self.limits.max_stored_text_chars);
        let excerpt = excerpt.to_string();

        Ok(NormalizedContent {
            origin: ContentOrigin::Typed,
            payload: ContentPayload::Text(text),
            file,
            text_chars: chars,
            stored_excerpt: Some(excerpt),
            excerpt_truncated: truncated,
        })
    }

    async fn binary(&self, upload: Upload) -> LabelResult<NormalizedContent> {
        if upload.bytes.is_empty() {
            return Err(LabelError::Validation("uploaded file is empty".to_string()));
        }

        let declared = upload
            .declared_media_type
            .as_deref()
            .map(media::normalize_declared);
        let sniffed = media::sniff(&upload.bytes);

        if let (Some(declared), Some(sniffed)) = (declared.as_deref(), sniffed) {
            if declared != sniffed.mime() && declared != "application/octet-stream" {
                tracing::debug!(
                    declared,
                    sniffed = sniffed.mime(),
                    "declared media type differs from content; using content"
                );
            }
        }

        match sniffed {
            Some(SniffedType::Pdf) => self.pdf(upload).await,
            Some(image) => self.image(upload, image),
            None if declared.as_deref() == Some("text/plain") => {
                let file = upload.metadata("text/plain");
                let text = String::from_utf8(upload.bytes).map_err(|_| {
                    LabelError::Validation("text file is not valid UTF-8".to_string())
                })?;
                self.typed_text(text, Some(file))
            }
            None => Err(LabelError::UnsupportedMediaType(
                declared.unwrap_or_else(|| "unknown".to_string()),
            )),
        }
    }

    fn image(&self, upload: Upload, kind: SniffedType) -> LabelResult<NormalizedContent> {
        if upload.bytes.len() > self.limits.max_image_bytes {
            return Err(LabelError::PayloadTooLarge {
                limit: self.limits.max_image_bytes,
                actual: upload.bytes.len(),
            });
        }
        let file = upload.metadata(kind.mime());
        Ok(NormalizedContent {
            origin: ContentOrigin::Image,
            payload: ContentPayload::Image(ImagePayload::encode(kind.mime(), &upload.bytes)),
            file: Some(file),
            text_chars: 0,
            stored_excerpt: None,
            excerpt_truncated: false,
        })
    }

    async fn pdf(&self, upload: Upload) -> LabelResult<NormalizedContent> {
        let file = upload.metadata(SniffedType::Pdf.mime());

        let text_failure = match self.text_extractor.extract_text(&upload.bytes).await {
            Ok(text) => {
                let trimmed = text.trim();
                let chars = trimmed.chars().count();
                if chars > self.limits.min_pdf_text_chars {
                    return Ok(self.pdf_text(trimmed, chars, file));
                }
                tracing::info!(
                    chars,
                    min = self.limits.min_pdf_text_chars,
                    "pdf text layer too short, rasterizing first page"
                );
                format!("text layer has only {chars} characters")
            }
            Err(e) => {
                tracing::info!(error = %e, "pdf text extraction failed, rasterizing first page");
                e.to_string()
            }
        };

        let png = self
            .rasterizer
            .rasterize_first_page(&upload.bytes)
            .await
            .map_err(|e| {
                LabelError::ExtractionFailed(format!(
                    "no usable text ({text_failure}) and rasterization failed: {e}"
                ))
            })?;
        if png.len() > self.limits.max_image_bytes {
            return Err(LabelError::PayloadTooLarge {
                limit: self.limits.max_image_bytes,
                actual: png.len(),
            });
        }

        Ok(NormalizedContent {
            origin: ContentOrigin::PdfImage,
            payload: ContentPayload::Image(ImagePayload::encode(SniffedType::Png.mime(), &png)),
            file: Some(file),
            text_chars: 0,
            stored_excerpt: None,
            excerpt_truncated: false,
        })
    }

    fn pdf_text(&self, text: &str, chars: usize, file: FileMetadata) -> NormalizedContent {
        let (model_text, cut) = truncate_chars(text, self.limits.max_model_text_chars);
        if cut {
            tracing::warn!(
                chars,
                limit = self.limits.max_model_text_chars,
                "pdf text exceeds model limit, truncating"
            );
        }
        let (excerpt, truncated) = truncate_chars(text, self.limits.max_stored_text_chars);

        NormalizedContent {
            origin: ContentOrigin::PdfText,
            payload: ContentPayload::Text(model_text.to_string()),
            file: Some(file),
            text_chars: chars,
            stored_excerpt: Some(excerpt.to_string()),
            excerpt_truncated: truncated,
        }
    }
}
