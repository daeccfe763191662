use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use labelcheck_common::error::{LabelError, LabelResult};
use labelcheck_config::PdftoppmConfig;

/// Reads the embedded text layer of a PDF.
#[async_trait]
pub trait PdfTextExtractor: Send + Sync {
    async fn extract_text(&self, pdf: &[u8]) -> LabelResult<String>;
}

/// Renders a PDF page to a raster image for vision analysis.
#[async_trait]
pub trait PdfRasterizer: Send + Sync {
    /// PNG bytes of the first page.
    async fn rasterize_first_page(&self, pdf: &[u8]) -> LabelResult<Vec<u8>>;
}

/// Text-layer extraction with the `pdf-extract` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextLayerExtractor;

#[async_trait]
impl PdfTextExtractor for TextLayerExtractor {
    async fn extract_text(&self, pdf: &[u8]) -> LabelResult<String> {
        let owned = pdf.to_vec();
        // pdf-extract is CPU bound and can panic on malformed input; a panic
        // surfaces here as a JoinError and is treated as a failed extraction.
        tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&owned))
            .await
            .map_err(|e| LabelError::ExtractionFailed(format!("pdf text extractor aborted: {e}")))?
            .map_err(|e| LabelError::ExtractionFailed(format!("pdf text extraction: {e}")))
    }
}

/// Rasterizes with poppler's `pdftoppm`, streaming the PDF over stdin and
/// reading the PNG from stdout.
#[derive(Debug, Clone)]
pub struct PdftoppmRasterizer {
    config: PdftoppmConfig,
}

impl PdftoppmRasterizer {
    pub fn new(config: PdftoppmConfig) -> Self {
        Self { config }
    }

    fn args(&self) -> Vec<String> {
        vec![
            "-png".to_string(),
            "-r".to_string(),
            self.config.dpi.to_string(),
            "-f".to_string(),
            "1".to_string(),
            "-l".to_string(),
            "1".to_string(),
            "-singlefile".to_string(),
            "-".to_string(),
        ]
    }
}

#[async_trait]
impl PdfRasterizer for PdftoppmRasterizer {
    async fn rasterize_first_page(&self, pdf: &[u8]) -> LabelResult<Vec<u8>> {
        let mut child = Command::new(&self.config.program)
            .args(self.args())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                LabelError::ExtractionFailed(format!(
                    "could not start {}: {e}",
                    self.config.program
                ))
            })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| LabelError::Internal("pdftoppm stdin not captured".to_string()))?;
        let input = pdf.to_vec();
        let writer = tokio::spawn(async move {
            let written = stdin.write_all(&input).await;
            drop(stdin);
            written
        });

        let output = tokio::time::timeout(
            Duration::from_secs(self.config.timeout_secs),
            child.wait_with_output(),
        )
        .await
        .map_err(|_| {
            LabelError::ExtractionFailed(format!(
                "pdftoppm did not finish within {}s",
                self.config.timeout_secs
            ))
        })?
        .map_err(|e| LabelError::ExtractionFailed(format!("pdftoppm failed: {e}")))?;

        if let Ok(Err(e)) = writer.await {
            tracing::debug!(error = %e, "pdftoppm closed stdin early");
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(LabelError::ExtractionFailed(format!(
                "pdftoppm exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        if output.stdout.is_empty() {
            return Err(LabelError::ExtractionFailed(
                "pdftoppm produced no image".to_string(),
            ));
        }

        Ok(output.stdout)
    }
}
