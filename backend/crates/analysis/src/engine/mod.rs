pub mod parse;
pub mod prompts;

use std::sync::Arc;
use std::time::Instant;

use labelcheck_common::error::{LabelResult, UpstreamError};
use labelcheck_db::sessions::report::ComplianceReport;

use crate::assembler::AssembledPrompt;
use crate::completion::{CompletionContent, CompletionRequest, CompletionService};
use crate::ingest::ImagePayload;

/// Runs one completion per call and turns the output into a report or a
/// chat answer. Performs no persistence.
pub struct ComplianceEngine {
    completion: Arc<dyn CompletionService>,
    max_tokens: u32,
}

impl ComplianceEngine {
    pub fn new(completion: Arc<dyn CompletionService>, max_tokens: u32) -> Self {
        Self {
            completion,
            max_tokens,
        }
    }

    /// The label image travels as an attachment; the prompt suffix frames it.
    pub async fn analyze_image(
        &self,
        image: &ImagePayload,
        prompt: &AssembledPrompt,
    ) -> LabelResult<ComplianceReport> {
        let content = CompletionContent::TextWithImage {
            text: prompt.dynamic_suffix.clone(),
            image: image.clone(),
        };
        self.analyze(content, prompt, "image").await
    }

    /// The label text is already framed in the prompt suffix.
    pub async fn analyze_text(&self, prompt: &AssembledPrompt) -> LabelResult<ComplianceReport> {
        let content = CompletionContent::Text(prompt.dynamic_suffix.clone());
        self.analyze(content, prompt, "text").await
    }

    pub async fn chat(&self, prompt: &AssembledPrompt) -> LabelResult<String> {
        let request = CompletionRequest {
            cached_prefix: prompt.cached_prefix.clone(),
            instructions: prompts::CHAT_INSTRUCTIONS.to_string(),
            content: CompletionContent::Text(prompt.dynamic_suffix.clone()),
            max_tokens: self.max_tokens,
        };
        let completion = self.completion.complete(request).await?;
        let answer = completion.text.trim();
        if answer.is_empty() {
            return Err(UpstreamError::NoContent.into());
        }
        Ok(answer.to_string())
    }

    async fn analyze(
        &self,
        content: CompletionContent,
        prompt: &AssembledPrompt,
        variant: &'static str,
    ) -> LabelResult<ComplianceReport> {
        let started = Instant::now();
        let request = CompletionRequest {
            cached_prefix: prompt.cached_prefix.clone(),
            instructions: prompts::analysis_instructions(prompt.baseline_iteration_id.is_some()),
            content,
            max_tokens: self.max_tokens,
        };

        let completion = self.completion.complete(request).await?;
        if completion.text.trim().is_empty() {
            return Err(UpstreamError::NoContent.into());
        }

        let report = parse::parse_report(&completion.text).inspect_err(|e| {
            tracing::error!(
                variant,
                error = %e,
                output_chars = completion.text.len(),
                "model output rejected"
            );
        })?;

        tracing::info!(
            variant,
            status = %report.overall_assessment.primary_compliance_status,
            recommendations = report.recommendations.len(),
            normalizations = report.normalizations.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "compliance analysis complete"
        );
        Ok(report)
    }
}
