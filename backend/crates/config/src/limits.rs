use labelcheck_common::error::{LabelError, LabelResult};
use serde::Deserialize;

use crate::env::parse_var_or;

/// Size and history bounds applied to every analysis call.
///
/// Character counts are Unicode scalar values, not bytes.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AnalysisLimits {
    /// Typed label text above this is rejected.
    pub max_text_chars: usize,
    /// Stored excerpts of submitted or extracted text are cut to this.
    pub max_stored_text_chars: usize,
    /// Hard limit on text sent to the model.
    pub max_model_text_chars: usize,
    /// A PDF text layer shorter than this counts as "no text".
    pub min_pdf_text_chars: usize,
    pub max_image_bytes: usize,
    pub max_chat_chars: usize,
    pub chat_history_turns: usize,
    pub max_regulatory_context_chars: usize,
    pub regulatory_cache_ttl_secs: u64,
}

impl Default for AnalysisLimits {
    fn default() -> Self {
        Self {
            max_text_chars: 20_000,
            max_stored_text_chars: 5_000,
            max_model_text_chars: 60_000,
            min_pdf_text_chars: 100,
            max_image_bytes: 5 * 1024 * 1024,
            max_chat_chars: 4_000,
            chat_history_turns: 5,
            max_regulatory_context_chars: 120_000,
            regulatory_cache_ttl_secs: 300,
        }
    }
}

impl AnalysisLimits {
    pub fn from_env() -> LabelResult<Self> {
        let d = Self::default();
        let limits = Self {
            max_text_chars: parse_var_or("MAX_TEXT_CHARS", d.max_text_chars)?,
            max_stored_text_chars: parse_var_or("MAX_STORED_TEXT_CHARS", d.max_stored_text_chars)?,
            max_model_text_chars: parse_var_or("MAX_MODEL_TEXT_CHARS", d.max_model_text_chars)?,
            min_pdf_text_chars: parse_var_or("MIN_PDF_TEXT_CHARS", d.min_pdf_text_chars)?,
            max_image_bytes: parse_var_or("MAX_IMAGE_BYTES", d.max_image_bytes)?,
            max_chat_chars: parse_var_or("MAX_CHAT_CHARS", d.max_chat_chars)?,
            chat_history_turns: parse_var_or("CHAT_HISTORY_TURNS", d.chat_history_turns)?,
            max_regulatory_context_chars: parse_var_or(
                "MAX_REGULATORY_CONTEXT_CHARS",
                d.max_regulatory_context_chars,
            )?,
            regulatory_cache_ttl_secs: parse_var_or(
                "REGULATORY_CACHE_TTL_SECS",
                d.regulatory_cache_ttl_secs,
            )?,
        };
        limits.validate()?;
        Ok(limits)
    }

    pub fn validate(&self) -> LabelResult<()> {
        let non_zero = [
            ("MAX_TEXT_CHARS", self.max_text_chars),
            ("MAX_STORED_TEXT_CHARS", self.max_stored_text_chars),
            ("MAX_MODEL_TEXT_CHARS", self.max_model_text_chars),
            ("MAX_IMAGE_BYTES", self.max_image_bytes),
            ("MAX_CHAT_CHARS", self.max_chat_chars),
        ];
        if let Some((key, _)) = non_zero.iter().find(|(_, v)| *v == 0) {
            return Err(LabelError::Config(format!("{key} must be greater than zero")));
        }
        if self.max_text_chars > self.max_model_text_chars {
            return Err(LabelError::Config(
                "MAX_TEXT_CHARS must not exceed MAX_MODEL_TEXT_CHARS".to_string(),
            ));
        }
        Ok(())
    }
}
