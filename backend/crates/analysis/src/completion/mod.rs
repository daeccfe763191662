//! Black-box text completion service used by the compliance engine.

pub mod anthropic;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use labelcheck_common::error::UpstreamError;

use crate::ingest::ImagePayload;

pub use anthropic::AnthropicClient;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionContent {
    Text(String),
    TextWithImage { text: String, image: ImagePayload },
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// Stable leading context; providers that support it cache this.
    pub cached_prefix: Arc<str>,
    pub instructions: String,
    pub content: CompletionContent,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_creation_input_tokens: u64,
    pub cache_read_input_tokens: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
    pub model: String,
    pub usage: TokenUsage,
}

#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, UpstreamError>;
}
