use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};

use labelcheck_common::error::{LabelError, LabelResult, UpstreamError};
use labelcheck_config::CompletionConfig;

use super::{Completion, CompletionContent, CompletionRequest, CompletionService, TokenUsage};

const API_VERSION: &str = "2023-06-01";
/// Anthropic's "overloaded" status.
const STATUS_OVERLOADED: u16 = 529;

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    model: String,
    #[serde(default)]
    usage: Option<UsageBody>,
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct UsageBody {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
    #[serde(default)]
    cache_creation_input_tokens: Option<u64>,
    #[serde(default)]
    cache_read_input_tokens: Option<u64>,
}

/// Client for the Anthropic Messages API.
#[derive(Clone)]
pub struct AnthropicClient {
    client: Client,
    config: CompletionConfig,
}

impl AnthropicClient {
    pub fn new(config: CompletionConfig) -> LabelResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LabelError::Config(format!("http client: {e}")))?;
        Ok(Self { client, config })
    }

    /// For testing: point the client at a mock server.
    #[cfg(test)]
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.config.base_url = base_url.to_string();
        self
    }

    fn body(&self, request: &CompletionRequest) -> Value {
        let mut content = Vec::with_capacity(2);
        let text = match &request.content {
            CompletionContent::Text(text) => text,
            CompletionContent::TextWithImage { text, image } => {
                content.push(json!({
                    "type": "image",
                    "source": {
                        "type": "base64",
                        "media_type": image.media_type,
                        "data": image.data_base64,
                    }
                }));
                text
            }
        };
        content.push(json!({ "type": "text", "text": text }));

        json!({
            "model": self.config.model,
            "max_tokens": request.max_tokens,
            "system": [
                {
                    "type": "text",
                    "text": request.cached_prefix.as_ref(),
                    "cache_control": { "type": "ephemeral" }
                },
                { "type": "text", "text": request.instructions }
            ],
            "messages": [{ "role": "user", "content": content }]
        })
    }

    fn into_completion(response: MessagesResponse) -> Result<Completion, UpstreamError> {
        let text: String = response
            .content
            .iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text.as_deref())
            .collect::<Vec<_>>()
            .join("");
        if text.trim().is_empty() {
            tracing::warn!(stop_reason = ?response.stop_reason, "completion returned no text");
            return Err(UpstreamError::NoContent);
        }
        if response.stop_reason.as_deref() == Some("max_tokens") {
            tracing::warn!("completion stopped at max_tokens; output may be cut short");
        }

        let usage = response.usage.unwrap_or_default();
        Ok(Completion {
            text,
            model: response.model,
            usage: TokenUsage {
                input_tokens: usage.input_tokens,
                output_tokens: usage.output_tokens,
                cache_creation_input_tokens: usage.cache_creation_input_tokens.unwrap_or(0),
                cache_read_input_tokens: usage.cache_read_input_tokens.unwrap_or(0),
            },
        })
    }
}

#[async_trait]
impl CompletionService for AnthropicClient {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, UpstreamError> {
        let url = format!("{}/v1/messages", self.config.base_url);
        let body = self.body(&request);
        let mut last_error = String::new();

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let backoff_ms = self
                    .config
                    .retry_backoff_ms
                    .saturating_mul(2u64.saturating_pow(attempt - 1));
                tracing::warn!(attempt, backoff_ms, "retrying completion after backoff");
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
            }

            let response = match self
                .client
                .post(&url)
                .header("x-api-key", &self.config.api_key)
                .header("anthropic-version", API_VERSION)
                .json(&body)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(e) if e.is_timeout() => {
                    return Err(UpstreamError::Timeout {
                        after_secs: self.config.timeout_secs,
                    });
                }
                Err(e) => {
                    last_error = e.to_string();
                    if e.is_connect() || e.is_request() {
                        continue;
                    }
                    return Err(UpstreamError::Unavailable(last_error));
                }
            };

            let status = response.status();

            if status.is_success() {
                let parsed = match response.json::<MessagesResponse>().await {
                    Ok(parsed) => parsed,
                    Err(e) if e.is_timeout() => {
                        return Err(UpstreamError::Timeout {
                            after_secs: self.config.timeout_secs,
                        });
                    }
                    Err(e) => {
                        return Err(UpstreamError::Unavailable(format!(
                            "malformed completion response: {e}"
                        )));
                    }
                };
                let completion = Self::into_completion(parsed)?;
                tracing::info!(
                    model = %completion.model,
                    input_tokens = completion.usage.input_tokens,
                    output_tokens = completion.usage.output_tokens,
                    cache_read_tokens = completion.usage.cache_read_input_tokens,
                    cache_write_tokens = completion.usage.cache_creation_input_tokens,
                    "completion received"
                );
                return Ok(completion);
            }

            if status == StatusCode::TOO_MANY_REQUESTS {
                let retry_after_secs = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.trim().parse::<u64>().ok());
                tracing::warn!(?retry_after_secs, "completion rate limited");
                return Err(UpstreamError::RateLimited { retry_after_secs });
            }

            if status.is_server_error() || status.as_u16() == STATUS_OVERLOADED {
                let body = response.text().await.unwrap_or_default();
                last_error = format!("{status}: {body}");
                continue;
            }

            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = status.as_u16(), "completion request rejected");
            return Err(UpstreamError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        Err(UpstreamError::Unavailable(format!(
            "gave up after {} attempts: {last_error}",
            self.config.max_retries + 1
        )))
    }
}
