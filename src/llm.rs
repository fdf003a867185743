//! Completion requests against an OpenAI-compatible chat API.
//!
//! [`build_request`] assembles the system and user prompts from a question
//! and the prompt sample of the dataset. [`generate_response`] sends the
//! request and always hands back text: a failed call becomes a readable
//! message starting with [`API_FAILURE_PREFIX`], which then flows through
//! tag extraction like any other response.

use crate::dataset::Dataset;
use crate::error::{ReportError, Result};
use crate::prompts::report::{build_system_prompt, build_user_prompt};
use crate::resolver::Fallbacks;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Request timeout in seconds
const REQUEST_TIMEOUT_SECS: u64 = 60;

pub const DEFAULT_LLM_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_LLM_MODEL: &str = "gpt-4o-mini";

/// Low temperature keeps the tag line format stable
pub const DEFAULT_TEMPERATURE: f32 = 0.2;

/// Start of every response produced for a failed completion call
pub const API_FAILURE_PREFIX: &str = "API call failed; the analysis could not be completed.";

/// LLM configuration
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
}

impl LlmConfig {
    pub fn new(base_url: String, api_key: String, model: String) -> Self {
        Self {
            base_url,
            api_key,
            model,
            temperature: DEFAULT_TEMPERATURE,
        }
    }
}

/// System and user instructions for one completion
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionRequest {
    pub system: String,
    pub user: String,
}

/// Anything that turns a [`CompletionRequest`] into model text
#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<String>;
}

/// Build the completion request for `question`.
///
/// `sample` is embedded as-is; it should already be the reduced prompt
/// sample (see [`Dataset::prompt_sample`]). The tag example uses the fallback
/// country and the latest year in the sample.
pub fn build_request(question: &str, sample: &Dataset, fallbacks: &Fallbacks) -> CompletionRequest {
    let default_year = sample.max_year().unwrap_or(fallbacks.year).to_string();

    CompletionRequest {
        system: build_system_prompt(&sample.to_markdown(), &fallbacks.country, &default_year),
        user: build_user_prompt(question),
    }
}

/// Run the completion, converting any failure into descriptive text.
pub async fn generate_response<S>(service: &S, request: &CompletionRequest) -> String
where
    S: CompletionService + ?Sized,
{
    match service.complete(request).await {
        Ok(text) => text,
        Err(e) => {
            warn!(error = %e, "Completion call failed");
            format!("{} Error: {}", API_FAILURE_PREFIX, e)
        }
    }
}

/// Whether `text` is the placeholder produced by [`generate_response`] on failure
pub fn is_api_failure(text: &str) -> bool {
    text.starts_with(API_FAILURE_PREFIX)
}

/// OpenAI-compatible API response structures
#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
    total_tokens: u64,
}

/// Chat completions client
pub struct OpenAiClient {
    client: reqwest::Client,
    config: LlmConfig,
}

impl OpenAiClient {
    pub fn new(config: LlmConfig) -> Result<Self> {
        if config.api_key.trim().is_empty() {
            return Err(ReportError::Config("LLM API key is not set".to_string()));
        }
        if !config.api_key.starts_with("sk-") {
            warn!("LLM API key does not look like an OpenAI key (expected 'sk-' prefix)");
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| ReportError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }
}

#[async_trait]
impl CompletionService for OpenAiClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let request_body = serde_json::json!({
            "model": self.config.model,
            "messages": [
                {"role": "system", "content": request.system},
                {"role": "user", "content": request.user}
            ],
            "temperature": self.config.temperature
        });

        let api_url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));

        debug!(url = %api_url, model = %self.config.model, "Sending completion request");

        let response = self
            .client
            .post(&api_url)
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(&request_body)
            .send()
            .await
            .map_err(ReportError::Network)?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(ReportError::Api {
                code: status.as_u16() as i32,
                message: format!("LLM API error: {} - {}", status, error_text),
            });
        }

        let api_response: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| ReportError::Parse(format!("Failed to parse LLM response: {}", e)))?;

        if let Some(usage) = &api_response.usage {
            info!(
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                total_tokens = usage.total_tokens,
                "Completion received"
            );
        }

        api_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ReportError::Parse("LLM response contained no message content".to_string()))
    }
}
