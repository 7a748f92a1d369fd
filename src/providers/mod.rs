/*!
 * Provider implementations for the scene annotation backends.
 *
 * This module contains client implementations for various LLM providers:
 * - Ollama: Local LLM server
 * - OpenAI: OpenAI API integration (also serves LM Studio)
 * - Anthropic: Anthropic API integration
 * - Gemini: Google Gemini API integration
 * - Mock: scripted provider for tests
 *
 * Every client performs exactly one HTTP attempt per call. Retrying is the
 * dispatcher's job, driven by `ProviderError::is_transient`.
 */

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use log::debug;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;

use crate::app_config::{BackendConfig, BackendProvider};
use crate::errors::ProviderError;

pub mod anthropic;
pub mod gemini;
pub mod mock;
pub mod ollama;
pub mod openai;

/// Provider-neutral completion request
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    /// Model name
    pub model: String,
    /// System instructions
    pub system: String,
    /// User prompt
    pub prompt: String,
    pub temperature: f32,
    pub top_p: f32,
    /// Output token budget
    pub max_tokens: u32,
    /// Ignored by providers without penalty support
    pub frequency_penalty: f32,
    /// Ignored by providers without penalty support
    pub presence_penalty: f32,
    /// Ask the backend for a JSON-only reply where supported
    pub json_output: bool,
}

impl CompletionRequest {
    pub fn new(model: impl Into<String>, system: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            system: system.into(),
            prompt: prompt.into(),
            temperature: 0.7,
            top_p: 0.95,
            max_tokens: 1000,
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
            json_output: false,
        }
    }
}

/// Provider-neutral completion response
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CompletionResponse {
    /// Generated text
    pub text: String,
    /// Prompt tokens, if reported
    pub prompt_tokens: Option<u64>,
    /// Completion tokens, if reported
    pub completion_tokens: Option<u64>,
}

/// Common trait for all LLM providers
///
/// This trait defines the interface that all provider implementations must follow,
/// allowing them to be used interchangeably behind `Arc<dyn Provider>`.
#[async_trait]
pub trait Provider: Send + Sync + Debug {
    /// Short provider name for logs and statistics
    fn name(&self) -> &str;

    /// Complete a request using this provider
    ///
    /// # Arguments
    /// * `request` - The request to complete
    ///
    /// # Returns
    /// * `Result<CompletionResponse, ProviderError>` - The response from the provider or an error
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, ProviderError>;

    /// Test the connection to the provider
    ///
    /// # Returns
    /// * `Result<(), ProviderError>` - Ok if the connection is successful, or an error
    async fn test_connection(&self) -> Result<(), ProviderError>;
}

/// Build the client for the configured backend.
pub fn create_provider(config: &BackendConfig) -> Result<Arc<dyn Provider>> {
    let endpoint = config.get_endpoint();
    let api_key = config.get_api_key();
    let timeout = config.get_timeout();

    url::Url::parse(&endpoint).map_err(|e| anyhow!("Invalid endpoint URL '{}': {}", endpoint, e))?;
    debug!("Creating {} provider for {}", config.provider.display_name(), endpoint);

    let provider: Arc<dyn Provider> = match config.provider {
        BackendProvider::Ollama => Arc::new(ollama::Ollama::from_url(endpoint, timeout)),
        BackendProvider::OpenAI => Arc::new(openai::OpenAI::new(api_key, endpoint, timeout)),
        BackendProvider::LMStudio => Arc::new(openai::OpenAI::new(api_key, endpoint, timeout).named("lmstudio")),
        BackendProvider::Anthropic => Arc::new(anthropic::Anthropic::new(api_key, endpoint, timeout)),
        BackendProvider::Gemini => Arc::new(gemini::Gemini::new(api_key, endpoint, timeout)),
    };

    Ok(provider)
}

/// Build an HTTP client with the given request timeout
pub(crate) fn http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .pool_idle_timeout(Duration::from_secs(90))
        .tcp_keepalive(Duration::from_secs(60))
        .build()
        .unwrap_or_default()
}

/// Map a transport failure to a provider error
pub(crate) fn map_transport_error(provider: &str, error: reqwest::Error) -> ProviderError {
    if error.is_timeout() {
        ProviderError::Timeout(format!("{} request timed out: {}", provider, error))
    } else if error.is_connect() {
        ProviderError::ConnectionError(format!("Failed to connect to {}: {}", provider, error))
    } else if error.is_decode() {
        ProviderError::ParseError(format!("Failed to decode {} response: {}", provider, error))
    } else {
        ProviderError::RequestFailed(format!("{} request failed: {}", provider, error))
    }
}

/// Seconds from a numeric `Retry-After` header
pub(crate) fn retry_after_from_headers(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
}

/// Map a non-success HTTP status to a provider error
pub(crate) fn map_status_error(
    provider: &str,
    status: StatusCode,
    retry_after_secs: Option<u64>,
    body: String,
) -> ProviderError {
    let message = format!("{}: {}", provider, body.trim());
    match status.as_u16() {
        401 | 403 => ProviderError::AuthenticationError(message),
        429 => ProviderError::RateLimitExceeded {
            message,
            retry_after_secs,
        },
        code => ProviderError::ApiError {
            status_code: code,
            message,
        },
    }
}

/// Read the body of a failed response and map it to a provider error
pub(crate) async fn error_from_response(provider: &str, response: reqwest::Response) -> ProviderError {
    let status = response.status();
    let retry_after = retry_after_from_headers(response.headers());
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Failed to get error response text".to_string());
    map_status_error(provider, status, retry_after, body)
}
