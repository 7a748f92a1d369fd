/*!
 * Mock provider implementations for testing.
 *
 * This module provides mock providers that simulate different behaviors:
 * - `MockProvider::working()` - Always replies with valid scene annotations
 * - `MockProvider::intermittent(n)` - Every nth request fails with a 503
 * - `MockProvider::failing()` - Always fails with a 500
 * - `MockProvider::unauthorized()` - Always fails authentication
 * - `MockProvider::rate_limited(secs)` - Always answers 429 with a retry-after
 * - `MockProvider::malformed()` - Replies with one scene record missing
 */

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::errors::ProviderError;
use crate::providers::{CompletionRequest, CompletionResponse, Provider};

// @const: Positional scene marker in a user prompt
static SCENE_MARKER_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<<SCENE_(\d+)>>").expect("scene marker pattern is valid")
});

/// Behavior mode for the mock provider
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MockBehavior {
    /// Always succeeds with a proper annotation reply
    Working,
    /// Succeeds but drops the last scene record
    Malformed,
    /// Fails intermittently (every Nth request)
    Intermittent { fail_every: usize },
    /// Always fails with a server error
    Failing,
    /// Always fails with an authentication error
    Unauthorized,
    /// Always fails with HTTP 429
    RateLimited { retry_after_secs: u64 },
    /// Returns empty response
    Empty,
    /// Answers correctly after `delay_ms`
    Slow { delay_ms: u64 },
}

/// Mock provider for testing annotation behavior
#[derive(Debug)]
pub struct MockProvider {
    /// Behavior mode
    behavior: MockBehavior,
    /// Request counter for intermittent failures
    request_count: Arc<AtomicUsize>,
}

impl MockProvider {
    /// Create a new mock provider with the specified behavior
    pub fn new(behavior: MockBehavior) -> Self {
        Self {
            behavior,
            request_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Create a working mock provider that always succeeds
    pub fn working() -> Self {
        Self::new(MockBehavior::Working)
    }

    /// Create a mock that replies with one record too few
    pub fn malformed() -> Self {
        Self::new(MockBehavior::Malformed)
    }

    /// Create an intermittently failing mock provider
    pub fn intermittent(fail_every: usize) -> Self {
        Self::new(MockBehavior::Intermittent { fail_every: fail_every.max(1) })
    }

    /// Create a failing mock provider that always errors
    pub fn failing() -> Self {
        Self::new(MockBehavior::Failing)
    }

    /// Create a mock whose credentials are always rejected
    pub fn unauthorized() -> Self {
        Self::new(MockBehavior::Unauthorized)
    }

    /// Create a mock that is always rate limited
    pub fn rate_limited(retry_after_secs: u64) -> Self {
        Self::new(MockBehavior::RateLimited { retry_after_secs })
    }

    /// Create a mock that returns empty responses
    pub fn empty() -> Self {
        Self::new(MockBehavior::Empty)
    }

    /// Create a mock that answers after a delay
    pub fn slow(delay_ms: u64) -> Self {
        Self::new(MockBehavior::Slow { delay_ms })
    }

    /// Number of requests received so far, across clones
    pub fn request_count(&self) -> usize {
        self.request_count.load(Ordering::SeqCst)
    }

    /// Marker positions found in a prompt, in order
    pub fn scene_markers(prompt: &str) -> Vec<usize> {
        SCENE_MARKER_REGEX
            .captures_iter(prompt)
            .filter_map(|caps| caps.get(1).and_then(|m| m.as_str().parse().ok()))
            .collect()
    }

    /// Generate a well-formed annotation reply for the given marker positions
    pub fn generate_annotation_response(markers: &[usize]) -> String {
        let scenes: Vec<serde_json::Value> = markers
            .iter()
            .map(|&position| {
                serde_json::json!({
                    "scene": position,
                    "summary": format!("Summary of scene {}", position),
                    "characters": ["Narrator"],
                    "mood": "neutral",
                    "cultural_refs": [],
                })
            })
            .collect();

        serde_json::json!({ "scenes": scenes }).to_string()
    }

    fn annotated(request: &CompletionRequest, markers: &[usize]) -> CompletionResponse {
        let text = Self::generate_annotation_response(markers);
        CompletionResponse {
            prompt_tokens: Some(request.prompt.len() as u64),
            completion_tokens: Some((text.len() / 4) as u64),
            text,
        }
    }
}

impl Clone for MockProvider {
    fn clone(&self) -> Self {
        Self {
            behavior: self.behavior,
            request_count: Arc::clone(&self.request_count),
        }
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, ProviderError> {
        let count = self.request_count.fetch_add(1, Ordering::SeqCst);
        let markers = Self::scene_markers(&request.prompt);

        match self.behavior {
            MockBehavior::Working => Ok(Self::annotated(&request, &markers)),

            MockBehavior::Malformed => {
                let kept = &markers[..markers.len().saturating_sub(1)];
                Ok(Self::annotated(&request, kept))
            }

            MockBehavior::Intermittent { fail_every } => {
                if count % fail_every == fail_every - 1 {
                    Err(ProviderError::ApiError {
                        message: format!("Simulated intermittent failure (request #{})", count + 1),
                        status_code: 503,
                    })
                } else {
                    Ok(Self::annotated(&request, &markers))
                }
            }

            MockBehavior::Failing => Err(ProviderError::ApiError {
                message: "Simulated provider failure".to_string(),
                status_code: 500,
            }),

            MockBehavior::Unauthorized => Err(ProviderError::AuthenticationError(
                "Simulated invalid API key".to_string(),
            )),

            MockBehavior::RateLimited { retry_after_secs } => Err(ProviderError::RateLimitExceeded {
                message: "Simulated rate limit".to_string(),
                retry_after_secs: Some(retry_after_secs),
            }),

            MockBehavior::Empty => Ok(CompletionResponse {
                text: String::new(),
                prompt_tokens: Some(0),
                completion_tokens: Some(0),
            }),

            MockBehavior::Slow { delay_ms } => {
                tokio::time::sleep(tokio::time::Duration::from_millis(delay_ms)).await;
                Ok(Self::annotated(&request, &markers))
            }
        }
    }

    async fn test_connection(&self) -> Result<(), ProviderError> {
        match self.behavior {
            MockBehavior::Unauthorized => Err(ProviderError::AuthenticationError(
                "Simulated invalid API key".to_string(),
            )),
            MockBehavior::Failing => Err(ProviderError::ConnectionError("Simulated outage".to_string())),
            _ => Ok(()),
        }
    }
}
