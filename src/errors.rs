/*!
 * Error types for the scenesage application.
 *
 * This module contains custom error types for the different stages of the
 * scene analysis pipeline, using the thiserror crate for ergonomic error
 * definitions. Partial results are not errors: a run that leaves scenes
 * unresolved still completes and reports them through the analysis report.
 */

use thiserror::Error;

/// Errors that can occur when working with provider APIs
#[derive(Error, Debug, Clone)]
pub enum ProviderError {
    /// Error when making an API request fails
    #[error("API request failed: {0}")]
    RequestFailed(String),

    /// Error when parsing an API response fails
    #[error("Failed to parse API response: {0}")]
    ParseError(String),

    /// Error returned by the API itself
    #[error("API responded with error: {status_code} - {message}")]
    ApiError {
        /// HTTP status code
        status_code: u16,
        /// Error message from the API
        message: String,
    },

    /// Error establishing or maintaining a connection
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// The request did not complete in time
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// Error related to rate limiting
    #[error("Rate limit exceeded: {message}")]
    RateLimitExceeded {
        /// Error message from the API
        message: String,
        /// Delay requested by the server, if any
        retry_after_secs: Option<u64>,
    },

    /// Error with authentication
    #[error("Authentication error: {0}")]
    AuthenticationError(String),
}

impl ProviderError {
    /// Whether a later attempt of the same request may succeed.
    ///
    /// Rate limits, timeouts, connection failures and server-side errors are
    /// transient. Authentication failures and client errors are not.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RateLimitExceeded { .. } | Self::Timeout(_) | Self::ConnectionError(_) => true,
            Self::ApiError { status_code, .. } => *status_code == 408 || *status_code >= 500,
            Self::RequestFailed(_) => true,
            Self::ParseError(_) => false,
            Self::AuthenticationError(_) => false,
        }
    }

    /// Server-requested delay before the next attempt
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::RateLimitExceeded { retry_after_secs, .. } => *retry_after_secs,
            _ => None,
        }
    }
}

/// Invalid settings detected before any backend request is made
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Chunk size must hold at least one scene
    #[error("Chunk size must be at least 1")]
    ZeroChunkSize,

    /// Overlap must leave a positive stride between chunks
    #[error("Overlap ({overlap}) must be smaller than chunk size ({chunk_size})")]
    OverlapTooLarge {
        /// Configured chunk size
        chunk_size: usize,
        /// Configured overlap
        overlap: usize,
    },

    /// At least one request must be allowed in flight
    #[error("Maximum concurrency must be at least 1")]
    ZeroConcurrency,

    /// More requests in flight than the limiter can track
    #[error("Maximum concurrency ({requested}) exceeds the supported limit of {limit}")]
    ConcurrencyTooLarge {
        /// Configured concurrency
        requested: usize,
        /// Largest supported concurrency
        limit: usize,
    },

    /// Any other invalid value
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Errors that can occur while annotating a single chunk of scenes
#[derive(Error, Debug, Clone)]
pub enum AnnotationError {
    /// Error from the provider API
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// The backend replied, but not with one valid record per scene
    #[error("Malformed annotation response: {0}")]
    ResponseShape(String),

    /// The run was aborted before this chunk finished
    #[error("Annotation cancelled before completion")]
    Cancelled,
}

impl AnnotationError {
    /// Whether the dispatcher should try this chunk again.
    ///
    /// Shape errors are retried: a reformulated request often fixes them.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Provider(e) => e.is_transient(),
            Self::ResponseShape(_) => true,
            Self::Cancelled => false,
        }
    }
}

/// Main application error type that wraps all other errors
#[derive(Error, Debug)]
pub enum AppError {
    /// Error from a file operation
    #[error("File error: {0}")]
    File(String),

    /// Error from the configuration
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Error from a provider
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Error from subtitle processing
    #[error("Subtitle error: {0}")]
    Subtitle(String),

    /// Any other error
    #[error("Unknown error: {0}")]
    Unknown(String),
}

// Utility functions for error conversion
impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        Self::Unknown(error.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(error: std::io::Error) -> Self {
        Self::File(error.to_string())
    }
}
