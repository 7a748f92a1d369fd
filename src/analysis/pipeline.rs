/*!
 * End-to-end scene analysis.
 *
 * Entries → scenes → chunks → concurrent annotation → merged report. Only
 * invalid settings produce an error; backend failures surface in the report.
 */

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{info, warn};

use crate::errors::{AnnotationError, ConfigError};
use crate::subtitle_processor::SubtitleEntry;
use super::annotator::SceneAnnotator;
use super::chunking::{plan, validate_chunking};
use super::concurrency::RequestLimiter;
use super::dispatcher::{AnnotationDispatcher, BackoffPolicy, ChunkFailure, RetryPolicy};
use super::merger::{merge, AnnotatedScene, UnresolvedScene};
use super::segmenter::segment;

/// Settings consumed by the core pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSettings {
    /// Pause that separates two scenes
    pub min_pause: Duration,
    /// Scenes per chunk
    pub chunk_size: usize,
    /// Scenes shared by adjacent chunks
    pub overlap: usize,
    /// Requests in flight at most
    pub max_concurrency: usize,
    /// Retries per chunk after the first attempt
    pub max_retries: u32,
    pub backoff: BackoffPolicy,
    /// Optional pacing of request starts
    pub rate_limit_rpm: Option<u32>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            min_pause: Duration::from_millis(4000),
            chunk_size: 5,
            overlap: 1,
            max_concurrency: 4,
            max_retries: 3,
            backoff: BackoffPolicy::default(),
            rate_limit_rpm: None,
        }
    }
}

impl PipelineSettings {
    /// Check the settings before any work is done
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_chunking(self.chunk_size, self.overlap)?;
        if self.max_concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        if self.max_concurrency > RequestLimiter::MAX_CONCURRENCY {
            return Err(ConfigError::ConcurrencyTooLarge {
                requested: self.max_concurrency,
                limit: RequestLimiter::MAX_CONCURRENCY,
            });
        }
        if self.backoff.max < self.backoff.base {
            return Err(ConfigError::Invalid(format!(
                "max backoff ({:?}) is shorter than the base backoff ({:?})",
                self.backoff.max, self.backoff.base
            )));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            backoff: self.backoff,
        }
    }
}

/// Token usage statistics for a run
#[derive(Debug, Clone)]
pub struct TokenUsageStats {
    /// Number of prompt tokens
    pub prompt_tokens: u64,

    /// Number of completion tokens
    pub completion_tokens: u64,

    /// Total number of tokens
    pub total_tokens: u64,

    /// Wall time spent dispatching
    pub api_duration: Duration,

    /// Provider name
    pub provider: String,

    /// Model name
    pub model: String,
}

impl TokenUsageStats {
    /// Create new token usage stats with provider info
    pub fn with_provider_info(provider: String, model: String) -> Self {
        Self {
            prompt_tokens: 0,
            completion_tokens: 0,
            total_tokens: 0,
            api_duration: Duration::ZERO,
            provider,
            model,
        }
    }

    /// Add the token counts reported for one request
    pub fn add_token_usage(&mut self, prompt_tokens: Option<u64>, completion_tokens: Option<u64>) {
        if let Some(pt) = prompt_tokens {
            self.prompt_tokens += pt;
            self.total_tokens += pt;
        }

        if let Some(ct) = completion_tokens {
            self.completion_tokens += ct;
            self.total_tokens += ct;
        }
    }

    /// Calculate tokens per minute rate
    pub fn tokens_per_minute(&self) -> f64 {
        let minutes = self.api_duration.as_secs_f64() / 60.0;
        if minutes > 0.0 {
            self.total_tokens as f64 / minutes
        } else {
            0.0
        }
    }

    /// Generate a summary of token usage
    pub fn summary(&self) -> String {
        format!(
            "Token Usage Summary:\n\
             Provider: {}\n\
             Model: {}\n\
             Prompt tokens: {}\n\
             Completion tokens: {}\n\
             Total tokens: {}\n\
             API time: {:.1}s\n\
             Rate: {:.0} tokens/minute",
            self.provider,
            self.model,
            self.prompt_tokens,
            self.completion_tokens,
            self.total_tokens,
            self.api_duration.as_secs_f64(),
            self.tokens_per_minute()
        )
    }
}

/// Everything one analysis run produced
#[derive(Debug, Clone)]
pub struct AnalysisReport {
    /// Annotated scenes ordered by start time
    pub scenes: Vec<AnnotatedScene>,

    /// Scenes no successful chunk covered
    pub unresolved: Vec<UnresolvedScene>,

    /// Chunks that failed, in chunk order
    pub failures: Vec<ChunkFailure>,

    /// Scenes produced by segmentation
    pub total_scenes: usize,

    /// Chunks planned
    pub chunk_count: usize,

    /// Whether the run was cut short
    pub cancelled: bool,

    pub token_usage: TokenUsageStats,
}

impl AnalysisReport {
    /// Some scenes are missing from the result
    pub fn is_partial(&self) -> bool {
        !self.unresolved.is_empty()
    }

    /// Scenes were segmented but none could be annotated
    pub fn is_total_failure(&self) -> bool {
        self.total_scenes > 0 && self.scenes.is_empty()
    }
}

/// Segments, chunks, annotates and merges one subtitle track.
pub struct ScenePipeline {
    settings: PipelineSettings,
    annotator: Arc<dyn SceneAnnotator>,
    provider: String,
    model: String,
    progress: Option<Arc<dyn Fn(usize, usize) + Send + Sync>>,
}

impl ScenePipeline {
    pub fn new(settings: PipelineSettings, annotator: Arc<dyn SceneAnnotator>) -> Self {
        Self {
            settings,
            annotator,
            provider: String::new(),
            model: String::new(),
            progress: None,
        }
    }

    /// Label token statistics with the backend in use
    pub fn with_provider_info(mut self, provider: impl Into<String>, model: impl Into<String>) -> Self {
        self.provider = provider.into();
        self.model = model.into();
        self
    }

    /// Invoke `callback(completed_chunks, total_chunks)` as chunks finish
    pub fn with_progress(mut self, callback: impl Fn(usize, usize) + Send + Sync + 'static) -> Self {
        self.progress = Some(Arc::new(callback));
        self
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Run the pipeline to completion
    pub async fn run(&self, entries: &[SubtitleEntry]) -> Result<AnalysisReport, ConfigError> {
        self.run_until(entries, std::future::pending::<()>()).await
    }

    /// Run the pipeline, stopping dispatch when `shutdown` resolves
    pub async fn run_until<F>(&self, entries: &[SubtitleEntry], shutdown: F) -> Result<AnalysisReport, ConfigError>
    where
        F: Future<Output = ()>,
    {
        self.settings.validate()?;

        let scenes = segment(entries, self.settings.min_pause);
        let chunks = plan(&scenes, self.settings.chunk_size, self.settings.overlap)?;
        info!(
            "Segmented {} entries into {} scenes, planned {} chunks",
            entries.len(),
            scenes.len(),
            chunks.len()
        );

        // One limiter per run, shared by every chunk task
        let limiter = RequestLimiter::new(self.settings.max_concurrency, self.settings.rate_limit_rpm);
        let mut dispatcher = AnnotationDispatcher::new(self.annotator.clone(), limiter, self.settings.retry_policy());
        if let Some(progress) = &self.progress {
            let progress = progress.clone();
            dispatcher = dispatcher.with_progress(move |done, total| progress(done, total));
        }

        let started = Instant::now();
        let results = dispatcher.dispatch_until(&chunks, shutdown).await;

        let mut token_usage = TokenUsageStats::with_provider_info(self.provider.clone(), self.model.clone());
        token_usage.api_duration = started.elapsed();

        let mut failures = Vec::new();
        for outcome in results.values() {
            match outcome {
                Ok(batch) => token_usage.add_token_usage(batch.prompt_tokens, batch.completion_tokens),
                Err(failure) => failures.push(failure.clone()),
            }
        }
        let cancelled = failures
            .iter()
            .any(|failure| matches!(failure.error, AnnotationError::Cancelled));

        let merged = merge(&scenes, &chunks, &results);

        if !merged.unresolved.is_empty() {
            warn!(
                "{} of {} scenes could not be annotated ({} failed chunks)",
                merged.unresolved.len(),
                scenes.len(),
                failures.len()
            );
        }

        Ok(AnalysisReport {
            scenes: merged.scenes,
            unresolved: merged.unresolved,
            failures,
            total_scenes: scenes.len(),
            chunk_count: chunks.len(),
            cancelled,
            token_usage,
        })
    }
}
