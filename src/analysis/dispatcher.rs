/*!
 * Concurrent annotation dispatch.
 *
 * Every chunk becomes one annotation task. Tasks run concurrently behind the
 * run's `RequestLimiter`, retry transient and shape failures with exponential
 * backoff, and fail in isolation: a failing chunk never stops its siblings.
 */

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use log::{debug, error, info, warn};
use rand::Rng;

use crate::errors::AnnotationError;
use super::annotator::{AnnotatedBatch, AnnotationRequest, SceneAnnotator};
use super::chunking::Chunk;
use super::concurrency::RequestLimiter;

/// Exponential backoff bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay after the first failed attempt
    pub base: Duration,
    /// Upper bound for any computed delay
    pub max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(1000),
            max: Duration::from_millis(30_000),
        }
    }
}

impl BackoffPolicy {
    /// `base * 2^(attempt-1)`, capped at `max`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max)
            .min(self.max)
    }

    /// Delay with up to 10% random jitter added
    pub fn jittered_delay_for(&self, attempt: u32) -> Duration {
        let delay = self.delay_for(attempt);
        let jitter_ceiling = (delay.as_millis() / 10) as u64;
        if jitter_ceiling == 0 {
            return delay;
        }
        delay + Duration::from_millis(rand::rng().random_range(0..=jitter_ceiling))
    }
}

/// How often and how patiently a chunk is retried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub backoff: BackoffPolicy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: BackoffPolicy::default(),
        }
    }
}

impl RetryPolicy {
    /// Delay before the attempt after `failed_attempt`.
    ///
    /// A server-requested delay wins when it is longer than the backoff.
    pub fn delay_after(&self, failed_attempt: u32, error: &AnnotationError) -> Duration {
        let backoff = self.backoff.jittered_delay_for(failed_attempt);
        match retry_after(error) {
            Some(server_delay) if server_delay > backoff => server_delay,
            _ => backoff,
        }
    }
}

fn retry_after(error: &AnnotationError) -> Option<Duration> {
    match error {
        AnnotationError::Provider(e) => e.retry_after_secs().map(Duration::from_secs),
        _ => None,
    }
}

/// Terminal failure of one chunk
#[derive(Debug, Clone)]
pub struct ChunkFailure {
    pub chunk_index: usize,
    /// Attempts started, including one cut short by cancellation
    pub attempts: u32,
    pub error: AnnotationError,
}

impl std::fmt::Display for ChunkFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "chunk {} failed after {} attempt(s): {}",
            self.chunk_index, self.attempts, self.error
        )
    }
}

/// Result of dispatching one chunk
pub type ChunkOutcome = Result<AnnotatedBatch, ChunkFailure>;

type ProgressCallback = Arc<dyn Fn(usize, usize) + Send + Sync>;

/// Runs annotation requests for a set of chunks.
pub struct AnnotationDispatcher {
    annotator: Arc<dyn SceneAnnotator>,
    limiter: RequestLimiter,
    retry: RetryPolicy,
    progress: Option<ProgressCallback>,
}

impl AnnotationDispatcher {
    pub fn new(annotator: Arc<dyn SceneAnnotator>, limiter: RequestLimiter, retry: RetryPolicy) -> Self {
        Self {
            annotator,
            limiter,
            retry,
            progress: None,
        }
    }

    /// Invoke `callback(completed, total)` each time a chunk finishes
    pub fn with_progress(mut self, callback: impl Fn(usize, usize) + Send + Sync + 'static) -> Self {
        self.progress = Some(Arc::new(callback));
        self
    }

    /// Annotate every chunk, keyed by chunk index.
    pub async fn dispatch(&self, chunks: &[Chunk]) -> BTreeMap<usize, ChunkOutcome> {
        self.dispatch_until(chunks, std::future::pending::<()>()).await
    }

    /// Annotate chunks until done or until `shutdown` resolves.
    ///
    /// Chunks still running at shutdown are recorded as `Cancelled` with the
    /// number of attempts they had started; finished outcomes are kept.
    pub async fn dispatch_until<F>(&self, chunks: &[Chunk], shutdown: F) -> BTreeMap<usize, ChunkOutcome>
    where
        F: Future<Output = ()>,
    {
        let total = chunks.len();
        let mut outcomes = BTreeMap::new();
        if total == 0 {
            return outcomes;
        }

        info!(
            "Dispatching {} chunks (max {} concurrent requests)",
            total,
            self.limiter.max_concurrency()
        );

        let started = Instant::now();
        let attempts: Vec<AtomicU32> = chunks.iter().map(|_| AtomicU32::new(0)).collect();

        // The limiter bounds requests in flight; every task is polled so that
        // a task sleeping in backoff does not hold back the others.
        let mut results = stream::iter(chunks.iter().zip(&attempts))
            .map(|(chunk, started_attempts)| async move {
                (chunk.index, self.run_chunk(chunk, started_attempts).await)
            })
            .buffer_unordered(total);

        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                next = results.next() => match next {
                    Some((index, outcome)) => {
                        outcomes.insert(index, outcome);
                        if let Some(progress) = &self.progress {
                            progress(outcomes.len(), total);
                        }
                    }
                    None => break,
                },
                _ = &mut shutdown => {
                    warn!(
                        "Dispatch cancelled with {} of {} chunks finished",
                        outcomes.len(),
                        total
                    );
                    break;
                }
            }
        }
        drop(results);

        for (chunk, started_attempts) in chunks.iter().zip(&attempts) {
            outcomes.entry(chunk.index).or_insert_with(|| {
                Err(ChunkFailure {
                    chunk_index: chunk.index,
                    attempts: started_attempts.load(Ordering::SeqCst),
                    error: AnnotationError::Cancelled,
                })
            });
        }

        let failed = outcomes.values().filter(|outcome| outcome.is_err()).count();
        info!(
            "Dispatch finished in {:?}: {} succeeded, {} failed",
            started.elapsed(),
            total - failed,
            failed
        );

        outcomes
    }

    /// Annotate one chunk, retrying retryable failures.
    ///
    /// `started_attempts` counts the attempts that reached the annotator.
    async fn run_chunk(&self, chunk: &Chunk, started_attempts: &AtomicU32) -> ChunkOutcome {
        let mut attempt: u32 = 0;
        let mut rejection: Option<String> = None;

        loop {
            attempt += 1;

            let result = {
                // The permit is dropped before any backoff sleep
                let _permit = match self.limiter.acquire().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return Err(ChunkFailure {
                            chunk_index: chunk.index,
                            attempts: attempt - 1,
                            error: AnnotationError::Cancelled,
                        });
                    }
                };
                started_attempts.store(attempt, Ordering::SeqCst);

                let request = AnnotationRequest {
                    chunk,
                    attempt,
                    previous_rejection: rejection.as_deref(),
                };
                self.annotator.annotate(&request).await
            };

            let error = match result {
                Ok(batch) => {
                    if attempt > 1 {
                        info!("Chunk {} succeeded on attempt {}", chunk.index, attempt);
                    } else {
                        debug!("Chunk {} annotated", chunk.index);
                    }
                    return Ok(batch);
                }
                Err(error) => error,
            };

            if !error.is_retryable() || attempt > self.retry.max_retries {
                error!("Chunk {} failed after {} attempt(s): {}", chunk.index, attempt, error);
                return Err(ChunkFailure {
                    chunk_index: chunk.index,
                    attempts: attempt,
                    error,
                });
            }

            let delay = self.retry.delay_after(attempt, &error);
            warn!(
                "Chunk {} attempt {}/{} failed: {}. Retrying in {:?}",
                chunk.index,
                attempt,
                self.retry.max_retries + 1,
                error,
                delay
            );

            if let AnnotationError::ResponseShape(reason) = &error {
                rejection = Some(reason.clone());
            }

            tokio::time::sleep(delay).await;
        }
    }
}
