/*!
 * Provider-specific concurrency tuning and the per-run request limiter.
 *
 * `ProviderProfile` holds tuned defaults per backend. `RequestLimiter` is
 * created once per pipeline run and shared by every chunk task: it bounds the
 * number of requests in flight and optionally paces request starts to a
 * requests-per-minute budget.
 */

use std::sync::Arc;
use std::time::Duration;

use log::trace;
use tokio::sync::{AcquireError, Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

use crate::app_config::BackendProvider;

/// Per-provider defaults for request concurrency and pacing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderProfile {
    /// Requests in flight when the config does not say otherwise
    pub max_concurrent_requests: usize,
    /// Request starts per minute, `None` for local servers
    pub target_rpm: Option<u32>,
}

impl ProviderProfile {
    pub fn for_provider(provider: BackendProvider) -> Self {
        let (max_concurrent_requests, target_rpm) = match provider {
            // Local, no account limits
            BackendProvider::Ollama => (8, None),
            BackendProvider::OpenAI => (10, Some(60)),
            BackendProvider::Anthropic => (5, Some(45)),
            BackendProvider::Gemini => (4, Some(15)),
            // Single loaded model, requests mostly queue
            BackendProvider::LMStudio => (2, None),
        };
        Self {
            max_concurrent_requests,
            target_rpm,
        }
    }
}

/// Slot held while one backend request is in flight.
///
/// Dropping it returns the slot to the limiter.
#[derive(Debug)]
pub struct RequestPermit {
    _permit: OwnedSemaphorePermit,
}

/// Shared admission control for one pipeline run.
#[derive(Debug, Clone)]
pub struct RequestLimiter {
    semaphore: Arc<Semaphore>,
    max_concurrency: usize,
    pacing: Option<Arc<Pacing>>,
}

#[derive(Debug)]
struct Pacing {
    interval: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl RequestLimiter {
    /// Largest `max_concurrency` a limiter accepts
    pub const MAX_CONCURRENCY: usize = Semaphore::MAX_PERMITS;

    /// Limiter allowing `max_concurrency` requests in flight.
    ///
    /// `requests_per_minute` spaces request starts evenly when set. Values
    /// above `MAX_CONCURRENCY` are capped to it.
    pub fn new(max_concurrency: usize, requests_per_minute: Option<u32>) -> Self {
        let max_concurrency = max_concurrency.min(Self::MAX_CONCURRENCY);
        let pacing = requests_per_minute
            .filter(|rpm| *rpm > 0)
            .map(|rpm| {
                Arc::new(Pacing {
                    interval: Duration::from_secs(60) / rpm,
                    next_slot: Mutex::new(None),
                })
            });

        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrency)),
            max_concurrency,
            pacing,
        }
    }

    /// Limiter without pacing
    pub fn unpaced(max_concurrency: usize) -> Self {
        Self::new(max_concurrency, None)
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Slots currently free
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Wait for a free slot, then for the next pacing slot if pacing is enabled.
    pub async fn acquire(&self) -> Result<RequestPermit, AcquireError> {
        let permit = self.semaphore.clone().acquire_owned().await?;

        if let Some(pacing) = &self.pacing {
            let wait_until = {
                let mut next_slot = pacing.next_slot.lock().await;
                let now = Instant::now();
                let slot = match *next_slot {
                    Some(slot) if slot > now => slot,
                    _ => now,
                };
                *next_slot = Some(slot + pacing.interval);
                slot
            };

            if wait_until > Instant::now() {
                trace!("Pacing request start by {:?}", wait_until - Instant::now());
                tokio::time::sleep_until(wait_until).await;
            }
        }

        Ok(RequestPermit { _permit: permit })
    }

    /// Stop admitting requests; pending and future `acquire` calls fail.
    pub fn close(&self) {
        self.semaphore.close();
    }
}
