use std::{future::Future, ops::RangeInclusive, time::Duration};

use lexborg_core::{config::Config, FailureKind, QueryAttempt};
use rand::Rng;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Attempt budget and backoff schedule for one completion call.
///
/// Delay after failed attempt `i` (0-based):
/// - rate limited: `base * 3^i` plus `rate_limit_jitter_ms`
/// - everything else retryable: `base * 2^i` plus `backoff_jitter_ms`
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub rate_limit_jitter_ms: RangeInclusive<u64>,
    pub backoff_jitter_ms: RangeInclusive<u64>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(1000),
            rate_limit_jitter_ms: 5_000..=10_000,
            backoff_jitter_ms: 0..=1_000,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.retry_base_delay_ms),
            ..Self::default()
        }
    }

    /// No waiting at all. Meant for tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            rate_limit_jitter_ms: 0..=0,
            backoff_jitter_ms: 0..=0,
        }
    }

    pub fn delay_for(&self, kind: FailureKind, attempt: u32) -> Duration {
        let (factor, jitter) = match kind {
            FailureKind::RateLimited => (3u32, &self.rate_limit_jitter_ms),
            _ => (2u32, &self.backoff_jitter_ms),
        };
        let scaled = self.base_delay.saturating_mul(factor.saturating_pow(attempt));
        scaled + Duration::from_millis(sample(jitter))
    }

    /// Drive `op` until it succeeds, hits a non-retryable failure, runs out of
    /// attempts or `cancel` fires. `op` receives the 0-based attempt number.
    ///
    /// Elapsed time on success covers the whole call, backoff included.
    pub async fn run<F, Fut>(&self, cancel: &CancellationToken, mut op: F) -> QueryAttempt
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<String, FailureKind>>,
    {
        let started = Instant::now();
        let max_attempts = self.max_attempts.max(1);

        for attempt in 0..max_attempts {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(FailureKind::Cancelled),
                r = op(attempt) => r,
            };
            let attempts = attempt + 1;

            let kind = match result {
                Ok(content) => {
                    return QueryAttempt::Success {
                        content,
                        elapsed: started.elapsed(),
                        attempts,
                    };
                },
                Err(kind) => kind,
            };

            if !kind.is_retryable() {
                debug!(%kind, attempts, "not retrying");
                return QueryAttempt::Failure { kind, attempts };
            }
            if attempts == max_attempts {
                warn!(%kind, attempts, "giving up after max attempts");
                return QueryAttempt::Failure { kind, attempts };
            }

            let delay = self.delay_for(kind, attempt);
            warn!(
                %kind,
                attempt = attempts,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                "request failed, retrying"
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return QueryAttempt::Failure { kind: FailureKind::Cancelled, attempts };
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }

        // max_attempts >= 1, the loop always returns.
        QueryAttempt::Failure {
            kind: FailureKind::Other,
            attempts: max_attempts,
        }
    }
}

fn sample(range: &RangeInclusive<u64>) -> u64 {
    if range.start() >= range.end() {
        return *range.start();
    }
    rand::thread_rng().gen_range(range.clone())
}
