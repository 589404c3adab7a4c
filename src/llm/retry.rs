//! Bounded retry with exponential backoff, plus shared rate-limit state.
//!
//! When a provider returns 429, every caller of that provider backs off until
//! the recorded deadline. The state is owned by the [`ProviderRegistry`]
//! and passed in explicitly, so concurrent runs share it and tests can reset it.
//!
//! [`ProviderRegistry`]: super::ProviderRegistry

use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::client::{LlmClient, LlmError};
use super::types::{CompletionRequest, CompletionResponse};

/// Rate limit state shared by all callers of one provider.
#[derive(Debug, Default)]
pub struct RateLimitState {
    /// When we can resume API calls (None = no active limit).
    pub backoff_until: Option<Instant>,
    /// Number of consecutive rate limit hits.
    pub consecutive_hits: u32,
    /// Last successful API call time.
    pub last_success: Option<Instant>,
}

impl RateLimitState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if we are currently rate limited.
    pub fn is_rate_limited(&self) -> bool {
        self.backoff_until.map(|until| Instant::now() < until).unwrap_or(false)
    }

    /// Get remaining backoff duration if rate limited.
    pub fn remaining_backoff(&self) -> Option<Duration> {
        self.backoff_until.and_then(|until| {
            let now = Instant::now();
            if now < until { Some(until - now) } else { None }
        })
    }

    /// Record a rate limit response.
    ///
    /// The delay is the larger of the provider's retry_after and
    /// 2^consecutive_hits seconds (capped at 64s).
    pub fn record_rate_limit(&mut self, retry_after: Duration) {
        self.consecutive_hits += 1;

        let exp_backoff = Duration::from_secs(2u64.pow(self.consecutive_hits.min(6)));
        let delay = retry_after.max(exp_backoff);

        self.backoff_until = Some(Instant::now() + delay);

        tracing::warn!(
            retry_after_secs = delay.as_secs(),
            consecutive_hits = self.consecutive_hits,
            "Rate limited, backing off provider"
        );
    }

    /// Record a successful API call.
    pub fn record_success(&mut self) {
        self.consecutive_hits = 0;
        self.backoff_until = None;
        self.last_success = Some(Instant::now());
    }
}

/// Bounded exponential backoff policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first call
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles each time
    pub base_delay: Duration,
    /// Upper bound for a single delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            ..Default::default()
        }
    }

    /// Delay before the given attempt (attempt 0 has no delay)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32 << (attempt - 1).min(16);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Call `client.complete`, retrying transient errors under `policy`.
///
/// Rate-limit responses update `rate_limit` and the next attempt waits for
/// the shared backoff deadline. Non-retryable errors return immediately.
pub async fn complete_with_retry(
    client: &dyn LlmClient,
    request: &CompletionRequest,
    policy: &RetryPolicy,
    rate_limit: &Mutex<RateLimitState>,
) -> Result<CompletionResponse, LlmError> {
    let mut last_error = None;

    for attempt in 0..policy.max_attempts {
        let mut delay = policy.delay_for(attempt);
        if let Some(remaining) = rate_limit.lock().ok().and_then(|s| s.remaining_backoff()) {
            delay = delay.max(remaining.min(policy.max_delay));
        }
        if !delay.is_zero() {
            tracing::debug!(
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                provider = client.provider(),
                "Retrying model call after transient failure"
            );
            tokio::time::sleep(delay).await;
        }

        match client.complete(request.clone()).await {
            Ok(response) => {
                if let Ok(mut state) = rate_limit.lock() {
                    state.record_success();
                }
                return Ok(response);
            }
            Err(err) => {
                if let LlmError::RateLimited { retry_after } = &err
                    && let Ok(mut state) = rate_limit.lock()
                {
                    state.record_rate_limit(*retry_after);
                }
                if !err.is_retryable() {
                    return Err(err);
                }
                tracing::warn!(
                    attempt = attempt + 1,
                    max_attempts = policy.max_attempts,
                    error = %err,
                    "Transient model error"
                );
                last_error = Some(err);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| LlmError::InvalidResponse("no attempts were made".to_string())))
}
