//! Bounded exponential backoff with jitter for transient LLM failures
//!
//! Non-retryable errors (4xx other than 429, schema violations) fail fast;
//! retryable errors are retried up to `max_attempts`, after which the last
//! error is surfaced to the caller.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::client::{ChatClient, ChatRequest, ChatResponse, LlmError};

/// Retry policy for transient provider errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Base delay before the first retry
    pub base_delay_ms: u64,
    /// Upper bound on any single delay
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `attempt` (1-based): exponential growth
    /// from the base, capped, with up to 25% additive jitter.
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay_ms
            .saturating_mul(1u64 << (attempt - 1).min(16));
        let capped = exp.min(self.max_delay_ms);
        let jitter = rand::thread_rng().gen_range(0..=capped / 4);
        Duration::from_millis((capped + jitter).min(self.max_delay_ms))
    }
}

/// Run a completion with a per-call timeout and bounded retries.
///
/// The timeout applies to each attempt individually. A rate-limit response
/// waits at least as long as the server's `retry-after` hint.
pub async fn complete_with_retries(
    client: &dyn ChatClient,
    request: &ChatRequest,
    retry: &RetryConfig,
    call_timeout: Duration,
) -> Result<ChatResponse, LlmError> {
    let mut attempt = 0;
    loop {
        attempt += 1;

        let result = match tokio::time::timeout(call_timeout, client.complete(request)).await {
            Ok(result) => result,
            Err(_) => Err(LlmError::Timeout(call_timeout)),
        };

        match result {
            Ok(response) => return Ok(response),
            Err(err) if attempt < retry.max_attempts && err.is_retryable() => {
                let mut delay = retry.delay_for_attempt(attempt);
                if let LlmError::RateLimited { retry_after_ms } = &err {
                    delay = delay.max(Duration::from_millis(*retry_after_ms));
                }
                tracing::warn!(
                    attempt,
                    max_attempts = retry.max_attempts,
                    error = %err,
                    "retrying LLM call in {:?}",
                    delay
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}
