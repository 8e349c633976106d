//! Exponential backoff for transient LLM failures.
//!
//! Throttling, service-unavailable and timeout errors are retried with
//! jittered exponential backoff. Everything else fails on first occurrence.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::{debug, warn};

use crate::error::{LlmError, LlmErrorKind, LlmResult};
use crate::traits::llm::{LlmClient, LlmRequest};
use crate::types::config::RetryConfig;

/// Provider error codes that mean "try again later".
const TRANSIENT_CODES: &[&str] = &[
    "ThrottlingException",
    "ServiceUnavailableException",
    "ModelTimeoutException",
    "TooManyRequestsException",
    "ModelNotReadyException",
    "rate_limit_exceeded",
    "overloaded_error",
];

/// Lowercase message fragments that indicate throttling.
const THROTTLE_TOKENS: &[&str] = &[
    "throttl",
    "rate limit",
    "rate exceeded",
    "too many requests",
    "capacity",
];

/// Retry policy for LLM calls.
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Whether an error is worth another attempt.
    pub fn is_retryable(error: &LlmError) -> bool {
        if matches!(
            error.kind,
            LlmErrorKind::Throttling | LlmErrorKind::ServiceUnavailable | LlmErrorKind::Timeout
        ) {
            return true;
        }

        if let Some(code) = &error.code {
            if TRANSIENT_CODES.contains(&code.as_str()) {
                return true;
            }
        }

        let message = error.message.to_lowercase();
        THROTTLE_TOKENS.iter().any(|t| message.contains(t))
    }

    /// Un-jittered delay for a zero-based retry attempt:
    /// `min(base * 2^attempt, max)`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.config
            .base_delay
            .saturating_mul(factor)
            .min(self.config.max_delay)
    }

    /// Backoff with up to 50% jitter added.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let jitter: f64 = rand::thread_rng().gen_range(0.0..0.5);
        self.backoff(attempt).mul_f64(1.0 + jitter)
    }

    /// Run `operation` until it succeeds, fails fatally, or retries run out.
    ///
    /// Makes at most `max_retries + 1` calls. On exhaustion the last error
    /// is returned.
    pub async fn execute<T, F, Fut>(&self, operation: &str, mut f: F) -> LlmResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = LlmResult<T>>,
    {
        let mut attempt = 0u32;
        loop {
            match f().await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(operation, attempt, "LLM call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if !Self::is_retryable(&e) => return Err(e),
                Err(e) if attempt >= self.config.max_retries => {
                    warn!(
                        operation,
                        attempts = attempt + 1,
                        error = %e,
                        "LLM retries exhausted"
                    );
                    return Err(e);
                }
                Err(e) => {
                    let delay = self.delay_for_attempt(attempt);
                    warn!(
                        operation,
                        attempt = attempt + 1,
                        max_retries = self.config.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient LLM error, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// LLM client wrapper that routes every call through a [`RetryPolicy`].
pub struct RetryingLlm<C: LlmClient> {
    inner: C,
    policy: RetryPolicy,
}

impl<C: LlmClient> RetryingLlm<C> {
    pub fn new(inner: C, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }
}

#[async_trait]
impl<C: LlmClient> LlmClient for RetryingLlm<C> {
    async fn generate(&self, request: &LlmRequest) -> LlmResult<String> {
        self.policy
            .execute("generate", || self.inner.generate(request))
            .await
    }

    async fn generate_with_vision(
        &self,
        request: &LlmRequest,
        images: &[Vec<u8>],
    ) -> LlmResult<String> {
        self.policy
            .execute("generate_with_vision", || {
                self.inner.generate_with_vision(request, images)
            })
            .await
    }
}

/// Extension trait for wrapping clients with retries.
pub trait LlmClientExt: LlmClient + Sized {
    fn with_retry(self, policy: RetryPolicy) -> RetryingLlm<Self> {
        RetryingLlm::new(self, policy)
    }
}

impl<C: LlmClient + Sized> LlmClientExt for C {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockLlm;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(RetryConfig::new(
            max_retries,
            Duration::from_millis(1),
            Duration::from_millis(5),
        ))
    }

    #[test]
    fn test_classification() {
        assert!(RetryPolicy::is_retryable(&LlmError::throttling("slow down")));
        assert!(RetryPolicy::is_retryable(&LlmError::unavailable("503")));
        assert!(RetryPolicy::is_retryable(&LlmError::timeout("deadline")));
        assert!(RetryPolicy::is_retryable(
            &LlmError::other("boom").with_code("ModelNotReadyException")
        ));
        assert!(RetryPolicy::is_retryable(&LlmError::other(
            "Rate limit reached for requests"
        )));
        assert!(RetryPolicy::is_retryable(&LlmError::other(
            "Model is at capacity"
        )));
        assert!(!RetryPolicy::is_retryable(&LlmError::invalid_request(
            "payload too large"
        )));
        assert!(!RetryPolicy::is_retryable(
            &LlmError::new(LlmErrorKind::Authentication, "bad key").with_code("invalid_api_key")
        ));
    }

    #[test]
    fn test_delays_are_capped() {
        let policy = RetryPolicy::new(RetryConfig::new(
            3,
            Duration::from_secs(1),
            Duration::from_secs(60),
        ));

        assert_eq!(policy.backoff(0), Duration::from_secs(1));
        assert_eq!(policy.backoff(2), Duration::from_secs(4));
        assert_eq!(policy.backoff(10), Duration::from_secs(60));
        assert_eq!(policy.backoff(40), Duration::from_secs(60));

        for attempt in 0..3 {
            let delay = policy.delay_for_attempt(attempt);
            assert!(delay >= policy.backoff(attempt));
            assert!(delay <= Duration::from_secs(60));
        }
    }

    #[tokio::test]
    async fn test_exhaustion_bounds_calls() {
        let calls = AtomicU32::new(0);
        let result: LlmResult<()> = fast_policy(3)
            .execute("test", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(LlmError::throttling("slow down")) }
            })
            .await;

        assert_eq!(result.unwrap_err().kind, LlmErrorKind::Throttling);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_fatal_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: LlmResult<()> = fast_policy(5)
            .execute("test", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(LlmError::invalid_request("bad")) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_recovers_after_transient_errors() {
        let calls = AtomicU32::new(0);
        let result = fast_policy(5)
            .execute("test", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(LlmError::unavailable("busy"))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_retrying_llm_wrapper() {
        let mock = MockLlm::new()
            .then_error(LlmError::throttling("429"))
            .then_respond("[]");
        let client = mock.clone().with_retry(fast_policy(2));

        let request = LlmRequest::new("prompt", &Default::default());
        assert_eq!(client.generate(&request).await.unwrap(), "[]");
        assert_eq!(mock.calls().len(), 2);
    }
}
