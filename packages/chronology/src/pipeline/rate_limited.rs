//! Rate-limited LLM client wrapper.
//!
//! Wraps any LlmClient with a token-bucket limiter from the governor crate,
//! so bursts of concurrent exhibits don't trip provider throttling.

use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use nonzero_ext::nonzero;
use std::num::NonZeroU32;
use std::sync::Arc;

use crate::error::LlmResult;
use crate::traits::llm::{LlmClient, LlmRequest};

type DefaultRateLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// An LLM client wrapper that enforces a request rate.
pub struct RateLimitedLlm<C: LlmClient> {
    inner: C,
    limiter: Arc<DefaultRateLimiter>,
}

impl<C: LlmClient> RateLimitedLlm<C> {
    /// Create a new rate-limited client. A zero rate is treated as 1/s.
    pub fn new(client: C, requests_per_second: u32) -> Self {
        Self::with_quota(client, Quota::per_second(non_zero(requests_per_second)))
    }

    /// Create with burst support.
    pub fn with_burst(client: C, requests_per_second: u32, burst: u32) -> Self {
        let quota =
            Quota::per_second(non_zero(requests_per_second)).allow_burst(non_zero(burst));
        Self::with_quota(client, quota)
    }

    pub fn with_quota(client: C, quota: Quota) -> Self {
        Self {
            inner: client,
            limiter: Arc::new(RateLimiter::direct(quota)),
        }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    async fn wait_for_permit(&self) {
        self.limiter.until_ready().await;
    }
}

fn non_zero(value: u32) -> NonZeroU32 {
    NonZeroU32::new(value).unwrap_or(nonzero!(1u32))
}

#[async_trait]
impl<C: LlmClient> LlmClient for RateLimitedLlm<C> {
    async fn generate(&self, request: &LlmRequest) -> LlmResult<String> {
        self.wait_for_permit().await;
        self.inner.generate(request).await
    }

    async fn generate_with_vision(
        &self,
        request: &LlmRequest,
        images: &[Vec<u8>],
    ) -> LlmResult<String> {
        self.wait_for_permit().await;
        self.inner.generate_with_vision(request, images).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockLlm;
    use std::time::Instant;

    #[tokio::test]
    async fn test_rate_limiting() {
        let mock = MockLlm::new().with_default_response("[]");
        // 2 requests per second
        let client = RateLimitedLlm::new(mock.clone(), 2);
        let request = LlmRequest::new("prompt", &Default::default());

        let start = Instant::now();
        for _ in 0..3 {
            client.generate(&request).await.unwrap();
        }
        let elapsed = start.elapsed();

        assert_eq!(mock.calls().len(), 3);
        // First is immediate, 2nd and 3rd wait
        assert!(elapsed.as_millis() >= 500, "Rate limiting not working: {:?}", elapsed);
    }

    #[tokio::test]
    async fn test_zero_rate_does_not_panic() {
        let client = RateLimitedLlm::with_burst(MockLlm::new(), 0, 0);
        assert!(client.inner().calls().is_empty());
    }
}
