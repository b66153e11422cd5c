//! Rate-limited extractor wrapper.
//!
//! Wraps any Extractor implementation with a request quota using the
//! governor crate.

use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;

use crate::error::ExtractionError;
use crate::schema::SchemaSpec;
use crate::traits::extractor::Extractor;
use crate::types::request::ExtractionRequest;
use crate::types::result::ExtractionResult;

type DefaultRateLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

fn non_zero(n: u32) -> NonZeroU32 {
    NonZeroU32::new(n).unwrap_or(NonZeroU32::MIN)
}

/// An extractor wrapper that waits for a permit before every call.
///
/// The limiter is shared by clones, so one quota can cover several
/// orchestrators talking to the same provider account.
#[derive(Clone)]
pub struct RateLimitedExtractor<E: Extractor> {
    inner: E,
    limiter: Arc<DefaultRateLimiter>,
}

impl<E: Extractor> RateLimitedExtractor<E> {
    /// Allow `requests_per_second` calls per second (zero is treated as one).
    pub fn new(extractor: E, requests_per_second: u32) -> Self {
        Self::with_quota(extractor, Quota::per_second(non_zero(requests_per_second)))
    }

    /// Create with a custom quota.
    pub fn with_quota(extractor: E, quota: Quota) -> Self {
        Self {
            inner: extractor,
            limiter: Arc::new(RateLimiter::direct(quota)),
        }
    }

    /// Sustained `requests_per_second` with up to `burst` calls at once.
    pub fn with_burst(extractor: E, requests_per_second: u32, burst: u32) -> Self {
        let quota = Quota::per_second(non_zero(requests_per_second)).allow_burst(non_zero(burst));
        Self::with_quota(extractor, quota)
    }

    pub fn inner(&self) -> &E {
        &self.inner
    }
}

#[async_trait]
impl<E: Extractor> Extractor for RateLimitedExtractor<E> {
    fn id(&self) -> &str {
        self.inner.id()
    }

    fn max_content_bytes(&self) -> Option<usize> {
        self.inner.max_content_bytes()
    }

    async fn extract(
        &self,
        request: &ExtractionRequest,
        schema: &SchemaSpec,
    ) -> Result<ExtractionResult, ExtractionError> {
        self.limiter.until_ready().await;
        self.inner.extract(request, schema).await
    }
}

/// Extension methods for any extractor.
pub trait ExtractorExt: Extractor + Sized {
    /// Wrap with a per-second request quota.
    fn rate_limited(self, requests_per_second: u32) -> RateLimitedExtractor<Self> {
        RateLimitedExtractor::new(self, requests_per_second)
    }

    /// Wrap with a per-second quota and burst allowance.
    fn rate_limited_with_burst(self, requests_per_second: u32, burst: u32) -> RateLimitedExtractor<Self> {
        RateLimitedExtractor::with_burst(self, requests_per_second, burst)
    }
}

impl<E: Extractor> ExtractorExt for E {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldSpec, FieldType};
    use crate::testing::MockExtractor;
    use crate::types::request::{DocumentContent, EffortLevel};
    use std::time::{Duration, Instant};

    #[tokio::test]
    async fn test_delegates_identity_and_calls() {
        let limited = MockExtractor::new("primary").with_max_content_bytes(64).rate_limited(100);
        assert_eq!(limited.id(), "primary");
        assert_eq!(limited.max_content_bytes(), Some(64));

        let schema = SchemaSpec::new("note").with_field("title", FieldSpec::new(FieldType::String));
        let request =
            ExtractionRequest::new("a", DocumentContent::text("hi"), "note", EffortLevel::Low).unwrap();
        limited.extract(&request, &schema).await.unwrap();
        assert_eq!(limited.inner().call_count(), 1);
    }

    #[tokio::test]
    async fn test_quota_spaces_calls() {
        let limited = MockExtractor::new("primary").rate_limited_with_burst(10, 1);
        let schema = SchemaSpec::new("note").with_field("title", FieldSpec::new(FieldType::String));
        let request =
            ExtractionRequest::new("a", DocumentContent::text("hi"), "note", EffortLevel::Low).unwrap();

        let started = Instant::now();
        for _ in 0..3 {
            limited.extract(&request, &schema).await.unwrap();
        }
        // First permit is immediate, the next two wait ~100ms each.
        assert!(started.elapsed() >= Duration::from_millis(150));
    }
}
