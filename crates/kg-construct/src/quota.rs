//! Per-endpoint rate limiting (spec §5 "the constructor must respect a
//! configurable per-second quota per endpoint, enforced with a token-bucket
//! limiter"). `governor` is already in the teacher's workspace dependency
//! table (used there to throttle MCP server requests); this wraps one
//! `governor::RateLimiter` per external endpoint kind.

use std::num::NonZeroU32;
use std::sync::Arc;

use governor::clock::DefaultClock;
use governor::state::direct::NotKeyed;
use governor::state::InMemoryState;
use governor::{Quota, RateLimiter};

type Limiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// A single token-bucket limiter for one external endpoint.
#[derive(Clone)]
pub struct TokenBucket {
    limiter: Arc<Limiter>,
}

impl TokenBucket {
    /// `per_second` requests per second, refilled continuously.
    pub fn new(per_second: u32) -> Self {
        let quota = Quota::per_second(NonZeroU32::new(per_second.max(1)).unwrap());
        Self {
            limiter: Arc::new(RateLimiter::direct(quota)),
        }
    }

    /// Suspends the caller until a token is available (spec §5 "Suspension
    /// points": the embedder/NER/LLM call is a logical suspension point).
    pub async fn acquire(&self) {
        self.limiter.until_ready().await;
    }
}

/// One bucket per external collaborator kind used by Stage B (spec §5
/// "LLM / NER / embedder endpoints... rate-limited externally").
#[derive(Clone)]
pub struct EndpointQuotas {
    pub llm: TokenBucket,
    pub ner: TokenBucket,
    pub embedder: TokenBucket,
}

impl EndpointQuotas {
    pub fn new(llm_per_second: u32, ner_per_second: u32, embedder_per_second: u32) -> Self {
        Self {
            llm: TokenBucket::new(llm_per_second),
            ner: TokenBucket::new(ner_per_second),
            embedder: TokenBucket::new(embedder_per_second),
        }
    }
}

impl Default for EndpointQuotas {
    fn default() -> Self {
        Self::new(5, 10, 20)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_resolves_under_quota() {
        let bucket = TokenBucket::new(100);
        bucket.acquire().await;
        bucket.acquire().await;
    }
}
