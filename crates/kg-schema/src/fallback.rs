//! The Tier 1 -> 2 -> 3 fallback combinator (spec §4.3 "Fallback chain").
//! Grounded structurally on `codegraph_ai::llm_factory::LLMProviderFactory`'s
//! ordered-provider-selection shape, per Design Note §9: "the fallback
//! chain is an ordered list of `LlmBackend` with a shared
//! `try_all_then_default` combinator."

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use kg_core::error::Result;
use kg_core::traits::LlmBackend;

/// One rung of the chain: a backend, its own timeout (spec: "Each tier
/// has its own timeout"), and its fixed tier identity (spec §4.3/GLOSSARY:
/// primary=1, fallback=2, built-in default=3 — fixed regardless of which
/// tiers are actually present in a given chain).
pub struct Tier {
    pub backend: Arc<dyn LlmBackend>,
    pub timeout: Duration,
    pub tier_num: u8,
}

impl Tier {
    pub fn new(backend: Arc<dyn LlmBackend>, timeout: Duration, tier_num: u8) -> Self {
        Self { backend, timeout, tier_num }
    }
}

/// Dispatches `(system_prompt, user_prompt)` through `tiers` in order.
/// Short-circuiting: success at tier N returns immediately without
/// retrying tier N (spec: "tier advancement does not retry tier N").
/// `usable` decides whether a tier's raw response counts as success
/// (request error, non-2xx, JSON parse failure, and "empty nodes AND
/// empty edges" are all folded into this predicate by the caller).
///
/// The caller must ensure the last tier cannot itself be judged unusable
/// (spec: "Tier 3... Cannot fail; always returns a usable proposal"); if
/// every tier is exhausted without a usable result this returns
/// `LLMUnavailableError`, which should only be reachable if the caller
/// violates that contract.
pub async fn try_all_then_default<T>(
    tiers: &[Tier],
    system_prompt: &str,
    user_prompt: &str,
    usable: impl Fn(&str) -> Option<T>,
) -> Result<(String, u8, T)> {
    for tier in tiers.iter() {
        let tier_num = tier.tier_num;
        let outcome = tokio::time::timeout(tier.timeout, tier.backend.complete(system_prompt, user_prompt)).await;

        let raw = match outcome {
            Ok(Ok(raw)) => raw,
            Ok(Err(err)) => {
                warn!(tier = tier_num, backend = tier.backend.name(), error = %err, "tier failed, advancing");
                continue;
            }
            Err(_) => {
                warn!(tier = tier_num, backend = tier.backend.name(), "tier timed out, advancing");
                continue;
            }
        };

        match usable(&raw) {
            Some(parsed) => return Ok((raw, tier_num, parsed)),
            None => {
                warn!(tier = tier_num, backend = tier.backend.name(), "tier produced an unusable response, advancing");
            }
        }
    }

    Err(kg_core::error::CoreError::LLMUnavailableError(
        "all tiers in the fallback chain were exhausted without a usable response".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakyBackend {
        name: &'static str,
        fails: bool,
    }

    #[async_trait]
    impl LlmBackend for FlakyBackend {
        async fn complete(&self, _system_prompt: &str, _user_prompt: &str) -> Result<String> {
            if self.fails {
                Err(kg_core::error::CoreError::LLMUnavailableError("boom".into()))
            } else {
                Ok("ok".to_string())
            }
        }
        fn name(&self) -> &str {
            self.name
        }
    }

    #[tokio::test]
    async fn short_circuits_on_first_success() {
        let calls = Arc::new(AtomicUsize::new(0));
        struct Counting(Arc<AtomicUsize>);
        #[async_trait]
        impl LlmBackend for Counting {
            async fn complete(&self, _s: &str, _u: &str) -> Result<String> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok("tier1".to_string())
            }
            fn name(&self) -> &str {
                "counting"
            }
        }
        let tiers = vec![
            Tier::new(Arc::new(Counting(calls.clone())), Duration::from_secs(1), 1),
            Tier::new(Arc::new(FlakyBackend { name: "tier2", fails: false }), Duration::from_secs(1), 2),
        ];
        let (raw, tier_num, _) = try_all_then_default(&tiers, "sys", "usr", |s| Some(s.to_string()))
            .await
            .unwrap();
        assert_eq!(raw, "tier1");
        assert_eq!(tier_num, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn advances_past_failing_tiers() {
        let tiers = vec![
            Tier::new(Arc::new(FlakyBackend { name: "tier1", fails: true }), Duration::from_secs(1), 1),
            Tier::new(Arc::new(FlakyBackend { name: "tier2", fails: false }), Duration::from_secs(1), 2),
        ];
        let (raw, tier_num, _) = try_all_then_default(&tiers, "sys", "usr", |s| Some(s.to_string()))
            .await
            .unwrap();
        assert_eq!(raw, "ok");
        assert_eq!(tier_num, 2);
    }

    #[tokio::test]
    async fn unusable_response_advances_to_next_tier() {
        let tiers = vec![
            Tier::new(Arc::new(FlakyBackend { name: "tier1", fails: false }), Duration::from_secs(1), 1),
            Tier::new(Arc::new(FlakyBackend { name: "tier2", fails: false }), Duration::from_secs(1), 2),
        ];
        let call = std::cell::Cell::new(0);
        let (_, tier_num, _) = try_all_then_default(&tiers, "sys", "usr", |_s| {
            call.set(call.get() + 1);
            if call.get() == 1 {
                None
            } else {
                Some(())
            }
        })
        .await
        .unwrap();
        assert_eq!(tier_num, 2);
    }
}
