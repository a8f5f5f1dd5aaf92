pub mod fallback;
pub mod induce;
pub mod json;
pub mod llm;

pub use fallback::{try_all_then_default, Tier};
pub use induce::{induce_schemas, ProposalResult, RejectedSchema};
pub use llm::{DefaultOntologyBackend, HttpLlmBackend};

use std::sync::Arc;

use kg_core::config::SystemConfig;

/// Assembles the fallback chain from `cfg` (spec §6 "absence of
/// `LLM_PRIMARY_URL`/`LLM_FALLBACK_URL` narrows the chain"); the built-in
/// default backend is always appended last so the chain can never be
/// exhausted without a usable proposal.
pub fn tiers_from_config(cfg: &SystemConfig) -> Vec<Tier> {
    let mut tiers = Vec::new();

    if let Some(url) = &cfg.llm.primary_url {
        let key = cfg.llm.primary_key.as_ref().map(|s| {
            use secrecy::ExposeSecret;
            s.expose_secret().to_string()
        });
        let model = cfg.llm.primary_model.clone().unwrap_or_else(|| "gpt-4o-mini".to_string());
        if let Ok(backend) = HttpLlmBackend::new(
            "llm-primary",
            url.clone(),
            key,
            model,
            std::time::Duration::from_secs(cfg.timeouts.tier1_secs),
        ) {
            tiers.push(Tier::new(Arc::new(backend), std::time::Duration::from_secs(cfg.timeouts.tier1_secs), 1));
        }
    }

    if let Some(url) = &cfg.llm.fallback_url {
        let key = cfg.llm.fallback_key.as_ref().map(|s| {
            use secrecy::ExposeSecret;
            s.expose_secret().to_string()
        });
        if let Ok(backend) = HttpLlmBackend::new(
            "llm-fallback",
            url.clone(),
            key,
            cfg.llm.primary_model.clone().unwrap_or_else(|| "gpt-4o-mini".to_string()),
            std::time::Duration::from_secs(cfg.timeouts.tier2_secs),
        ) {
            tiers.push(Tier::new(Arc::new(backend), std::time::Duration::from_secs(cfg.timeouts.tier2_secs), 2));
        }
    }

    tiers.push(Tier::new(Arc::new(DefaultOntologyBackend), std::time::Duration::from_secs(1), 3));
    tiers
}
