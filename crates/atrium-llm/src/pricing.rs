use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use atrium_core::TokenUsage;

use crate::client::LlmClient;

/// How long fetched pricing stays valid.
const PRICING_CACHE_TTL: Duration = Duration::from_secs(86_400);

/// USD per 1M tokens for one model.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModelPricing {
    pub prompt: f64,
    pub completion: f64,
}

struct CacheState {
    fetched_at: Instant,
    prices: HashMap<String, ModelPricing>,
}

/// Process-wide pricing cache, refreshed from the provider's model catalogue
/// at most once per 24 h. Lookup failures degrade to zero cost rather than
/// blocking the response.
#[derive(Default)]
pub struct PricingCache {
    state: Mutex<Option<CacheState>>,
}

impl PricingCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pricing for `model`, refreshing the cache when stale.
    pub async fn model_pricing(&self, client: &LlmClient, model: &str) -> ModelPricing {
        if let Some(pricing) = self.cached(model) {
            return pricing;
        }

        match client.list_models().await {
            Ok(models) => {
                let prices: HashMap<String, ModelPricing> = models
                    .into_iter()
                    .map(|m| {
                        (
                            m.id,
                            ModelPricing {
                                prompt: m.pricing_prompt,
                                completion: m.pricing_completion,
                            },
                        )
                    })
                    .collect();
                debug!(models = prices.len(), "pricing cache refreshed");

                let pricing = prices.get(model).copied().unwrap_or_default();
                let mut state = self.state.lock().unwrap();
                *state = Some(CacheState {
                    fetched_at: Instant::now(),
                    prices,
                });
                pricing
            }
            Err(e) => {
                warn!(error = %e, "pricing refresh failed; using zero cost");
                // A stale entry beats zero when we have one.
                self.stale(model).unwrap_or_default()
            }
        }
    }

    fn cached(&self, model: &str) -> Option<ModelPricing> {
        let state = self.state.lock().unwrap();
        let state = state.as_ref()?;
        if state.fetched_at.elapsed() > PRICING_CACHE_TTL {
            return None;
        }
        Some(state.prices.get(model).copied().unwrap_or_default())
    }

    fn stale(&self, model: &str) -> Option<ModelPricing> {
        let state = self.state.lock().unwrap();
        state.as_ref().and_then(|s| s.prices.get(model).copied())
    }
}

/// `cost = prompt × price_prompt/1M + completion × price_completion/1M`,
/// rounded to 6 decimal places.
pub fn compute_cost(usage: TokenUsage, pricing: ModelPricing) -> f64 {
    let cost = (usage.prompt_tokens as f64 / 1_000_000.0) * pricing.prompt
        + (usage.completion_tokens as f64 / 1_000_000.0) * pricing.completion;
    (cost * 1_000_000.0).round() / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cost_is_rounded_to_six_decimals() {
        let pricing = ModelPricing {
            prompt: 3.0,
            completion: 15.0,
        };
        // 1000 prompt + 500 completion => 0.003 + 0.0075 = 0.0105
        let cost = compute_cost(TokenUsage::new(1000, 500), pricing);
        assert!((cost - 0.0105).abs() < 1e-9);

        // 1 prompt token at $3/M => 0.000003
        let cost = compute_cost(TokenUsage::new(1, 0), pricing);
        assert!((cost - 0.000003).abs() < 1e-12);
    }

    #[test]
    fn zero_pricing_yields_zero_cost() {
        let cost = compute_cost(TokenUsage::new(5000, 5000), ModelPricing::default());
        assert_eq!(cost, 0.0);
    }
}
