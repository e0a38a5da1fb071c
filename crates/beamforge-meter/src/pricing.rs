//! Illustrative pricing table so `estimated_cost` and
//! `optimization_suggestions` are exercisable without external config
//!. Operators can override via [`PricingTable::from_json`].

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Rate {
    pub input_price: f64,
    pub output_price: f64,
}

/// A cheaper model the optimizer can suggest in place of `model`, with the
/// user-facing rationale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderPricing {
    pub model: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingTable {
    /// `(provider, model) -> rate`
    rates: HashMap<String, HashMap<String, Rate>>,
    /// `(provider, expensive_model) -> cheaper tier`
    cheaper_tiers: HashMap<String, HashMap<String, ProviderPricing>>,
}

const DEFAULT_RATE: Rate = Rate {
    input_price: 0.000_005,
    output_price: 0.000_015,
};

impl PricingTable {
    pub fn default_table() -> Self {
        let mut rates: HashMap<String, HashMap<String, Rate>> = HashMap::new();
        rates.insert(
            "openai".into(),
            HashMap::from([
                (
                    "gpt-4o".into(),
                    Rate {
                        input_price: 0.000_005,
                        output_price: 0.000_015,
                    },
                ),
                (
                    "gpt-4o-mini".into(),
                    Rate {
                        input_price: 0.000_000_15,
                        output_price: 0.000_000_6,
                    },
                ),
            ]),
        );
        rates.insert(
            "anthropic".into(),
            HashMap::from([
                (
                    "claude-opus".into(),
                    Rate {
                        input_price: 0.000_015,
                        output_price: 0.000_075,
                    },
                ),
                (
                    "claude-haiku".into(),
                    Rate {
                        input_price: 0.000_000_25,
                        output_price: 0.000_001_25,
                    },
                ),
            ]),
        );

        let mut cheaper_tiers: HashMap<String, HashMap<String, ProviderPricing>> = HashMap::new();
        cheaper_tiers.insert(
            "openai".into(),
            HashMap::from([(
                "gpt-4o".into(),
                ProviderPricing {
                    model: "gpt-4o-mini".into(),
                    reason: "gpt-4o-mini matches this operation's quality bar at a fraction \
                             of the cost for prompt-refinement workloads"
                        .into(),
                },
            )]),
        );
        cheaper_tiers.insert(
            "anthropic".into(),
            HashMap::from([(
                "claude-opus".into(),
                ProviderPricing {
                    model: "claude-haiku".into(),
                    reason: "claude-haiku is sufficient for short critique/ranking calls".into(),
                },
            )]),
        );

        Self {
            rates,
            cheaper_tiers,
        }
    }

    pub fn rate_for(&self, provider: &str, model: &Option<String>) -> Rate {
        let model = model.as_deref().unwrap_or("");
        self.rates
            .get(provider)
            .and_then(|models| models.get(model))
            .copied()
            .unwrap_or(DEFAULT_RATE)
    }

    pub fn cheaper_capable_tier(&self, provider: &str, model: &str) -> Option<&ProviderPricing> {
        self.cheaper_tiers.get(provider).and_then(|m| m.get(model))
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

impl Default for PricingTable {
    fn default() -> Self {
        Self::default_table()
    }
}
