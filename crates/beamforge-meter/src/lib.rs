//! Session-scoped token/cost meter. Wrapped around every
//! provider call; observable concurrently via read-only [`Meter::stats`]
//! so the worker can emit running totals in every iteration event.

mod pricing;

pub use pricing::{PricingTable, ProviderPricing};

use std::collections::HashMap;
use std::sync::Arc;

use beamforge_core::domain::TokenUsageMetadata;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// One recorded provider call, splitting `tokens` into input/output for
/// cost math, which needs both; when a provider only reports a combined
/// total it is recorded as `input_tokens` with `output_tokens = 0` and
/// [`Meter::estimated_cost`] falls back to the input price.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageEntry {
    pub provider: String,
    pub operation: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub metadata: TokenUsageMetadata,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone)]
pub struct RecordArgs {
    pub provider: String,
    pub operation: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub metadata: TokenUsageMetadata,
}

/// Aggregated totals returned by [`Meter::stats`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MeterStats {
    pub total_tokens: u64,
    pub by_provider: HashMap<String, u64>,
    pub by_operation: HashMap<String, u64>,
    pub by_iteration: HashMap<u32, u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderCost {
    pub provider: String,
    pub dollars: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EstimatedCost {
    pub per_provider: Vec<ProviderCost>,
    pub total: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationSuggestion {
    pub provider: String,
    pub operation: String,
    pub current_model: String,
    pub suggested_model: String,
    pub potential_savings: f64,
    pub reason: String,
}

/// Snapshot used for the `tokens.json` session-store artifact and for
/// `Meter::from_snapshot` round-trips.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MeterSnapshot {
    pub entries: Vec<UsageEntry>,
}

#[derive(Debug, Default)]
struct MeterInner {
    entries: Vec<UsageEntry>,
}

/// `record()` is called by wrappers around every provider call; `stats()`
/// is read-only and safe to call concurrently with in-flight recording.
#[derive(Clone)]
pub struct Meter {
    inner: Arc<RwLock<MeterInner>>,
}

impl Default for Meter {
    fn default() -> Self {
        Self::new()
    }
}

impl Meter {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(MeterInner::default())),
        }
    }

    pub fn from_snapshot(snapshot: MeterSnapshot) -> Self {
        Self {
            inner: Arc::new(RwLock::new(MeterInner {
                entries: snapshot.entries,
            })),
        }
    }

    pub async fn record(&self, args: RecordArgs) {
        let entry = UsageEntry {
            provider: args.provider,
            operation: args.operation,
            input_tokens: args.input_tokens,
            output_tokens: args.output_tokens,
            metadata: args.metadata,
            timestamp: chrono::Utc::now(),
        };
        tracing::debug!(
            provider = %entry.provider,
            operation = %entry.operation,
            tokens = entry.input_tokens + entry.output_tokens,
            "recorded token usage"
        );
        self.inner.write().await.entries.push(entry);
    }

    pub async fn stats(&self) -> MeterStats {
        let inner = self.inner.read().await;
        let mut stats = MeterStats::default();
        for entry in &inner.entries {
            let tokens = entry.input_tokens + entry.output_tokens;
            stats.total_tokens += tokens;
            *stats.by_provider.entry(entry.provider.clone()).or_default() += tokens;
            *stats
                .by_operation
                .entry(entry.operation.clone())
                .or_default() += tokens;
            if let Some(iteration) = entry.metadata.iteration {
                *stats.by_iteration.entry(iteration).or_default() += tokens;
            }
        }
        stats
    }

    /// `Σ(inputTokens·inputPrice + outputTokens·outputPrice)`; when only a
    /// combined total is known (`output_tokens == 0`), the input price
    /// approximates the whole call.
    pub async fn estimated_cost(&self, pricing: &PricingTable) -> EstimatedCost {
        let inner = self.inner.read().await;
        let mut per_provider: HashMap<String, f64> = HashMap::new();
        for entry in &inner.entries {
            let rate = pricing.rate_for(&entry.provider, &entry.metadata.model);
            let dollars = entry.input_tokens as f64 * rate.input_price
                + entry.output_tokens as f64 * rate.output_price;
            *per_provider.entry(entry.provider.clone()).or_default() += dollars;
        }
        let total = per_provider.values().sum();
        let mut per_provider: Vec<ProviderCost> = per_provider
            .into_iter()
            .map(|(provider, dollars)| ProviderCost { provider, dollars })
            .collect();
        per_provider.sort_by(|a, b| a.provider.cmp(&b.provider));
        EstimatedCost { per_provider, total }
    }

    /// For each (provider, operation) using a model for which a cheaper
    /// tier with adequate capability exists, one suggestion — sorted
    /// descending by potential savings.
    pub async fn optimization_suggestions(
        &self,
        pricing: &PricingTable,
    ) -> Vec<OptimizationSuggestion> {
        let inner = self.inner.read().await;
        let mut by_key: HashMap<(String, String, String), u64> = HashMap::new();
        for entry in &inner.entries {
            let model = entry
                .metadata
                .model
                .clone()
                .unwrap_or_else(|| "unknown".to_string());
            let key = (entry.provider.clone(), entry.operation.clone(), model);
            *by_key.entry(key).or_default() += entry.input_tokens + entry.output_tokens;
        }

        let mut suggestions: Vec<OptimizationSuggestion> = Vec::new();
        for ((provider, operation, current_model), tokens) in by_key {
            if let Some(cheaper) = pricing.cheaper_capable_tier(&provider, &current_model) {
                let current_rate = pricing.rate_for(&provider, &Some(current_model.clone()));
                let cheaper_rate = pricing.rate_for(&provider, &Some(cheaper.model.clone()));
                let current_cost = tokens as f64 * current_rate.input_price;
                let cheaper_cost = tokens as f64 * cheaper_rate.input_price;
                let potential_savings = current_cost - cheaper_cost;
                if potential_savings > 0.0 {
                    suggestions.push(OptimizationSuggestion {
                        provider: provider.clone(),
                        operation: operation.clone(),
                        current_model: current_model.clone(),
                        suggested_model: cheaper.model.clone(),
                        potential_savings,
                        reason: cheaper.reason.clone(),
                    });
                }
            }
        }
        suggestions.sort_by(|a, b| {
            b.potential_savings
                .partial_cmp(&a.potential_savings)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        suggestions
    }

    pub async fn snapshot(&self) -> MeterSnapshot {
        MeterSnapshot {
            entries: self.inner.read().await.entries.clone(),
        }
    }

    pub async fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.snapshot().await)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        let snapshot: MeterSnapshot = serde_json::from_str(json)?;
        Ok(Self::from_snapshot(snapshot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beamforge_core::domain::Dimension;

    fn meta(iteration: u32, model: &str) -> TokenUsageMetadata {
        TokenUsageMetadata {
            iteration: Some(iteration),
            candidate_id: None,
            model: Some(model.to_string()),
            dimension: Some(Dimension::What),
        }
    }

    #[tokio::test]
    async fn stats_aggregate_by_provider_operation_iteration() {
        let meter = Meter::new();
        meter
            .record(RecordArgs {
                provider: "openai".into(),
                operation: "refine".into(),
                input_tokens: 100,
                output_tokens: 50,
                metadata: meta(0, "gpt-4o"),
            })
            .await;
        meter
            .record(RecordArgs {
                provider: "openai".into(),
                operation: "refine".into(),
                input_tokens: 10,
                output_tokens: 5,
                metadata: meta(1, "gpt-4o"),
            })
            .await;
        let stats = meter.stats().await;
        assert_eq!(stats.total_tokens, 165);
        assert_eq!(stats.by_provider["openai"], 165);
        assert_eq!(stats.by_operation["refine"], 165);
        assert_eq!(stats.by_iteration[&0], 150);
        assert_eq!(stats.by_iteration[&1], 15);
    }

    #[tokio::test]
    async fn json_round_trip_preserves_stats_exactly() {
        let meter = Meter::new();
        meter
            .record(RecordArgs {
                provider: "openai".into(),
                operation: "refine".into(),
                input_tokens: 42,
                output_tokens: 8,
                metadata: meta(0, "gpt-4o"),
            })
            .await;
        let json = meter.to_json().await.unwrap();
        let restored = Meter::from_json(&json).unwrap();
        let original_stats = meter.stats().await;
        let restored_stats = restored.stats().await;
        assert_eq!(original_stats.total_tokens, restored_stats.total_tokens);
        assert_eq!(original_stats.by_provider, restored_stats.by_provider);
    }

    #[tokio::test]
    async fn optimization_suggestions_sorted_descending_by_savings() {
        let meter = Meter::new();
        meter
            .record(RecordArgs {
                provider: "openai".into(),
                operation: "refine".into(),
                input_tokens: 100_000,
                output_tokens: 0,
                metadata: meta(0, "gpt-4o"),
            })
            .await;
        meter
            .record(RecordArgs {
                provider: "openai".into(),
                operation: "combine".into(),
                input_tokens: 1_000,
                output_tokens: 0,
                metadata: meta(0, "gpt-4o"),
            })
            .await;
        let pricing = PricingTable::default_table();
        let suggestions = meter.optimization_suggestions(&pricing).await;
        assert!(!suggestions.is_empty());
        for pair in suggestions.windows(2) {
            assert!(pair[0].potential_savings >= pair[1].potential_savings);
        }
    }
}
