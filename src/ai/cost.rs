//! Cost estimation from reported token usage.
//!
//! Prices are USD per 1000 tokens. Pure functions only: nothing here touches
//! the relay.

use serde::Serialize;
use std::collections::HashMap;
use tracing::warn;

use crate::core::models::UsageRecord;

/// Model used for pricing when the requested one is unknown.
pub const FALLBACK_PRICING_MODEL: &str = "gpt-4o-mini";

const DEFAULT_PRICING: &[(&str, f64)] = &[
    ("gpt-4o-mini", 0.0015),
    ("gpt-4o", 0.03),
    ("gpt-3.5-turbo", 0.002),
];

#[derive(Debug, Clone, PartialEq)]
pub struct ModelPricing {
    per_1k: HashMap<String, f64>,
}

impl Default for ModelPricing {
    fn default() -> Self {
        Self {
            per_1k: DEFAULT_PRICING
                .iter()
                .map(|(model, price)| ((*model).to_string(), *price))
                .collect(),
        }
    }
}

impl ModelPricing {
    /// Default table with `raw` (a JSON object of model → price) merged over it.
    ///
    /// Invalid JSON is logged and ignored.
    #[must_use]
    pub fn from_override_json(raw: Option<&str>) -> Self {
        let mut pricing = Self::default();
        let Some(raw) = raw else {
            return pricing;
        };

        match serde_json::from_str::<HashMap<String, f64>>(raw) {
            Ok(overrides) => pricing.per_1k.extend(overrides),
            Err(e) => warn!(error = %e, "Failed to parse MODEL_PRICING; using defaults"),
        }
        pricing
    }

    /// Price for `model`, falling back to the default model, then zero.
    #[must_use]
    pub fn price_per_1k(&self, model: &str) -> f64 {
        self.per_1k
            .get(model)
            .or_else(|| self.per_1k.get(FALLBACK_PRICING_MODEL))
            .copied()
            .unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CostBreakdown {
    #[serde(rename = "pricePer1k")]
    pub price_per_1k: f64,
    pub tokens: u64,
    pub cost: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CostEstimate {
    pub cost: f64,
    pub breakdown: CostBreakdown,
}

#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn estimate_cost(pricing: &ModelPricing, usage: Option<&UsageRecord>, model: &str) -> CostEstimate {
    let price_per_1k = pricing.price_per_1k(model);
    let tokens = usage.map_or(0, UsageRecord::tokens);
    let cost = (tokens as f64 / 1000.0) * price_per_1k;

    CostEstimate {
        cost,
        breakdown: CostBreakdown {
            price_per_1k,
            tokens,
            cost,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage(total: u64) -> UsageRecord {
        UsageRecord {
            total_tokens: Some(total),
            ..UsageRecord::default()
        }
    }

    #[test]
    fn known_model_price() {
        let estimate = estimate_cost(&ModelPricing::default(), Some(&usage(2000)), "gpt-4o");
        assert!((estimate.cost - 0.06).abs() < 1e-12);
        assert_eq!(estimate.breakdown.tokens, 2000);
        assert!((estimate.breakdown.price_per_1k - 0.03).abs() < f64::EPSILON);
    }

    #[test]
    fn unknown_model_uses_fallback_price() {
        let pricing = ModelPricing::default();
        assert!((pricing.price_per_1k("mystery") - 0.0015).abs() < f64::EPSILON);
    }

    #[test]
    fn missing_usage_costs_nothing() {
        let estimate = estimate_cost(&ModelPricing::default(), None, "gpt-4o");
        assert_eq!(estimate.breakdown.tokens, 0);
        assert!(estimate.cost.abs() < f64::EPSILON);
    }

    #[test]
    fn override_merges_over_defaults() {
        let pricing = ModelPricing::from_override_json(Some(r#"{"gpt-4o":0.01,"o1":0.06}"#));
        assert!((pricing.price_per_1k("gpt-4o") - 0.01).abs() < f64::EPSILON);
        assert!((pricing.price_per_1k("o1") - 0.06).abs() < f64::EPSILON);
        assert!((pricing.price_per_1k("gpt-3.5-turbo") - 0.002).abs() < f64::EPSILON);
    }

    #[test]
    fn invalid_override_is_ignored() {
        let pricing = ModelPricing::from_override_json(Some("{not json"));
        assert_eq!(pricing, ModelPricing::default());
    }

    #[test]
    fn breakdown_serializes_like_the_wire_format() {
        let estimate = estimate_cost(&ModelPricing::default(), Some(&usage(1000)), "gpt-3.5-turbo");
        let json = serde_json::to_value(estimate).unwrap();
        assert_eq!(json["breakdown"]["pricePer1k"], 0.002);
        assert_eq!(json["breakdown"]["tokens"], 1000);
    }
}
