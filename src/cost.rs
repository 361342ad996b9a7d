/*!
 * Cost estimation and the pre-spend abort gate.
 *
 * Everything here is pure: the estimator never touches the network and
 * the gate decision depends only on the estimate and the threshold.
 */

use serde::Serialize;

use crate::app_config::{CostConfig, PricingMode};
use crate::providers::Translator;
use crate::segments::CanonicalUnit;

/// Projected spend for a set of units
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CostEstimate {
    pub word_count: usize,
    pub unit_count: usize,
    pub projected_cost: f64,
}

/// Outcome of comparing an estimate with the abort threshold
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum CostDecision {
    Allow,
    Abort { projected_cost: f64, threshold: f64 },
}

impl CostDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, CostDecision::Allow)
    }
}

/// Price model used for both the gate and per-batch charges
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CostModel {
    PerWord { rate: f64 },
    PerToken { tokens_per_word: f64, rate_per_1k_tokens: f64 },
    /// Defer to the translator's own pricing
    Provider,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostEstimator {
    model: CostModel,
}

impl CostEstimator {
    pub fn new(model: CostModel) -> Self {
        Self { model }
    }

    pub fn from_config(config: &CostConfig) -> Self {
        let model = match config.pricing {
            PricingMode::Provider => CostModel::Provider,
            PricingMode::PerWord => CostModel::PerWord {
                rate: config.rate_per_word,
            },
            PricingMode::PerToken => CostModel::PerToken {
                tokens_per_word: config.tokens_per_word,
                rate_per_1k_tokens: config.rate_per_1k_tokens,
            },
        };
        Self::new(model)
    }

    pub fn model(&self) -> CostModel {
        self.model
    }

    /// Cost of translating `words` words
    pub fn cost_for_words(&self, words: usize, translator: &dyn Translator) -> f64 {
        match self.model {
            CostModel::PerWord { rate } => words as f64 * rate,
            CostModel::PerToken {
                tokens_per_word,
                rate_per_1k_tokens,
            } => words as f64 * tokens_per_word / 1000.0 * rate_per_1k_tokens,
            CostModel::Provider => translator.estimate_cost(words),
        }
    }

    /// Estimate the cost of translating every unit once
    pub fn estimate(&self, units: &[CanonicalUnit], translator: &dyn Translator) -> CostEstimate {
        let word_count = units.iter().map(CanonicalUnit::word_count).sum();

        CostEstimate {
            word_count,
            unit_count: units.len(),
            projected_cost: if units.is_empty() {
                0.0
            } else {
                self.cost_for_words(word_count, translator)
            },
        }
    }

    /// Allow unless a threshold is set and the projection strictly exceeds it
    pub fn check(estimate: &CostEstimate, threshold: Option<f64>) -> CostDecision {
        match threshold {
            Some(threshold) if estimate.projected_cost > threshold => CostDecision::Abort {
                projected_cost: estimate.projected_cost,
                threshold,
            },
            _ => CostDecision::Allow,
        }
    }
}
