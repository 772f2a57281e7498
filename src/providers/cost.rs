//! Cost calculation for LLM API requests.
//!
//! Maps token usage and per-model pricing to a cost breakdown. Pure: same
//! usage and pricing always produce the same result, no side effects.

use tracing::warn;

use super::catalog::{ModelCatalog, ModelConfig};
use super::types::{CostBreakdown, Usage};

/// Calculator for LLM API request costs.
pub struct CostCalculator {
    catalog: ModelCatalog,
}

impl CostCalculator {
    /// Create a cost calculator over the given model catalog.
    pub fn new(catalog: ModelCatalog) -> Self {
        Self { catalog }
    }

    /// Calculate the cost of a request based on usage and model.
    ///
    /// If the model is not in the catalog, returns a zero breakdown and logs
    /// a warning; unknown models never fail cost accounting.
    pub fn calculate(&self, model: &str, usage: &Usage) -> CostBreakdown {
        match self.catalog.get(model) {
            Some(config) => Self::calculate_with_config(config, usage),
            None => {
                warn!(model = %model, "No pricing for model, recording zero cost");
                CostBreakdown::default()
            }
        }
    }

    /// Calculate cost from a specific model configuration.
    pub fn calculate_with_config(config: &ModelConfig, usage: &Usage) -> CostBreakdown {
        let input_cost =
            (f64::from(usage.prompt_tokens) / 1000.0) * config.cost_per_1k_input_tokens;
        let output_cost =
            (f64::from(usage.completion_tokens) / 1000.0) * config.cost_per_1k_output_tokens;

        CostBreakdown {
            input_cost,
            output_cost,
            total_cost: input_cost + output_cost,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------


// ---------------------------------------------------------------------------
// Property-based tests
// ---------------------------------------------------------------------------
