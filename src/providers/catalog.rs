//! Model configuration catalog.
//!
//! Static per-model configuration: owning provider, context limits, pricing
//! (USD per 1k tokens), and default sampling parameters. Loaded once at
//! startup and read-only thereafter; looked up by model id on every request.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Configuration for a single model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Model identifier (e.g., "gpt-4").
    pub model: String,
    /// Owning provider identifier (e.g., "openai", "anthropic", "gemini").
    pub provider: String,
    /// Maximum context window in tokens.
    pub context_window: u32,
    /// Maximum output tokens per request.
    pub max_output_tokens: u32,
    /// Cost per 1k input tokens in USD.
    pub cost_per_1k_input_tokens: f64,
    /// Cost per 1k output tokens in USD.
    pub cost_per_1k_output_tokens: f64,
    /// Default sampling temperature when the caller supplies none.
    #[serde(default = "default_temperature")]
    pub default_temperature: f32,
    /// Default max output tokens when the caller supplies none.
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,
}

const fn default_max_tokens() -> u32 {
    1024
}
fn default_temperature() -> f32 {
    0.7
}

/// Catalog of all configured models.
#[derive(Debug, Clone)]
pub struct ModelCatalog {
    /// Model id -> configuration.
    models: HashMap<String, ModelConfig>,
}

impl ModelCatalog {
    /// Create a catalog with the built-in default model set.
    pub fn new() -> Self {
        let mut models = HashMap::new();

        let defaults = [
            ModelConfig {
                model: "gpt-4".to_string(),
                provider: "openai".to_string(),
                context_window: 8192,
                max_output_tokens: 4096,
                cost_per_1k_input_tokens: 0.03,
                cost_per_1k_output_tokens: 0.06,
                default_temperature: 0.7,
                default_max_tokens: 1024,
            },
            ModelConfig {
                model: "gpt-4o".to_string(),
                provider: "openai".to_string(),
                context_window: 128_000,
                max_output_tokens: 16_384,
                cost_per_1k_input_tokens: 0.0025,
                cost_per_1k_output_tokens: 0.01,
                default_temperature: 0.7,
                default_max_tokens: 1024,
            },
            ModelConfig {
                model: "gpt-3.5-turbo".to_string(),
                provider: "openai".to_string(),
                context_window: 16_385,
                max_output_tokens: 4096,
                cost_per_1k_input_tokens: 0.0005,
                cost_per_1k_output_tokens: 0.0015,
                default_temperature: 0.7,
                default_max_tokens: 1024,
            },
            ModelConfig {
                model: "claude-3-5-sonnet-20241022".to_string(),
                provider: "anthropic".to_string(),
                context_window: 200_000,
                max_output_tokens: 8192,
                cost_per_1k_input_tokens: 0.003,
                cost_per_1k_output_tokens: 0.015,
                default_temperature: 0.7,
                default_max_tokens: 1024,
            },
            ModelConfig {
                model: "claude-3-haiku-20240307".to_string(),
                provider: "anthropic".to_string(),
                context_window: 200_000,
                max_output_tokens: 4096,
                cost_per_1k_input_tokens: 0.00025,
                cost_per_1k_output_tokens: 0.00125,
                default_temperature: 0.7,
                default_max_tokens: 1024,
            },
            ModelConfig {
                model: "gemini-1.5-pro".to_string(),
                provider: "gemini".to_string(),
                context_window: 2_000_000,
                max_output_tokens: 8192,
                cost_per_1k_input_tokens: 0.00125,
                cost_per_1k_output_tokens: 0.005,
                default_temperature: 0.7,
                default_max_tokens: 1024,
            },
            ModelConfig {
                model: "gemini-1.5-flash".to_string(),
                provider: "gemini".to_string(),
                context_window: 1_000_000,
                max_output_tokens: 8192,
                cost_per_1k_input_tokens: 0.000075,
                cost_per_1k_output_tokens: 0.0003,
                default_temperature: 0.7,
                default_max_tokens: 1024,
            },
            // Embedding models: output pricing is zero (no generated tokens).
            ModelConfig {
                model: "text-embedding-3-small".to_string(),
                provider: "openai".to_string(),
                context_window: 8191,
                max_output_tokens: 0,
                cost_per_1k_input_tokens: 0.00002,
                cost_per_1k_output_tokens: 0.0,
                default_temperature: 0.0,
                default_max_tokens: 0,
            },
            ModelConfig {
                model: "text-embedding-004".to_string(),
                provider: "gemini".to_string(),
                context_window: 2048,
                max_output_tokens: 0,
                cost_per_1k_input_tokens: 0.00001,
                cost_per_1k_output_tokens: 0.0,
                default_temperature: 0.0,
                default_max_tokens: 0,
            },
        ];

        for config in defaults {
            models.insert(config.model.clone(), config);
        }

        Self { models }
    }

    /// Create an empty catalog (for tests and fully config-driven setups).
    pub fn empty() -> Self {
        Self {
            models: HashMap::new(),
        }
    }

    /// Add or replace a model configuration. Configured entries override the
    /// built-in defaults, matching by model id.
    pub fn insert(&mut self, config: ModelConfig) {
        self.models.insert(config.model.clone(), config);
    }

    /// Merge a list of configured models into the catalog.
    pub fn extend(&mut self, configs: impl IntoIterator<Item = ModelConfig>) {
        for config in configs {
            self.insert(config);
        }
    }

    /// Look up a model's configuration.
    pub fn get(&self, model: &str) -> Option<&ModelConfig> {
        self.models.get(model)
    }

    /// Check whether a model is configured.
    pub fn contains(&self, model: &str) -> bool {
        self.models.contains_key(model)
    }

    /// All configured model ids, sorted.
    pub fn model_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.models.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// All configurations.
    pub fn all(&self) -> Vec<&ModelConfig> {
        self.models.values().collect()
    }
}

impl Default for ModelCatalog {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
