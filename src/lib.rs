//! tollgate: a provider-abstracted LLM request gateway.
//!
//! Sits between application code and upstream model providers, enforcing
//! rate limits, budget caps, response caching, and cost accounting under
//! concurrent access. Consumed as a library; transport, authentication, and
//! UI belong to the caller.

pub mod budget;
pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod providers;
pub mod ratelimit;
pub mod tokens;

pub use crate::budget::{BudgetUsage, ModelSpend, Period};
pub use crate::config::Config;
pub use crate::error::{ErrorCode, GatewayError};
pub use crate::gateway::Gateway;
pub use crate::providers::catalog::{ModelCatalog, ModelConfig};
pub use crate::providers::health::ProviderHealth;
pub use crate::providers::types::{
    CompletionResponse, CostBreakdown, EmbeddingInput, EmbeddingsRequest, EmbeddingsResponse,
    Message, RequestOptions, Role, Usage,
};
pub use crate::providers::{LlmProvider, ProviderError};
pub use crate::ratelimit::RateLimitStatus;
