//! LLM provider module.
//!
//! Defines the `LlmProvider` adapter trait and provider error types, plus
//! sub-modules for routing, health tracking, cost calculation, the model
//! catalog, and concrete provider adapters (OpenAI, Anthropic, Gemini).

pub mod anthropic;
pub mod catalog;
pub mod cost;
pub mod gemini;
pub mod health;
pub mod openai;
pub mod router;
pub mod types;

use std::future::Future;
use std::pin::Pin;

use crate::providers::catalog::ModelConfig;
use crate::providers::types::{ProviderCompletion, ProviderEmbeddings, RequestOptions};

// Re-exports for convenience.
pub use self::catalog::ModelCatalog;
pub use self::cost::CostCalculator;
pub use self::health::HealthTracker;
pub use self::router::ProviderRouter;

// ---------------------------------------------------------------------------
// ProviderError
// ---------------------------------------------------------------------------

/// Errors that can occur during provider operations.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Request to {provider} timed out after {secs}s")]
    Timeout { provider: String, secs: u64 },

    #[error("No API key configured for {0}")]
    MissingApiKey(String),

    #[error("Provider {provider} does not support {operation}")]
    Unsupported {
        provider: String,
        operation: String,
    },

    #[error("No provider registered for: {0}")]
    NoProvider(String),

    #[error("Failed to parse provider response: {0}")]
    Parse(String),
}

// ---------------------------------------------------------------------------
// LlmProvider trait
// ---------------------------------------------------------------------------

/// Trait that every upstream provider adapter must implement.
///
/// An adapter owns the translation between the gateway's generic
/// [`RequestOptions`] and its provider's wire shapes, and extracts usage back
/// into the gateway's [`types::Usage`]. Adding a provider means adding one
/// adapter; no other component changes.
///
/// Async methods return boxed futures so the trait is dyn-compatible (can be
/// used as `Arc<dyn LlmProvider>`). No `async_trait` macro is needed.
pub trait LlmProvider: Send + Sync {
    /// Unique identifier for this provider (e.g. "openai", "anthropic").
    fn id(&self) -> &str;

    /// Execute a completion request against the upstream service.
    fn complete(
        &self,
        options: &RequestOptions,
        config: &ModelConfig,
    ) -> Pin<Box<dyn Future<Output = Result<ProviderCompletion, ProviderError>> + Send + '_>>;

    /// Execute an embeddings request. Providers without an embeddings
    /// surface return [`ProviderError::Unsupported`].
    fn embed(
        &self,
        texts: &[String],
        config: &ModelConfig,
    ) -> Pin<Box<dyn Future<Output = Result<ProviderEmbeddings, ProviderError>> + Send + '_>>;

    /// Lightweight reachability probe.
    fn health_check(&self) -> Pin<Box<dyn Future<Output = bool> + Send + '_>>;
}
