//! Provider router.
//!
//! Dispatches a request to exactly one registered [`LlmProvider`] adapter,
//! selected by the provider name in the model's configuration. The router
//! records call outcomes into the shared [`HealthTracker`]. It does not
//! retry or fall back; retryability is surfaced to callers through error
//! classification instead.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::providers::catalog::ModelConfig;
use crate::providers::health::HealthTracker;
use crate::providers::types::{ProviderCompletion, ProviderEmbeddings, RequestOptions};
use crate::providers::{LlmProvider, ProviderError};

/// Routes requests to the adapter owning the requested model.
pub struct ProviderRouter {
    /// Provider id -> adapter.
    providers: HashMap<String, Arc<dyn LlmProvider>>,
    /// Registration order, for stable listings.
    order: Vec<String>,
    health: Arc<HealthTracker>,
}

impl ProviderRouter {
    pub fn new(health: Arc<HealthTracker>) -> Self {
        Self {
            providers: HashMap::new(),
            order: Vec::new(),
            health,
        }
    }

    /// Register an adapter. Registering the same id again replaces the
    /// previous adapter.
    pub fn register(&mut self, provider: Arc<dyn LlmProvider>) {
        let id = provider.id().to_string();
        if self.providers.contains_key(&id) {
            warn!(provider = %id, "Provider already registered, replacing");
            self.order.retain(|o| o != &id);
        }
        self.order.push(id.clone());
        self.providers.insert(id, provider);
    }

    /// Registered provider ids in registration order.
    pub fn provider_ids(&self) -> &[String] {
        &self.order
    }

    fn resolve(&self, config: &ModelConfig) -> Result<Arc<dyn LlmProvider>, ProviderError> {
        self.providers
            .get(&config.provider)
            .cloned()
            .ok_or_else(|| ProviderError::NoProvider(config.provider.clone()))
    }

    /// Route a completion request to the model's provider.
    pub async fn complete(
        &self,
        options: &RequestOptions,
        config: &ModelConfig,
    ) -> Result<ProviderCompletion, ProviderError> {
        let provider = self.resolve(config)?;
        let id = provider.id().to_string();

        debug!(provider = %id, model = %config.model, "Dispatching completion");
        let start = Instant::now();

        match provider.complete(options, config).await {
            Ok(completion) => {
                let latency_ms = start.elapsed().as_millis() as u64;
                self.health.record_success(&id, latency_ms);
                info!(
                    provider = %id,
                    model = %config.model,
                    latency_ms,
                    "Completion succeeded"
                );
                Ok(completion)
            }
            Err(e) => {
                self.health.record_failure(&id);
                warn!(provider = %id, model = %config.model, error = %e, "Completion failed");
                Err(e)
            }
        }
    }

    /// Route an embeddings request to the model's provider.
    pub async fn embed(
        &self,
        texts: &[String],
        config: &ModelConfig,
    ) -> Result<ProviderEmbeddings, ProviderError> {
        let provider = self.resolve(config)?;
        let id = provider.id().to_string();

        debug!(provider = %id, model = %config.model, "Dispatching embeddings");
        let start = Instant::now();

        match provider.embed(texts, config).await {
            Ok(embeddings) => {
                let latency_ms = start.elapsed().as_millis() as u64;
                self.health.record_success(&id, latency_ms);
                Ok(embeddings)
            }
            Err(e) => {
                self.health.record_failure(&id);
                warn!(provider = %id, model = %config.model, error = %e, "Embeddings failed");
                Err(e)
            }
        }
    }

    /// Run the live reachability probe against every registered adapter.
    pub async fn probe_all(&self) -> HashMap<String, bool> {
        let mut results = HashMap::new();
        for id in &self.order {
            if let Some(provider) = self.providers.get(id) {
                let reachable = provider.health_check().await;
                results.insert(id.clone(), reachable);
            }
        }
        results
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
