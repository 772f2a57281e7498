//! Gateway orchestrator.
//!
//! Composes the rate limiter, budget tracker, completion cache, provider
//! router, cost calculator, and audit logger into the public operations.
//! Per-request flow: admission (rate, then budget) -> cache lookup ->
//! [miss] route -> cost -> accrue -> cache store -> audit -> return. A
//! rejection from admission or routing writes nothing to cache, budget, or
//! the audit log.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::budget::{AuditEntry, BudgetTracker, BudgetUsage, Period};
use crate::cache::{CacheStatsSnapshot, CompletionCache};
use crate::config::Config;
use crate::db::Database;
use crate::error::{classify, GatewayError};
use crate::providers::anthropic::AnthropicProvider;
use crate::providers::gemini::GeminiProvider;
use crate::providers::health::ProviderHealth;
use crate::providers::openai::OpenAiProvider;
use crate::providers::types::{
    CompletionResponse, EmbeddingsRequest, EmbeddingsResponse, RequestOptions, ResponseMetadata,
};
use crate::providers::{
    CostCalculator, HealthTracker, LlmProvider, ModelCatalog, ProviderRouter,
};
use crate::ratelimit::{RateLimitStatus, RateLimiter};
use crate::tokens;

/// Model used when an embeddings request names none.
const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

/// The provider-abstracted AI request gateway.
///
/// Explicitly constructed with its collaborators (no global state); tests
/// inject stub providers through [`Gateway::register_provider`].
pub struct Gateway {
    config: Arc<Config>,
    catalog: Arc<ModelCatalog>,
    limiter: RateLimiter,
    budget: BudgetTracker,
    cache: CompletionCache,
    router: ProviderRouter,
    health: Arc<HealthTracker>,
    cost: CostCalculator,
    audit_tx: Option<mpsc::UnboundedSender<AuditEntry>>,
    audit_task: Option<tokio::task::JoinHandle<()>>,
}

impl Gateway {
    /// Build a gateway from configuration: open the database, assemble the
    /// model catalog, and register an adapter for every configured provider.
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let db = Database::open(Path::new(&config.database.path))?;
        Self::with_database(config, db)
    }

    /// Build a gateway over an existing database handle (used by tests with
    /// in-memory databases).
    pub fn with_database(config: Config, db: Database) -> anyhow::Result<Self> {
        let mut catalog = ModelCatalog::new();
        catalog.extend(config.models.iter().cloned());
        let catalog = Arc::new(catalog);

        let health = Arc::new(HealthTracker::new());
        let mut router = ProviderRouter::new(Arc::clone(&health));

        if let Some(ref provider_config) = config.providers.openai {
            router.register(Arc::new(OpenAiProvider::new(provider_config.clone())?));
        }
        if let Some(ref provider_config) = config.providers.anthropic {
            router.register(Arc::new(AnthropicProvider::new(provider_config.clone())?));
        }
        if let Some(ref provider_config) = config.providers.gemini {
            router.register(Arc::new(GeminiProvider::new(provider_config.clone())?));
        }

        let (audit_tx, audit_task) = if config.audit.enabled {
            let (tx, rx) = mpsc::unbounded_channel();
            let task = crate::budget::spawn_audit_logger(db.clone(), rx);
            (Some(tx), Some(task))
        } else {
            (None, None)
        };

        Ok(Self {
            limiter: RateLimiter::new(db.clone(), config.rate_limits.clone()),
            budget: BudgetTracker::new(db, config.budget.clone()),
            cache: CompletionCache::new(config.cache.clone()),
            router,
            health,
            cost: CostCalculator::new(ModelCatalog::clone(&catalog)),
            catalog,
            audit_tx,
            audit_task,
            config: Arc::new(config),
        })
    }

    /// Register (or replace) a provider adapter. Intended for wiring test
    /// doubles and out-of-tree providers.
    pub fn register_provider(&mut self, provider: Arc<dyn LlmProvider>) {
        self.router.register(provider);
    }

    // -----------------------------------------------------------------------
    // Public operations
    // -----------------------------------------------------------------------

    /// Execute a completion request through the full admission, caching,
    /// routing, accounting, and audit pipeline.
    pub async fn generate_completion(
        &self,
        options: RequestOptions,
        caller_id: Option<&str>,
    ) -> Result<CompletionResponse, GatewayError> {
        let request_id = Uuid::new_v4().to_string();
        let start = Instant::now();

        tracing::info!(
            request_id = %request_id,
            model = %options.model,
            stream = options.stream,
            "Completion request"
        );

        let model_config = self
            .catalog
            .get(&options.model)
            .ok_or_else(|| GatewayError::model_not_configured(&options.model))?
            .clone();

        // -- Admission --
        let estimated_tokens = estimated_prompt_tokens(&options);
        self.limiter.admit(&options.model, estimated_tokens)?;
        self.budget.check()?;

        // -- Cache lookup --
        let check_cache = self.cache.should_check(&options);
        if check_cache {
            if let Some(mut cached) = self.cache.lookup(&options) {
                let latency_ms = start.elapsed().as_millis() as u64;
                cached.metadata.cached = true;
                cached.metadata.latency_ms = latency_ms;
                cached.metadata.timestamp = Utc::now();

                tracing::info!(request_id = %request_id, latency_ms, "Served from cache");

                // A cache hit is free: nothing is accrued against budget.
                self.audit(AuditEntry {
                    request_id,
                    caller_id: caller_id.map(String::from),
                    service: "completion".into(),
                    provider: cached.metadata.provider.clone(),
                    model: options.model.clone(),
                    input: self.audit_input(&options),
                    output: self.audit_output(&cached.content),
                    prompt_tokens: cached.usage.prompt_tokens,
                    completion_tokens: cached.usage.completion_tokens,
                    cost: 0.0,
                    latency_ms,
                    cache_hit: true,
                });
                return Ok(cached);
            }
        }

        // -- Route to provider --
        let completion = self
            .router
            .complete(&options, &model_config)
            .await
            .map_err(|e| classify(e, &model_config.provider))?;

        // -- Cost, accounting, response assembly --
        let cost = self.cost.calculate(&options.model, &completion.usage);
        let latency_ms = start.elapsed().as_millis() as u64;

        let response = CompletionResponse {
            id: completion.id,
            model: completion.model,
            content: completion.content,
            finish_reason: completion.finish_reason,
            usage: completion.usage,
            cost,
            metadata: ResponseMetadata {
                provider: model_config.provider.clone(),
                timestamp: Utc::now(),
                latency_ms,
                cached: false,
            },
        };

        // A failed accrual must not discard a response the provider already
        // charged us for; log and continue.
        if let Err(e) = self
            .budget
            .accrue(&options.model, &response.usage, cost.total_cost)
        {
            tracing::error!(error = %e, "Failed to accrue request cost");
        }

        if check_cache {
            self.cache.store(&options, &response);
        }

        self.audit(AuditEntry {
            request_id,
            caller_id: caller_id.map(String::from),
            service: "completion".into(),
            provider: model_config.provider.clone(),
            model: options.model.clone(),
            input: self.audit_input(&options),
            output: self.audit_output(&response.content),
            prompt_tokens: response.usage.prompt_tokens,
            completion_tokens: response.usage.completion_tokens,
            cost: cost.total_cost,
            latency_ms,
            cache_hit: false,
        });

        Ok(response)
    }

    /// Execute an embeddings request. Embeddings pass the same rate and
    /// budget gates as completions and accrue input-token cost; they are
    /// not memoized.
    pub async fn generate_embeddings(
        &self,
        request: EmbeddingsRequest,
        caller_id: Option<&str>,
    ) -> Result<EmbeddingsResponse, GatewayError> {
        let request_id = Uuid::new_v4().to_string();
        let start = Instant::now();

        let model = request
            .model
            .clone()
            .unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.to_string());

        let model_config = self
            .catalog
            .get(&model)
            .ok_or_else(|| GatewayError::model_not_configured(&model))?
            .clone();

        let texts: Vec<String> = request
            .input
            .texts()
            .into_iter()
            .map(String::from)
            .collect();
        let estimated_tokens: u32 = texts.iter().map(|t| tokens::count_tokens(t, &model)).sum();

        self.limiter.admit(&model, estimated_tokens)?;
        self.budget.check()?;

        let embeddings = self
            .router
            .embed(&texts, &model_config)
            .await
            .map_err(|e| classify(e, &model_config.provider))?;

        let cost = self.cost.calculate(&model, &embeddings.usage);
        let latency_ms = start.elapsed().as_millis() as u64;

        if let Err(e) = self.budget.accrue(&model, &embeddings.usage, cost.total_cost) {
            tracing::error!(error = %e, "Failed to accrue embeddings cost");
        }

        self.audit(AuditEntry {
            request_id,
            caller_id: caller_id.map(String::from),
            service: "embeddings".into(),
            provider: model_config.provider.clone(),
            model: model.clone(),
            input: if self.config.audit.log_content {
                serde_json::to_string(&texts).unwrap_or_default()
            } else {
                String::new()
            },
            output: String::new(),
            prompt_tokens: embeddings.usage.prompt_tokens,
            completion_tokens: 0,
            cost: cost.total_cost,
            latency_ms,
            cache_hit: false,
        });

        Ok(EmbeddingsResponse {
            embeddings: embeddings.embeddings,
            usage: embeddings.usage,
            cost,
            metadata: ResponseMetadata {
                provider: model_config.provider,
                timestamp: Utc::now(),
                latency_ms,
                cached: false,
            },
        })
    }

    /// Count tokens in `text` for `model`. Never fails: unknown models and
    /// tokenizer failures fall back to a character-based estimate.
    pub fn count_tokens(&self, text: &str, model: &str) -> u32 {
        tokens::count_tokens(text, model)
    }

    /// Spend summary for the current daily or monthly period.
    pub fn budget_usage(&self, period: Period) -> Result<BudgetUsage, GatewayError> {
        self.budget.usage(period)
    }

    /// Current/limit/remaining/reset for every configured rate-limit scope.
    pub fn rate_limit_status(&self) -> Result<Vec<RateLimitStatus>, GatewayError> {
        self.limiter.status(&self.catalog.model_ids())
    }

    /// Per-provider health: recorded outcomes combined with a live
    /// reachability probe.
    pub async fn check_health(&self) -> Vec<ProviderHealth> {
        let probes = self.router.probe_all().await;
        self.router
            .provider_ids()
            .iter()
            .map(|id| {
                let mut health = self.health.health_of(id);
                let reachable = probes.get(id).copied();
                health.reachable = reachable;
                if reachable == Some(false) {
                    health.healthy = false;
                }
                health
            })
            .collect()
    }

    /// Drop all cached completions for a model.
    pub fn invalidate_model_cache(&self, model: &str) -> usize {
        self.cache.invalidate_model(model)
    }

    /// Cache hit/miss counters.
    pub fn cache_stats(&self) -> CacheStatsSnapshot {
        self.cache.stats()
    }

    /// The loaded configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Flush pending audit entries and stop the audit writer.
    pub async fn shutdown(mut self) {
        drop(self.audit_tx.take());
        if let Some(task) = self.audit_task.take() {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Audit logger task failed");
            }
        }
    }

    // -----------------------------------------------------------------------
    // Internal helpers
    // -----------------------------------------------------------------------

    /// Fire-and-forget audit enqueue; a full or closed channel is logged and
    /// ignored so auditing can never fail a request.
    fn audit(&self, entry: AuditEntry) {
        if let Some(ref tx) = self.audit_tx {
            if tx.send(entry).is_err() {
                tracing::error!("Audit channel closed, dropping entry");
            }
        }
    }

    fn audit_input(&self, options: &RequestOptions) -> String {
        if self.config.audit.log_content {
            serde_json::to_string(&options.messages).unwrap_or_default()
        } else {
            String::new()
        }
    }

    fn audit_output(&self, content: &str) -> String {
        if self.config.audit.log_content {
            content.to_string()
        } else {
            String::new()
        }
    }
}

/// Prompt-token estimate for admission: tokenize each message body for the
/// requested model.
fn estimated_prompt_tokens(options: &RequestOptions) -> u32 {
    options
        .messages
        .iter()
        .map(|m| tokens::count_tokens(&m.content, &options.model))
        .sum()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
