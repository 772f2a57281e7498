//! End-to-end gateway tests with spy providers.
//!
//! Every test assembles a real gateway over an in-memory database and
//! injects a stub adapter, so admission, caching, accounting, and audit
//! behavior are exercised through the public operations only.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tollgate::config::{BudgetConfig, Config, RateLimitConfig};
use tollgate::db::Database;
use tollgate::providers::catalog::ModelConfig;
use tollgate::providers::types::{ProviderCompletion, ProviderEmbeddings};
use tollgate::{
    EmbeddingInput, EmbeddingsRequest, ErrorCode, Gateway, LlmProvider, Message, Period,
    ProviderError, RequestOptions, Role, Usage,
};

// ---------------------------------------------------------------------------
// Spy provider
// ---------------------------------------------------------------------------

/// What the spy should do when invoked.
#[derive(Debug, Clone, Copy)]
enum SpyBehavior {
    Succeed,
    FailWithStatus(u16),
    FailUnrecognized,
}

/// A provider double that counts invocations and returns canned responses.
struct SpyProvider {
    id: &'static str,
    behavior: SpyBehavior,
    usage: Usage,
    calls: AtomicU32,
}

impl SpyProvider {
    fn new(id: &'static str, usage: Usage) -> Arc<Self> {
        Arc::new(Self {
            id,
            behavior: SpyBehavior::Succeed,
            usage,
            calls: AtomicU32::new(0),
        })
    }

    fn failing(id: &'static str, behavior: SpyBehavior) -> Arc<Self> {
        Arc::new(Self {
            id,
            behavior,
            usage: Usage::default(),
            calls: AtomicU32::new(0),
        })
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl LlmProvider for SpyProvider {
    fn id(&self) -> &str {
        self.id
    }

    fn complete(
        &self,
        options: &RequestOptions,
        _config: &ModelConfig,
    ) -> Pin<Box<dyn Future<Output = Result<ProviderCompletion, ProviderError>> + Send + '_>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let behavior = self.behavior;
        let usage = self.usage;
        let model = options.model.clone();
        Box::pin(async move {
            match behavior {
                SpyBehavior::Succeed => Ok(ProviderCompletion {
                    id: "spy-resp-1".into(),
                    model,
                    content: "A generated answer.".into(),
                    finish_reason: "stop".into(),
                    usage,
                }),
                SpyBehavior::FailWithStatus(status) => Err(ProviderError::Api {
                    status,
                    message: "upstream failure".into(),
                }),
                SpyBehavior::FailUnrecognized => {
                    Err(ProviderError::Parse("unintelligible response".into()))
                }
            }
        })
    }

    fn embed(
        &self,
        texts: &[String],
        _config: &ModelConfig,
    ) -> Pin<Box<dyn Future<Output = Result<ProviderEmbeddings, ProviderError>> + Send + '_>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let behavior = self.behavior;
        let usage = self.usage;
        let count = texts.len();
        Box::pin(async move {
            match behavior {
                SpyBehavior::Succeed => Ok(ProviderEmbeddings {
                    embeddings: vec![vec![0.25; 8]; count],
                    usage,
                }),
                SpyBehavior::FailWithStatus(status) => Err(ProviderError::Api {
                    status,
                    message: "upstream failure".into(),
                }),
                SpyBehavior::FailUnrecognized => {
                    Err(ProviderError::Parse("unintelligible response".into()))
                }
            }
        })
    }

    fn health_check(&self) -> Pin<Box<dyn Future<Output = bool> + Send + '_>> {
        Box::pin(async move { true })
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// A model priced at exactly $1 per 1k input tokens, so tests can accrue
/// round dollar amounts.
fn dollar_model() -> ModelConfig {
    ModelConfig {
        model: "metered-model".into(),
        provider: "spy".into(),
        context_window: 100_000,
        max_output_tokens: 10_000,
        cost_per_1k_input_tokens: 1.0,
        cost_per_1k_output_tokens: 0.0,
        default_temperature: 0.7,
        default_max_tokens: 256,
    }
}

/// gpt-4 rerouted to the spy provider, keeping its catalog pricing
/// (0.03 / 0.06 per 1k).
fn gpt4_on_spy() -> ModelConfig {
    ModelConfig {
        model: "gpt-4".into(),
        provider: "spy".into(),
        context_window: 8192,
        max_output_tokens: 4096,
        cost_per_1k_input_tokens: 0.03,
        cost_per_1k_output_tokens: 0.06,
        default_temperature: 0.7,
        default_max_tokens: 1024,
    }
}

fn base_config() -> Config {
    let mut config = Config::default();
    config.audit.enabled = false;
    config.models = vec![gpt4_on_spy(), dollar_model()];
    config
}

fn build_gateway(config: Config, provider: Arc<SpyProvider>) -> Gateway {
    let mut gateway =
        Gateway::with_database(config, Database::open_in_memory().unwrap()).unwrap();
    gateway.register_provider(provider);
    gateway
}

fn options(model: &str) -> RequestOptions {
    RequestOptions {
        model: model.into(),
        messages: vec![Message::new(Role::User, "What is a fixed window?")],
        temperature: Some(0.7),
        max_tokens: Some(100),
        top_p: None,
        frequency_penalty: None,
        presence_penalty: None,
        stop: None,
        stream: false,
        user: None,
    }
}

// ---------------------------------------------------------------------------
// Rate limiting
// ---------------------------------------------------------------------------

#[tokio::test]
async fn rate_limit_denies_after_minute_window_fills() {
    let mut config = base_config();
    config.rate_limits = RateLimitConfig {
        enabled: true,
        requests_per_minute: 3,
        requests_per_day: 10_000,
        tokens_per_minute: 1_000_000,
        global_requests_per_minute: 10_000,
        global_requests_per_day: 100_000,
    };
    let spy = SpyProvider::new("spy", Usage::new(10, 5));
    let gateway = build_gateway(config, Arc::clone(&spy));

    for _ in 0..3 {
        gateway
            .generate_completion(options("gpt-4"), None)
            .await
            .unwrap();
    }

    let err = gateway
        .generate_completion(options("gpt-4"), None)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::RateLimitExceeded);
    assert!(err.retryable);
    // The denied request never reached the provider.
    assert_eq!(spy.calls(), 3);
}

#[tokio::test]
async fn rate_limited_request_has_no_side_effects() {
    let mut config = base_config();
    config.rate_limits.requests_per_minute = 1;
    config.cache.enabled = false;
    let spy = SpyProvider::new("spy", Usage::new(1000, 0));
    let gateway = build_gateway(config, Arc::clone(&spy));

    gateway
        .generate_completion(options("metered-model"), None)
        .await
        .unwrap();
    let before = gateway.budget_usage(Period::Daily).unwrap();

    let err = gateway
        .generate_completion(options("metered-model"), None)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::RateLimitExceeded);

    let after = gateway.budget_usage(Period::Daily).unwrap();
    assert_eq!(before.requests, after.requests);
    assert!((before.cost - after.cost).abs() < 1e-9);
}

// ---------------------------------------------------------------------------
// Budget
// ---------------------------------------------------------------------------

#[tokio::test]
async fn budget_cap_blocks_before_provider_is_invoked() {
    let mut config = base_config();
    config.budget = BudgetConfig {
        enabled: true,
        daily_limit: Some(10.0),
        monthly_limit: None,
        alert_threshold: 0.8,
    };
    config.cache.enabled = false;
    // 10_000 input tokens at $1/1k = $10.00: one request exhausts the day.
    let spy = SpyProvider::new("spy", Usage::new(10_000, 0));
    let gateway = build_gateway(config, Arc::clone(&spy));

    gateway
        .generate_completion(options("metered-model"), None)
        .await
        .unwrap();
    assert_eq!(spy.calls(), 1);

    let err = gateway
        .generate_completion(options("metered-model"), None)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::BudgetExceeded);
    assert!(!err.retryable);
    // The spy was never invoked for the denied request.
    assert_eq!(spy.calls(), 1);
}

#[tokio::test]
async fn spend_below_cap_but_over_threshold_still_succeeds() {
    let mut config = base_config();
    config.budget = BudgetConfig {
        enabled: true,
        daily_limit: Some(10.0),
        monthly_limit: None,
        alert_threshold: 0.8,
    };
    config.cache.enabled = false;
    // 8_500 input tokens at $1/1k = $8.50, past the 0.8 * $10 threshold.
    let spy = SpyProvider::new("spy", Usage::new(8_500, 0));
    let gateway = build_gateway(config, Arc::clone(&spy));

    gateway
        .generate_completion(options("metered-model"), None)
        .await
        .unwrap();

    let usage = gateway.budget_usage(Period::Daily).unwrap();
    assert!((usage.cost - 8.5).abs() < 1e-9);

    // Still under the cap: the next request is admitted (and pushes spend
    // past the limit, after which admission closes).
    gateway
        .generate_completion(options("metered-model"), None)
        .await
        .unwrap();

    let err = gateway
        .generate_completion(options("metered-model"), None)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::BudgetExceeded);
}

#[tokio::test]
async fn accrual_doubles_on_identical_usage() {
    let mut config = base_config();
    config.cache.enabled = false;
    let spy = SpyProvider::new("spy", Usage::new(1000, 0));
    let gateway = build_gateway(config, spy);

    gateway
        .generate_completion(options("metered-model"), None)
        .await
        .unwrap();
    gateway
        .generate_completion(options("metered-model"), None)
        .await
        .unwrap();

    let usage = gateway.budget_usage(Period::Daily).unwrap();
    assert!((usage.cost - 2.0).abs() < 1e-9);
    assert_eq!(usage.requests, 2);
    assert_eq!(usage.tokens, 2000);

    let model_row = usage
        .models
        .iter()
        .find(|m| m.model == "metered-model")
        .unwrap();
    assert_eq!(model_row.requests, 2);
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cache_round_trip_skips_provider_and_accrual() {
    let config = base_config();
    let spy = SpyProvider::new("spy", Usage::new(100, 50));
    let gateway = build_gateway(config, Arc::clone(&spy));

    let first = gateway
        .generate_completion(options("gpt-4"), None)
        .await
        .unwrap();
    assert!(!first.metadata.cached);

    let spend_after_first = gateway.budget_usage(Period::Daily).unwrap().cost;

    let second = gateway
        .generate_completion(options("gpt-4"), None)
        .await
        .unwrap();
    assert!(second.metadata.cached);
    assert_eq!(second.content, first.content);

    // One provider invocation total.
    assert_eq!(spy.calls(), 1);

    // A cache hit accrues nothing.
    let spend_after_second = gateway.budget_usage(Period::Daily).unwrap().cost;
    assert!((spend_after_first - spend_after_second).abs() < 1e-12);
}

#[tokio::test]
async fn different_sampling_is_a_cache_miss() {
    let config = base_config();
    let spy = SpyProvider::new("spy", Usage::new(100, 50));
    let gateway = build_gateway(config, Arc::clone(&spy));

    gateway
        .generate_completion(options("gpt-4"), None)
        .await
        .unwrap();

    let mut hotter = options("gpt-4");
    hotter.temperature = Some(0.9);
    gateway.generate_completion(hotter, None).await.unwrap();

    assert_eq!(spy.calls(), 2);
}

#[tokio::test]
async fn streaming_requests_bypass_the_cache() {
    let config = base_config();
    let spy = SpyProvider::new("spy", Usage::new(100, 50));
    let gateway = build_gateway(config, Arc::clone(&spy));

    let mut streaming = options("gpt-4");
    streaming.stream = true;

    gateway
        .generate_completion(streaming.clone(), None)
        .await
        .unwrap();
    let second = gateway.generate_completion(streaming, None).await.unwrap();

    // Both went upstream; nothing was memoized.
    assert_eq!(spy.calls(), 2);
    assert!(!second.metadata.cached);
}

#[tokio::test]
async fn cache_invalidation_forces_refetch() {
    let config = base_config();
    let spy = SpyProvider::new("spy", Usage::new(100, 50));
    let gateway = build_gateway(config, Arc::clone(&spy));

    gateway
        .generate_completion(options("gpt-4"), None)
        .await
        .unwrap();
    assert_eq!(gateway.invalidate_model_cache("gpt-4"), 1);

    gateway
        .generate_completion(options("gpt-4"), None)
        .await
        .unwrap();
    assert_eq!(spy.calls(), 2);
}

// ---------------------------------------------------------------------------
// Cost
// ---------------------------------------------------------------------------

#[tokio::test]
async fn spec_pricing_scenario_for_gpt4() {
    let config = base_config();
    // 100 prompt + 50 completion tokens at 0.03/0.06 per 1k.
    let spy = SpyProvider::new("spy", Usage::new(100, 50));
    let gateway = build_gateway(config, spy);

    let response = gateway
        .generate_completion(options("gpt-4"), None)
        .await
        .unwrap();

    assert!((response.cost.input_cost - 0.003).abs() < 1e-12);
    assert!((response.cost.output_cost - 0.003).abs() < 1e-12);
    assert!((response.cost.total_cost - 0.006).abs() < 1e-12);
    assert_eq!(
        response.cost.total_cost,
        response.cost.input_cost + response.cost.output_cost
    );
}

// ---------------------------------------------------------------------------
// Error classification
// ---------------------------------------------------------------------------

#[tokio::test]
async fn upstream_429_maps_to_retryable_rate_limit() {
    let spy = SpyProvider::failing("spy", SpyBehavior::FailWithStatus(429));
    let gateway = build_gateway(base_config(), spy);

    let err = gateway
        .generate_completion(options("gpt-4"), None)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::RateLimitExceeded);
    assert!(err.retryable);
    assert_eq!(err.provider.as_deref(), Some("spy"));
}

#[tokio::test]
async fn upstream_401_maps_to_invalid_api_key() {
    let spy = SpyProvider::failing("spy", SpyBehavior::FailWithStatus(401));
    let gateway = build_gateway(base_config(), spy);

    let err = gateway
        .generate_completion(options("gpt-4"), None)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidApiKey);
    assert!(!err.retryable);
}

#[tokio::test]
async fn upstream_503_maps_to_retryable_service_unavailable() {
    let spy = SpyProvider::failing("spy", SpyBehavior::FailWithStatus(503));
    let gateway = build_gateway(base_config(), spy);

    let err = gateway
        .generate_completion(options("gpt-4"), None)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::ServiceUnavailable);
    assert!(err.retryable);
}

#[tokio::test]
async fn unrecognized_failure_maps_to_unknown_error() {
    let spy = SpyProvider::failing("spy", SpyBehavior::FailUnrecognized);
    let gateway = build_gateway(base_config(), spy);

    let err = gateway
        .generate_completion(options("gpt-4"), None)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::UnknownError);
    assert!(!err.retryable);
}

#[tokio::test]
async fn routed_failure_writes_nothing() {
    let mut config = base_config();
    config.audit.enabled = true;
    let db = Database::open_in_memory().unwrap();
    let mut gateway = Gateway::with_database(config, db.clone()).unwrap();
    let spy = SpyProvider::failing("spy", SpyBehavior::FailWithStatus(503));
    gateway.register_provider(Arc::clone(&spy) as Arc<dyn LlmProvider>);

    gateway
        .generate_completion(options("gpt-4"), None)
        .await
        .unwrap_err();

    // No budget accrual...
    let usage = gateway.budget_usage(Period::Daily).unwrap();
    assert_eq!(usage.requests, 0);
    assert_eq!(usage.cost, 0.0);

    // ...no cached entry...
    assert_eq!(gateway.cache_stats().stores, 0);

    // ...and no audit row after the writer drains.
    gateway.shutdown().await;
    let rows: i64 = db
        .with_conn(|conn| conn.query_row("SELECT COUNT(*) FROM usage_log", [], |r| r.get(0)))
        .unwrap();
    assert_eq!(rows, 0);
}

// ---------------------------------------------------------------------------
// Audit log
// ---------------------------------------------------------------------------

#[tokio::test]
async fn successful_requests_land_in_the_durable_audit_log() {
    let mut config = base_config();
    config.audit.enabled = true;
    let db = Database::open_in_memory().unwrap();
    let mut gateway = Gateway::with_database(config, db.clone()).unwrap();
    let spy = SpyProvider::new("spy", Usage::new(100, 50));
    gateway.register_provider(spy);

    gateway
        .generate_completion(options("gpt-4"), Some("caller-42"))
        .await
        .unwrap();
    // Identical request: a cache hit, audited with zero cost.
    gateway
        .generate_completion(options("gpt-4"), Some("caller-42"))
        .await
        .unwrap();

    gateway.shutdown().await;

    let rows: Vec<(String, f64, bool)> = db
        .with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT caller_id, cost, cache_hit FROM usage_log ORDER BY cache_hit",
            )?;
            let rows = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .unwrap();

    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].0, "caller-42");
    assert!(!rows[0].2);
    assert!(rows[0].1 > 0.0);
    // The cache hit is marked and free.
    assert!(rows[1].2);
    assert_eq!(rows[1].1, 0.0);
}

// ---------------------------------------------------------------------------
// Embeddings
// ---------------------------------------------------------------------------

#[tokio::test]
async fn embeddings_flow_charges_input_tokens() {
    let mut config = base_config();
    config.models.push(ModelConfig {
        model: "text-embedding-3-small".into(),
        provider: "spy".into(),
        context_window: 8191,
        max_output_tokens: 0,
        cost_per_1k_input_tokens: 0.00002,
        cost_per_1k_output_tokens: 0.0,
        default_temperature: 0.0,
        default_max_tokens: 0,
    });
    let spy = SpyProvider::new("spy", Usage::new(8, 0));
    let gateway = build_gateway(config, Arc::clone(&spy));

    let response = gateway
        .generate_embeddings(
            EmbeddingsRequest {
                input: EmbeddingInput::Multiple(vec!["alpha".into(), "beta".into()]),
                model: None,
                user: None,
            },
            None,
        )
        .await
        .unwrap();

    assert_eq!(response.embeddings.len(), 2);
    assert_eq!(response.usage.prompt_tokens, 8);
    assert!(response.cost.total_cost > 0.0);
    assert_eq!(spy.calls(), 1);

    let usage = gateway.budget_usage(Period::Daily).unwrap();
    assert_eq!(usage.requests, 1);
}

#[tokio::test]
async fn embeddings_with_unconfigured_model_is_rejected() {
    let gateway = build_gateway(base_config(), SpyProvider::new("spy", Usage::default()));

    let err = gateway
        .generate_embeddings(
            EmbeddingsRequest {
                input: EmbeddingInput::Single("text".into()),
                model: Some("missing-embedder".into()),
                user: None,
            },
            None,
        )
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::ModelNotConfigured);
}

// ---------------------------------------------------------------------------
// Introspection
// ---------------------------------------------------------------------------

#[tokio::test]
async fn rate_limit_status_counts_down_remaining() {
    let mut config = base_config();
    config.rate_limits.requests_per_minute = 10;
    let spy = SpyProvider::new("spy", Usage::new(10, 5));
    let gateway = build_gateway(config, spy);

    gateway
        .generate_completion(options("metered-model"), None)
        .await
        .unwrap();

    let status = gateway.rate_limit_status().unwrap();
    let rpm = status
        .iter()
        .find(|s| s.scope == "metered-model" && s.kind == "rpm")
        .unwrap();
    assert_eq!(rpm.current, 1);
    assert_eq!(rpm.remaining, 9);
}

#[tokio::test]
async fn check_health_reports_registered_providers() {
    let spy = SpyProvider::new("spy", Usage::new(10, 5));
    let gateway = build_gateway(base_config(), spy);

    gateway
        .generate_completion(options("gpt-4"), None)
        .await
        .unwrap();

    let health = gateway.check_health().await;
    assert_eq!(health.len(), 1);
    assert_eq!(health[0].provider, "spy");
    assert!(health[0].healthy);
    assert_eq!(health[0].reachable, Some(true));
    assert_eq!(health[0].total_requests, 1);
    assert!(health[0].error_rate < 1e-9);
}

#[tokio::test]
async fn count_tokens_is_total_and_never_fails() {
    let gateway = build_gateway(base_config(), SpyProvider::new("spy", Usage::default()));

    assert_eq!(gateway.count_tokens("", "gpt-4"), 0);
    assert!(gateway.count_tokens("hello", "gpt-4") > 0);
    // Unknown model: ceil(8 chars / 4) = 2.
    assert_eq!(gateway.count_tokens("éééééééé", "missing"), 2);
}
