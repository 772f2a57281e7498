//! Gateway configuration.
//!
//! Loaded from a TOML file with per-field defaults, then overridden by
//! `TOLLGATE_*` environment variables. Overridden keys are recorded so
//! startup logging can report which settings came from the environment.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::providers::catalog::ModelConfig;

// ---------------------------------------------------------------------------
// Main configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    /// Model additions/overrides merged into the built-in catalog.
    #[serde(default)]
    pub models: Vec<ModelConfig>,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub rate_limits: RateLimitConfig,
    #[serde(default)]
    pub budget: BudgetConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    /// Keys overridden from the environment. Not serialized to TOML.
    #[serde(skip)]
    pub env_overrides: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ProvidersConfig {
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub openai: Option<ProviderConfig>,
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anthropic: Option<ProviderConfig>,
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gemini: Option<ProviderConfig>,
}

/// Connection settings for one upstream provider.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderConfig {
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Override the provider's default API base URL (e.g. for
    /// OpenAI-compatible local servers).
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Per-call timeout. Expiry classifies as SERVICE_UNAVAILABLE (retryable).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Recognized for callers driving their own retry policy; the gateway
    /// itself never retries (retryability is a caller-visible decision).
    #[serde(default)]
    pub max_retries: u32,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: None,
            timeout_secs: default_timeout_secs(),
            max_retries: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_cache_ttl")]
    pub ttl_secs: u64,
    /// Soft capacity; crossing it triggers an expired-entry purge.
    #[serde(default = "default_cache_max_entries")]
    pub max_entries: usize,
    /// Models that should never be cached.
    #[serde(default)]
    pub skip_models: Vec<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: default_cache_ttl(),
            max_entries: default_cache_max_entries(),
            skip_models: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Per-model requests per minute.
    #[serde(default = "default_rpm")]
    pub requests_per_minute: u32,
    /// Per-model requests per day.
    #[serde(default = "default_rpd")]
    pub requests_per_day: u32,
    /// Per-model prompt tokens per minute, enforced against the admission
    /// estimate.
    #[serde(default = "default_tpm")]
    pub tokens_per_minute: u32,
    /// Requests per minute across all models.
    #[serde(default = "default_global_rpm")]
    pub global_requests_per_minute: u32,
    /// Requests per day across all models.
    #[serde(default = "default_global_rpd")]
    pub global_requests_per_day: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_minute: default_rpm(),
            requests_per_day: default_rpd(),
            tokens_per_minute: default_tpm(),
            global_requests_per_minute: default_global_rpm(),
            global_requests_per_day: default_global_rpd(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BudgetConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Hard cap on daily spend in USD. `None` means unlimited.
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub daily_limit: Option<f64>,
    /// Hard cap on monthly spend in USD. `None` means unlimited.
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub monthly_limit: Option<f64>,
    /// Fraction of a limit at which a warning is emitted (e.g. 0.8).
    #[serde(default = "default_alert_threshold")]
    pub alert_threshold: f64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            daily_limit: None,
            monthly_limit: None,
            alert_threshold: default_alert_threshold(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuditConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// When false, serialized request/response text is omitted from audit
    /// rows (usage and cost are always recorded).
    #[serde(default = "default_true")]
    pub log_content: bool,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            log_content: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Default value functions
// ---------------------------------------------------------------------------

fn default_db_path() -> PathBuf {
    PathBuf::from("tollgate.db")
}
const fn default_true() -> bool {
    true
}
const fn default_timeout_secs() -> u64 {
    30
}
const fn default_cache_ttl() -> u64 {
    3600
}
const fn default_cache_max_entries() -> usize {
    10_000
}
const fn default_rpm() -> u32 {
    60
}
const fn default_rpd() -> u32 {
    10_000
}
const fn default_tpm() -> u32 {
    100_000
}
const fn default_global_rpm() -> u32 {
    300
}
const fn default_global_rpd() -> u32 {
    50_000
}
fn default_alert_threshold() -> f64 {
    0.8
}

// ---------------------------------------------------------------------------
// Config loading and env overrides
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a TOML file, then apply environment variable
    /// overrides. Any setting prefixed with `TOLLGATE_` takes precedence over
    /// the file value and is tracked in `env_overrides`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = toml::from_str(&content)?;
            config
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path.display());
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        let mut overridden: Vec<String> = Vec::new();

        macro_rules! env_parse {
            ($key:expr, $env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    if let Ok(parsed) = val.parse() {
                        $field = parsed;
                        overridden.push($key.to_string());
                    }
                }
            };
        }
        macro_rules! env_bool {
            ($key:expr, $env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    $field = matches!(val.to_lowercase().as_str(), "1" | "true" | "yes" | "on");
                    overridden.push($key.to_string());
                }
            };
        }
        macro_rules! env_opt_parse {
            ($key:expr, $env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    if let Ok(parsed) = val.parse() {
                        $field = Some(parsed);
                        overridden.push($key.to_string());
                    }
                }
            };
        }
        macro_rules! env_provider_key {
            ($key:expr, $env:expr, $section:expr) => {
                if let Ok(val) = std::env::var($env) {
                    let provider = $section.get_or_insert_with(ProviderConfig::default);
                    provider.api_key = Some(val);
                    overridden.push($key.to_string());
                }
            };
        }

        // -- Database --
        if let Ok(val) = std::env::var("TOLLGATE_DATABASE_PATH") {
            self.database.path = PathBuf::from(val);
            overridden.push("database.path".to_string());
        }

        // -- Providers --
        env_provider_key!(
            "providers.openai.api_key",
            "TOLLGATE_OPENAI_API_KEY",
            self.providers.openai
        );
        env_provider_key!(
            "providers.anthropic.api_key",
            "TOLLGATE_ANTHROPIC_API_KEY",
            self.providers.anthropic
        );
        env_provider_key!(
            "providers.gemini.api_key",
            "TOLLGATE_GEMINI_API_KEY",
            self.providers.gemini
        );

        // -- Cache --
        env_bool!("cache.enabled", "TOLLGATE_CACHE_ENABLED", self.cache.enabled);
        env_parse!("cache.ttl_secs", "TOLLGATE_CACHE_TTL_SECS", self.cache.ttl_secs);

        // -- Rate limits --
        env_bool!(
            "rate_limits.enabled",
            "TOLLGATE_RATE_LIMITS_ENABLED",
            self.rate_limits.enabled
        );
        env_parse!(
            "rate_limits.requests_per_minute",
            "TOLLGATE_RATE_RPM",
            self.rate_limits.requests_per_minute
        );
        env_parse!(
            "rate_limits.requests_per_day",
            "TOLLGATE_RATE_RPD",
            self.rate_limits.requests_per_day
        );
        env_parse!(
            "rate_limits.tokens_per_minute",
            "TOLLGATE_RATE_TPM",
            self.rate_limits.tokens_per_minute
        );

        // -- Budget --
        env_bool!("budget.enabled", "TOLLGATE_BUDGET_ENABLED", self.budget.enabled);
        env_opt_parse!(
            "budget.daily_limit",
            "TOLLGATE_BUDGET_DAILY_LIMIT",
            self.budget.daily_limit
        );
        env_opt_parse!(
            "budget.monthly_limit",
            "TOLLGATE_BUDGET_MONTHLY_LIMIT",
            self.budget.monthly_limit
        );
        env_parse!(
            "budget.alert_threshold",
            "TOLLGATE_BUDGET_ALERT_THRESHOLD",
            self.budget.alert_threshold
        );

        // -- Audit --
        env_bool!("audit.enabled", "TOLLGATE_AUDIT_ENABLED", self.audit.enabled);

        if !overridden.is_empty() {
            tracing::info!(keys = ?overridden, "Applied environment overrides");
        }
        self.env_overrides = overridden;
    }

    /// Look up the connection settings for a provider by id.
    pub fn provider(&self, id: &str) -> Option<&ProviderConfig> {
        match id {
            "openai" => self.providers.openai.as_ref(),
            "anthropic" => self.providers.anthropic.as_ref(),
            "gemini" => self.providers.gemini.as_ref(),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
