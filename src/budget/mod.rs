pub mod audit;
pub mod tracker;

use serde::{Deserialize, Serialize};

pub use self::audit::spawn_audit_logger;
pub use self::tracker::{BudgetTracker, BudgetUsage, ModelSpend, Period};

/// Immutable snapshot of one request, recorded asynchronously by the audit
/// logger. Write-once; never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub request_id: String,
    pub caller_id: Option<String>,
    /// Tag for the calling subsystem (e.g. "completion", "embeddings").
    pub service: String,
    pub provider: String,
    pub model: String,
    /// Serialized request input (empty when content logging is disabled).
    pub input: String,
    /// Response text (empty when content logging is disabled).
    pub output: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub cost: f64,
    pub latency_ms: u64,
    pub cache_hit: bool,
}
