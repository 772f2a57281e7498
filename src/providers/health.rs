//! Per-provider health tracking.
//!
//! Records the outcome and latency of every routed call and derives a
//! healthy/degraded verdict from the recent error rate. The live
//! reachability probe is layered on by the orchestrator's `check_health`.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use serde::Serialize;

/// How many recent outcomes participate in the error-rate window.
const RECENT_WINDOW: usize = 50;

/// Error rate at or above which a provider is reported unhealthy.
const UNHEALTHY_ERROR_RATE: f64 = 0.5;

/// Point-in-time health summary for one provider.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderHealth {
    pub provider: String,
    pub healthy: bool,
    /// Whether the provider answered the live reachability probe. `None`
    /// when no probe was run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reachable: Option<bool>,
    pub total_requests: u64,
    pub failed_requests: u64,
    /// Failure fraction over the recent outcome window.
    pub error_rate: f64,
    pub avg_latency_ms: u64,
}

#[derive(Debug, Default)]
struct Record {
    total_requests: u64,
    successful_requests: u64,
    failed_requests: u64,
    total_latency_ms: u64,
    recent: VecDeque<bool>,
}

impl Record {
    fn push_outcome(&mut self, ok: bool) {
        if self.recent.len() == RECENT_WINDOW {
            self.recent.pop_front();
        }
        self.recent.push_back(ok);
    }

    fn error_rate(&self) -> f64 {
        if self.recent.is_empty() {
            return 0.0;
        }
        let failures = self.recent.iter().filter(|ok| !**ok).count();
        failures as f64 / self.recent.len() as f64
    }

    fn avg_latency_ms(&self) -> u64 {
        if self.successful_requests == 0 {
            return 0;
        }
        self.total_latency_ms / self.successful_requests
    }
}

/// Records call outcomes per provider. Interior mutability so the router can
/// record through a shared reference.
#[derive(Debug, Default)]
pub struct HealthTracker {
    records: Mutex<HashMap<String, Record>>,
}

impl HealthTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&self, provider: &str, latency_ms: u64) {
        let mut records = self.records.lock().expect("health mutex poisoned");
        let record = records.entry(provider.to_string()).or_default();
        record.total_requests += 1;
        record.successful_requests += 1;
        record.total_latency_ms += latency_ms;
        record.push_outcome(true);
    }

    pub fn record_failure(&self, provider: &str) {
        let mut records = self.records.lock().expect("health mutex poisoned");
        let record = records.entry(provider.to_string()).or_default();
        record.total_requests += 1;
        record.failed_requests += 1;
        record.push_outcome(false);
    }

    /// Health summary for one provider. A provider with no recorded traffic
    /// is reported healthy.
    pub fn health_of(&self, provider: &str) -> ProviderHealth {
        let records = self.records.lock().expect("health mutex poisoned");
        match records.get(provider) {
            Some(record) => {
                let error_rate = record.error_rate();
                ProviderHealth {
                    provider: provider.to_string(),
                    healthy: error_rate < UNHEALTHY_ERROR_RATE,
                    reachable: None,
                    total_requests: record.total_requests,
                    failed_requests: record.failed_requests,
                    error_rate,
                    avg_latency_ms: record.avg_latency_ms(),
                }
            }
            None => ProviderHealth {
                provider: provider.to_string(),
                healthy: true,
                reachable: None,
                total_requests: 0,
                failed_requests: 0,
                error_rate: 0.0,
                avg_latency_ms: 0,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
