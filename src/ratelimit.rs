//! Fixed-window rate limiting.
//!
//! Counters are keyed `(scope, kind, window_start)` where scope is a model
//! id or the literal "global". Increment-and-read is a single
//! `INSERT .. ON CONFLICT .. RETURNING` statement, so concurrent gateway
//! instances sharing the database observe one consistent count.
//!
//! This is a fixed-window limiter: counters reset at aligned boundaries, so
//! bursts of up to 2x the limit can straddle a boundary. Accepted as an
//! approximate control; a sliding-window or token-bucket variant can replace
//! the internals behind `admit` without changing callers.

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::params;
use serde::Serialize;

use crate::config::RateLimitConfig;
use crate::db::Database;
use crate::error::GatewayError;

/// Scope name for the cross-model counters.
pub const GLOBAL_SCOPE: &str = "global";

/// The three window kinds tracked per scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WindowKind {
    RequestsPerMinute,
    RequestsPerDay,
    TokensPerMinute,
}

impl WindowKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::RequestsPerMinute => "rpm",
            Self::RequestsPerDay => "rpd",
            Self::TokensPerMinute => "tpm",
        }
    }

    const fn window_secs(self) -> i64 {
        match self {
            Self::RequestsPerMinute | Self::TokensPerMinute => 60,
            Self::RequestsPerDay => 86_400,
        }
    }

    /// Per-minute denials are retryable; per-day denials are not (the caller
    /// cannot usefully retry within the same day without violating the cap).
    const fn deny_retryable(self) -> bool {
        match self {
            Self::RequestsPerMinute | Self::TokensPerMinute => true,
            Self::RequestsPerDay => false,
        }
    }
}

/// Point-in-time view of one scope/kind window for callers.
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitStatus {
    pub scope: String,
    pub kind: String,
    pub current: u32,
    pub limit: u32,
    pub remaining: u32,
    pub resets_at: DateTime<Utc>,
}

/// Fixed-window rate limiter over the shared counter store.
pub struct RateLimiter {
    db: Database,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(db: Database, config: RateLimitConfig) -> Self {
        Self { db, config }
    }

    /// Admission check for one request against `model`, with the prompt-token
    /// estimate used for the tokens-per-minute window.
    ///
    /// Each window's counter is incremented as part of the check; a denial
    /// leaves earlier increments in place (fixed-window behavior, no
    /// rollback).
    pub fn admit(&self, model: &str, estimated_tokens: u32) -> Result<(), GatewayError> {
        self.admit_at(model, estimated_tokens, Utc::now())
    }

    fn admit_at(
        &self,
        model: &str,
        estimated_tokens: u32,
        now: DateTime<Utc>,
    ) -> Result<(), GatewayError> {
        if !self.config.enabled {
            return Ok(());
        }

        let checks: [(&str, WindowKind, u32, u32); 5] = [
            (
                GLOBAL_SCOPE,
                WindowKind::RequestsPerMinute,
                1,
                self.config.global_requests_per_minute,
            ),
            (
                GLOBAL_SCOPE,
                WindowKind::RequestsPerDay,
                1,
                self.config.global_requests_per_day,
            ),
            (
                model,
                WindowKind::RequestsPerMinute,
                1,
                self.config.requests_per_minute,
            ),
            (
                model,
                WindowKind::RequestsPerDay,
                1,
                self.config.requests_per_day,
            ),
            (
                model,
                WindowKind::TokensPerMinute,
                estimated_tokens,
                self.config.tokens_per_minute,
            ),
        ];

        for (scope, kind, by, limit) in checks {
            if limit == 0 {
                continue; // zero disables the window
            }
            let count = self.increment(scope, kind, i64::from(by), now)?;
            if count > i64::from(limit) {
                tracing::warn!(
                    scope = %scope,
                    window = kind.as_str(),
                    count,
                    limit,
                    "Rate limit exceeded"
                );
                return Err(GatewayError::rate_limited(
                    format!(
                        "Rate limit exceeded for {scope} ({} window): {count} > {limit}",
                        kind.as_str()
                    ),
                    kind.deny_retryable(),
                ));
            }
        }

        Ok(())
    }

    /// Atomically increment a window counter and return the new count.
    /// Counter rows are created lazily on first increment in a window.
    fn increment(
        &self,
        scope: &str,
        kind: WindowKind,
        by: i64,
        now: DateTime<Utc>,
    ) -> Result<i64, GatewayError> {
        let window_start = window_start(now, kind.window_secs());

        let count = self.db.with_conn(|conn| {
            conn.query_row(
                "INSERT INTO rate_windows (scope, kind, window_start, count) \
                 VALUES (?1, ?2, ?3, ?4) \
                 ON CONFLICT(scope, kind, window_start) DO UPDATE SET count = count + ?4 \
                 RETURNING count",
                params![scope, kind.as_str(), window_start, by],
                |row| row.get::<_, i64>(0),
            )
        })?;

        Ok(count)
    }

    /// Current/limit/remaining/reset for every window of the given scopes
    /// (callers pass the configured model ids; "global" is always included).
    pub fn status(&self, scopes: &[String]) -> Result<Vec<RateLimitStatus>, GatewayError> {
        self.status_at(scopes, Utc::now())
    }

    fn status_at(
        &self,
        scopes: &[String],
        now: DateTime<Utc>,
    ) -> Result<Vec<RateLimitStatus>, GatewayError> {
        let mut result = Vec::new();

        let mut all_scopes: Vec<&str> = vec![GLOBAL_SCOPE];
        all_scopes.extend(scopes.iter().map(String::as_str));

        for scope in all_scopes {
            let windows: [(WindowKind, u32); 3] = if scope == GLOBAL_SCOPE {
                [
                    (
                        WindowKind::RequestsPerMinute,
                        self.config.global_requests_per_minute,
                    ),
                    (
                        WindowKind::RequestsPerDay,
                        self.config.global_requests_per_day,
                    ),
                    (WindowKind::TokensPerMinute, 0),
                ]
            } else {
                [
                    (
                        WindowKind::RequestsPerMinute,
                        self.config.requests_per_minute,
                    ),
                    (WindowKind::RequestsPerDay, self.config.requests_per_day),
                    (WindowKind::TokensPerMinute, self.config.tokens_per_minute),
                ]
            };

            for (kind, limit) in windows {
                if limit == 0 {
                    continue;
                }
                let start = window_start(now, kind.window_secs());
                let current = self.current_count(scope, kind, start)?;
                let current = u32::try_from(current.max(0)).unwrap_or(u32::MAX);

                result.push(RateLimitStatus {
                    scope: scope.to_string(),
                    kind: kind.as_str().to_string(),
                    current,
                    limit,
                    remaining: limit.saturating_sub(current),
                    resets_at: Utc
                        .timestamp_opt(start + kind.window_secs(), 0)
                        .single()
                        .unwrap_or(now),
                });
            }
        }

        Ok(result)
    }

    fn current_count(
        &self,
        scope: &str,
        kind: WindowKind,
        window_start: i64,
    ) -> Result<i64, GatewayError> {
        let count = self.db.with_conn(|conn| {
            let result = conn.query_row(
                "SELECT count FROM rate_windows \
                 WHERE scope = ?1 AND kind = ?2 AND window_start = ?3",
                params![scope, kind.as_str(), window_start],
                |row| row.get::<_, i64>(0),
            );
            match result {
                Ok(c) => Ok(c),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(0),
                Err(e) => Err(e),
            }
        })?;
        Ok(count)
    }

    /// Delete counter rows whose window ended more than a day ago. Stale rows
    /// never affect admission (lookups are window-keyed), this just bounds
    /// table growth.
    pub fn sweep_expired(&self) -> Result<u64, GatewayError> {
        let cutoff = Utc::now().timestamp() - 2 * 86_400;
        let removed = self.db.with_conn(|conn| {
            conn.execute(
                "DELETE FROM rate_windows WHERE window_start < ?1",
                params![cutoff],
            )
        })?;
        Ok(removed as u64)
    }
}

/// Aligned window start for the given instant: `floor(now / window) * window`.
fn window_start(now: DateTime<Utc>, window_secs: i64) -> i64 {
    let ts = now.timestamp();
    ts - ts.rem_euclid(window_secs)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
