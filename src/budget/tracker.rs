use chrono::{DateTime, Datelike, Utc};
use rusqlite::params;
use serde::Serialize;

use crate::config::BudgetConfig;
use crate::db::Database;
use crate::error::GatewayError;
use crate::providers::types::Usage;

/// Accounting period for budget queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Daily,
    Monthly,
}

/// Per-model slice of a budget period.
#[derive(Debug, Clone, Serialize)]
pub struct ModelSpend {
    pub model: String,
    pub cost: f64,
    pub requests: u64,
    pub tokens: u64,
}

/// Summary of one budget period's accumulated spend.
#[derive(Debug, Clone, Serialize)]
pub struct BudgetUsage {
    pub period: Period,
    /// First day of the period (UTC), `YYYY-MM-DD`.
    pub period_start: String,
    pub cost: f64,
    pub requests: u64,
    pub tokens: u64,
    pub limit: Option<f64>,
    pub remaining: Option<f64>,
    pub models: Vec<ModelSpend>,
}

/// Tracks cumulative spend against daily and monthly caps.
///
/// State lives in per-day rows keyed by UTC date; a month's spend is the sum
/// of its day rows, so periods roll over at UTC midnight with no reset
/// bookkeeping. Accrual is a single `INSERT .. ON CONFLICT .. DO UPDATE`
/// per table, atomic under concurrent requests.
pub struct BudgetTracker {
    db: Database,
    config: BudgetConfig,
}

impl BudgetTracker {
    pub fn new(db: Database, config: BudgetConfig) -> Self {
        Self { db, config }
    }

    /// Deny when spend already recorded for the current day or month has
    /// reached its cap. This only sees spend reported before now, so
    /// concurrent in-flight requests can overshoot slightly; the limiter is
    /// approximate rather than locking across every request.
    pub fn check(&self) -> Result<(), GatewayError> {
        self.check_at(Utc::now())
    }

    fn check_at(&self, now: DateTime<Utc>) -> Result<(), GatewayError> {
        if !self.config.enabled {
            return Ok(());
        }

        if let Some(daily_limit) = self.config.daily_limit {
            let spent = self.daily_spent(now)?;
            if daily_limit > 0.0 && spent >= daily_limit {
                tracing::warn!(spent, limit = daily_limit, "Daily budget exhausted");
                return Err(GatewayError::budget_exceeded(format!(
                    "Daily budget exceeded: ${spent:.2} of ${daily_limit:.2}"
                )));
            }
        }

        if let Some(monthly_limit) = self.config.monthly_limit {
            let spent = self.monthly_spent(now)?;
            if monthly_limit > 0.0 && spent >= monthly_limit {
                tracing::warn!(spent, limit = monthly_limit, "Monthly budget exhausted");
                return Err(GatewayError::budget_exceeded(format!(
                    "Monthly budget exceeded: ${spent:.2} of ${monthly_limit:.2}"
                )));
            }
        }

        Ok(())
    }

    /// Record a completed request's cost and tokens against the current day
    /// and its per-model breakdown. Emits a non-blocking warning when
    /// accumulated spend crosses the alert threshold; never fails the
    /// surrounding request for threshold reasons.
    pub fn accrue(&self, model: &str, usage: &Usage, cost: f64) -> Result<(), GatewayError> {
        self.accrue_at(model, usage, cost, Utc::now())
    }

    fn accrue_at(
        &self,
        model: &str,
        usage: &Usage,
        cost: f64,
        now: DateTime<Utc>,
    ) -> Result<(), GatewayError> {
        let day = day_key(now);
        let tokens = i64::from(usage.total_tokens);

        let day_total = self.db.with_conn(|conn| {
            let total = conn.query_row(
                "INSERT INTO budget_days (day, cost, requests, tokens) \
                 VALUES (?1, ?2, 1, ?3) \
                 ON CONFLICT(day) DO UPDATE SET \
                   cost = cost + ?2, requests = requests + 1, tokens = tokens + ?3 \
                 RETURNING cost",
                params![day, cost, tokens],
                |row| row.get::<_, f64>(0),
            )?;

            conn.execute(
                "INSERT INTO budget_day_models (day, model, cost, requests, tokens) \
                 VALUES (?1, ?2, ?3, 1, ?4) \
                 ON CONFLICT(day, model) DO UPDATE SET \
                   cost = cost + ?3, requests = requests + 1, tokens = tokens + ?4",
                params![day, model, cost, tokens],
            )?;

            Ok(total)
        })?;

        if let Some(daily_limit) = self.config.daily_limit {
            let threshold = self.config.alert_threshold * daily_limit;
            if daily_limit > 0.0 && day_total >= threshold {
                tracing::warn!(
                    spent = day_total,
                    limit = daily_limit,
                    threshold,
                    "Daily spend crossed alert threshold"
                );
            }
        }

        if let Some(monthly_limit) = self.config.monthly_limit {
            let month_total = self.monthly_spent(now)?;
            let threshold = self.config.alert_threshold * monthly_limit;
            if monthly_limit > 0.0 && month_total >= threshold {
                tracing::warn!(
                    spent = month_total,
                    limit = monthly_limit,
                    threshold,
                    "Monthly spend crossed alert threshold"
                );
            }
        }

        Ok(())
    }

    /// Summarize the current daily or monthly period.
    pub fn usage(&self, period: Period) -> Result<BudgetUsage, GatewayError> {
        self.usage_at(period, Utc::now())
    }

    fn usage_at(&self, period: Period, now: DateTime<Utc>) -> Result<BudgetUsage, GatewayError> {
        let (start, limit) = match period {
            Period::Daily => (day_key(now), self.config.daily_limit),
            Period::Monthly => (month_start_key(now), self.config.monthly_limit),
        };

        let (cost, requests, tokens) = self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT COALESCE(SUM(cost), 0.0), COALESCE(SUM(requests), 0), \
                        COALESCE(SUM(tokens), 0) \
                 FROM budget_days WHERE day >= ?1",
                params![start],
                |row| {
                    Ok((
                        row.get::<_, f64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                    ))
                },
            )
        })?;

        let models = self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT model, SUM(cost), SUM(requests), SUM(tokens) \
                 FROM budget_day_models WHERE day >= ?1 \
                 GROUP BY model ORDER BY SUM(cost) DESC",
            )?;
            let rows = stmt
                .query_map(params![start], |row| {
                    Ok(ModelSpend {
                        model: row.get(0)?,
                        cost: row.get(1)?,
                        requests: row.get::<_, i64>(2)? as u64,
                        tokens: row.get::<_, i64>(3)? as u64,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;

        Ok(BudgetUsage {
            period,
            period_start: start,
            cost,
            requests: requests as u64,
            tokens: tokens as u64,
            limit,
            remaining: limit.map(|l| (l - cost).max(0.0)),
            models,
        })
    }

    fn daily_spent(&self, now: DateTime<Utc>) -> Result<f64, GatewayError> {
        let day = day_key(now);
        let spent = self.db.with_conn(|conn| {
            let result = conn.query_row(
                "SELECT cost FROM budget_days WHERE day = ?1",
                params![day],
                |row| row.get::<_, f64>(0),
            );
            match result {
                Ok(c) => Ok(c),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(0.0),
                Err(e) => Err(e),
            }
        })?;
        Ok(spent)
    }

    fn monthly_spent(&self, now: DateTime<Utc>) -> Result<f64, GatewayError> {
        let start = month_start_key(now);
        let spent = self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT COALESCE(SUM(cost), 0.0) FROM budget_days WHERE day >= ?1",
                params![start],
                |row| row.get::<_, f64>(0),
            )
        })?;
        Ok(spent)
    }
}

/// UTC day key, `YYYY-MM-DD`.
fn day_key(now: DateTime<Utc>) -> String {
    now.format("%Y-%m-%d").to_string()
}

/// First day of the UTC month, `YYYY-MM-01`.
fn month_start_key(now: DateTime<Utc>) -> String {
    format!("{:04}-{:02}-01", now.year(), now.month())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
