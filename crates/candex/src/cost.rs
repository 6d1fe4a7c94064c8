//! Admission control over a rolling daily usage ledger.
//!
//! The guard is read-only and deliberately never fails a batch on its own
//! infrastructure: a ledger read error admits the batch in degraded mode
//! (zero usage assumed) and logs a warning.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::gateway::{DailyUsage, OperationKind, UsageEntry, UsageLedger};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostConfig {
    /// Expected capability calls per file (extract, classify, quick
    /// parse, and an amortized share of full parses).
    #[serde(default = "default_calls_per_file")]
    pub calls_per_file: u32,
    /// Expected spend per file, in account currency.
    #[serde(default = "default_cost_per_file")]
    pub cost_per_file: f64,
    #[serde(default = "default_daily_call_ceiling")]
    pub daily_call_ceiling: u64,
    #[serde(default = "default_daily_cost_ceiling")]
    pub daily_cost_ceiling: f64,
}

fn default_calls_per_file() -> u32 {
    4
}

fn default_cost_per_file() -> f64 {
    0.05
}

fn default_daily_call_ceiling() -> u64 {
    5_000
}

fn default_daily_cost_ceiling() -> f64 {
    50.0
}

impl Default for CostConfig {
    fn default() -> Self {
        Self {
            calls_per_file: default_calls_per_file(),
            cost_per_file: default_cost_per_file(),
            daily_call_ceiling: default_daily_call_ceiling(),
            daily_cost_ceiling: default_daily_cost_ceiling(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CostEstimate {
    pub calls: u64,
    pub cost: f64,
}

/// Admission verdict for one batch.
#[derive(Debug, Clone)]
pub struct CostDecision {
    pub allowed: bool,
    pub reason: Option<String>,
    pub usage: DailyUsage,
    pub estimate: CostEstimate,
}

pub struct CostGuard<'a> {
    config: CostConfig,
    ledger: &'a dyn UsageLedger,
}

impl<'a> CostGuard<'a> {
    pub fn new(config: CostConfig, ledger: &'a dyn UsageLedger) -> Self {
        Self { config, ledger }
    }

    /// Decides whether a batch of `file_count` files may begin today.
    /// Never returns an error: ledger failures fail open.
    pub fn evaluate(&self, file_count: u32) -> CostDecision {
        let today = Utc::now().date_naive();
        let usage = match self.ledger.usage_for(today) {
            Ok(usage) => usage,
            Err(e) => {
                warn!(error = %e, "usage ledger read failed, admitting in degraded mode");
                DailyUsage::zero(today)
            }
        };

        let estimate = CostEstimate {
            calls: u64::from(file_count) * u64::from(self.config.calls_per_file),
            cost: f64::from(file_count) * self.config.cost_per_file,
        };

        let reason = if usage.calls + estimate.calls > self.config.daily_call_ceiling {
            Some(format!(
                "estimated {} calls would exceed the daily call ceiling of {} ({} already used)",
                estimate.calls, self.config.daily_call_ceiling, usage.calls
            ))
        } else if usage.cost + estimate.cost > self.config.daily_cost_ceiling {
            Some(format!(
                "estimated cost {:.2} would exceed the daily cost ceiling of {:.2} ({:.2} already used)",
                estimate.cost, self.config.daily_cost_ceiling, usage.cost
            ))
        } else {
            None
        };

        CostDecision {
            allowed: reason.is_none(),
            reason,
            usage,
            estimate,
        }
    }

    /// Records one completed capability call, keyed by the current UTC
    /// date. Append failures are logged, never raised.
    pub fn record(&self, operation: OperationKind) {
        let now = Utc::now();
        let entry = UsageEntry {
            day: now.date_naive(),
            operation,
            call_count: 1,
            estimated_cost: self.per_call_cost(),
            recorded_at: now,
        };
        if let Err(e) = self.ledger.append(&entry) {
            warn!(
                operation = operation.as_str(),
                error = %e,
                "failed to append usage ledger entry"
            );
        }
    }

    fn per_call_cost(&self) -> f64 {
        self.config.cost_per_file / f64::from(self.config.calls_per_file.max(1))
    }
}
