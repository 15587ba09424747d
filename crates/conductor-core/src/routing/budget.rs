//! Spend tracking against a fixed budget.
//!
//! Spend is held as an atomic count of micro-units (1e-6 of a currency unit)
//! so concurrent routing decisions can commit without a lock. Selection never
//! commits spend; only `record_spend` does.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use conductor_types::config::RoutingConfig;
use serde::{Deserialize, Serialize};

const MICROS_PER_UNIT: f64 = 1_000_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BudgetConfig {
    pub total_budget: f64,
    /// Fraction of the budget at which a single warning is emitted.
    pub warning_threshold: f64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            total_budget: 100.0,
            warning_threshold: 0.8,
        }
    }
}

impl From<&RoutingConfig> for BudgetConfig {
    fn from(config: &RoutingConfig) -> Self {
        Self {
            total_budget: config.total_budget,
            warning_threshold: config.warning_threshold,
        }
    }
}

/// Status returned after committing spend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetStatus {
    Ok,
    /// Just crossed the warning threshold. Returned once per tracker.
    Warning,
    /// At or over the total budget.
    Exhausted,
}

/// Atomic spend tracker. Clones share the same counters.
#[derive(Debug, Clone)]
pub struct BudgetTracker {
    total_micros: u64,
    warning_micros: u64,
    spent_micros: Arc<AtomicU64>,
    warning_emitted: Arc<AtomicBool>,
}

impl BudgetTracker {
    pub fn new(config: BudgetConfig) -> Self {
        let total_micros = to_micros(config.total_budget);
        let warning_micros =
            (total_micros as f64 * config.warning_threshold.clamp(0.0, 1.0)).round() as u64;
        Self {
            total_micros,
            warning_micros,
            spent_micros: Arc::new(AtomicU64::new(0)),
            warning_emitted: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Whether committing `cost` would go past the total budget.
    pub fn would_exceed(&self, cost: f64) -> bool {
        self.spent_micros
            .load(Ordering::SeqCst)
            .saturating_add(to_micros(cost))
            > self.total_micros
    }

    /// Atomically commit `cost` and report where the budget now stands.
    pub fn record_spend(&self, cost: f64) -> BudgetStatus {
        let amount = to_micros(cost);
        let prev = self.spent_micros.fetch_add(amount, Ordering::SeqCst);
        let new_total = prev.saturating_add(amount);

        if new_total >= self.total_micros {
            tracing::warn!(spent = from_micros(new_total), "budget exhausted");
            return BudgetStatus::Exhausted;
        }

        if prev < self.warning_micros
            && new_total >= self.warning_micros
            && self
                .warning_emitted
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        {
            tracing::warn!(
                spent = from_micros(new_total),
                total = from_micros(self.total_micros),
                "budget warning threshold crossed"
            );
            return BudgetStatus::Warning;
        }

        BudgetStatus::Ok
    }

    pub fn spent(&self) -> f64 {
        from_micros(self.spent_micros.load(Ordering::SeqCst))
    }

    pub fn remaining(&self) -> f64 {
        from_micros(
            self.total_micros
                .saturating_sub(self.spent_micros.load(Ordering::SeqCst)),
        )
    }

    pub fn total_budget(&self) -> f64 {
        from_micros(self.total_micros)
    }
}

fn to_micros(amount: f64) -> u64 {
    if amount.is_finite() && amount > 0.0 {
        (amount * MICROS_PER_UNIT).round() as u64
    } else {
        0
    }
}

fn from_micros(micros: u64) -> f64 {
    micros as f64 / MICROS_PER_UNIT
}
