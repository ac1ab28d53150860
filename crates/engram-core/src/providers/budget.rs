//! Budget manager for LLM-touching operations
//!
//! Every operation that would spend tokens first asks `can_afford`; on denial
//! the caller downgrades (extractor to rules, L11 skipped, contradiction
//! detection rule-only) and surfaces a warning instead of an error. Actual
//! spend is recorded after the call.

use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Spend caps in cost units (rolling windows)
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    pub daily_limit: f64,
    pub hourly_limit: f64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            daily_limit: 1.0,
            hourly_limit: 0.25,
        }
    }
}

/// Aggregate usage counters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageStats {
    pub total_cost: f64,
    pub total_tokens_in: u64,
    pub total_tokens_out: u64,
    pub calls: u64,
    pub denials: u64,
}

#[derive(Debug, Default)]
struct Ledger {
    entries: Vec<(DateTime<Utc>, f64)>,
    stats: UsageStats,
}

/// Rolling-window budget enforcement, shared across a store's operations
pub struct BudgetManager {
    config: BudgetConfig,
    ledger: Mutex<Ledger>,
}

/// Flat blended rate per 1k tokens, deliberately coarse: the budget exists to
/// bound spend, not to bill it.
const COST_PER_1K_TOKENS: f64 = 0.002;

impl BudgetManager {
    pub fn new(config: BudgetConfig) -> Self {
        Self {
            config,
            ledger: Mutex::new(Ledger::default()),
        }
    }

    /// Rough pre-call cost estimate from prompt length
    pub fn estimate_cost(prompt_chars: usize, max_tokens: u32) -> f64 {
        let tokens = prompt_chars as f64 / 4.0 + max_tokens as f64;
        tokens / 1000.0 * COST_PER_1K_TOKENS
    }

    fn spent_since(entries: &[(DateTime<Utc>, f64)], cutoff: DateTime<Utc>) -> f64 {
        entries
            .iter()
            .filter(|(at, _)| *at >= cutoff)
            .map(|(_, cost)| cost)
            .sum()
    }

    /// Whether the estimated spend fits inside both rolling windows
    pub fn can_afford(&self, estimated_cost: f64, operation: &str) -> bool {
        let now = Utc::now();
        let mut ledger = self.ledger.lock().expect("budget ledger poisoned");

        // Drop entries that aged out of the daily window
        let day_cutoff = now - Duration::hours(24);
        ledger.entries.retain(|(at, _)| *at >= day_cutoff);

        let hour_spend = Self::spent_since(&ledger.entries, now - Duration::hours(1));
        let day_spend = Self::spent_since(&ledger.entries, day_cutoff);

        let affordable = hour_spend + estimated_cost <= self.config.hourly_limit
            && day_spend + estimated_cost <= self.config.daily_limit;
        if !affordable {
            ledger.stats.denials += 1;
            tracing::debug!(operation, estimated_cost, "budget denied");
        }
        affordable
    }

    /// Record actual spend after a provider call
    pub fn record_usage(&self, tokens_in: u64, tokens_out: u64, model: &str) {
        let cost = (tokens_in + tokens_out) as f64 / 1000.0 * COST_PER_1K_TOKENS;
        let mut ledger = self.ledger.lock().expect("budget ledger poisoned");
        ledger.entries.push((Utc::now(), cost));
        ledger.stats.total_cost += cost;
        ledger.stats.total_tokens_in += tokens_in;
        ledger.stats.total_tokens_out += tokens_out;
        ledger.stats.calls += 1;
        tracing::debug!(model, tokens_in, tokens_out, cost, "recorded usage");
    }

    pub fn stats(&self) -> UsageStats {
        self.ledger.lock().expect("budget ledger poisoned").stats.clone()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_affordable_within_limits() {
        let budget = BudgetManager::new(BudgetConfig {
            daily_limit: 1.0,
            hourly_limit: 0.5,
        });
        assert!(budget.can_afford(0.1, "extract"));
    }

    #[test]
    fn test_hourly_limit_denies() {
        let budget = BudgetManager::new(BudgetConfig {
            daily_limit: 10.0,
            hourly_limit: 0.01,
        });
        // 10k tokens = 0.02 cost units, above the hourly cap
        budget.record_usage(8000, 2000, "test-model");
        assert!(!budget.can_afford(0.001, "judge"));
        assert_eq!(budget.stats().denials, 1);
    }

    #[test]
    fn test_usage_accumulates() {
        let budget = BudgetManager::new(BudgetConfig::default());
        budget.record_usage(100, 50, "m");
        budget.record_usage(200, 100, "m");
        let stats = budget.stats();
        assert_eq!(stats.calls, 2);
        assert_eq!(stats.total_tokens_in, 300);
        assert_eq!(stats.total_tokens_out, 150);
    }

    #[test]
    fn test_estimate_scales_with_prompt() {
        assert!(BudgetManager::estimate_cost(4000, 200) > BudgetManager::estimate_cost(40, 200));
    }
}
