//! Between-run rule ordering feedback.
//!
//! An advisor looks at the per-rule statistics of a finished run and may
//! propose a new execution order. The pipeline only consults it between
//! runs; a file's iteration loop always sees a fixed order.

use crate::report::RuleStats;
use std::collections::BTreeMap;

pub trait RuleOrderAdvisor: Send + Sync {
    /// Propose a new order for `current`, or `None` to keep it.
    fn adjust_rule_order(
        &self,
        stats: &BTreeMap<String, RuleStats>,
        current: &[String],
    ) -> Option<Vec<String>>;
}

/// Moves rules with a higher success rate earlier.
///
/// Rules with fewer than `min_samples` applied or failed fixes are treated
/// as perfect, so a rule is never demoted on thin evidence. Ties keep the
/// current order.
#[derive(Debug, Clone, Copy)]
pub struct SuccessRateAdvisor {
    pub min_samples: usize,
}

impl Default for SuccessRateAdvisor {
    fn default() -> Self {
        Self { min_samples: 1 }
    }
}

impl SuccessRateAdvisor {
    fn rate(&self, stats: Option<&RuleStats>) -> f64 {
        match stats {
            Some(s) if s.applied + s.failed >= self.min_samples => s.success_rate(),
            _ => 1.0,
        }
    }
}

impl RuleOrderAdvisor for SuccessRateAdvisor {
    fn adjust_rule_order(
        &self,
        stats: &BTreeMap<String, RuleStats>,
        current: &[String],
    ) -> Option<Vec<String>> {
        if stats.is_empty() {
            return None;
        }

        let mut ranked: Vec<(f64, &String)> = current
            .iter()
            .map(|id| (self.rate(stats.get(id)), id))
            .collect();
        // Stable: equal rates keep their current position
        ranked.sort_by(|a, b| b.0.total_cmp(&a.0));

        let order: Vec<String> = ranked.into_iter().map(|(_, id)| id.clone()).collect();
        (order != current).then_some(order)
    }
}
