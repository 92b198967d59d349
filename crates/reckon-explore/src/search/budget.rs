//! Search budgets and graceful stopping.
//!
//! The engine never fails on exhaustion: it stops, reports why, and hands
//! back the best candidate found so far.

use std::time::Instant;

use serde::{Deserialize, Serialize};

/// Caps on one search run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchBudget {
    /// Candidates fitted and scored before a forced stop.
    pub max_steps: u64,
    /// Wall-clock cap in milliseconds. Nondeterministic; leave generous when
    /// reproducibility matters.
    pub max_wall_millis: u64,
    /// Largest candidate tree, in nodes. Enforced through the engine's
    /// expression limits.
    pub max_nodes: usize,
    /// Deepest candidate tree.
    pub max_depth: usize,
}

impl Default for SearchBudget {
    fn default() -> Self {
        Self {
            max_steps: 20_000,
            max_wall_millis: 60_000,
            max_nodes: 64,
            max_depth: 12,
        }
    }
}

impl SearchBudget {
    /// Problems that make the budget unusable.
    pub fn problems(&self) -> Vec<String> {
        let mut out = Vec::new();
        if self.max_steps == 0 {
            out.push("max_steps must be positive".to_string());
        }
        if self.max_wall_millis == 0 {
            out.push("max_wall_millis must be positive".to_string());
        }
        if self.max_nodes == 0 {
            out.push("max_nodes must be positive".to_string());
        }
        if self.max_depth == 0 {
            out.push("max_depth must be positive".to_string());
        }
        out
    }
}

/// Why a search stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Every case in the active set matches.
    Solved,
    StepBudgetExhausted,
    WallTimeExceeded,
    /// Nothing left to enumerate or mutate.
    SpaceExhausted,
}

impl StopReason {
    pub fn is_solved(self) -> bool {
        self == StopReason::Solved
    }
}

/// Tracks usage against a [`SearchBudget`].
pub struct BudgetChecker {
    budget: SearchBudget,
    start: Instant,
}

impl BudgetChecker {
    pub fn new(budget: SearchBudget) -> Self {
        Self {
            budget,
            start: Instant::now(),
        }
    }

    /// `None` while within budget, otherwise the reason to stop.
    pub fn check(&self, steps: u64) -> Option<StopReason> {
        if steps >= self.budget.max_steps {
            return Some(StopReason::StepBudgetExhausted);
        }
        if self.elapsed_millis() >= self.budget.max_wall_millis {
            return Some(StopReason::WallTimeExceeded);
        }
        None
    }

    /// Steps still available after `steps` have been used.
    pub fn remaining_steps(&self, steps: u64) -> u64 {
        self.budget.max_steps.saturating_sub(steps)
    }

    pub fn elapsed_millis(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_budget_is_valid() {
        assert!(SearchBudget::default().problems().is_empty());
    }

    #[test]
    fn test_zero_budget_rejected() {
        let budget = SearchBudget {
            max_steps: 0,
            max_nodes: 0,
            ..Default::default()
        };
        assert_eq!(budget.problems().len(), 2);
    }

    #[test]
    fn test_step_limit() {
        let checker = BudgetChecker::new(SearchBudget {
            max_steps: 100,
            ..Default::default()
        });
        assert_eq!(checker.check(99), None);
        assert_eq!(checker.check(100), Some(StopReason::StepBudgetExhausted));
        assert_eq!(checker.remaining_steps(40), 60);
        assert_eq!(checker.remaining_steps(400), 0);
    }

    #[test]
    fn test_elapsed_starts_near_zero() {
        let checker = BudgetChecker::new(SearchBudget::default());
        assert!(checker.elapsed_millis() < 1_000);
    }
}
