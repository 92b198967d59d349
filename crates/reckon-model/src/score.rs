//! Scoring and validation of candidate programs against a case set.
//!
//! Pure functions only: the same expression and cases always produce the
//! same score, in the same counter-example order.

use serde::{Deserialize, Serialize};

use reckon_ir::expr::Expr;
use reckon_ir::types::{Case, Program};

use crate::eval::{compute_expr, is_degenerate};

/// A case matches when the absolute error is strictly below this.
pub const TOLERANCE: f64 = 0.01;

/// Error charged for a degenerate evaluation.
pub const DEGENERATE_ERROR: f64 = 1e9;

/// Number of counter-examples reported unless configured otherwise.
pub const DEFAULT_TOP_K: usize = 10;

/// Absolute error of one output, with degenerate outputs charged the maximum.
pub fn case_error(output: f64, expected: f64) -> f64 {
    if is_degenerate(output) {
        DEGENERATE_ERROR
    } else {
        (output - expected).abs()
    }
}

pub fn is_match(error: f64) -> bool {
    error < TOLERANCE
}

/// Aggregate error figures without the counter-example list.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Fitness {
    pub total_cases: usize,
    pub exact_match_count: usize,
    pub mean_absolute_error: f64,
    pub max_error: f64,
}

impl Fitness {
    pub fn misses(&self) -> usize {
        self.total_cases - self.exact_match_count
    }

    pub fn passed(&self) -> bool {
        self.exact_match_count == self.total_cases
    }
}

/// A case the program gets wrong.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CounterExample {
    /// Position in the scored case set.
    pub index: usize,
    pub case: Case,
    /// `None` when the evaluation was degenerate.
    pub actual: Option<f64>,
    pub error: f64,
}

/// Full score of a program on a case set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Score {
    pub total_cases: usize,
    pub exact_match_count: usize,
    pub mean_absolute_error: f64,
    pub max_error: f64,
    /// Highest-error failing cases, descending by error, ties in case order.
    pub counter_examples: Vec<CounterExample>,
}

impl Score {
    pub fn passed(&self) -> bool {
        self.exact_match_count == self.total_cases
    }

    pub fn fitness(&self) -> Fitness {
        Fitness {
            total_cases: self.total_cases,
            exact_match_count: self.exact_match_count,
            mean_absolute_error: self.mean_absolute_error,
            max_error: self.max_error,
        }
    }
}

/// Aggregate figures for `expr` on `cases`. The hot path of the search.
pub fn fitness(expr: &Expr, cases: &[Case]) -> Fitness {
    let mut sum = 0.0;
    let mut max_error: f64 = 0.0;
    let mut exact = 0;

    for case in cases {
        let error = case_error(compute_expr(expr, &case.inputs()), case.expected);
        sum += error;
        max_error = max_error.max(error);
        if is_match(error) {
            exact += 1;
        }
    }

    Fitness {
        total_cases: cases.len(),
        exact_match_count: exact,
        mean_absolute_error: if cases.is_empty() {
            0.0
        } else {
            sum / cases.len() as f64
        },
        max_error,
    }
}

/// Score an expression, keeping the `top_k` worst failing cases.
pub fn score_expr(expr: &Expr, cases: &[Case], top_k: usize) -> Score {
    let mut sum = 0.0;
    let mut max_error: f64 = 0.0;
    let mut exact = 0;
    let mut failures = Vec::new();

    for (index, case) in cases.iter().enumerate() {
        let output = compute_expr(expr, &case.inputs());
        let error = case_error(output, case.expected);
        sum += error;
        max_error = max_error.max(error);
        if is_match(error) {
            exact += 1;
        } else {
            failures.push(CounterExample {
                index,
                case: *case,
                actual: (!is_degenerate(output)).then_some(output),
                error,
            });
        }
    }

    failures.sort_by(|a, b| b.error.total_cmp(&a.error).then(a.index.cmp(&b.index)));
    failures.truncate(top_k);

    Score {
        total_cases: cases.len(),
        exact_match_count: exact,
        mean_absolute_error: if cases.is_empty() {
            0.0
        } else {
            sum / cases.len() as f64
        },
        max_error,
        counter_examples: failures,
    }
}

/// Validate a program against a case set.
pub fn score(program: &Program, cases: &[Case], top_k: usize) -> Score {
    score_expr(&program.root, cases, top_k)
}
