//! Constant fitting for a fixed skeleton.
//!
//! Three passes over the free constants (`c0..cN` in pre-order):
//!
//! 1. an optional grid pass that seeds each slot with its best grid value,
//! 2. coordinate-wise pattern search with a shrinking step and a
//!    Hooke-Jeeves extrapolation after each sweep, first on mean
//!    squared error (smooth, finds the basin) then on mean absolute error
//!    (robust, favours exact matches),
//! 3. snapping each constant to the fewest decimals that keep fitness.
//!
//! The result is never worse than the skeleton as given.

use serde::{Deserialize, Serialize};

use reckon_ir::expr::Expr;
use reckon_ir::types::Case;
use reckon_model::eval::{evaluate, is_degenerate, round_half_away};
use reckon_model::score::{fitness, Fitness, DEGENERATE_ERROR};

/// Evenly spaced values tried for every slot before refinement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridRange {
    pub min: f64,
    pub max: f64,
    pub steps: usize,
}

impl GridRange {
    pub fn values(&self) -> Vec<f64> {
        match self.steps {
            0 => Vec::new(),
            1 => vec![self.min],
            n => (0..n)
                .map(|i| self.min + (self.max - self.min) * i as f64 / (n - 1) as f64)
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitConfig {
    /// Full sweeps over all slots per objective.
    pub max_rounds: usize,
    /// Initial step as a fraction of the constant's magnitude (at least this
    /// fraction of one unit).
    pub initial_step_ratio: f64,
    /// Refinement stops once the step falls below this, relative to the
    /// constant's magnitude.
    pub min_step: f64,
    /// Most decimals a constant is snapped to.
    pub snap_decimals: u8,
    pub grid: Option<GridRange>,
    /// Objective evaluations allowed per fit.
    pub max_evaluations: usize,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            max_rounds: 24,
            initial_step_ratio: 0.5,
            min_step: 1e-8,
            snap_decimals: 4,
            grid: None,
            max_evaluations: 20_000,
        }
    }
}

impl FitConfig {
    pub fn problems(&self) -> Vec<String> {
        let mut out = Vec::new();
        if !(self.initial_step_ratio > 0.0) {
            out.push("initial_step_ratio must be positive".to_string());
        }
        if !(self.min_step > 0.0) {
            out.push("min_step must be positive".to_string());
        }
        if self.max_evaluations == 0 {
            out.push("max_evaluations must be positive".to_string());
        }
        out
    }
}

/// A skeleton with its constants fitted.
#[derive(Debug, Clone, PartialEq)]
pub struct Fitted {
    pub expr: Expr,
    pub fitness: Fitness,
    /// Objective evaluations spent.
    pub evaluations: usize,
}

#[derive(Clone, Copy)]
enum Objective {
    Squared,
    Absolute,
}

struct Fitter<'a> {
    skeleton: &'a Expr,
    cases: &'a [Case],
    config: &'a FitConfig,
    evaluations: usize,
}

impl Fitter<'_> {
    fn exhausted(&self) -> bool {
        self.evaluations >= self.config.max_evaluations
    }

    fn loss(&mut self, values: &[f64], objective: Objective) -> f64 {
        self.evaluations += 1;
        let expr = self.skeleton.with_constants(values);
        if self.cases.is_empty() {
            return 0.0;
        }
        let mut sum = 0.0;
        for case in self.cases {
            let out = evaluate(&expr, &case.inputs());
            let err = if is_degenerate(out) {
                DEGENERATE_ERROR
            } else {
                (out - case.expected).abs()
            };
            sum += match objective {
                Objective::Squared => err * err,
                Objective::Absolute => err,
            };
        }
        sum / self.cases.len() as f64
    }

    fn grid(&mut self, values: &mut [f64], range: &GridRange) {
        let mut best = self.loss(values, Objective::Squared);
        for slot in 0..values.len() {
            for candidate in range.values() {
                if self.exhausted() {
                    return;
                }
                let previous = values[slot];
                values[slot] = candidate;
                let l = self.loss(values, Objective::Squared);
                if l < best {
                    best = l;
                } else {
                    values[slot] = previous;
                }
            }
        }
    }

    fn refine(&mut self, values: &mut [f64], objective: Objective) {
        let mut best = self.loss(values, objective);
        for _ in 0..self.config.max_rounds {
            let start = values.to_vec();
            let round_start = best;
            for slot in 0..values.len() {
                best = self.line_search(values, slot, best, objective);
            }
            if self.exhausted() || !(best < round_start) {
                break;
            }
            best = self.pattern_move(values, &start, best, objective);
        }
    }

    /// Extrapolate along the displacement of the last sweep while that keeps
    /// improving. Cuts the zig-zag of coordinate search on correlated slots.
    fn pattern_move(&mut self, values: &mut [f64], start: &[f64], mut best: f64, objective: Objective) -> f64 {
        let delta: Vec<f64> = values.iter().zip(start).map(|(v, s)| v - s).collect();
        let mut scale = 1.0;
        while !self.exhausted() {
            let trial: Vec<f64> = values
                .iter()
                .zip(&delta)
                .map(|(v, d)| v + d * scale)
                .collect();
            let l = self.loss(&trial, objective);
            if l < best {
                best = l;
                values.copy_from_slice(&trial);
                scale *= 2.0;
            } else {
                break;
            }
        }
        best
    }

    /// Pattern search along one slot: expand the step on success, halve it
    /// when neither direction improves.
    fn line_search(&mut self, values: &mut [f64], slot: usize, mut best: f64, objective: Objective) -> f64 {
        let ratio = self.config.initial_step_ratio;
        let mut step = (values[slot].abs() * ratio).max(ratio);
        while step >= self.config.min_step * values[slot].abs().max(1.0) {
            if self.exhausted() {
                break;
            }
            let origin = values[slot];
            let mut moved = false;
            for candidate in [origin + step, origin - step] {
                values[slot] = candidate;
                let l = self.loss(values, objective);
                if l < best {
                    best = l;
                    moved = true;
                    break;
                }
            }
            if moved {
                step *= 2.0;
            } else {
                values[slot] = origin;
                step /= 2.0;
            }
        }
        best
    }

    fn snap(&mut self, values: &mut [f64]) -> Fitness {
        let mut current = fitness(&self.skeleton.with_constants(values), self.cases);
        for slot in 0..values.len() {
            let original = values[slot];
            for decimals in 0..=self.config.snap_decimals {
                let snapped = round_half_away(original, decimals);
                if snapped == original {
                    break;
                }
                values[slot] = snapped;
                self.evaluations += 1;
                let candidate = fitness(&self.skeleton.with_constants(values), self.cases);
                if not_worse(&candidate, &current) {
                    current = candidate;
                    break;
                }
                values[slot] = original;
            }
        }
        current
    }
}

/// `a` has no higher MAE and no fewer exact matches than `b`.
pub fn not_worse(a: &Fitness, b: &Fitness) -> bool {
    a.mean_absolute_error <= b.mean_absolute_error && a.exact_match_count >= b.exact_match_count
}

/// Fit the free constants of `skeleton` to `cases`.
pub fn fit(skeleton: &Expr, cases: &[Case], config: &FitConfig) -> Fitted {
    let original = skeleton.constants();
    let baseline = fitness(skeleton, cases);
    if original.is_empty() {
        return Fitted {
            expr: skeleton.clone(),
            fitness: baseline,
            evaluations: 1,
        };
    }

    let mut fitter = Fitter {
        skeleton,
        cases,
        config,
        evaluations: 1,
    };
    let mut values = original.clone();
    if let Some(range) = &config.grid {
        fitter.grid(&mut values, range);
    }
    fitter.refine(&mut values, Objective::Squared);
    fitter.refine(&mut values, Objective::Absolute);
    let fitted = fitter.snap(&mut values);

    if not_worse(&baseline, &fitted) && baseline != fitted {
        // The refined constants lost exact matches the skeleton had.
        return Fitted {
            expr: skeleton.clone(),
            fitness: baseline,
            evaluations: fitter.evaluations,
        };
    }
    Fitted {
        expr: skeleton.with_constants(&values),
        fitness: fitted,
        evaluations: fitter.evaluations,
    }
}
