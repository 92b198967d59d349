//! Fuzz cases around a program's decision boundaries.
//!
//! Samples come from three regions: neighbourhoods of every threshold the
//! program compares an input (or an input ratio) against, the corners of
//! the input domain, and uniform draws. The oracle labels each sample. The
//! labeled cases form an extended validation set and never enter the corpus.

use std::collections::HashSet;

use log::debug;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use reckon_ir::expr::{BinOp, Expr, VarName};
use reckon_ir::types::{Axis, Case, FuzzCase, Inputs, Region};
use reckon_model::eval::round_half_away;
use reckon_oracle::{Oracle, OracleError};

use crate::search::rng::{stream_rng, FUZZ_STREAM};

/// Input ranges fuzzing samples from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Domain {
    pub min_days: u32,
    pub max_days: u32,
    pub min_miles: f64,
    pub max_miles: f64,
    pub min_receipts: f64,
    pub max_receipts: f64,
}

impl Default for Domain {
    fn default() -> Self {
        Self {
            min_days: 1,
            max_days: 14,
            min_miles: 0.0,
            max_miles: 1500.0,
            min_receipts: 0.0,
            max_receipts: 2500.0,
        }
    }
}

impl Domain {
    pub fn contains(&self, inputs: &Inputs) -> bool {
        (self.min_days..=self.max_days).contains(&inputs.days)
            && inputs.miles >= self.min_miles
            && inputs.miles <= self.max_miles
            && inputs.receipts >= self.min_receipts
            && inputs.receipts <= self.max_receipts
    }

    pub fn problems(&self) -> Vec<String> {
        let mut out = Vec::new();
        if self.min_days < 1 || self.min_days > self.max_days {
            out.push(format!(
                "day range {}..={} is empty or below one",
                self.min_days, self.max_days
            ));
        }
        if !(self.min_miles >= 0.0 && self.min_miles <= self.max_miles && self.max_miles.is_finite()) {
            out.push(format!("mile range {}..={} is invalid", self.min_miles, self.max_miles));
        }
        if !(self.min_receipts >= 0.0
            && self.min_receipts <= self.max_receipts
            && self.max_receipts.is_finite())
        {
            out.push(format!(
                "receipt range {}..={} is invalid",
                self.min_receipts, self.max_receipts
            ));
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FuzzConfig {
    /// Offsets added to every threshold. Day thresholds round to whole days.
    pub offsets: Vec<f64>,
    pub uniform_samples: usize,
    /// Include the corners of the domain.
    pub extremes: bool,
    /// Most samples per round, breakpoints first.
    pub max_cases: usize,
    pub domain: Domain,
}

impl Default for FuzzConfig {
    fn default() -> Self {
        Self {
            offsets: vec![-1.0, -0.01, 0.0, 0.01, 1.0],
            uniform_samples: 200,
            extremes: true,
            max_cases: 2_000,
            domain: Domain::default(),
        }
    }
}

impl FuzzConfig {
    pub fn problems(&self) -> Vec<String> {
        let mut out = self.domain.problems();
        if self.max_cases == 0 {
            out.push("max_cases must be positive".to_string());
        }
        if self.offsets.iter().any(|o| !o.is_finite()) {
            out.push("offsets must be finite".to_string());
        }
        out
    }
}

/// The axis an expression denotes: a bare input or `input / input`.
pub fn axis_of(expr: &Expr) -> Option<Axis> {
    match expr {
        Expr::Var(var) => Some(Axis::Var { var: *var }),
        Expr::Binary {
            op: BinOp::Div,
            left,
            right,
        } => match (left.as_ref(), right.as_ref()) {
            (Expr::Var(num), Expr::Var(den)) => Some(Axis::Ratio {
                num: *num,
                den: *den,
            }),
            _ => None,
        },
        _ => None,
    }
}

/// Every `(axis, threshold)` the program branches or clamps on, in
/// pre-order, without duplicates.
///
/// Covers predicates `axis op c` (either side), and the clamps of tiered
/// schedules: `max(axis - c, k)` and `min(axis, k)` style nodes.
pub fn program_breakpoints(expr: &Expr) -> Vec<(Axis, f64)> {
    let mut out: Vec<(Axis, f64)> = Vec::new();
    let mut push = |axis: Axis, t: f64| {
        if t.is_finite() && !out.contains(&(axis, t)) {
            out.push((axis, t));
        }
    };

    for node in expr.nodes() {
        match node {
            Expr::If { cond, .. } => match (axis_of(&cond.left), cond.right.as_ref()) {
                (Some(axis), Expr::Const(t)) => push(axis, *t),
                _ => {
                    if let (Expr::Const(t), Some(axis)) = (cond.left.as_ref(), axis_of(&cond.right)) {
                        push(axis, *t);
                    }
                }
            },
            Expr::Binary {
                op: BinOp::Max | BinOp::Min,
                left,
                right,
            } => {
                let (term, bound) = match (left.as_ref(), right.as_ref()) {
                    (term, Expr::Const(k)) | (Expr::Const(k), term) => (term, *k),
                    _ => continue,
                };
                if let Some(axis) = axis_of(term) {
                    push(axis, bound);
                } else if let Expr::Binary {
                    op: BinOp::Sub,
                    left: inner,
                    right: offset,
                } = term
                {
                    if let (Some(axis), Expr::Const(c)) = (axis_of(inner), offset.as_ref()) {
                        push(axis, c + bound);
                    }
                }
            }
            _ => {}
        }
    }
    out
}

/// Deterministic sampler. One generator per campaign; successive calls to
/// [`FuzzGenerator::sample`] continue the same random stream.
pub struct FuzzGenerator {
    config: FuzzConfig,
    rng: ChaCha8Rng,
}

impl FuzzGenerator {
    pub fn new(config: FuzzConfig, seed: u64) -> Self {
        Self {
            config,
            rng: stream_rng(seed, FUZZ_STREAM),
        }
    }

    pub fn config(&self) -> &FuzzConfig {
        &self.config
    }

    /// Unlabeled samples for `expr`: breakpoint neighbourhoods of the
    /// program's thresholds and of `extra`, then extremes, then uniform
    /// draws. Duplicates are dropped and the total is capped at `max_cases`.
    pub fn sample(&mut self, expr: &Expr, extra: &[(Axis, f64)]) -> Vec<(Inputs, Region)> {
        let mut thresholds = program_breakpoints(expr);
        for t in extra {
            if !thresholds.contains(t) {
                thresholds.push(*t);
            }
        }

        let mut out = Vec::new();
        let mut seen = HashSet::new();
        let max = self.config.max_cases;
        let mut keep = |inputs: Inputs, region: Region, out: &mut Vec<(Inputs, Region)>| {
            if out.len() < max && seen.insert(key(&inputs)) {
                out.push((inputs, region));
            }
        };

        for (axis, threshold) in &thresholds {
            for offset in self.config.offsets.clone() {
                if let Some(inputs) = self.near(*axis, threshold + offset) {
                    keep(
                        inputs,
                        Region::Breakpoint {
                            axis: *axis,
                            threshold: *threshold,
                            offset,
                        },
                        &mut out,
                    );
                }
            }
        }
        if self.config.extremes {
            for inputs in self.corners() {
                keep(inputs, Region::Extreme, &mut out);
            }
        }
        for _ in 0..self.config.uniform_samples {
            let inputs = self.uniform();
            keep(inputs, Region::Uniform, &mut out);
        }

        debug!(
            "sampled {} fuzz inputs around {} thresholds",
            out.len(),
            thresholds.len()
        );
        out
    }

    /// Sample and label in one go.
    pub fn generate<O: Oracle>(
        &mut self,
        expr: &Expr,
        extra: &[(Axis, f64)],
        oracle: &O,
    ) -> Result<Vec<FuzzCase>, OracleError> {
        let samples = self.sample(expr, extra);
        label(oracle, samples)
    }

    fn uniform(&mut self) -> Inputs {
        let d = &self.config.domain;
        let days = self.rng.gen_range(d.min_days..=d.max_days);
        let miles = self.rng.gen_range(d.min_miles..=d.max_miles).round().clamp(d.min_miles, d.max_miles);
        let receipts = round_half_away(self.rng.gen_range(d.min_receipts..=d.max_receipts), 2)
            .clamp(d.min_receipts, d.max_receipts);
        Inputs::new(days, miles, receipts)
    }

    /// A point at `position` along `axis`; the other inputs are drawn
    /// uniformly. `None` when the point falls outside the domain.
    fn near(&mut self, axis: Axis, position: f64) -> Option<Inputs> {
        let mut inputs = self.uniform();
        match axis {
            Axis::Var { var } => set(&mut inputs, var, position),
            Axis::Ratio { num, den } => {
                let scale = inputs.get(den);
                set(&mut inputs, num, position * scale);
            }
        }
        self.config.domain.contains(&inputs).then_some(inputs)
    }

    fn corners(&self) -> Vec<Inputs> {
        let d = &self.config.domain;
        let mut out = Vec::with_capacity(8);
        for days in [d.min_days, d.max_days] {
            for miles in [d.min_miles, d.max_miles] {
                for receipts in [d.min_receipts, d.max_receipts] {
                    out.push(Inputs::new(days, miles, receipts));
                }
            }
        }
        out
    }
}

fn set(inputs: &mut Inputs, var: VarName, value: f64) {
    match var {
        VarName::Days => {
            let days = value.round();
            inputs.days = if days >= 1.0 && days <= u32::MAX as f64 {
                days as u32
            } else {
                0
            };
        }
        VarName::Miles => inputs.miles = round_half_away(value, 2),
        VarName::Receipts => inputs.receipts = round_half_away(value, 2),
    }
}

fn key(inputs: &Inputs) -> (u32, u64, u64) {
    // +0.0 folds a negative zero.
    (
        inputs.days,
        (inputs.miles + 0.0).to_bits(),
        (inputs.receipts + 0.0).to_bits(),
    )
}

/// Ask the oracle for every sample, preserving order. The first failure
/// aborts labeling.
pub fn label<O: Oracle>(oracle: &O, samples: Vec<(Inputs, Region)>) -> Result<Vec<FuzzCase>, OracleError> {
    samples
        .into_par_iter()
        .map(|(inputs, region)| {
            let expected = oracle.ask(inputs.days, inputs.miles, inputs.receipts)?;
            Ok(FuzzCase {
                case: Case::new(inputs.days, inputs.miles, inputs.receipts, expected),
                region,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use reckon_ir::expr::{CmpOp, Predicate};

    #[test]
    fn test_breakpoints_from_predicates_and_clamps() {
        let expr = Expr::add(
            Expr::branch(
                Predicate::new(
                    CmpOp::Gt,
                    Expr::div(Expr::var(VarName::Receipts), Expr::var(VarName::Days)),
                    Expr::Const(90.0),
                ),
                Expr::Const(1.0),
                Expr::Const(0.0),
            ),
            Expr::max(
                Expr::sub(Expr::var(VarName::Miles), Expr::Const(100.0)),
                Expr::Const(0.0),
            ),
        );
        let points = program_breakpoints(&expr);
        assert_eq!(
            points,
            vec![
                (
                    Axis::Ratio {
                        num: VarName::Receipts,
                        den: VarName::Days
                    },
                    90.0
                ),
                (Axis::Var { var: VarName::Miles }, 100.0),
            ]
        );
    }

    #[test]
    fn test_reversed_predicate_and_min_clamp() {
        let expr = Expr::add(
            Expr::branch(
                Predicate::new(CmpOp::Lt, Expr::Const(5.0), Expr::var(VarName::Days)),
                Expr::Const(1.0),
                Expr::Const(0.0),
            ),
            Expr::min(Expr::var(VarName::Miles), Expr::Const(100.0)),
        );
        let points = program_breakpoints(&expr);
        assert!(points.contains(&(Axis::Var { var: VarName::Days }, 5.0)));
        assert!(points.contains(&(Axis::Var { var: VarName::Miles }, 100.0)));
    }

    #[test]
    fn test_samples_stay_in_domain_and_hit_thresholds() {
        let expr = Expr::branch(
            Predicate::new(CmpOp::Ge, Expr::var(VarName::Receipts), Expr::Const(800.0)),
            Expr::Const(1.0),
            Expr::Const(0.0),
        );
        let config = FuzzConfig::default();
        let domain = config.domain;
        let mut gen = FuzzGenerator::new(config, 42);
        let samples = gen.sample(&expr, &[]);
        assert!(samples.iter().all(|(i, _)| domain.contains(i)));
        let near: Vec<f64> = samples
            .iter()
            .filter(|(_, r)| matches!(r, Region::Breakpoint { .. }))
            .map(|(i, _)| i.receipts)
            .collect();
        for want in [799.0, 799.99, 800.0, 800.01, 801.0] {
            assert!(near.contains(&want), "missing receipts {want}: {near:?}");
        }
        assert!(samples.iter().any(|(_, r)| *r == Region::Extreme));
    }

    #[test]
    fn test_day_thresholds_round_to_whole_days() {
        let expr = Expr::branch(
            Predicate::new(CmpOp::Eq, Expr::var(VarName::Days), Expr::Const(5.0)),
            Expr::Const(1.0),
            Expr::Const(0.0),
        );
        let config = FuzzConfig {
            uniform_samples: 0,
            extremes: false,
            ..Default::default()
        };
        let mut gen = FuzzGenerator::new(config, 1);
        let days: HashSet<u32> = gen.sample(&expr, &[]).iter().map(|(i, _)| i.days).collect();
        assert_eq!(days, HashSet::from([4, 5, 6]));
    }

    #[test]
    fn test_sampling_is_deterministic() {
        let expr = Expr::var(VarName::Miles);
        let run = || {
            let mut gen = FuzzGenerator::new(FuzzConfig::default(), 9);
            gen.sample(&expr, &[(Axis::Var { var: VarName::Miles }, 500.0)])
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_cap_respected() {
        let config = FuzzConfig {
            max_cases: 10,
            ..Default::default()
        };
        let mut gen = FuzzGenerator::new(config, 3);
        assert_eq!(gen.sample(&Expr::var(VarName::Days), &[]).len(), 10);
    }

    #[test]
    fn test_label_uses_oracle() {
        let oracle = reckon_oracle::FnOracle::new(|d, m, _r| 100.0 * d as f64 + m);
        let samples = vec![(Inputs::new(2, 10.0, 0.0), Region::Uniform)];
        let cases = label(&oracle, samples).unwrap();
        assert_eq!(cases[0].case.expected, 210.0);
        assert_eq!(cases[0].region, Region::Uniform);
    }
}
