//! Bottom-up enumeration of expression skeletons.
//!
//! Level `n` holds every tree of exactly `n` nodes the grammar can build,
//! after two rounds of pruning: canonical duplicates are dropped, and of
//! several trees with identical outputs on the sample cases only the first in
//! canonical order survives.

use std::collections::HashSet;

use log::debug;
use serde::{Deserialize, Serialize};

use reckon_ir::expr::{BinOp, Expr, VarName};
use reckon_ir::types::Case;
use reckon_model::eval::evaluate;

use super::canon::canonicalize;

/// The building blocks enumeration may use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Grammar {
    pub vars: Vec<VarName>,
    /// Leaf constants.
    pub constants: Vec<f64>,
    /// Factors for `scale(k, e)`.
    pub scale_factors: Vec<f64>,
    /// Precisions for `round(e, d)`.
    pub round_decimals: Vec<u8>,
    pub binary_ops: Vec<BinOp>,
    pub allow_abs: bool,
    /// Largest skeleton enumerated, in nodes.
    pub max_size: usize,
    /// Level width cap. Levels beyond it are truncated in canonical order.
    pub max_level_width: usize,
}

impl Default for Grammar {
    fn default() -> Self {
        Self {
            vars: VarName::ALL.to_vec(),
            constants: vec![
                0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 10.0, 15.0, 20.0, 25.0, 50.0, 75.0, 100.0, 120.0,
                150.0, 180.0, 200.0, 250.0, 300.0, 400.0, 500.0, 600.0, 800.0, 1000.0,
            ],
            scale_factors: vec![0.01, 0.1, 0.25, 0.4, 0.58, 0.8, 1.05],
            round_decimals: vec![0, 2],
            binary_ops: vec![BinOp::Add, BinOp::Sub, BinOp::Max, BinOp::Min],
            allow_abs: false,
            max_size: 5,
            max_level_width: 4_000,
        }
    }
}

impl Grammar {
    /// Problems that make the grammar unusable.
    pub fn problems(&self) -> Vec<String> {
        let mut out = Vec::new();
        if self.vars.is_empty() && self.constants.is_empty() {
            out.push("grammar has no terminals".to_string());
        }
        if self.max_size == 0 {
            out.push("max_size must be positive".to_string());
        }
        if self.max_level_width == 0 {
            out.push("max_level_width must be positive".to_string());
        }
        for k in &self.scale_factors {
            if !k.is_finite() {
                out.push(format!("scale factor {k} is not finite"));
            }
        }
        for c in &self.constants {
            if !c.is_finite() {
                out.push(format!("constant {c} is not finite"));
            }
        }
        out
    }
}

/// Number of cases used for observational equivalence.
pub const SIGNATURE_CASES: usize = 64;

/// Enumerates levels of increasing size on demand.
pub struct Enumerator<'a> {
    grammar: &'a Grammar,
    sample: Vec<Case>,
    levels: Vec<Vec<Expr>>,
    seen_keys: HashSet<String>,
    seen_outputs: HashSet<Vec<u64>>,
    truncated: usize,
    merged: usize,
}

impl<'a> Enumerator<'a> {
    pub fn new(grammar: &'a Grammar, cases: &[Case]) -> Self {
        Self {
            grammar,
            sample: cases.iter().take(SIGNATURE_CASES).copied().collect(),
            levels: vec![Vec::new()],
            seen_keys: HashSet::new(),
            seen_outputs: HashSet::new(),
            truncated: 0,
            merged: 0,
        }
    }

    /// Size of the next level [`Enumerator::next_level`] will produce.
    pub fn next_size(&self) -> usize {
        self.levels.len()
    }

    pub fn is_exhausted(&self) -> bool {
        self.next_size() > self.grammar.max_size
    }

    /// Trees dropped because a level exceeded its width cap.
    pub fn truncated(&self) -> usize {
        self.truncated
    }

    /// Trees merged into an observationally equivalent one.
    pub fn merged(&self) -> usize {
        self.merged
    }

    /// Build and return the next level, or `None` past `max_size`.
    pub fn next_level(&mut self) -> Option<&[Expr]> {
        if self.is_exhausted() {
            return None;
        }
        let size = self.next_size();
        let raw = self.build(size);

        let mut keyed: Vec<(String, Expr)> = raw
            .into_iter()
            .map(|e| {
                let canon = canonicalize(&e);
                (canon.to_string(), canon)
            })
            .filter(|(k, _)| !self.seen_keys.contains(k))
            .collect();
        keyed.sort_by(|a, b| a.0.cmp(&b.0));
        keyed.dedup_by(|a, b| a.0 == b.0);

        let mut level = Vec::new();
        for (key, expr) in keyed {
            self.seen_keys.insert(key);
            // Constant-only trees above size one are folded duplicates.
            if size > 1 && !has_var(&expr) {
                continue;
            }
            let signature = self.signature(&expr);
            if !self.seen_outputs.insert(signature) {
                self.merged += 1;
                continue;
            }
            if level.len() >= self.grammar.max_level_width {
                self.truncated += 1;
                continue;
            }
            level.push(expr);
        }

        debug!(
            "enumerated level {size}: {} trees ({} merged, {} truncated so far)",
            level.len(),
            self.merged,
            self.truncated
        );
        self.levels.push(level);
        self.levels.last().map(|l| l.as_slice())
    }

    fn build(&self, size: usize) -> Vec<Expr> {
        let g = self.grammar;
        let mut out = Vec::new();

        if size == 1 {
            out.extend(g.vars.iter().map(|v| Expr::var(*v)));
            out.extend(g.constants.iter().map(|c| Expr::Const(*c)));
            return out;
        }

        for child in &self.levels[size - 1] {
            for k in &g.scale_factors {
                if !child.is_const() {
                    out.push(Expr::scale(*k, child.clone()));
                }
            }
            for d in &g.round_decimals {
                out.push(Expr::round(child.clone(), *d));
            }
            if g.allow_abs {
                out.push(Expr::abs(child.clone()));
            }
        }

        for left_size in 1..size - 1 {
            let right_size = size - 1 - left_size;
            for left in &self.levels[left_size] {
                for right in &self.levels[right_size] {
                    for op in &g.binary_ops {
                        out.push(Expr::binary(*op, left.clone(), right.clone()));
                    }
                }
            }
        }
        out
    }

    fn signature(&self, expr: &Expr) -> Vec<u64> {
        self.sample
            .iter()
            .map(|c| {
                let v = evaluate(expr, &c.inputs());
                // All degenerate values share one signature slot.
                if v.is_nan() {
                    u64::MAX
                } else {
                    (v + 0.0).to_bits()
                }
            })
            .collect()
    }
}

fn has_var(expr: &Expr) -> bool {
    expr.nodes().into_iter().any(|n| matches!(n, Expr::Var(_)))
}
