//! Structural mutations for hill climbing.
//!
//! Mutations only propose skeletons; the engine fits their constants and
//! decides acceptance.

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use reckon_ir::expr::{BinOp, CmpOp, Expr, Predicate, VarName};
use reckon_ir::types::Axis;

/// The kind of edit a mutation made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mutation {
    /// Nudge one free constant.
    PerturbConstant,
    /// Replace a subtree by an enumerated term.
    ReplaceSubtree,
    /// Change the operator of a binary node.
    SwapOperator,
    /// `e` becomes `e + if(p, c, 0)`.
    AddGuard,
    /// `e` becomes `if(p, scale(k, e), e)`.
    SplitOnGuard,
    /// `e` becomes `max(e, v)`.
    Floor,
}

impl Mutation {
    pub const ALL: [Mutation; 6] = [
        Mutation::PerturbConstant,
        Mutation::ReplaceSubtree,
        Mutation::SwapOperator,
        Mutation::AddGuard,
        Mutation::SplitOnGuard,
        Mutation::Floor,
    ];
}

/// What mutations may draw from.
pub struct MutationContext<'a> {
    /// Replacement subtrees, usually the enumerated levels.
    pub palette: &'a [Expr],
    pub binary_ops: &'a [BinOp],
    pub vars: &'a [VarName],
    /// Axis positions guards may split on.
    pub thresholds: &'a [(Axis, f64)],
}

/// The expression an axis denotes.
pub fn axis_expr(axis: Axis) -> Expr {
    match axis {
        Axis::Var { var } => Expr::var(var),
        Axis::Ratio { num, den } => Expr::div(Expr::var(num), Expr::var(den)),
    }
}

/// Guard `axis op threshold` with an operator suited to the axis.
pub fn guard(axis: Axis, threshold: f64, rng: &mut impl Rng) -> Predicate {
    let ops: &[CmpOp] = match axis {
        // Day counts are integral; equality bands are meaningful.
        Axis::Var { var: VarName::Days } => &[CmpOp::Eq, CmpOp::Ge, CmpOp::Le],
        _ => &[CmpOp::Gt, CmpOp::Ge, CmpOp::Lt, CmpOp::Le],
    };
    let op = ops.choose(rng).copied().unwrap_or(CmpOp::Ge);
    Predicate::new(op, axis_expr(axis), Expr::Const(threshold))
}

/// Apply one random mutation. `None` when the chosen kind has nothing to act on.
pub fn mutate(expr: &Expr, ctx: &MutationContext<'_>, rng: &mut impl Rng) -> Option<(Mutation, Expr)> {
    let kind = *Mutation::ALL.choose(rng)?;
    apply(kind, expr, ctx, rng).map(|e| (kind, e))
}

/// Apply a specific mutation kind.
pub fn apply(kind: Mutation, expr: &Expr, ctx: &MutationContext<'_>, rng: &mut impl Rng) -> Option<Expr> {
    match kind {
        Mutation::PerturbConstant => {
            let constants = expr.constants();
            if constants.is_empty() {
                return None;
            }
            let slot = rng.gen_range(0..constants.len());
            let mut values = constants;
            let jitter = rng.gen_range(-0.25..0.25);
            values[slot] = if values[slot] == 0.0 {
                jitter * 10.0
            } else {
                values[slot] * (1.0 + jitter)
            };
            Some(expr.with_constants(&values))
        }
        Mutation::ReplaceSubtree => {
            let term = ctx.palette.choose(rng)?;
            let index = random_node(expr, rng);
            Some(expr.replace_node(index, term))
        }
        Mutation::SwapOperator => {
            let binaries: Vec<usize> = expr
                .nodes()
                .iter()
                .enumerate()
                .filter(|(_, n)| matches!(n, Expr::Binary { .. }))
                .map(|(i, _)| i)
                .collect();
            let index = *binaries.choose(rng)?;
            let Expr::Binary { op, left, right } = expr.nodes()[index].clone() else {
                return None;
            };
            let others: Vec<BinOp> = ctx.binary_ops.iter().copied().filter(|o| *o != op).collect();
            let new_op = *others.choose(rng)?;
            Some(expr.replace_node(index, &Expr::binary(new_op, *left, *right)))
        }
        Mutation::AddGuard => {
            let (axis, threshold) = *ctx.thresholds.choose(rng)?;
            let index = random_node(expr, rng);
            let target = expr.nodes()[index].clone();
            let adjusted = Expr::add(
                target,
                Expr::branch(guard(axis, threshold, rng), Expr::Const(10.0), Expr::Const(0.0)),
            );
            Some(expr.replace_node(index, &adjusted))
        }
        Mutation::SplitOnGuard => {
            let (axis, threshold) = *ctx.thresholds.choose(rng)?;
            let index = random_node(expr, rng);
            let target = expr.nodes()[index].clone();
            let split = Expr::branch(
                guard(axis, threshold, rng),
                Expr::scale(0.9, target.clone()),
                target,
            );
            Some(expr.replace_node(index, &split))
        }
        Mutation::Floor => {
            let var = *ctx.vars.choose(rng)?;
            Some(Expr::max(expr.clone(), Expr::var(var)))
        }
    }
}

/// Pre-order index of a uniformly chosen node, predicate operands included.
fn random_node(expr: &Expr, rng: &mut impl Rng) -> usize {
    rng.gen_range(0..expr.nodes().len())
}
