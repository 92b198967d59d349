//! Canonical forms for structural deduplication.
//!
//! Canonicalization folds constant subtrees, merges nested scales, drops
//! identity operations and orders the operands of commutative operators by
//! their canonical text.
//! Two trees with the same canonical text compute the same function, so the
//! search only ever fits and scores one of them.

use reckon_ir::expr::{BinOp, Expr, Predicate, UnaryOp};
use reckon_ir::types::Inputs;
use reckon_model::eval::{evaluate, is_degenerate, test};

/// Canonical rewrite of `expr`. Never changes the computed function beyond
/// floating-point rounding of merged scale factors.
pub fn canonicalize(expr: &Expr) -> Expr {
    match expr {
        Expr::Const(_) | Expr::Var(_) => expr.clone(),
        Expr::Binary { op, left, right } => {
            let left = canonicalize(left);
            let right = canonicalize(right);
            simplify_binary(*op, left, right)
        }
        Expr::Scale { factor, expr: inner } => {
            let inner = canonicalize(inner);
            let (factor, inner) = match inner {
                Expr::Scale { factor: f, expr: e } if (factor * f).is_finite() => (factor * f, *e),
                other => (*factor, other),
            };
            if factor == 1.0 {
                return inner;
            }
            fold(Expr::scale(factor, inner))
        }
        Expr::Round { expr: inner, decimals } => {
            let inner = canonicalize(inner);
            match &inner {
                // Rounding an already coarser rounding is a no-op.
                Expr::Round { decimals: d, .. } if d <= decimals => inner,
                _ => fold(Expr::round(inner, *decimals)),
            }
        }
        Expr::Unary { op, expr: inner } => {
            let inner = canonicalize(inner);
            match (op, &inner) {
                (UnaryOp::Abs, Expr::Unary { op: UnaryOp::Abs, .. }) => inner,
                _ => fold(Expr::Unary {
                    op: *op,
                    expr: Box::new(inner),
                }),
            }
        }
        Expr::If {
            cond,
            then_branch,
            else_branch,
        } => {
            let cond = Predicate::new(cond.op, canonicalize(&cond.left), canonicalize(&cond.right));
            let then_branch = canonicalize(then_branch);
            let else_branch = canonicalize(else_branch);

            if cond.left.is_const() && cond.right.is_const() {
                match test(&cond, &NO_INPUTS) {
                    Some(true) => return then_branch,
                    Some(false) => return else_branch,
                    None => {}
                }
            }
            if then_branch == else_branch && !predicate_can_degenerate(&cond) {
                return then_branch;
            }
            Expr::branch(cond, then_branch, else_branch)
        }
    }
}

/// Text of the canonical form. Used as the deduplication key.
pub fn canonical_key(expr: &Expr) -> String {
    canonicalize(expr).to_string()
}

const NO_INPUTS: Inputs = Inputs {
    days: 1,
    miles: 0.0,
    receipts: 0.0,
};

fn simplify_binary(op: BinOp, left: Expr, right: Expr) -> Expr {
    let (left, right) = if op.is_commutative() && right.to_string() < left.to_string() {
        (right, left)
    } else {
        (left, right)
    };

    let is = |e: &Expr, v: f64| matches!(e, Expr::Const(c) if *c == v);
    match op {
        BinOp::Add if is(&left, 0.0) => return right,
        BinOp::Add | BinOp::Sub if is(&right, 0.0) => return left,
        BinOp::Mul if is(&left, 1.0) => return right,
        BinOp::Mul | BinOp::Div if is(&right, 1.0) => return left,
        BinOp::Max | BinOp::Min if left == right => return left,
        BinOp::Sub if left == right && !may_degenerate(&left) => return Expr::Const(0.0),
        _ => {}
    }

    fold(Expr::binary(op, left, right))
}

/// Replace a variable-free node by its value, unless that value is degenerate.
fn fold(expr: Expr) -> Expr {
    if has_var(&expr) {
        return expr;
    }
    let value = evaluate(&expr, &NO_INPUTS);
    if is_degenerate(value) {
        expr
    } else {
        Expr::Const(value)
    }
}

fn has_var(expr: &Expr) -> bool {
    expr.nodes().into_iter().any(|n| matches!(n, Expr::Var(_)))
}

/// Only division can turn finite inputs into the degenerate sentinel.
fn may_degenerate(expr: &Expr) -> bool {
    expr.nodes()
        .into_iter()
        .any(|n| matches!(n, Expr::Binary { op: BinOp::Div, .. }))
}

/// A degenerate predicate poisons the whole `If`.
fn predicate_can_degenerate(cond: &Predicate) -> bool {
    may_degenerate(&cond.left) || may_degenerate(&cond.right)
}
