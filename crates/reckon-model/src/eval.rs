//! Deterministic, total evaluation of the expression grammar.
//!
//! Evaluation never fails. Degenerate arithmetic (a divisor within
//! [`DIV_EPSILON`] of zero, or any non-finite intermediate) yields the
//! [`DEGENERATE`] sentinel, which propagates through every operator and is
//! penalized by the scorer.

use reckon_ir::expr::{BinOp, CmpOp, Expr, Predicate, UnaryOp};
use reckon_ir::types::{Inputs, Program};

/// Divisors smaller than this in magnitude make the node degenerate.
pub const DIV_EPSILON: f64 = 1e-9;

/// Tolerance used by comparisons.
pub const CMP_EPSILON: f64 = 1e-9;

/// Precision of the top-level currency rounding.
pub const CURRENCY_DECIMALS: u8 = 2;

/// Sentinel for ill-formed results.
pub const DEGENERATE: f64 = f64::NAN;

pub fn is_degenerate(value: f64) -> bool {
    !value.is_finite()
}

/// Evaluate an expression against one input triple.
pub fn evaluate(expr: &Expr, inputs: &Inputs) -> f64 {
    let value = match expr {
        Expr::Const(c) => *c,
        Expr::Var(v) => inputs.get(*v),
        Expr::Binary { op, left, right } => {
            let l = evaluate(left, inputs);
            if is_degenerate(l) {
                return DEGENERATE;
            }
            let r = evaluate(right, inputs);
            if is_degenerate(r) {
                return DEGENERATE;
            }
            apply_binary(*op, l, r)
        }
        Expr::Scale { factor, expr } => factor * evaluate(expr, inputs),
        Expr::Round { expr, decimals } => round_half_away(evaluate(expr, inputs), *decimals),
        Expr::Unary { op, expr } => match op {
            UnaryOp::Abs => evaluate(expr, inputs).abs(),
        },
        Expr::If {
            cond,
            then_branch,
            else_branch,
        } => match test(cond, inputs) {
            Some(true) => evaluate(then_branch, inputs),
            Some(false) => evaluate(else_branch, inputs),
            None => DEGENERATE,
        },
    };

    if is_degenerate(value) {
        DEGENERATE
    } else {
        value
    }
}

fn apply_binary(op: BinOp, l: f64, r: f64) -> f64 {
    match op {
        BinOp::Add => l + r,
        BinOp::Sub => l - r,
        BinOp::Mul => l * r,
        BinOp::Div => {
            if r.abs() < DIV_EPSILON {
                DEGENERATE
            } else {
                l / r
            }
        }
        BinOp::Max => l.max(r),
        BinOp::Min => l.min(r),
    }
}

/// Evaluate a predicate. `None` when either side is degenerate.
pub fn test(pred: &Predicate, inputs: &Inputs) -> Option<bool> {
    let l = evaluate(&pred.left, inputs);
    let r = evaluate(&pred.right, inputs);
    if is_degenerate(l) || is_degenerate(r) {
        return None;
    }
    Some(compare(pred.op, l, r))
}

/// Epsilon-tolerant comparison.
pub fn compare(op: CmpOp, l: f64, r: f64) -> bool {
    match op {
        CmpOp::Eq => (l - r).abs() < CMP_EPSILON,
        CmpOp::Ne => (l - r).abs() >= CMP_EPSILON,
        CmpOp::Lt => l < r - CMP_EPSILON,
        CmpOp::Le => l <= r + CMP_EPSILON,
        CmpOp::Gt => l > r + CMP_EPSILON,
        CmpOp::Ge => l >= r - CMP_EPSILON,
    }
}

/// Every f64 at or above this magnitude is an integer.
const EXACT_INTEGER_BOUND: f64 = 4_503_599_627_370_496.0;

/// Upper bound on the half-way window, well below one half.
const MAX_HALF_NOISE: f64 = 0.05;

/// Round half away from zero at `decimals` digits.
///
/// The half-way decision is made on the decimal value: a scaled fraction
/// within representation noise of 0.5 counts as exactly one half, so
/// `2.675` rounds to `2.68` even though its binary value is slightly below.
pub fn round_half_away(value: f64, decimals: u8) -> f64 {
    if is_degenerate(value) {
        return DEGENERATE;
    }
    let factor = 10f64.powi(decimals as i32);
    let scaled = value * factor;
    if scaled.abs() >= EXACT_INTEGER_BOUND {
        // Already an integer at this precision.
        return value;
    }
    let whole = scaled.trunc();
    let frac = (scaled - whole).abs();
    let noise = (scaled.abs() * 4.0 * f64::EPSILON).clamp(1e-9, MAX_HALF_NOISE);

    let rounded = if (frac - 0.5).abs() <= noise {
        whole + scaled.signum()
    } else {
        scaled.round()
    };
    rounded / factor
}

/// Evaluate and apply the currency rounding.
pub fn compute_expr(expr: &Expr, inputs: &Inputs) -> f64 {
    round_half_away(evaluate(expr, inputs), CURRENCY_DECIMALS)
}

/// The execution interface: a program's amount for one trip, rounded to cents.
pub fn compute(program: &Program, days: u32, miles: f64, receipts: f64) -> f64 {
    compute_expr(&program.root, &Inputs::new(days, miles, receipts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use reckon_ir::expr::VarName;

    fn inputs() -> Inputs {
        Inputs::new(3, 150.0, 12.34)
    }

    #[test]
    fn test_vars_and_arithmetic() {
        let expr = Expr::add(
            Expr::scale(100.0, Expr::var(VarName::Days)),
            Expr::sub(Expr::var(VarName::Miles), Expr::Const(50.0)),
        );
        assert_eq!(evaluate(&expr, &inputs()), 400.0);
    }

    #[test]
    fn test_division_guard() {
        let expr = Expr::div(Expr::var(VarName::Miles), Expr::Const(0.0));
        assert!(is_degenerate(evaluate(&expr, &inputs())));

        let tiny = Expr::div(Expr::Const(1.0), Expr::Const(1e-12));
        assert!(is_degenerate(evaluate(&tiny, &inputs())));

        let fine = Expr::div(Expr::var(VarName::Miles), Expr::var(VarName::Days));
        assert_eq!(evaluate(&fine, &inputs()), 50.0);
    }

    #[test]
    fn test_degenerate_propagates_through_max_and_min() {
        let bad = Expr::div(Expr::Const(1.0), Expr::Const(0.0));
        let expr = Expr::max(bad.clone(), Expr::Const(5.0));
        assert!(is_degenerate(evaluate(&expr, &inputs())));
        let expr = Expr::min(Expr::Const(5.0), bad);
        assert!(is_degenerate(evaluate(&expr, &inputs())));
    }

    #[test]
    fn test_degenerate_predicate_poisons_if() {
        let bad = Expr::div(Expr::Const(1.0), Expr::Const(0.0));
        let expr = Expr::branch(
            Predicate::new(CmpOp::Gt, bad, Expr::Const(0.0)),
            Expr::Const(1.0),
            Expr::Const(2.0),
        );
        assert!(is_degenerate(evaluate(&expr, &inputs())));
    }

    #[test]
    fn test_if_takes_one_branch() {
        // The untaken branch is degenerate; taking the other one must not care.
        let bad = Expr::div(Expr::Const(1.0), Expr::Const(0.0));
        let expr = Expr::branch(
            Predicate::new(CmpOp::Eq, Expr::var(VarName::Days), Expr::Const(3.0)),
            Expr::Const(7.0),
            bad,
        );
        assert_eq!(evaluate(&expr, &inputs()), 7.0);
    }

    #[test]
    fn test_comparisons_use_epsilon() {
        assert!(compare(CmpOp::Eq, 0.1 + 0.2, 0.3));
        assert!(!compare(CmpOp::Ne, 0.1 + 0.2, 0.3));
        assert!(!compare(CmpOp::Lt, 0.3, 0.1 + 0.2));
        assert!(compare(CmpOp::Le, 0.1 + 0.2, 0.3));
        assert!(!compare(CmpOp::Gt, 0.1 + 0.2, 0.3));
        assert!(compare(CmpOp::Ge, 0.3, 0.1 + 0.2));
        assert!(compare(CmpOp::Lt, 1.0, 2.0));
        assert!(compare(CmpOp::Gt, 2.0, 1.0));
    }

    #[test]
    fn test_round_half_away_from_zero() {
        assert_eq!(round_half_away(2.5, 0), 3.0);
        assert_eq!(round_half_away(-2.5, 0), -3.0);
        assert_eq!(round_half_away(2.675, 2), 2.68);
        assert_eq!(round_half_away(1.005, 2), 1.01);
        assert_eq!(round_half_away(380.504, 2), 380.5);
        assert_eq!(round_half_away(-0.125, 2), -0.13);
        assert_eq!(round_half_away(7.0, 2), 7.0);
    }

    #[test]
    fn test_round_large_magnitudes() {
        assert_eq!(round_half_away(6e12, 2), 6e12);
        assert_eq!(round_half_away(-6e12, 2), -6e12);
        assert_eq!(round_half_away(6e14, 2), 6e14);
        assert_eq!(round_half_away(1e17, 2), 1e17);
        assert_eq!(round_half_away(6_000_000_000_000.5, 0), 6_000_000_000_001.0);
        assert_eq!(round_half_away(6_000_000_000_000.25, 0), 6_000_000_000_000.0);
    }

    #[test]
    fn test_round_node() {
        let expr = Expr::round(Expr::scale(0.333, Expr::var(VarName::Miles)), 1);
        assert_eq!(evaluate(&expr, &inputs()), 50.0);
    }

    #[test]
    fn test_abs() {
        let expr = Expr::abs(Expr::sub(Expr::var(VarName::Days), Expr::Const(10.0)));
        assert_eq!(evaluate(&expr, &inputs()), 7.0);
    }

    #[test]
    fn test_overflow_is_degenerate() {
        let expr = Expr::scale(1e308, Expr::Const(1e308));
        assert!(is_degenerate(evaluate(&expr, &inputs())));
    }

    #[test]
    fn test_compute_rounds_to_cents() {
        let expr = Expr::scale(0.335, Expr::var(VarName::Days));
        assert_eq!(compute_expr(&expr, &inputs()), 1.01);
    }
}
