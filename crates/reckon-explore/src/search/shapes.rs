//! Builders for common reimbursement shapes, used to write seeds.

use reckon_ir::expr::{CmpOp, Expr, Predicate, VarName};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ShapeError {
    #[error("tiered schedule needs {expected} rates for {breakpoints} breakpoints, got {rates}")]
    RateCount {
        breakpoints: usize,
        rates: usize,
        expected: usize,
    },

    #[error("breakpoints must be positive and strictly increasing")]
    Breakpoints,
}

/// Marginal-rate schedule on one variable.
///
/// `rates[i]` applies to the portion of `var` between `breakpoints[i-1]`
/// and `breakpoints[i]`; the last rate applies above the last breakpoint.
/// `tiered(miles, &[100.0], &[0.58, 0.45])` pays 0.58 per mile for the first
/// hundred and 0.45 after.
pub fn tiered(var: VarName, breakpoints: &[f64], rates: &[f64]) -> Result<Expr, ShapeError> {
    if rates.len() != breakpoints.len() + 1 {
        return Err(ShapeError::RateCount {
            breakpoints: breakpoints.len(),
            rates: rates.len(),
            expected: breakpoints.len() + 1,
        });
    }
    let increasing = breakpoints.windows(2).all(|w| w[0] < w[1]);
    if !increasing || breakpoints.first().is_some_and(|b| *b <= 0.0) {
        return Err(ShapeError::Breakpoints);
    }

    let x = Expr::var(var);
    let mut bands = Vec::with_capacity(rates.len());
    let mut lower = 0.0;
    for (i, rate) in rates.iter().enumerate() {
        let above = if lower == 0.0 {
            x.clone()
        } else {
            Expr::max(Expr::sub(x.clone(), Expr::Const(lower)), Expr::Const(0.0))
        };
        let band = match breakpoints.get(i) {
            Some(upper) => Expr::min(above, Expr::Const(upper - lower)),
            None => above,
        };
        bands.push(Expr::scale(*rate, band));
        if let Some(upper) = breakpoints.get(i) {
            lower = *upper;
        }
    }

    Ok(sum(bands))
}

/// Nested conditional chain: the first matching `(op, threshold)` on `var`
/// selects its expression, otherwise `default`.
pub fn stepped(var: VarName, steps: Vec<(CmpOp, f64, Expr)>, default: Expr) -> Expr {
    steps.into_iter().rev().fold(default, |otherwise, (op, threshold, then)| {
        Expr::branch(
            Predicate::new(op, Expr::var(var), Expr::Const(threshold)),
            then,
            otherwise,
        )
    })
}

/// `max(expr, var)`: never pay less than `var`.
pub fn floor_at(expr: Expr, var: VarName) -> Expr {
    Expr::max(expr, Expr::var(var))
}

/// Left-folded sum. An empty list sums to zero.
pub fn sum(terms: Vec<Expr>) -> Expr {
    terms
        .into_iter()
        .reduce(Expr::add)
        .unwrap_or(Expr::Const(0.0))
}
