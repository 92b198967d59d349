use serde::{Deserialize, Serialize};

use crate::expr::Expr;

/// Largest precision `round()` may request.
pub const MAX_ROUND_DECIMALS: u8 = 6;

/// Structural bounds every expression must respect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExprLimits {
    pub max_nodes: usize,
    pub max_depth: usize,
}

impl Default for ExprLimits {
    fn default() -> Self {
        Self {
            max_nodes: 96,
            max_depth: 16,
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExprError {
    #[error("non-finite constant {value}")]
    NonFiniteConstant { value: f64 },

    #[error("round() precision {decimals} exceeds {max}")]
    DecimalsOutOfRange { decimals: u8, max: u8 },

    #[error("expression has {nodes} nodes, limit is {max}")]
    TooManyNodes { nodes: usize, max: usize },

    #[error("expression depth {depth} exceeds limit {max}")]
    TooDeep { depth: usize, max: usize },
}

/// Check an expression against the grammar invariants the type system does
/// not already enforce.
pub fn validate_expr(expr: &Expr, limits: &ExprLimits) -> Result<(), Vec<ExprError>> {
    let mut errors = Vec::new();

    for value in expr.constants() {
        if !value.is_finite() {
            errors.push(ExprError::NonFiniteConstant { value });
        }
    }

    for node in expr.nodes() {
        if let Expr::Round { decimals, .. } = node {
            if *decimals > MAX_ROUND_DECIMALS {
                errors.push(ExprError::DecimalsOutOfRange {
                    decimals: *decimals,
                    max: MAX_ROUND_DECIMALS,
                });
            }
        }
    }

    let nodes = expr.size();
    if nodes > limits.max_nodes {
        errors.push(ExprError::TooManyNodes {
            nodes,
            max: limits.max_nodes,
        });
    }

    let depth = expr.depth();
    if depth > limits.max_depth {
        errors.push(ExprError::TooDeep {
            depth,
            max: limits.max_depth,
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::VarName;

    #[test]
    fn test_valid_expr_passes() {
        let expr = Expr::add(Expr::var(VarName::Days), Expr::Const(1.0));
        assert!(validate_expr(&expr, &ExprLimits::default()).is_ok());
    }

    #[test]
    fn test_collects_all_errors() {
        let expr = Expr::round(Expr::Const(f64::NAN), 9);
        let errors = validate_expr(&expr, &ExprLimits::default()).unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(matches!(errors[0], ExprError::NonFiniteConstant { .. }));
        assert!(matches!(errors[1], ExprError::DecimalsOutOfRange { decimals: 9, .. }));
    }

    #[test]
    fn test_node_and_depth_limits() {
        let mut expr = Expr::var(VarName::Miles);
        for _ in 0..5 {
            expr = Expr::abs(expr);
        }
        let limits = ExprLimits {
            max_nodes: 4,
            max_depth: 3,
        };
        let errors = validate_expr(&expr, &limits).unwrap_err();
        assert!(errors.contains(&ExprError::TooManyNodes { nodes: 6, max: 4 }));
        assert!(errors.contains(&ExprError::TooDeep { depth: 6, max: 3 }));
    }
}
