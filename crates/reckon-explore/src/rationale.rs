//! Evidence-backed notes for every branch and constant of a program.
//!
//! Branch notes report how many cases reach the branch, how well the
//! program does on them, and how much the `then` side pays over the `else`
//! side. Constant notes report how much the mean absolute
//! error moves when the constant is nudged by one percent; an inert constant
//! is a candidate for removal.

use reckon_ir::expr::Expr;
use reckon_ir::types::{Case, Inputs, RationaleNote};
use reckon_model::eval::{compute_expr, evaluate, is_degenerate, test};
use reckon_model::score::{case_error, fitness};

/// Relative nudge used for constant sensitivity.
pub const SENSITIVITY_STEP: f64 = 0.01;

/// Notes for every `If` branch (`if<N>.then`, `if<N>.else`) and every free
/// constant (`c<N>`), in that order.
pub fn explain(expr: &Expr, cases: &[Case]) -> Vec<RationaleNote> {
    let mut notes = explain_branches(expr, cases);
    notes.extend(explain_constants(expr, cases));
    notes
}

struct BranchTally {
    condition: String,
    taken: [usize; 2],
    error: [f64; 2],
    shift: f64,
    shifted: usize,
}

/// One `If` reached while evaluating a case.
struct Route {
    id: usize,
    took_then: bool,
    /// `then` minus `else` at the case's inputs, when both are finite.
    shift: Option<f64>,
}

pub fn explain_branches(expr: &Expr, cases: &[Case]) -> Vec<RationaleNote> {
    let mut tallies: Vec<BranchTally> = expr
        .predicates()
        .into_iter()
        .map(|p| BranchTally {
            condition: p.to_string(),
            taken: [0, 0],
            error: [0.0, 0.0],
            shift: 0.0,
            shifted: 0,
        })
        .collect();
    if tallies.is_empty() {
        return Vec::new();
    }

    for case in cases {
        let inputs = case.inputs();
        let err = case_error(compute_expr(expr, &inputs), case.expected);
        let mut routes = Vec::new();
        let mut next_id = 0;
        route(expr, &inputs, &mut next_id, &mut routes);
        for r in routes {
            let side = if r.took_then { 0 } else { 1 };
            if let Some(t) = tallies.get_mut(r.id) {
                t.taken[side] += 1;
                t.error[side] += err;
                if let Some(shift) = r.shift {
                    t.shift += shift;
                    t.shifted += 1;
                }
            }
        }
    }

    let total = cases.len();
    let mut notes = Vec::new();
    for (id, t) in tallies.iter().enumerate() {
        for (side, label) in [(0, "then"), (1, "else")] {
            let n = t.taken[side];
            let mut note = if n == 0 {
                format!("no case reaches this branch when `{}` is {}", t.condition, side == 0)
            } else {
                format!(
                    "{n} of {total} cases have `{}` {}; program MAE on them {:.4}",
                    t.condition,
                    if side == 0 { "true" } else { "false" },
                    t.error[side] / n as f64
                )
            };
            if side == 0 && t.shifted > 0 {
                note.push_str(&format!(
                    "; pays {:+.2} over the else branch on average",
                    t.shift / t.shifted as f64
                ));
            }
            notes.push(RationaleNote {
                target: format!("if{id}.{label}"),
                note,
            });
        }
    }
    notes
}

/// Record every `If` evaluation actually reaches. Ids follow the pre-order
/// numbering of [`Expr::predicates`].
fn route(expr: &Expr, inputs: &Inputs, next_id: &mut usize, out: &mut Vec<Route>) {
    match expr {
        Expr::Const(_) | Expr::Var(_) => {}
        Expr::Binary { left, right, .. } => {
            route(left, inputs, next_id, out);
            route(right, inputs, next_id, out);
        }
        Expr::Scale { expr, .. } | Expr::Round { expr, .. } | Expr::Unary { expr, .. } => {
            route(expr, inputs, next_id, out)
        }
        Expr::If {
            cond,
            then_branch,
            else_branch,
        } => {
            let id = *next_id;
            *next_id += 1;
            // Guards nested inside a condition are numbered but not traced.
            *next_id += count_ifs(&cond.left) + count_ifs(&cond.right);
            let (then_value, else_value) = (evaluate(then_branch, inputs), evaluate(else_branch, inputs));
            let shift = (!is_degenerate(then_value) && !is_degenerate(else_value)).then(|| then_value - else_value);
            match test(cond, inputs) {
                Some(true) => {
                    out.push(Route {
                        id,
                        took_then: true,
                        shift,
                    });
                    route(then_branch, inputs, next_id, out);
                    *next_id += count_ifs(else_branch);
                }
                Some(false) => {
                    out.push(Route {
                        id,
                        took_then: false,
                        shift,
                    });
                    *next_id += count_ifs(then_branch);
                    route(else_branch, inputs, next_id, out);
                }
                None => {
                    *next_id += count_ifs(then_branch) + count_ifs(else_branch);
                }
            }
        }
    }
}

fn count_ifs(expr: &Expr) -> usize {
    expr.predicates().len()
}

pub fn explain_constants(expr: &Expr, cases: &[Case]) -> Vec<RationaleNote> {
    let constants = expr.constants();
    let base = fitness(expr, cases).mean_absolute_error;

    constants
        .iter()
        .enumerate()
        .map(|(slot, value)| {
            let delta = if *value == 0.0 {
                SENSITIVITY_STEP
            } else {
                value.abs() * SENSITIVITY_STEP
            };
            let shifted = |by: f64| {
                let mut values = constants.clone();
                values[slot] = value + by;
                fitness(&expr.with_constants(&values), cases).mean_absolute_error - base
            };
            let up = shifted(delta);
            let down = shifted(-delta);
            let note = if up.abs() < 1e-9 && down.abs() < 1e-9 {
                format!("{value}: inert, a 1% change leaves MAE at {base:.4}")
            } else {
                format!("{value}: a 1% change moves MAE by {up:+.4} up / {down:+.4} down from {base:.4}")
            };
            RationaleNote {
                target: format!("c{slot}"),
                note,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use reckon_ir::expr::{CmpOp, Predicate, VarName};

    /// Whether a single case routes through the `then` side of guard `id`.
    fn takes_then(expr: &Expr, case: &Case, id: usize) -> Option<bool> {
        let mut routes = Vec::new();
        let mut next_id = 0;
        route(expr, &case.inputs(), &mut next_id, &mut routes);
        routes.into_iter().find(|r| r.id == id).map(|r| r.took_then)
    }

    fn bonus_program() -> Expr {
        // 100/day, plus 75 on five-day trips.
        Expr::add(
            Expr::scale(100.0, Expr::var(VarName::Days)),
            Expr::branch(
                Predicate::new(CmpOp::Eq, Expr::var(VarName::Days), Expr::Const(5.0)),
                Expr::Const(75.0),
                Expr::Const(0.0),
            ),
        )
    }

    fn cases() -> Vec<Case> {
        vec![
            Case::new(5, 0.0, 0.0, 575.0),
            Case::new(3, 0.0, 0.0, 300.0),
            Case::new(4, 0.0, 0.0, 400.0),
            Case::new(5, 10.0, 0.0, 575.0),
        ]
    }

    #[test]
    fn test_branch_counts() {
        let notes = explain_branches(&bonus_program(), &cases());
        assert_eq!(notes.len(), 2);
        assert_eq!(notes[0].target, "if0.then");
        assert!(notes[0].note.starts_with("2 of 4 cases"), "{}", notes[0].note);
        assert_eq!(notes[1].target, "if0.else");
        assert!(notes[1].note.starts_with("2 of 4 cases"));
        assert!(notes[0].note.ends_with("pays +75.00 over the else branch on average"), "{}", notes[0].note);
        assert!(!notes[1].note.contains("pays"));
    }

    #[test]
    fn test_nested_guard_numbering() {
        let inner = Expr::branch(
            Predicate::new(CmpOp::Ge, Expr::var(VarName::Days), Expr::Const(9.0)),
            Expr::Const(1.0),
            Expr::Const(2.0),
        );
        let outer = Expr::branch(
            Predicate::new(CmpOp::Eq, Expr::var(VarName::Days), Expr::Const(5.0)),
            Expr::Const(0.0),
            inner,
        );
        let ten = Case::new(10, 0.0, 0.0, 1.0);
        let five = Case::new(5, 0.0, 0.0, 0.0);
        assert_eq!(takes_then(&outer, &ten, 0), Some(false));
        assert_eq!(takes_then(&outer, &ten, 1), Some(true));
        assert_eq!(takes_then(&outer, &five, 0), Some(true));
        assert_eq!(takes_then(&outer, &five, 1), None);
    }

    #[test]
    fn test_constant_sensitivity() {
        // Nobody in the cases travels nine days, so the guard is dead weight.
        let expr = Expr::add(
            Expr::scale(100.0, Expr::var(VarName::Days)),
            Expr::branch(
                Predicate::new(CmpOp::Ge, Expr::var(VarName::Days), Expr::Const(9.0)),
                Expr::Const(10.0),
                Expr::Const(0.0),
            ),
        );
        let notes = explain_constants(&expr, &cases());
        assert_eq!(notes.len(), 4);
        assert_eq!(notes[0].target, "c0");
        assert!(notes[0].note.contains("moves MAE"), "{}", notes[0].note);
        assert!(notes[1].note.contains("inert"), "{}", notes[1].note);
        assert!(notes[2].note.contains("inert"), "{}", notes[2].note);
        assert!(notes[3].note.contains("moves MAE"), "{}", notes[3].note);
    }

    #[test]
    fn test_explain_orders_branches_first() {
        let notes = explain(&bonus_program(), &cases());
        assert_eq!(notes.len(), 6);
        assert!(notes[0].target.starts_with("if0"));
        assert_eq!(notes[2].target, "c0");
    }
}
