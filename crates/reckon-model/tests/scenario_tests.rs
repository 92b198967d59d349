use reckon_ir::expr::{CmpOp, Expr, Predicate, VarName};
use reckon_ir::parse::{parse_corpus, parse_program};
use reckon_ir::types::{Inputs, Program};
use reckon_ir::validate::ExprLimits;
use reckon_model::eval::{compute, compute_expr, evaluate, is_degenerate};
use reckon_model::score::{score, score_expr};

fn days() -> Expr {
    Expr::var(VarName::Days)
}

fn miles() -> Expr {
    Expr::var(VarName::Miles)
}

fn receipts() -> Expr {
    Expr::var(VarName::Receipts)
}

fn band(lower: f64, width: f64) -> Expr {
    Expr::min(
        Expr::max(Expr::sub(miles(), Expr::Const(lower)), Expr::Const(0.0)),
        Expr::Const(width),
    )
}

/// Per-diem bands plus a four-tier mileage schedule, floored at receipts.
fn legacy_formula() -> Expr {
    let per_diem = Expr::branch(
        Predicate::new(CmpOp::Eq, days(), Expr::Const(5.0)),
        Expr::add(Expr::scale(100.0, days()), Expr::Const(75.0)),
        Expr::branch(
            Predicate::new(CmpOp::Ge, days(), Expr::Const(9.0)),
            Expr::scale(90.0, days()),
            Expr::scale(100.0, days()),
        ),
    );
    let mileage = Expr::add(
        Expr::add(
            Expr::scale(0.58, Expr::min(miles(), Expr::Const(100.0))),
            Expr::scale(0.45, band(100.0, 175.0)),
        ),
        Expr::add(
            Expr::scale(0.3, band(275.0, 641.0)),
            Expr::scale(0.35, Expr::max(Expr::sub(miles(), Expr::Const(916.0)), Expr::Const(0.0))),
        ),
    );
    Expr::max(Expr::add(per_diem, mileage), receipts())
}

fn program(expr: Expr) -> Program {
    Program::new(expr, &ExprLimits::default()).unwrap()
}

fn miles_per_day() -> Expr {
    Expr::div(miles(), days())
}

fn base() -> Expr {
    Expr::add(Expr::scale(100.0, days()), Expr::scale(0.5, miles()))
}

#[test]
fn test_legacy_formula_reproduces_corpus() {
    let cases = parse_corpus(include_str!("../../reckon-ir/tests/fixtures/legacy_cases.json")).unwrap();
    let s = score(&program(legacy_formula()), &cases, 5);
    assert!(s.passed(), "counter examples: {:?}", s.counter_examples);
    assert_eq!(s.mean_absolute_error, 0.0);
}

#[test]
fn test_three_day_trip_matches_corpus_value() {
    let p = program(legacy_formula());
    assert_eq!(compute(&p, 3, 150.0, 0.0), 380.5);
}

#[test]
fn test_sweet_spot_bonus_increases_output() {
    let in_band = Predicate::new(CmpOp::Ge, miles_per_day(), Expr::Const(180.0));
    let below_ceiling = Predicate::new(CmpOp::Le, miles_per_day(), Expr::Const(220.0));
    let with_bonus = |bonus: f64| {
        Expr::add(
            base(),
            Expr::branch(
                in_band.clone(),
                Expr::branch(below_ceiling.clone(), Expr::Const(bonus), Expr::Const(0.0)),
                Expr::Const(0.0),
            ),
        )
    };

    let enabled = program(with_bonus(40.0));
    let disabled = program(with_bonus(0.0));
    let on = compute(&enabled, 5, 1000.0, 400.0);
    let off = compute(&disabled, 5, 1000.0, 400.0);
    assert!(on > off);
    assert_eq!(on - off, 40.0);

    // Outside the band both agree.
    assert_eq!(compute(&enabled, 5, 300.0, 400.0), compute(&disabled, 5, 300.0, 400.0));
}

#[test]
fn test_magic_cents_adjustment() {
    let artifact = "\
expr: (((scale(100, days) + scale(0.5, miles)) + 0) + if((receipts - round((receipts - 0.5), 0)) == 0.49, 15.25, 0))
why if0.then: receipts ending in .49 pay +15.25
why if0.else: no adjustment
";
    let p = parse_program(artifact, &ExprLimits::default()).unwrap();
    let lucky = compute(&p, 3, 100.0, 199.49);
    let plain = compute(&p, 3, 100.0, 199.50);
    assert!((lucky - plain - 15.25).abs() < 1e-9, "{lucky} vs {plain}");

    let documented = p.note("if0.then").unwrap();
    assert!(documented.contains(&format!("{:+.2}", lucky - plain)), "{documented}");
}

#[test]
fn test_vacation_penalty_reduces_by_fixed_fraction() {
    let spend_per_day = Expr::div(receipts(), days());
    let penalized = Expr::branch(
        Predicate::new(CmpOp::Gt, spend_per_day, Expr::Const(90.0)),
        Expr::scale(0.9, base()),
        base(),
    );
    let with_penalty = program(penalized);
    let without = program(base());

    let pre = compute(&without, 10, 300.0, 1000.0);
    let post = compute(&with_penalty, 10, 300.0, 1000.0);
    assert_eq!(pre, 1150.0);
    assert_eq!(post, 1035.0);
    assert!((post / pre - 0.9).abs() < 1e-9);

    // Frugal trip, no penalty.
    assert_eq!(compute(&with_penalty, 10, 300.0, 500.0), pre);
}

#[test]
fn test_evaluation_is_deterministic() {
    let expr = legacy_formula();
    for (d, m, r) in [(1, 0.0, 0.0), (7, 612.0, 845.12), (14, 1499.0, 2499.99)] {
        let inputs = Inputs::new(d, m, r);
        let a = evaluate(&expr, &inputs);
        let b = evaluate(&expr, &inputs);
        assert_eq!(a.to_bits(), b.to_bits());
    }
}

#[test]
fn test_well_formed_programs_are_finite_over_domain() {
    let exprs = [
        legacy_formula(),
        base(),
        miles_per_day(),
        Expr::round(Expr::mul(receipts(), Expr::Const(1e300)), 2),
        Expr::abs(Expr::sub(Expr::Const(0.0), receipts())),
        Expr::div(receipts(), days()),
    ];
    for expr in &exprs {
        for d in [1, 2, 5, 14] {
            for m in [0.0, 0.5, 812.25, 1500.0] {
                for r in [0.0, 0.01, 1199.99, 2500.0] {
                    let out = compute_expr(expr, &Inputs::new(d, m, r));
                    assert!(out.is_finite(), "{expr} at ({d}, {m}, {r}) gave {out}");
                }
            }
        }
    }
}

#[test]
fn test_division_by_zero_is_degenerate_only_where_divisor_vanishes() {
    let always = Expr::div(receipts(), Expr::sub(miles(), miles()));
    let one_day = Expr::div(Expr::Const(1.0), Expr::sub(days(), Expr::Const(1.0)));
    for d in [1, 2, 14] {
        for m in [0.0, 1500.0] {
            for r in [0.0, 2500.0] {
                let inputs = Inputs::new(d, m, r);
                assert!(is_degenerate(compute_expr(&always, &inputs)));
                let out = compute_expr(&one_day, &inputs);
                if d == 1 {
                    assert!(is_degenerate(out));
                } else {
                    assert!(out.is_finite());
                }
            }
        }
    }
}

#[test]
fn test_score_serializes() {
    let cases = parse_corpus(include_str!("../../reckon-ir/tests/fixtures/legacy_cases.json")).unwrap();
    let s = score_expr(&base(), &cases, 3);
    let json = serde_json::to_value(&s).unwrap();
    assert_eq!(json["total_cases"], 48);
    assert_eq!(json["counter_examples"].as_array().unwrap().len(), 3);
}
