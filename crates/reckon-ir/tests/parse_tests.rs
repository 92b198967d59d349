use reckon_ir::expr::{CmpOp, Expr, Predicate, VarName};
use reckon_ir::parse::{parse_corpus, parse_expr, parse_program, ParseError};
use reckon_ir::types::{Program, RationaleNote};
use reckon_ir::validate::ExprLimits;

fn tiered_program() -> Expr {
    Expr::max(
        Expr::add(
            Expr::branch(
                Predicate::new(CmpOp::Eq, Expr::var(VarName::Days), Expr::Const(5.0)),
                Expr::add(Expr::scale(100.0, Expr::var(VarName::Days)), Expr::Const(75.0)),
                Expr::scale(100.0, Expr::var(VarName::Days)),
            ),
            Expr::scale(0.58, Expr::min(Expr::var(VarName::Miles), Expr::Const(100.0))),
        ),
        Expr::var(VarName::Receipts),
    )
}

#[test]
fn test_parse_corpus_from_file() {
    let json = include_str!("fixtures/legacy_cases.json");
    let cases = parse_corpus(json).unwrap();
    assert_eq!(cases.len(), 48);
    assert_eq!(cases[0].days, 3);
    assert_eq!(cases[0].miles, 150.0);
    assert_eq!(cases[0].expected, 380.5);
}

#[test]
fn test_parse_nested_corpus_layout() {
    let json = r#"[
        { "input": { "trip_duration_days": 2, "miles_traveled": 40, "total_receipts_amount": 12.5 }, "expected_output": 223.2 }
    ]"#;
    let cases = parse_corpus(json).unwrap();
    assert_eq!(cases.len(), 1);
    assert_eq!(cases[0].days, 2);
    assert_eq!(cases[0].receipts, 12.5);
}

#[test]
fn test_parse_corpus_rejects_zero_day_trip() {
    let json = r#"[
        { "trip_duration_days": 0, "miles_traveled": 40, "total_receipts_amount": 1, "expected_output": 2 }
    ]"#;
    let err = parse_corpus(json).unwrap_err();
    assert!(matches!(err, ParseError::InvalidCase { index: 0, .. }));
}

#[test]
fn test_parse_invalid_json() {
    assert!(parse_corpus("not json at all").is_err());
}

#[test]
fn test_text_round_trip_preserves_structure() {
    let expr = tiered_program();
    let text = expr.to_string();
    assert_eq!(parse_expr(&text).unwrap(), expr);
}

#[test]
fn test_text_round_trip_preserves_awkward_constants() {
    let expr = Expr::add(
        Expr::scale(0.1 + 0.2, Expr::var(VarName::Miles)),
        Expr::Const(-1.0 / 3.0),
    );
    let parsed = parse_expr(&expr.to_string()).unwrap();
    assert_eq!(parsed.constants(), expr.constants());
}

#[test]
fn test_program_artifact_round_trip() {
    let program = Program::new(tiered_program(), &ExprLimits::default())
        .unwrap()
        .with_rationale(vec![
            RationaleNote {
                target: "if0.then".to_string(),
                note: "5-day trips pay a flat bonus".to_string(),
            },
            RationaleNote {
                target: "c2".to_string(),
                note: "first-tier mileage rate".to_string(),
            },
        ]);
    let text = program.to_text();
    let parsed = parse_program(&text, &ExprLimits::default()).unwrap();
    assert_eq!(parsed, program);
}

#[test]
fn test_program_json_embeds_text_expression() {
    let program = Program::new(tiered_program(), &ExprLimits::default()).unwrap();
    let json = serde_json::to_value(&program).unwrap();
    assert!(json["expression"].as_str().unwrap().starts_with("max("));
    let back: Program = serde_json::from_value(json).unwrap();
    assert_eq!(back, program);
}

#[test]
fn test_program_requires_expr_line() {
    let err = parse_program("# nothing here\nwhy c0: orphan\n", &ExprLimits::default()).unwrap_err();
    assert!(matches!(err, ParseError::Program { .. }));
}

#[test]
fn test_program_rejects_oversized_expression() {
    let limits = ExprLimits {
        max_nodes: 3,
        max_depth: 8,
    };
    let err = parse_program("expr: ((days + miles) + receipts)", &limits).unwrap_err();
    assert!(matches!(err, ParseError::Invalid(_)));
}

#[test]
fn test_program_rejects_duplicate_expr() {
    let err = parse_program("expr: days\nexpr: miles\n", &ExprLimits::default()).unwrap_err();
    assert!(matches!(err, ParseError::Program { line: 2, .. }));
}
