use reckon_explore::rationale::explain;
use reckon_ir::parse::parse_expr;
use reckon_ir::types::{Case, Program};
use reckon_ir::validate::ExprLimits;
use reckon_model::eval::compute;

const MAGIC_CENTS: &str =
    "(((scale(100, days) + scale(0.5, miles)) + 0) + if((receipts - round((receipts - 0.5), 0)) == 0.49, 15.25, 0))";

#[test]
fn test_magic_cents_adjustment_is_documented() {
    let expr = parse_expr(MAGIC_CENTS).unwrap();
    let cases = vec![
        Case::new(3, 100.0, 199.49, 365.25),
        Case::new(3, 100.0, 199.50, 350.0),
        Case::new(4, 50.0, 20.49, 440.25),
    ];
    let notes = explain(&expr, &cases);
    let program = Program::new(expr, &ExprLimits::default()).unwrap().with_rationale(notes);

    let lucky = compute(&program, 3, 100.0, 199.49);
    let plain = compute(&program, 3, 100.0, 199.50);
    let adjustment = format!("{:+.2}", lucky - plain);
    assert_eq!(adjustment, "+15.25");

    let note = program.note("if0.then").unwrap();
    assert!(note.starts_with("2 of 3 cases"), "{note}");
    assert!(note.contains(&adjustment), "{note}");
    assert!(!program.note("if0.else").unwrap().contains("pays"));
}

#[test]
fn test_branch_shift_averages_over_reaching_cases() {
    // The bonus grows with miles, so its average depends on who reaches it.
    let expr = parse_expr("(scale(100, days) + if(days >= 5, scale(0.1, miles), 0))").unwrap();
    let cases = vec![
        Case::new(5, 100.0, 0.0, 510.0),
        Case::new(6, 300.0, 0.0, 630.0),
        Case::new(2, 500.0, 0.0, 200.0),
    ];
    let notes = explain(&expr, &cases);
    let then_note = &notes.iter().find(|n| n.target == "if0.then").unwrap().note;
    // (10 + 30 + 50) / 3
    assert!(then_note.contains("pays +30.00"), "{then_note}");
}
