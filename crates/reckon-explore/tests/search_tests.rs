use reckon_explore::ledger::{Phase, RationaleLog};
use reckon_explore::search::budget::{SearchBudget, StopReason};
use reckon_explore::search::enumerate::Grammar;
use reckon_explore::search::fit::FitConfig;
use reckon_explore::search::shapes::{floor_at, stepped, tiered};
use reckon_explore::search::{SearchConfig, SearchEngine};
use reckon_ir::expr::{BinOp, CmpOp, Expr, VarName};
use reckon_ir::parse::parse_corpus;
use reckon_ir::types::Case;
use reckon_model::eval::compute;
use reckon_model::score::fitness;

fn corpus() -> Vec<Case> {
    parse_corpus(include_str!("../../reckon-ir/tests/fixtures/legacy_cases.json")).unwrap()
}

fn days() -> Expr {
    Expr::var(VarName::Days)
}

fn miles() -> Expr {
    Expr::var(VarName::Miles)
}

fn linear_cases() -> Vec<Case> {
    [(1, 0.0), (2, 40.0), (3, 150.0), (4, 10.0), (6, 300.0), (8, 90.0), (12, 1100.0)]
        .into_iter()
        .map(|(d, m)| Case::new(d, m, 0.0, 100.0 * d as f64 + 0.5 * m))
        .collect()
}

/// Per-day bands, tiered mileage, and the receipts floor.
fn legacy_seed() -> Expr {
    let per_diem = stepped(
        VarName::Days,
        vec![
            (CmpOp::Eq, 5.0, Expr::add(Expr::scale(100.0, days()), Expr::Const(75.0))),
            (CmpOp::Ge, 9.0, Expr::scale(90.0, days())),
        ],
        Expr::scale(100.0, days()),
    );
    let mileage = tiered(VarName::Miles, &[100.0, 275.0, 916.0], &[0.58, 0.45, 0.3, 0.35]).unwrap();
    floor_at(Expr::add(per_diem, mileage), VarName::Receipts)
}

fn small_grammar() -> Grammar {
    Grammar {
        vars: vec![VarName::Days, VarName::Miles],
        constants: vec![1.0],
        scale_factors: vec![0.8, 0.58],
        round_decimals: vec![],
        binary_ops: vec![BinOp::Add],
        allow_abs: false,
        max_size: 5,
        max_level_width: 4_000,
    }
}

fn quick_fit() -> FitConfig {
    FitConfig {
        max_rounds: 8,
        max_evaluations: 2_000,
        ..Default::default()
    }
}

fn engine(grammar: Grammar, budget: SearchBudget, config: SearchConfig, seed: u64) -> SearchEngine {
    SearchEngine::new(grammar, quick_fit(), budget, config, seed).unwrap()
}

#[test]
fn test_seeded_schedule_solves_corpus() {
    let cases = corpus();
    let e = engine(Grammar::default(), SearchBudget::default(), SearchConfig::default(), 1);
    let mut log = RationaleLog::new();
    let outcome = e.run(&cases, &[legacy_seed()], &mut log).unwrap();

    assert_eq!(outcome.stop_reason, StopReason::Solved);
    assert!(outcome.warning.is_none());
    assert!(outcome.score.counter_examples.is_empty());
    assert_eq!(outcome.steps, 1);
    assert_eq!(compute(&outcome.program, 3, 150.0, 0.0), 380.5);

    let first = &log.entries()[0];
    assert_eq!(first.phase, Phase::Seed);
    assert!(first.accepted);
    assert_eq!(first.exact_matches, cases.len());
    assert!(outcome.program.note("if0.then").is_some());
}

#[test]
fn test_enumeration_recovers_linear_formula() {
    let e = engine(small_grammar(), SearchBudget::default(), SearchConfig::default(), 3);
    let mut log = RationaleLog::new();
    let outcome = e.run(&linear_cases(), &[], &mut log).unwrap();

    assert!(outcome.solved(), "best: {}", outcome.program.root);
    assert_eq!(compute(&outcome.program, 7, 33.0, 0.0), 716.5);
    assert!(log.entries().iter().any(|e| e.phase == Phase::Enumerate && e.accepted));
    assert!(outcome.stats.candidates_fitted > 0);
}

#[test]
fn test_refinement_adds_guard() {
    // Linear pay with a flat bonus on five-day trips.
    let cases: Vec<Case> = (1..=8)
        .flat_map(|d| [0.0, 120.0].map(move |m| (d, m)))
        .map(|(d, m)| {
            let bonus = if d == 5 { 75.0 } else { 0.0 };
            Case::new(d, m, 0.0, 100.0 * d as f64 + 0.5 * m + bonus)
        })
        .collect();
    let seed = Expr::add(Expr::scale(100.0, days()), Expr::scale(0.5, miles()));
    let start = fitness(&seed, &cases).mean_absolute_error;

    let grammar = Grammar {
        max_size: 1,
        ..small_grammar()
    };
    let budget = SearchBudget {
        max_steps: 3_000,
        ..Default::default()
    };
    let e = engine(grammar, budget, SearchConfig::default(), 5);
    let mut log = RationaleLog::new();
    let outcome = e.run(&cases, &[seed], &mut log).unwrap();

    assert!(outcome.score.mean_absolute_error < start);
    assert!(log.entries().iter().any(|e| e.phase == Phase::Refine && e.accepted));
    assert!(outcome.stats.accepted_mutations > 0);
}

#[test]
fn test_acceptance_is_monotonic_across_restarts() {
    let grammar = Grammar {
        vars: VarName::ALL.to_vec(),
        constants: vec![0.0, 1.0, 100.0],
        scale_factors: vec![0.5, 100.0],
        round_decimals: vec![],
        binary_ops: vec![BinOp::Add, BinOp::Max],
        allow_abs: false,
        max_size: 3,
        max_level_width: 4_000,
    };
    let budget = SearchBudget {
        max_steps: 600,
        ..Default::default()
    };
    let config = SearchConfig {
        stagnation_limit: 15,
        max_restarts: 2,
        ..Default::default()
    };
    let e = engine(grammar, budget, config, 11);
    let mut log = RationaleLog::new();
    let outcome = e.run(&corpus(), &[], &mut log).unwrap();

    assert!(log.acceptance_violations().is_empty(), "{:?}", log.acceptance_violations());
    if outcome.stop_reason == StopReason::SpaceExhausted {
        assert_eq!(outcome.stats.restarts, 2);
        assert_eq!(log.entries().iter().filter(|e| e.phase == Phase::Explore).count(), 2);
    }
    // The best program is never worse than anything accepted before exploration.
    let first_accepted = log.accepted().next().unwrap();
    assert!(outcome.score.mean_absolute_error <= first_accepted.mae);
}

#[test]
fn test_same_seed_same_program() {
    let budget = SearchBudget {
        max_steps: 250,
        ..Default::default()
    };
    let run = || {
        let e = engine(small_grammar(), budget, SearchConfig::default(), 21);
        let mut log = RationaleLog::new();
        let outcome = e.run(&corpus(), &[], &mut log).unwrap();
        let trail: Vec<(String, u64)> = log
            .entries()
            .iter()
            .map(|e| (e.hypothesis.clone(), e.mae.to_bits()))
            .collect();
        (outcome.program.to_text(), outcome.steps, trail)
    };
    assert_eq!(run(), run());
}

#[test]
fn test_step_budget_returns_best_so_far() {
    let budget = SearchBudget {
        max_steps: 5,
        ..Default::default()
    };
    let config = SearchConfig {
        top_k: 3,
        ..Default::default()
    };
    let e = engine(Grammar::default(), budget, config, 0);
    let mut log = RationaleLog::new();
    let outcome = e.run(&corpus(), &[], &mut log).unwrap();

    assert_eq!(outcome.stop_reason, StopReason::StepBudgetExhausted);
    assert_eq!(outcome.steps, 5);
    let warning = outcome.warning.as_deref().unwrap();
    assert!(warning.contains("unmatched"), "{warning}");
    assert_eq!(outcome.score.counter_examples.len(), 3);
    let errors: Vec<f64> = outcome.score.counter_examples.iter().map(|c| c.error).collect();
    assert!(errors.windows(2).all(|w| w[0] >= w[1]));
}
