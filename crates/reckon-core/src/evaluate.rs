//! Scoring a saved program artifact against a corpus.

use serde::{Deserialize, Serialize};

use reckon_ir::parse::{parse_corpus, parse_program, ParseError};
use reckon_ir::types::Case;
use reckon_ir::validate::ExprLimits;
use reckon_model::score::{score, CounterExample};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub total_cases: usize,
    pub exact_matches: usize,
    pub mean_absolute_error: f64,
    pub max_error: f64,
    pub worst_counter_examples: Vec<CounterExample>,
    /// Every case matched within tolerance.
    pub passed: bool,
}

/// Parse a program artifact and score it on `corpus`.
pub fn evaluate_artifact(text: &str, corpus: &[Case], top_k: usize) -> Result<EvaluationReport, ParseError> {
    let program = parse_program(text, &ExprLimits::default())?;
    let s = score(&program, corpus, top_k);
    Ok(EvaluationReport {
        total_cases: s.total_cases,
        exact_matches: s.exact_match_count,
        mean_absolute_error: s.mean_absolute_error,
        max_error: s.max_error,
        passed: s.passed(),
        worst_counter_examples: s.counter_examples,
    })
}

/// [`evaluate_artifact`] with the corpus given as JSON.
pub fn evaluate_artifact_json(text: &str, corpus_json: &str, top_k: usize) -> Result<EvaluationReport, ParseError> {
    let corpus = parse_corpus(corpus_json)?;
    evaluate_artifact(text, &corpus, top_k)
}
