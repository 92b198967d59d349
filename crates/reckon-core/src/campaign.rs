//! Search-then-fuzz campaigns.
//!
//! Each round searches the active set (the corpus plus fuzz cases promoted
//! so far), then asks the oracle about inputs near the best program's
//! thresholds. Failing fuzz cases are promoted into the active set and the
//! next round starts from the previous best. The corpus itself is never
//! modified, and a program that matches it is only ever replaced by one that
//! also matches it.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use reckon_explore::fuzz::FuzzGenerator;
use reckon_explore::ledger::{Phase, RationaleLog};
use reckon_explore::search::budget::StopReason;
use reckon_explore::search::{SearchEngine, SearchError, SearchOutcome, GUARD_AXES};
use reckon_ir::expr::Expr;
use reckon_ir::parse::{parse_corpus, ParseError};
use reckon_ir::types::{Axis, Case, FuzzCase, Program};
use reckon_model::eval::compute_expr;
use reckon_model::score::{case_error, fitness, is_match, score, Score};
use reckon_model::stats::{candidate_breakpoints, summarize};
use reckon_oracle::{CachedOracle, CommandOracle, Oracle};

use crate::config::{check_corpus, CampaignConfig, ConfigError};

#[derive(Debug, thiserror::Error)]
pub enum CampaignError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("search error: {0}")]
    Search(#[from] SearchError),

    #[error("corpus parse error: {0}")]
    Parse(#[from] ParseError),
}

/// What fuzzing concluded about the final program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FuzzStatus {
    /// Fuzzing did not run.
    Skipped { reason: String },
    /// Every fuzz case of the last round matched.
    Clean { checked: usize },
    /// Rounds ran out with fuzz cases still failing.
    Failing { checked: usize, failing: usize },
    /// The oracle could not be asked; the corpus-fitted program stands.
    OracleUnavailable { reason: String },
}

impl FuzzStatus {
    pub fn is_clean(&self) -> bool {
        matches!(self, FuzzStatus::Clean { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundReport {
    pub round: usize,
    pub active_cases: usize,
    pub stop_reason: StopReason,
    pub steps: u64,
    pub mean_absolute_error: f64,
    /// False when the round's program was discarded in favour of an earlier
    /// one.
    pub adopted: bool,
    pub fuzz_checked: usize,
    pub fuzz_failing: usize,
    pub promoted: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignReport {
    pub program: Program,
    /// The final program scored on the corpus alone.
    pub corpus_score: Score,
    /// The final program scored on the last set of labeled fuzz cases.
    pub fuzz_score: Option<Score>,
    pub fuzz_status: FuzzStatus,
    pub stop_reason: StopReason,
    pub rounds: Vec<RoundReport>,
    /// Fuzz cases moved into the active set, in promotion order.
    pub promoted: Vec<FuzzCase>,
    pub warning: Option<String>,
    /// Full pass on the corpus.
    pub passed: bool,
}

pub struct Campaign {
    config: CampaignConfig,
    engine: SearchEngine,
}

impl Campaign {
    pub fn new(config: CampaignConfig) -> Result<Self, CampaignError> {
        config.validate()?;
        let engine = config.engine()?;
        Ok(Self { config, engine })
    }

    pub fn config(&self) -> &CampaignConfig {
        &self.config
    }

    /// Run with the command oracle from the configuration, or without
    /// fuzzing when none is configured.
    pub fn run(&self, corpus: &[Case], seeds: &[Expr], log: &mut RationaleLog) -> Result<CampaignReport, CampaignError> {
        if !self.config.oracle.is_configured() {
            return self.execute(corpus, seeds, None, log);
        }
        match CommandOracle::new(self.config.oracle.clone()) {
            Ok(command) => {
                let oracle = CachedOracle::new(command);
                let report = self.execute(corpus, seeds, Some(&oracle as &dyn Oracle), log);
                let stats = oracle.stats();
                info!(
                    "oracle cache: {} hits, {} misses, {} entries",
                    stats.hits, stats.misses, stats.entries
                );
                report
            }
            Err(e) => {
                let mut report = self.execute(corpus, seeds, None, log)?;
                report.fuzz_status = FuzzStatus::OracleUnavailable { reason: e.to_string() };
                Ok(report)
            }
        }
    }

    /// Run with a caller-supplied oracle.
    pub fn run_with_oracle(
        &self,
        corpus: &[Case],
        seeds: &[Expr],
        oracle: &dyn Oracle,
        log: &mut RationaleLog,
    ) -> Result<CampaignReport, CampaignError> {
        self.execute(corpus, seeds, Some(oracle), log)
    }

    /// Parse a JSON corpus and run with the configured oracle.
    pub fn run_json(&self, corpus_json: &str, seeds: &[Expr], log: &mut RationaleLog) -> Result<CampaignReport, CampaignError> {
        let corpus = parse_corpus(corpus_json)?;
        self.run(&corpus, seeds, log)
    }

    fn execute(
        &self,
        corpus: &[Case],
        seeds: &[Expr],
        oracle: Option<&dyn Oracle>,
        log: &mut RationaleLog,
    ) -> Result<CampaignReport, CampaignError> {
        check_corpus(corpus)?;
        let config = &self.config;
        let top_k = config.search.top_k;
        debug!("corpus summary: {:?}", summarize(corpus));

        let mut active: Vec<Case> = corpus.to_vec();
        let mut round_seeds: Vec<Expr> = seeds.to_vec();
        let mut generator = FuzzGenerator::new(config.fuzz.clone(), config.seed);
        let corpus_thresholds = corpus_thresholds(corpus, config.search.breakpoints_per_axis);

        let mut rounds = Vec::new();
        let mut promoted = Vec::new();
        let mut fuzz_cases: Vec<Case> = Vec::new();
        let mut fuzz_status = FuzzStatus::Skipped {
            reason: "no oracle configured".to_string(),
        };
        let mut kept: Option<SearchOutcome> = None;

        for round in 0..config.max_rounds {
            let outcome = self.engine.run(&active, &round_seeds, log)?;
            let mut report = RoundReport {
                round,
                active_cases: active.len(),
                stop_reason: outcome.stop_reason,
                steps: outcome.steps,
                mean_absolute_error: outcome.score.mean_absolute_error,
                adopted: true,
                fuzz_checked: 0,
                fuzz_failing: 0,
                promoted: 0,
            };

            if let Some(previous) = &kept {
                if !adopts(previous, &outcome, corpus, &active) {
                    info!(
                        "round {round}: keeping {} over {}",
                        previous.program.root, outcome.program.root
                    );
                    report.adopted = false;
                    rounds.push(report);
                    break;
                }
            }
            let root = outcome.program.root.clone();
            let corpus_solved = fitness(&root, corpus).passed();
            kept = Some(outcome);

            let Some(oracle) = oracle else {
                rounds.push(report);
                break;
            };
            if !corpus_solved {
                // Only the first round can get here; later rounds are adopted
                // only when they match the corpus.
                fuzz_status = FuzzStatus::Skipped {
                    reason: "corpus not solved".to_string(),
                };
                rounds.push(report);
                break;
            }

            let labeled = match generator.generate(&root, &corpus_thresholds, &oracle) {
                Ok(labeled) => labeled,
                Err(e) => {
                    warn!("fuzzing stopped in round {round}: {e}");
                    fuzz_status = FuzzStatus::OracleUnavailable { reason: e.to_string() };
                    rounds.push(report);
                    break;
                }
            };

            fuzz_cases = labeled.iter().map(|f| f.case).collect();
            let checked = fitness(&root, &fuzz_cases);
            log.record(
                round as u64,
                Phase::Fuzz,
                format!("{} fuzz cases against {root}", fuzz_cases.len()),
                checked.mean_absolute_error,
                checked.exact_match_count,
                true,
            );

            let mut failing: Vec<(f64, FuzzCase)> = labeled
                .into_iter()
                .filter_map(|f| {
                    let error = case_error(compute_expr(&root, &f.case.inputs()), f.case.expected);
                    (!is_match(error)).then_some((error, f))
                })
                .collect();
            report.fuzz_checked = fuzz_cases.len();
            report.fuzz_failing = failing.len();

            if failing.is_empty() {
                info!("round {round}: {} fuzz cases all match", fuzz_cases.len());
                fuzz_status = FuzzStatus::Clean {
                    checked: fuzz_cases.len(),
                };
                rounds.push(report);
                break;
            }
            fuzz_status = FuzzStatus::Failing {
                checked: fuzz_cases.len(),
                failing: failing.len(),
            };

            // Worst first; stable, so ties keep sampling order.
            failing.sort_by(|a, b| b.0.total_cmp(&a.0));
            failing.truncate(config.promote_per_round);
            report.promoted = failing.len();
            info!(
                "round {round}: promoting {} of {} failing fuzz cases",
                report.promoted, report.fuzz_failing
            );
            for (_, f) in failing {
                active.push(f.case);
                promoted.push(f);
            }

            let rescored = fitness(&root, &active);
            log.record(
                round as u64,
                Phase::Validate,
                root.to_string(),
                rescored.mean_absolute_error,
                rescored.exact_match_count,
                true,
            );
            round_seeds = std::iter::once(root).chain(seeds.iter().cloned()).collect();
            rounds.push(report);
        }

        let Some(outcome) = kept else {
            return Err(ConfigError::Invalid(vec!["max_rounds must be positive".to_string()]).into());
        };
        let corpus_score = score(&outcome.program, corpus, top_k);
        let fuzz_score = (!fuzz_cases.is_empty()).then(|| score(&outcome.program, &fuzz_cases, top_k));
        let passed = corpus_score.passed();
        let warning = campaign_warning(&corpus_score, &fuzz_status);
        if let Some(w) = &warning {
            warn!("{w}");
        }

        Ok(CampaignReport {
            program: outcome.program,
            corpus_score,
            fuzz_score,
            fuzz_status,
            stop_reason: outcome.stop_reason,
            rounds,
            promoted,
            warning,
            passed,
        })
    }
}

/// A later round replaces the kept program only if it still matches the
/// whole corpus and does better on the active set.
fn adopts(kept: &SearchOutcome, next: &SearchOutcome, corpus: &[Case], active: &[Case]) -> bool {
    if !fitness(&next.program.root, corpus).passed() {
        return false;
    }
    let old = fitness(&kept.program.root, active);
    let new = fitness(&next.program.root, active);
    new.exact_match_count > old.exact_match_count
        || (new.exact_match_count == old.exact_match_count && new.mean_absolute_error < old.mean_absolute_error)
}

/// Corpus breakpoints on every guard axis, offered to the fuzzer alongside
/// the program's own thresholds.
fn corpus_thresholds(corpus: &[Case], per_axis: usize) -> Vec<(Axis, f64)> {
    GUARD_AXES
        .iter()
        .flat_map(|axis| {
            candidate_breakpoints(corpus, *axis, per_axis)
                .into_iter()
                .map(move |t| (*axis, t))
        })
        .collect()
}

fn campaign_warning(corpus: &Score, fuzz: &FuzzStatus) -> Option<String> {
    let mut parts = Vec::new();
    if !corpus.passed() {
        parts.push(format!(
            "{} of {} corpus cases unmatched (MAE {:.4}, max error {:.4})",
            corpus.total_cases - corpus.exact_match_count,
            corpus.total_cases,
            corpus.mean_absolute_error,
            corpus.max_error
        ));
    }
    match fuzz {
        FuzzStatus::Failing { checked, failing } => {
            parts.push(format!("{failing} of {checked} fuzz cases still failing"))
        }
        FuzzStatus::OracleUnavailable { reason } => parts.push(format!("fuzzing skipped: {reason}")),
        _ => {}
    }
    (!parts.is_empty()).then(|| parts.join("; "))
}
