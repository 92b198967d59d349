//! Program search over one active case set.
//!
//! A run has three phases:
//!
//! 1. **Seed**: hypothesized expressions are fitted and scored first.
//! 2. **Enumerate**: skeletons of increasing size are fitted in parallel
//!    batches; the best of each level is logged.
//! 3. **Refine**: hill climbing from the best candidate with structural and
//!    guard mutations, restarting from a perturbed point when progress stalls.
//!
//! Every fitted candidate costs one step against the [`SearchBudget`]. The run
//! ends as soon as every case matches, or when a budget or the search space
//! runs out; either way the best candidate comes back with its score.

pub mod budget;
pub mod canon;
pub mod enumerate;
pub mod fit;
pub mod mutate;
pub mod rng;
pub mod shapes;

use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use log::{debug, info, trace, warn};
use rand::seq::SliceRandom;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use reckon_ir::expr::{Expr, VarName};
use reckon_ir::types::{Axis, Case, Program};
use reckon_ir::validate::{validate_expr, ExprError, ExprLimits};
use reckon_model::score::{fitness, score_expr, Fitness, Score, DEFAULT_TOP_K};
use reckon_model::stats::candidate_breakpoints;

use crate::fuzz::program_breakpoints;
use crate::ledger::{Phase, RationaleLog};
use crate::rationale::explain;

use budget::{BudgetChecker, SearchBudget, StopReason};
use canon::canonicalize;
use enumerate::{Enumerator, Grammar};
use fit::{fit, FitConfig};
use mutate::{mutate, MutationContext};
use rng::{stream_rng, MUTATION_STREAM, RESTART_STREAM};

#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("invalid search configuration: {}", .0.join("; "))]
    Config(Vec<String>),

    #[error("no cases to search against")]
    EmptyCases,

    #[error("best candidate violates expression limits: {0:?}")]
    InvalidProgram(Vec<ExprError>),
}

/// Axes guard mutations split on, besides the program's own thresholds.
pub const GUARD_AXES: [Axis; 5] = [
    Axis::Var { var: VarName::Days },
    Axis::Var { var: VarName::Miles },
    Axis::Var {
        var: VarName::Receipts,
    },
    Axis::Ratio {
        num: VarName::Miles,
        den: VarName::Days,
    },
    Axis::Ratio {
        num: VarName::Receipts,
        den: VarName::Days,
    },
];

/// Tuning of the refine phase and batch scoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Enumerated candidates fitted per parallel batch.
    pub batch_size: usize,
    /// Rejected mutations in a row before a restart.
    pub stagnation_limit: u64,
    pub max_restarts: usize,
    /// Mutations applied to produce a restart point.
    pub restart_kicks: usize,
    /// Enumerated terms kept for subtree replacement.
    pub palette_size: usize,
    /// Corpus breakpoints per axis offered to guard mutations.
    pub breakpoints_per_axis: usize,
    /// Counter-examples kept in the outcome.
    pub top_k: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            batch_size: 256,
            stagnation_limit: 300,
            max_restarts: 8,
            restart_kicks: 3,
            palette_size: 200,
            breakpoints_per_axis: 6,
            top_k: DEFAULT_TOP_K,
        }
    }
}

impl SearchConfig {
    pub fn problems(&self) -> Vec<String> {
        let mut out = Vec::new();
        if self.batch_size == 0 {
            out.push("batch_size must be positive".to_string());
        }
        if self.stagnation_limit == 0 {
            out.push("stagnation_limit must be positive".to_string());
        }
        if self.palette_size == 0 {
            out.push("palette_size must be positive".to_string());
        }
        out
    }
}

/// Work counters for one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchStats {
    pub candidates_fitted: u64,
    pub objective_evaluations: u64,
    pub enumerated_levels: usize,
    /// Enumerated trees merged into an observationally equivalent one.
    pub merged: usize,
    /// Enumerated trees dropped by the level width cap.
    pub truncated: usize,
    pub accepted_mutations: u64,
    pub restarts: usize,
}

/// Result of a run. Always carries the best candidate found.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchOutcome {
    pub program: Program,
    pub score: Score,
    pub stop_reason: StopReason,
    pub steps: u64,
    pub elapsed_millis: u64,
    /// Set whenever the run stopped short of matching every case.
    pub warning: Option<String>,
    pub stats: SearchStats,
}

impl SearchOutcome {
    pub fn solved(&self) -> bool {
        self.stop_reason.is_solved()
    }
}

#[derive(Debug, Clone)]
struct Candidate {
    expr: Expr,
    fitness: Fitness,
    text: String,
}

impl Candidate {
    fn new(expr: Expr, fitness: Fitness) -> Self {
        let text = expr.to_string();
        Self {
            expr,
            fitness,
            text,
        }
    }

    /// Lower error, then more exact matches, then the smaller tree, then the
    /// canonical text.
    fn rank(&self, other: &Candidate) -> Ordering {
        self.fitness
            .mean_absolute_error
            .total_cmp(&other.fitness.mean_absolute_error)
            .then(other.fitness.exact_match_count.cmp(&self.fitness.exact_match_count))
            .then(self.expr.size().cmp(&other.expr.size()))
            .then_with(|| self.text.cmp(&other.text))
    }

    /// Acceptance: never a higher error, and strictly better on error, exact
    /// matches, or size.
    fn improves_on(&self, other: &Candidate) -> bool {
        let (a, b) = (&self.fitness, &other.fitness);
        if a.mean_absolute_error > b.mean_absolute_error {
            return false;
        }
        a.mean_absolute_error < b.mean_absolute_error
            || a.exact_match_count > b.exact_match_count
            || (a.exact_match_count == b.exact_match_count && self.expr.size() < other.expr.size())
    }
}

#[derive(Default)]
struct Counters {
    fitted: AtomicU64,
    evaluations: AtomicU64,
}

/// Searches for an expression reproducing a case set.
#[derive(Debug, Clone)]
pub struct SearchEngine {
    grammar: Grammar,
    fit: FitConfig,
    budget: SearchBudget,
    config: SearchConfig,
    seed: u64,
}

impl SearchEngine {
    pub fn new(
        grammar: Grammar,
        fit: FitConfig,
        budget: SearchBudget,
        config: SearchConfig,
        seed: u64,
    ) -> Result<Self, SearchError> {
        let mut problems = grammar.problems();
        problems.extend(fit.problems());
        problems.extend(budget.problems());
        problems.extend(config.problems());
        if !problems.is_empty() {
            return Err(SearchError::Config(problems));
        }
        Ok(Self {
            grammar,
            fit,
            budget,
            config,
            seed,
        })
    }

    /// Structural bounds every candidate must respect.
    pub fn limits(&self) -> ExprLimits {
        ExprLimits {
            max_nodes: self.budget.max_nodes,
            max_depth: self.budget.max_depth,
        }
    }

    /// Search for a program matching `cases`, trying `seeds` first.
    ///
    /// Every hypothesis tried is appended to `log`.
    pub fn run(
        &self,
        cases: &[Case],
        seeds: &[Expr],
        log: &mut RationaleLog,
    ) -> Result<SearchOutcome, SearchError> {
        if cases.is_empty() {
            return Err(SearchError::EmptyCases);
        }
        info!(
            "search over {} cases with {} seeds (seed {})",
            cases.len(),
            seeds.len(),
            self.seed
        );

        let mut run = Run::new(self, cases, log);
        let reason = match run.seed(seeds) {
            Some(reason) => reason,
            None => match run.enumerate() {
                Some(reason) => reason,
                None => run.refine(),
            },
        };
        run.finish(reason)
    }

    /// Fit a skeleton; keeps the skeleton's own constants when fitting does
    /// not rank better.
    fn candidate(&self, skeleton: &Expr, cases: &[Case], counters: &Counters) -> Candidate {
        let fitted = fit(skeleton, cases, &self.fit);
        counters.fitted.fetch_add(1, AtomicOrdering::Relaxed);
        counters
            .evaluations
            .fetch_add(fitted.evaluations as u64, AtomicOrdering::Relaxed);

        let raw = Candidate::new(skeleton.clone(), fitness(skeleton, cases));
        if !fitted.expr.constants().iter().all(|c| c.is_finite()) {
            return raw;
        }
        let tuned = Candidate::new(fitted.expr, fitted.fitness);
        if raw.rank(&tuned) == Ordering::Less {
            raw
        } else {
            tuned
        }
    }
}

struct Run<'a> {
    engine: &'a SearchEngine,
    cases: &'a [Case],
    log: &'a mut RationaleLog,
    checker: BudgetChecker,
    limits: ExprLimits,
    steps: u64,
    best: Option<Candidate>,
    /// Canonical text of every skeleton already fitted.
    tried: HashSet<String>,
    palette: Vec<Expr>,
    counters: Counters,
    stats: SearchStats,
}

impl<'a> Run<'a> {
    fn new(engine: &'a SearchEngine, cases: &'a [Case], log: &'a mut RationaleLog) -> Self {
        Self {
            engine,
            cases,
            log,
            checker: BudgetChecker::new(engine.budget),
            limits: engine.limits(),
            steps: 0,
            best: None,
            tried: HashSet::new(),
            palette: Vec::new(),
            counters: Counters::default(),
            stats: SearchStats::default(),
        }
    }

    fn solved(&self) -> bool {
        self.best.as_ref().is_some_and(|b| b.fitness.passed())
    }

    /// Make `cand` the best if it improves on it. The first offer always wins.
    fn offer(&mut self, cand: &Candidate) -> bool {
        let accept = match &self.best {
            None => true,
            Some(best) => cand.improves_on(best),
        };
        if accept {
            self.best = Some(cand.clone());
        }
        accept
    }

    fn record(&mut self, phase: Phase, cand: &Candidate, accepted: bool) {
        self.log.record(
            self.steps,
            phase,
            cand.text.as_str(),
            cand.fitness.mean_absolute_error,
            cand.fitness.exact_match_count,
            accepted,
        );
    }

    fn seed(&mut self, seeds: &[Expr]) -> Option<StopReason> {
        for (i, seed) in seeds.iter().enumerate() {
            if let Some(reason) = self.checker.check(self.steps) {
                return Some(reason);
            }
            if let Err(errors) = validate_expr(seed, &self.limits) {
                warn!("skipping seed {i}: {errors:?}");
                continue;
            }
            self.tried.insert(canonicalize(seed).to_string());
            self.steps += 1;
            let cand = self.engine.candidate(seed, self.cases, &self.counters);
            let accepted = self.offer(&cand);
            debug!(
                "seed {i}: {} mae {:.4} exact {}",
                cand.text, cand.fitness.mean_absolute_error, cand.fitness.exact_match_count
            );
            self.record(Phase::Seed, &cand, accepted);
            if self.solved() {
                return Some(StopReason::Solved);
            }
        }
        None
    }

    fn enumerate(&mut self) -> Option<StopReason> {
        let engine = self.engine;
        let cases = self.cases;
        let mut enumerator = Enumerator::new(&engine.grammar, cases);

        let stop = loop {
            let size = enumerator.next_size();
            let Some(level) = enumerator.next_level() else {
                break None;
            };
            let level: Vec<Expr> = level
                .iter()
                .filter(|e| validate_expr(e, &self.limits).is_ok())
                .cloned()
                .collect();
            self.stats.enumerated_levels += 1;
            let room = engine.config.palette_size.saturating_sub(self.palette.len());
            self.palette.extend(level.iter().take(room).cloned());

            let mut level_best: Option<Candidate> = None;
            let mut cut = None;
            for chunk in level.chunks(engine.config.batch_size) {
                if let Some(reason) = self.checker.check(self.steps) {
                    cut = Some(reason);
                    break;
                }
                let room = usize::try_from(self.checker.remaining_steps(self.steps)).unwrap_or(usize::MAX);
                let tried = &mut self.tried;
                let batch: Vec<&Expr> = chunk
                    .iter()
                    .take(room)
                    .filter(|e| tried.insert(e.to_string()))
                    .collect();
                self.steps += batch.len() as u64;

                let counters = &self.counters;
                // Order-preserving collect keeps the reduction deterministic.
                let fitted: Vec<Candidate> = batch
                    .par_iter()
                    .map(|e| engine.candidate(e, cases, counters))
                    .collect();
                for cand in fitted {
                    let better = match &level_best {
                        None => true,
                        Some(cur) => cand.rank(cur) == Ordering::Less,
                    };
                    if better {
                        level_best = Some(cand);
                    }
                }
                if level_best.as_ref().is_some_and(|b| b.fitness.passed()) {
                    break;
                }
            }

            if let Some(cand) = level_best {
                let accepted = self.offer(&cand);
                debug!(
                    "level {size} best: {} mae {:.4} exact {}/{}",
                    cand.text,
                    cand.fitness.mean_absolute_error,
                    cand.fitness.exact_match_count,
                    cand.fitness.total_cases
                );
                self.record(Phase::Enumerate, &cand, accepted);
            }
            if self.solved() {
                break Some(StopReason::Solved);
            }
            if cut.is_some() {
                break cut;
            }
        };

        self.stats.merged = enumerator.merged();
        self.stats.truncated = enumerator.truncated();
        stop
    }

    /// Thresholds from the corpus itself: steep rate changes on every guard
    /// axis, plus each distinct trip length.
    fn corpus_thresholds(&self) -> Vec<(Axis, f64)> {
        let per_axis = self.engine.config.breakpoints_per_axis;
        let mut out = Vec::new();
        for axis in GUARD_AXES {
            for t in candidate_breakpoints(self.cases, axis, per_axis) {
                out.push((axis, t));
            }
        }
        let mut days: Vec<u32> = self.cases.iter().map(|c| c.days).collect();
        days.sort_unstable();
        days.dedup();
        out.extend(days.into_iter().map(|d| (Axis::Var { var: VarName::Days }, d as f64)));
        out
    }

    fn guards_for(expr: &Expr, corpus: &[(Axis, f64)]) -> Vec<(Axis, f64)> {
        let mut out = corpus.to_vec();
        for t in program_breakpoints(expr) {
            if !out.contains(&t) {
                out.push(t);
            }
        }
        out
    }

    fn refine(&mut self) -> StopReason {
        let engine = self.engine;
        let Some(mut current) = self.best.clone() else {
            return StopReason::SpaceExhausted;
        };
        let mut rng = stream_rng(engine.seed, MUTATION_STREAM);
        let mut restart_rng = stream_rng(engine.seed, RESTART_STREAM);
        let vars = if engine.grammar.vars.is_empty() {
            VarName::ALL.to_vec()
        } else {
            engine.grammar.vars.clone()
        };
        let corpus = self.corpus_thresholds();
        let mut guards = Self::guards_for(&current.expr, &corpus);
        let mut stale = 0u64;

        loop {
            if self.solved() {
                return StopReason::Solved;
            }
            if let Some(reason) = self.checker.check(self.steps) {
                return reason;
            }
            if stale >= engine.config.stagnation_limit {
                if self.stats.restarts >= engine.config.max_restarts {
                    return StopReason::SpaceExhausted;
                }
                current = self.restart(&mut restart_rng, &guards, &vars);
                guards = Self::guards_for(&current.expr, &corpus);
                stale = 0;
                continue;
            }

            let proposal = {
                let ctx = MutationContext {
                    palette: &self.palette,
                    binary_ops: &engine.grammar.binary_ops,
                    vars: &vars,
                    thresholds: &guards,
                };
                mutate(&current.expr, &ctx, &mut rng)
            };
            let Some((kind, skeleton)) = proposal else {
                stale += 1;
                continue;
            };
            let skeleton = canonicalize(&skeleton);
            if validate_expr(&skeleton, &self.limits).is_err()
                || !self.tried.insert(skeleton.to_string())
            {
                stale += 1;
                continue;
            }

            self.steps += 1;
            let cand = engine.candidate(&skeleton, self.cases, &self.counters);
            let accepted = cand.improves_on(&current);
            trace!(
                "{kind:?}: {} mae {:.4}{}",
                cand.text,
                cand.fitness.mean_absolute_error,
                if accepted { " (accepted)" } else { "" }
            );
            self.record(Phase::Refine, &cand, accepted);
            if accepted {
                self.stats.accepted_mutations += 1;
                current = cand;
                stale = 0;
                guards = Self::guards_for(&current.expr, &corpus);
                let improves_best = self.best.as_ref().map_or(true, |b| current.improves_on(b));
                if improves_best {
                    self.best = Some(current.clone());
                }
            } else {
                stale += 1;
            }
        }
    }

    /// Jump to a perturbed point: a few mutations applied to the best
    /// candidate or to a palette term. Logged as exploration, which is exempt
    /// from monotonic acceptance.
    fn restart(&mut self, rng: &mut ChaCha8Rng, guards: &[(Axis, f64)], vars: &[VarName]) -> Candidate {
        let engine = self.engine;
        self.stats.restarts += 1;

        let mut expr = match (&self.best, rng.gen_bool(0.5)) {
            (Some(best), true) => best.expr.clone(),
            (best, _) => match self.palette.choose(rng) {
                Some(term) => term.clone(),
                None => best.as_ref().map_or(Expr::Const(0.0), |b| b.expr.clone()),
            },
        };
        {
            let ctx = MutationContext {
                palette: &self.palette,
                binary_ops: &engine.grammar.binary_ops,
                vars,
                thresholds: guards,
            };
            for _ in 0..engine.config.restart_kicks {
                if let Some((_, next)) = mutate(&expr, &ctx, rng) {
                    let next = canonicalize(&next);
                    if validate_expr(&next, &self.limits).is_ok() {
                        expr = next;
                    }
                }
            }
        }

        self.tried.insert(expr.to_string());
        self.steps += 1;
        let cand = engine.candidate(&expr, self.cases, &self.counters);
        info!(
            "restart {} from {} (mae {:.4})",
            self.stats.restarts, cand.text, cand.fitness.mean_absolute_error
        );
        self.record(Phase::Explore, &cand, true);
        let improves_best = self.best.as_ref().map_or(true, |b| cand.improves_on(b));
        if improves_best {
            self.best = Some(cand.clone());
        }
        cand
    }

    fn finish(self, reason: StopReason) -> Result<SearchOutcome, SearchError> {
        let engine = self.engine;
        let best = match self.best {
            Some(best) => best,
            None => engine.candidate(&Expr::Const(0.0), self.cases, &self.counters),
        };

        let rationale = explain(&best.expr, self.cases);
        let program = Program::new(best.expr, &self.limits)
            .map_err(SearchError::InvalidProgram)?
            .with_rationale(rationale);
        let score = score_expr(&program.root, self.cases, engine.config.top_k);
        let stop_reason = if score.passed() {
            StopReason::Solved
        } else {
            reason
        };

        let warning = (!score.passed()).then(|| {
            format!(
                "search stopped ({stop_reason:?}) with {} of {} cases unmatched; MAE {:.4}, max error {:.4}",
                score.total_cases - score.exact_match_count,
                score.total_cases,
                score.mean_absolute_error,
                score.max_error
            )
        });
        match &warning {
            Some(w) => warn!("{w}"),
            None => info!("solved after {} steps: {}", self.steps, program.root),
        }

        let mut stats = self.stats;
        stats.candidates_fitted = self.counters.fitted.load(AtomicOrdering::Relaxed);
        stats.objective_evaluations = self.counters.evaluations.load(AtomicOrdering::Relaxed);

        Ok(SearchOutcome {
            program,
            score,
            stop_reason,
            steps: self.steps,
            elapsed_millis: self.checker.elapsed_millis(),
            warning,
            stats,
        })
    }
}
