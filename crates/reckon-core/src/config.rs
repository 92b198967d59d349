//! Campaign configuration.
//!
//! Every section has a working default, so `{}` is a valid configuration.
//! Problems are collected across all sections before failing.

use serde::{Deserialize, Serialize};

use reckon_explore::fuzz::FuzzConfig;
use reckon_explore::search::budget::SearchBudget;
use reckon_explore::search::enumerate::Grammar;
use reckon_explore::search::fit::FitConfig;
use reckon_explore::search::{SearchConfig, SearchEngine, SearchError};
use reckon_ir::types::Case;
use reckon_oracle::OracleConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid configuration: {}", .0.join("; "))]
    Invalid(Vec<String>),

    #[error("corpus is empty")]
    EmptyCorpus,

    #[error("corpus case #{index} is out of domain: {reason}")]
    BadCase { index: usize, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CampaignConfig {
    pub grammar: Grammar,
    pub fit: FitConfig,
    pub budget: SearchBudget,
    pub search: SearchConfig,
    pub fuzz: FuzzConfig,
    /// Leave `program` empty to run without fuzzing.
    pub oracle: OracleConfig,
    /// Seeds every random stream of the campaign.
    pub seed: u64,
    /// Search-then-fuzz rounds.
    pub max_rounds: usize,
    /// Failing fuzz cases moved into the active set per round.
    pub promote_per_round: usize,
}

impl Default for CampaignConfig {
    fn default() -> Self {
        Self {
            grammar: Grammar::default(),
            fit: FitConfig::default(),
            budget: SearchBudget::default(),
            search: SearchConfig::default(),
            fuzz: FuzzConfig::default(),
            oracle: OracleConfig::default(),
            seed: 0,
            max_rounds: 3,
            promote_per_round: 25,
        }
    }
}

impl CampaignConfig {
    /// Parse and validate.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();
        let sections = [
            ("grammar", self.grammar.problems()),
            ("fit", self.fit.problems()),
            ("budget", self.budget.problems()),
            ("search", self.search.problems()),
            ("fuzz", self.fuzz.problems()),
            ("oracle", self.oracle.problems()),
        ];
        for (section, found) in sections {
            problems.extend(found.into_iter().map(|p| format!("{section}: {p}")));
        }
        if self.max_rounds == 0 {
            problems.push("max_rounds must be positive".to_string());
        }
        if self.promote_per_round == 0 {
            problems.push("promote_per_round must be positive".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(problems))
        }
    }

    pub fn engine(&self) -> Result<SearchEngine, SearchError> {
        SearchEngine::new(
            self.grammar.clone(),
            self.fit.clone(),
            self.budget,
            self.search.clone(),
            self.seed,
        )
    }
}

/// A corpus must be non-empty and every case in domain.
pub fn check_corpus(cases: &[Case]) -> Result<(), ConfigError> {
    if cases.is_empty() {
        return Err(ConfigError::EmptyCorpus);
    }
    for (index, case) in cases.iter().enumerate() {
        case.check()
            .map_err(|reason| ConfigError::BadCase { index, reason })?;
    }
    Ok(())
}
