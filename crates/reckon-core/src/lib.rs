pub mod campaign;
pub mod config;
pub mod evaluate;

pub use campaign::{Campaign, CampaignError, CampaignReport, FuzzStatus};
pub use config::{CampaignConfig, ConfigError};
pub use evaluate::{evaluate_artifact, EvaluationReport};
