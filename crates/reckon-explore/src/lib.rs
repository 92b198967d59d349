pub mod fuzz;
pub mod ledger;
pub mod rationale;
pub mod search;

pub use fuzz::{FuzzConfig, FuzzGenerator};
pub use ledger::{Phase, RationaleLog};
pub use search::budget::{SearchBudget, StopReason};
pub use search::{SearchConfig, SearchEngine, SearchError, SearchOutcome};
