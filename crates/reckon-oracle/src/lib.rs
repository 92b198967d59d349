//! Access to the legacy reimbursement function.
//!
//! [`Oracle::ask`] is the only way the rest of the workspace reaches the
//! legacy implementation. It is opaque: nothing here knows how the answer is
//! computed, only how to ask for it and how to remember the answer.

pub mod cache;
pub mod command;

pub use cache::{CacheStats, CachedOracle};
pub use command::{CommandOracle, OracleConfig};

/// Errors from asking the legacy function.
#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    #[error("oracle unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("oracle returned malformed output: {output:?}")]
    Malformed { output: String },

    #[error("oracle i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// An opaque source of ground-truth reimbursement amounts.
pub trait Oracle: Send + Sync {
    fn ask(&self, days: u32, miles: f64, receipts: f64) -> Result<f64, OracleError>;
}

/// An oracle backed by an in-process closure.
pub struct FnOracle<F> {
    f: F,
}

impl<F> FnOracle<F>
where
    F: Fn(u32, f64, f64) -> f64 + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> Oracle for FnOracle<F>
where
    F: Fn(u32, f64, f64) -> f64 + Send + Sync,
{
    fn ask(&self, days: u32, miles: f64, receipts: f64) -> Result<f64, OracleError> {
        let value = (self.f)(days, miles, receipts);
        if value.is_finite() {
            Ok(value)
        } else {
            Err(OracleError::Malformed {
                output: value.to_string(),
            })
        }
    }
}

impl<O: Oracle + ?Sized> Oracle for &O {
    fn ask(&self, days: u32, miles: f64, receipts: f64) -> Result<f64, OracleError> {
        (**self).ask(days, miles, receipts)
    }
}

impl<O: Oracle + ?Sized> Oracle for Box<O> {
    fn ask(&self, days: u32, miles: f64, receipts: f64) -> Result<f64, OracleError> {
        (**self).ask(days, miles, receipts)
    }
}
