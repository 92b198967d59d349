use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::{Oracle, OracleError};

type Key = (u32, u64, u64);

/// Memoizes answers by exact input triple. Errors are not cached.
pub struct CachedOracle<O> {
    inner: O,
    answers: Mutex<HashMap<Key, f64>>,
    hits: AtomicUsize,
    misses: AtomicUsize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: usize,
    pub misses: usize,
    pub entries: usize,
}

impl<O: Oracle> CachedOracle<O> {
    pub fn new(inner: O) -> Self {
        Self {
            inner,
            answers: Mutex::new(HashMap::new()),
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
        }
    }

    pub fn stats(&self) -> CacheStats {
        let entries = self
            .answers
            .lock()
            .map(|m| m.len())
            .unwrap_or_else(|poisoned| poisoned.into_inner().len());
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries,
        }
    }

    pub fn into_inner(self) -> O {
        self.inner
    }
}

fn key(days: u32, miles: f64, receipts: f64) -> Key {
    // +0.0 and -0.0 share a key.
    (days, (miles + 0.0).to_bits(), (receipts + 0.0).to_bits())
}

impl<O: Oracle> Oracle for CachedOracle<O> {
    fn ask(&self, days: u32, miles: f64, receipts: f64) -> Result<f64, OracleError> {
        let k = key(days, miles, receipts);
        {
            let answers = self.answers.lock().unwrap_or_else(|p| p.into_inner());
            if let Some(v) = answers.get(&k) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(*v);
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let value = self.inner.ask(days, miles, receipts)?;
        self.answers
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(k, value);
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FnOracle;

    #[test]
    fn test_repeat_questions_hit_cache() {
        let calls = AtomicUsize::new(0);
        let oracle = CachedOracle::new(FnOracle::new(|d, m, _| {
            calls.fetch_add(1, Ordering::Relaxed);
            d as f64 + m
        }));

        assert_eq!(oracle.ask(2, 10.0, 0.0).unwrap(), 12.0);
        assert_eq!(oracle.ask(2, 10.0, 0.0).unwrap(), 12.0);
        assert_eq!(oracle.ask(3, 10.0, 0.0).unwrap(), 13.0);

        assert_eq!(calls.load(Ordering::Relaxed), 2);
        let stats = oracle.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 2);
        assert_eq!(stats.entries, 2);
    }

    #[test]
    fn test_errors_are_not_cached() {
        let oracle = CachedOracle::new(FnOracle::new(|_, m, _| 1.0 / m));
        assert!(oracle.ask(1, 0.0, 0.0).is_err());
        assert!(oracle.ask(1, 0.0, 0.0).is_err());
        assert_eq!(oracle.stats().entries, 0);
        assert_eq!(oracle.stats().misses, 2);
    }

    #[test]
    fn test_signed_zero_shares_entry() {
        let oracle = CachedOracle::new(FnOracle::new(|d, _, _| d as f64));
        oracle.ask(1, 0.0, 0.0).unwrap();
        oracle.ask(1, -0.0, 0.0).unwrap();
        assert_eq!(oracle.stats().hits, 1);
    }
}
