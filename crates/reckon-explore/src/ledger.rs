//! Append-only ledger of hypotheses tried and their outcomes.
//!
//! The ledger is passed in by the caller as `&mut RationaleLog`; nothing in
//! the workspace keeps a global one.

use std::io::Write;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// The search or campaign phase that produced an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// A hypothesized expression fitted before enumeration.
    Seed,
    /// Best of an enumeration level.
    Enumerate,
    /// A hill-climbing mutation.
    Refine,
    /// A randomized restart. Exempt from monotonic acceptance.
    Explore,
    /// Fuzz cases checked against the best program.
    Fuzz,
    /// The best program rescored on a new active set.
    Validate,
}

impl Phase {
    /// Entries of these phases set a new reference error instead of being
    /// held to the previous one.
    pub fn resets_baseline(self) -> bool {
        matches!(self, Phase::Explore | Phase::Fuzz | Phase::Validate)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
    pub iteration: u64,
    pub phase: Phase,
    /// Expression text, or a short description for non-search phases.
    pub hypothesis: String,
    pub mae: f64,
    pub exact_matches: usize,
    pub accepted: bool,
}

/// An accepted entry that raised the error over the running reference.
#[derive(Debug, Clone, PartialEq)]
pub struct AcceptanceViolation {
    pub index: usize,
    pub reference_mae: f64,
    pub mae: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RationaleLog {
    entries: Vec<LedgerEntry>,
}

impl RationaleLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(
        &mut self,
        iteration: u64,
        phase: Phase,
        hypothesis: impl Into<String>,
        mae: f64,
        exact_matches: usize,
        accepted: bool,
    ) {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        self.entries.push(LedgerEntry {
            timestamp,
            iteration,
            phase,
            hypothesis: hypothesis.into(),
            mae,
            exact_matches,
            accepted,
        });
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn accepted(&self) -> impl Iterator<Item = &LedgerEntry> {
        self.entries.iter().filter(|e| e.accepted)
    }

    /// Accepted entries whose MAE exceeds the last accepted one, counting
    /// from the most recent baseline reset.
    pub fn acceptance_violations(&self) -> Vec<AcceptanceViolation> {
        let mut reference = f64::INFINITY;
        let mut out = Vec::new();
        for (index, entry) in self.entries.iter().enumerate() {
            if entry.phase.resets_baseline() {
                reference = entry.mae;
                continue;
            }
            if !entry.accepted {
                continue;
            }
            if entry.mae > reference {
                out.push(AcceptanceViolation {
                    index,
                    reference_mae: reference,
                    mae: entry.mae,
                });
            }
            reference = entry.mae;
        }
        out
    }

    /// One JSON object per line.
    pub fn to_jsonl(&self) -> Result<String, serde_json::Error> {
        let mut out = String::new();
        for entry in &self.entries {
            out.push_str(&serde_json::to_string(entry)?);
            out.push('\n');
        }
        Ok(out)
    }

    pub fn write_jsonl<W: Write>(&self, mut writer: W) -> std::io::Result<()> {
        for entry in &self.entries {
            serde_json::to_writer(&mut writer, entry)?;
            writer.write_all(b"\n")?;
        }
        Ok(())
    }

    /// Parse a ledger previously exported with [`RationaleLog::to_jsonl`].
    pub fn from_jsonl(text: &str) -> Result<Self, serde_json::Error> {
        let entries = text
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(serde_json::from_str)
            .collect::<Result<Vec<LedgerEntry>, _>>()?;
        Ok(Self { entries })
    }
}
