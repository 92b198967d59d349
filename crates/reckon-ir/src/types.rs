use std::fmt;

use serde::{Deserialize, Serialize};

use crate::expr::{Expr, VarName};
use crate::validate::{validate_expr, ExprError, ExprLimits};

// ── Inputs & cases ───────────────────────────────────────────────────

/// One input triple.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Inputs {
    pub days: u32,
    pub miles: f64,
    pub receipts: f64,
}

impl Inputs {
    pub fn new(days: u32, miles: f64, receipts: f64) -> Self {
        Self {
            days,
            miles,
            receipts,
        }
    }

    pub fn get(&self, var: VarName) -> f64 {
        match var {
            VarName::Days => self.days as f64,
            VarName::Miles => self.miles,
            VarName::Receipts => self.receipts,
        }
    }
}

/// A labeled example. Immutable once loaded.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Case {
    pub days: u32,
    pub miles: f64,
    pub receipts: f64,
    pub expected: f64,
}

impl Case {
    pub fn new(days: u32, miles: f64, receipts: f64, expected: f64) -> Self {
        Self {
            days,
            miles,
            receipts,
            expected,
        }
    }

    pub fn inputs(&self) -> Inputs {
        Inputs::new(self.days, self.miles, self.receipts)
    }

    /// Domain check: at least one day, non-negative finite amounts.
    pub fn check(&self) -> Result<(), String> {
        if self.days < 1 {
            return Err("trip duration must be at least one day".to_string());
        }
        if !self.miles.is_finite() || self.miles < 0.0 {
            return Err(format!("miles must be non-negative, got {}", self.miles));
        }
        if !self.receipts.is_finite() || self.receipts < 0.0 {
            return Err(format!("receipts must be non-negative, got {}", self.receipts));
        }
        if !self.expected.is_finite() {
            return Err("expected output must be finite".to_string());
        }
        Ok(())
    }
}

impl fmt::Display for Case {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "days={} miles={} receipts={} expected={}",
            self.days, self.miles, self.receipts, self.expected
        )
    }
}

/// Corpus record as found on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CorpusRecord {
    Flat {
        trip_duration_days: u32,
        miles_traveled: f64,
        total_receipts_amount: f64,
        expected_output: f64,
    },
    Nested {
        input: RecordInput,
        expected_output: f64,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordInput {
    pub trip_duration_days: u32,
    pub miles_traveled: f64,
    pub total_receipts_amount: f64,
}

impl CorpusRecord {
    pub fn into_case(self) -> Case {
        match self {
            CorpusRecord::Flat {
                trip_duration_days,
                miles_traveled,
                total_receipts_amount,
                expected_output,
            } => Case::new(
                trip_duration_days,
                miles_traveled,
                total_receipts_amount,
                expected_output,
            ),
            CorpusRecord::Nested {
                input,
                expected_output,
            } => Case::new(
                input.trip_duration_days,
                input.miles_traveled,
                input.total_receipts_amount,
                expected_output,
            ),
        }
    }
}

// ── Fuzz cases ───────────────────────────────────────────────────────

/// An axis a breakpoint lives on: a raw input or a ratio of two inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Axis {
    Var { var: VarName },
    Ratio { num: VarName, den: VarName },
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Axis::Var { var } => write!(f, "{}", var.as_str()),
            Axis::Ratio { num, den } => write!(f, "{}/{}", num.as_str(), den.as_str()),
        }
    }
}

/// The sampling region a fuzz case was drawn from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "region", rename_all = "snake_case")]
pub enum Region {
    Breakpoint { axis: Axis, threshold: f64, offset: f64 },
    Extreme,
    Uniform,
}

/// A case labeled by the oracle instead of the corpus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FuzzCase {
    pub case: Case,
    pub region: Region,
}

// ── Programs ─────────────────────────────────────────────────────────

/// Why a constant or branch looks the way it does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RationaleNote {
    /// `c<N>` for the N-th free constant, `if<N>.then` / `if<N>.else` for branches.
    pub target: String,
    pub note: String,
}

/// A discovered formula with its supporting notes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    #[serde(rename = "expression")]
    pub root: Expr,
    #[serde(default)]
    pub rationale: Vec<RationaleNote>,
}

impl Program {
    pub fn new(root: Expr, limits: &ExprLimits) -> Result<Self, Vec<ExprError>> {
        validate_expr(&root, limits)?;
        Ok(Self {
            root,
            rationale: Vec::new(),
        })
    }

    pub fn with_rationale(mut self, rationale: Vec<RationaleNote>) -> Self {
        self.rationale = rationale;
        self
    }

    /// Free constants in slot order (`c0`, `c1`, ...).
    pub fn constants(&self) -> Vec<f64> {
        self.root.constants()
    }

    pub fn note(&self, target: &str) -> Option<&str> {
        self.rationale
            .iter()
            .find(|n| n.target == target)
            .map(|n| n.note.as_str())
    }

    /// Serialize to the line-oriented artifact read by [`crate::parse::parse_program`].
    pub fn to_text(&self) -> String {
        let mut out = String::from("# reckon program\n");
        out.push_str(&format!("expr: {}\n", self.root));
        for note in &self.rationale {
            let flat = note.note.replace('\n', " ");
            out.push_str(&format!("why {}: {}\n", note.target, flat));
        }
        out
    }
}
