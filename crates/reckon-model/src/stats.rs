//! Corpus summary statistics.
//!
//! Bucketed means of per-day and per-mile reimbursement, trip efficiency
//! and receipt bands, plus candidate breakpoints where a per-unit rate
//! changes sharply. These feed the fuzz generator and the guard palette of
//! the search; they never decide a formula on their own.

use serde::{Deserialize, Serialize};

use reckon_ir::types::{Axis, Case};

/// Aggregate over the cases whose key falls in `[lower, upper)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bucket {
    pub label: String,
    pub lower: f64,
    pub upper: f64,
    pub count: usize,
    pub mean: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorpusSummary {
    /// Reimbursement per day, by trip length.
    pub per_diem: Vec<Bucket>,
    /// Reimbursement per mile, by distance band.
    pub mileage: Vec<Bucket>,
    /// Total reimbursement, by miles per day.
    pub efficiency: Vec<Bucket>,
    /// Total reimbursement, by receipt band.
    pub receipts: Vec<Bucket>,
}

const DAY_EDGES: &[f64] = &[1.0, 5.0, 6.0, 9.0, f64::INFINITY];
const MILE_EDGES: &[f64] = &[0.0, 101.0, 276.0, 917.0, f64::INFINITY];
const EFFICIENCY_EDGES: &[f64] = &[0.0, 100.0, 180.0, 221.0, 301.0, f64::INFINITY];
const RECEIPT_EDGES: &[f64] = &[0.0, 50.0, 600.0, 800.0, 1000.0, f64::INFINITY];

pub fn summarize(cases: &[Case]) -> CorpusSummary {
    CorpusSummary {
        per_diem: bucketize(
            cases,
            DAY_EDGES,
            |c| Some(c.days as f64),
            |c| Some(c.expected / c.days as f64),
        ),
        mileage: bucketize(
            cases,
            MILE_EDGES,
            |c| Some(c.miles),
            |c| (c.miles > 0.0).then(|| c.expected / c.miles),
        ),
        efficiency: bucketize(
            cases,
            EFFICIENCY_EDGES,
            |c| Some(c.miles / c.days as f64),
            |c| Some(c.expected),
        ),
        receipts: bucketize(cases, RECEIPT_EDGES, |c| Some(c.receipts), |c| Some(c.expected)),
    }
}

/// Group cases by `key` into `[edges[i], edges[i+1])` and average `metric`.
pub fn bucketize(
    cases: &[Case],
    edges: &[f64],
    key: impl Fn(&Case) -> Option<f64>,
    metric: impl Fn(&Case) -> Option<f64>,
) -> Vec<Bucket> {
    edges
        .windows(2)
        .map(|w| {
            let (lower, upper) = (w[0], w[1]);
            let values: Vec<f64> = cases
                .iter()
                .filter(|c| key(c).is_some_and(|k| k >= lower && k < upper))
                .filter_map(&metric)
                .collect();
            let mean = if values.is_empty() {
                None
            } else {
                Some(values.iter().sum::<f64>() / values.len() as f64)
            };
            Bucket {
                label: if upper.is_infinite() {
                    format!("{lower}+")
                } else {
                    format!("[{lower}, {upper})")
                },
                lower,
                upper,
                count: values.len(),
                mean,
            }
        })
        .collect()
}

/// Smoothing window for breakpoint detection.
pub const BREAKPOINT_WINDOW: usize = 20;

/// Positions along `axis` where the per-unit reimbursement changes fastest.
///
/// Sorts the cases along the axis, smooths the per-unit rate with a centered
/// rolling mean, and returns the `count` positions with the steepest slope,
/// rounded to whole units and deduplicated. Returns nothing for corpora
/// smaller than two smoothing windows.
pub fn candidate_breakpoints(cases: &[Case], axis: Axis, count: usize) -> Vec<f64> {
    let mut points: Vec<(f64, f64)> = cases
        .iter()
        .filter_map(|c| {
            let x = axis_value(c, axis)?;
            let rate = match axis {
                Axis::Var { var } => {
                    let unit = c.inputs().get(var);
                    if unit <= 0.0 {
                        return None;
                    }
                    c.expected / unit
                }
                Axis::Ratio { .. } => c.expected,
            };
            Some((x, rate))
        })
        .collect();

    if points.len() < BREAKPOINT_WINDOW * 2 {
        return Vec::new();
    }
    points.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.total_cmp(&b.1)));

    let half = BREAKPOINT_WINDOW / 2;
    let smooth: Vec<f64> = (0..points.len())
        .map(|i| {
            let lo = i.saturating_sub(half);
            let hi = (i + BREAKPOINT_WINDOW - half).min(points.len());
            let slice = &points[lo..hi];
            slice.iter().map(|p| p.1).sum::<f64>() / slice.len() as f64
        })
        .collect();

    let mut slopes: Vec<(usize, f64)> = (0..points.len() - 1)
        .filter_map(|i| {
            let dx = points[i + 1].0 - points[i].0;
            if dx <= 0.0 {
                return None;
            }
            Some((i + 1, ((smooth[i + 1] - smooth[i]) / dx).abs()))
        })
        .collect();
    slopes.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

    let mut out: Vec<f64> = slopes
        .into_iter()
        .take(count)
        .map(|(i, _)| points[i].0.round())
        .collect();
    out.sort_by(f64::total_cmp);
    out.dedup();
    out
}

/// Position of a case along an axis. `None` for a zero denominator.
pub fn axis_value(case: &Case, axis: Axis) -> Option<f64> {
    let inputs = case.inputs();
    match axis {
        Axis::Var { var } => Some(inputs.get(var)),
        Axis::Ratio { num, den } => {
            let d = inputs.get(den);
            (d != 0.0).then(|| inputs.get(num) / d)
        }
    }
}
