pub mod eval;
pub mod score;
pub mod stats;

pub use eval::{compute, compute_expr, evaluate, is_degenerate};
pub use score::{fitness, score, score_expr, CounterExample, Fitness, Score, TOLERANCE};
