pub mod expr;
pub mod parse;
pub mod types;
pub mod validate;

pub use expr::{BinOp, CmpOp, Expr, Predicate, UnaryOp, VarName};
pub use types::{Axis, Case, FuzzCase, Inputs, Program, RationaleNote, Region};
