use std::fmt;

use serde::{Deserialize, Serialize};

/// One of the three inputs of the function under study.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VarName {
    Days,
    Miles,
    Receipts,
}

impl VarName {
    pub const ALL: [VarName; 3] = [VarName::Days, VarName::Miles, VarName::Receipts];

    pub fn as_str(self) -> &'static str {
        match self {
            VarName::Days => "days",
            VarName::Miles => "miles",
            VarName::Receipts => "receipts",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "days" => Some(VarName::Days),
            "miles" => Some(VarName::Miles),
            "receipts" => Some(VarName::Receipts),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Max,
    Min,
}

impl BinOp {
    pub const ALL: [BinOp; 6] = [
        BinOp::Add,
        BinOp::Sub,
        BinOp::Mul,
        BinOp::Div,
        BinOp::Max,
        BinOp::Min,
    ];

    pub fn is_commutative(self) -> bool {
        matches!(self, BinOp::Add | BinOp::Mul | BinOp::Max | BinOp::Min)
    }

    /// Infix operators print as `(a op b)`, the others as `op(a, b)`.
    pub fn is_infix(self) -> bool {
        !matches!(self, BinOp::Max | BinOp::Min)
    }

    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Max => "max",
            BinOp::Min => "min",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOp {
    Abs,
}

impl UnaryOp {
    pub fn name(self) -> &'static str {
        match self {
            UnaryOp::Abs => "abs",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    pub const ALL: [CmpOp; 6] = [CmpOp::Eq, CmpOp::Ne, CmpOp::Lt, CmpOp::Le, CmpOp::Gt, CmpOp::Ge];

    pub fn symbol(self) -> &'static str {
        match self {
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
        }
    }

    pub fn from_symbol(symbol: &str) -> Option<Self> {
        CmpOp::ALL.into_iter().find(|op| op.symbol() == symbol)
    }
}

/// A comparison. Only ever held as the condition of [`Expr::If`], so a
/// boolean can never flow into arithmetic.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub op: CmpOp,
    pub left: Box<Expr>,
    pub right: Box<Expr>,
}

impl Predicate {
    pub fn new(op: CmpOp, left: Expr, right: Expr) -> Self {
        Self {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn size(&self) -> usize {
        1 + self.left.size() + self.right.size()
    }
}

/// The closed expression grammar candidate formulas are written in.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Const(f64),
    Var(VarName),
    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Scale {
        factor: f64,
        expr: Box<Expr>,
    },
    Round {
        expr: Box<Expr>,
        decimals: u8,
    },
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    If {
        cond: Predicate,
        then_branch: Box<Expr>,
        else_branch: Box<Expr>,
    },
}

// ── Constructors ─────────────────────────────────────────────────────

impl Expr {
    pub fn constant(value: f64) -> Self {
        Expr::Const(value)
    }

    pub fn var(name: VarName) -> Self {
        Expr::Var(name)
    }

    pub fn binary(op: BinOp, left: Expr, right: Expr) -> Self {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn add(left: Expr, right: Expr) -> Self {
        Self::binary(BinOp::Add, left, right)
    }

    pub fn sub(left: Expr, right: Expr) -> Self {
        Self::binary(BinOp::Sub, left, right)
    }

    pub fn mul(left: Expr, right: Expr) -> Self {
        Self::binary(BinOp::Mul, left, right)
    }

    pub fn div(left: Expr, right: Expr) -> Self {
        Self::binary(BinOp::Div, left, right)
    }

    pub fn max(left: Expr, right: Expr) -> Self {
        Self::binary(BinOp::Max, left, right)
    }

    pub fn min(left: Expr, right: Expr) -> Self {
        Self::binary(BinOp::Min, left, right)
    }

    pub fn scale(factor: f64, expr: Expr) -> Self {
        Expr::Scale {
            factor,
            expr: Box::new(expr),
        }
    }

    pub fn round(expr: Expr, decimals: u8) -> Self {
        Expr::Round {
            expr: Box::new(expr),
            decimals,
        }
    }

    pub fn abs(expr: Expr) -> Self {
        Expr::Unary {
            op: UnaryOp::Abs,
            expr: Box::new(expr),
        }
    }

    pub fn branch(cond: Predicate, then_branch: Expr, else_branch: Expr) -> Self {
        Expr::If {
            cond,
            then_branch: Box::new(then_branch),
            else_branch: Box::new(else_branch),
        }
    }
}

// ── Structure queries ────────────────────────────────────────────────

impl Expr {
    /// Node count. Predicate nodes count toward the owning `If`.
    pub fn size(&self) -> usize {
        match self {
            Expr::Const(_) | Expr::Var(_) => 1,
            Expr::Binary { left, right, .. } => 1 + left.size() + right.size(),
            Expr::Scale { expr, .. } | Expr::Round { expr, .. } | Expr::Unary { expr, .. } => {
                1 + expr.size()
            }
            Expr::If {
                cond,
                then_branch,
                else_branch,
            } => 1 + cond.size() + then_branch.size() + else_branch.size(),
        }
    }

    pub fn depth(&self) -> usize {
        match self {
            Expr::Const(_) | Expr::Var(_) => 1,
            Expr::Binary { left, right, .. } => 1 + left.depth().max(right.depth()),
            Expr::Scale { expr, .. } | Expr::Round { expr, .. } | Expr::Unary { expr, .. } => {
                1 + expr.depth()
            }
            Expr::If {
                cond,
                then_branch,
                else_branch,
            } => {
                let cond_depth = 1 + cond.left.depth().max(cond.right.depth());
                1 + cond_depth
                    .max(then_branch.depth())
                    .max(else_branch.depth())
            }
        }
    }

    pub fn is_const(&self) -> bool {
        matches!(self, Expr::Const(_))
    }

    /// Free constants in pre-order: `Const` leaves and `Scale` factors.
    /// Round precisions are structural and not included.
    pub fn constants(&self) -> Vec<f64> {
        let mut out = Vec::new();
        self.visit_constants(&mut |c| out.push(c));
        out
    }

    fn visit_constants(&self, f: &mut impl FnMut(f64)) {
        match self {
            Expr::Const(c) => f(*c),
            Expr::Var(_) => {}
            Expr::Binary { left, right, .. } => {
                left.visit_constants(f);
                right.visit_constants(f);
            }
            Expr::Scale { factor, expr } => {
                f(*factor);
                expr.visit_constants(f);
            }
            Expr::Round { expr, .. } | Expr::Unary { expr, .. } => expr.visit_constants(f),
            Expr::If {
                cond,
                then_branch,
                else_branch,
            } => {
                cond.left.visit_constants(f);
                cond.right.visit_constants(f);
                then_branch.visit_constants(f);
                else_branch.visit_constants(f);
            }
        }
    }

    /// Rebuild with the free constants replaced, in the order of [`Expr::constants`].
    /// Missing trailing values leave the original constants in place.
    pub fn with_constants(&self, values: &[f64]) -> Expr {
        let mut iter = values.iter().copied();
        self.map_constants(&mut |c| iter.next().unwrap_or(c))
    }

    pub fn map_constants(&self, f: &mut impl FnMut(f64) -> f64) -> Expr {
        match self {
            Expr::Const(c) => Expr::Const(f(*c)),
            Expr::Var(v) => Expr::Var(*v),
            Expr::Binary { op, left, right } => {
                let left = left.map_constants(f);
                let right = right.map_constants(f);
                Expr::binary(*op, left, right)
            }
            Expr::Scale { factor, expr } => {
                let factor = f(*factor);
                Expr::scale(factor, expr.map_constants(f))
            }
            Expr::Round { expr, decimals } => Expr::round(expr.map_constants(f), *decimals),
            Expr::Unary { op, expr } => Expr::Unary {
                op: *op,
                expr: Box::new(expr.map_constants(f)),
            },
            Expr::If {
                cond,
                then_branch,
                else_branch,
            } => {
                let left = cond.left.map_constants(f);
                let right = cond.right.map_constants(f);
                let then_branch = then_branch.map_constants(f);
                let else_branch = else_branch.map_constants(f);
                Expr::branch(Predicate::new(cond.op, left, right), then_branch, else_branch)
            }
        }
    }

    /// All numeric sub-expressions in pre-order, including predicate operands.
    /// Index 0 is `self`.
    pub fn nodes(&self) -> Vec<&Expr> {
        let mut out = Vec::new();
        self.collect_nodes(&mut out);
        out
    }

    fn collect_nodes<'a>(&'a self, out: &mut Vec<&'a Expr>) {
        out.push(self);
        match self {
            Expr::Const(_) | Expr::Var(_) => {}
            Expr::Binary { left, right, .. } => {
                left.collect_nodes(out);
                right.collect_nodes(out);
            }
            Expr::Scale { expr, .. } | Expr::Round { expr, .. } | Expr::Unary { expr, .. } => {
                expr.collect_nodes(out)
            }
            Expr::If {
                cond,
                then_branch,
                else_branch,
            } => {
                cond.left.collect_nodes(out);
                cond.right.collect_nodes(out);
                then_branch.collect_nodes(out);
                else_branch.collect_nodes(out);
            }
        }
    }

    /// Replace the node at pre-order `index` (as numbered by [`Expr::nodes`]).
    /// An out-of-range index returns an unchanged clone.
    pub fn replace_node(&self, index: usize, replacement: &Expr) -> Expr {
        let mut cursor = index;
        self.replace_walk(&mut cursor, replacement)
    }

    fn replace_walk(&self, cursor: &mut usize, replacement: &Expr) -> Expr {
        if *cursor == 0 {
            // Consume the cursor so no deeper node matches.
            *cursor = usize::MAX;
            return replacement.clone();
        }
        if *cursor != usize::MAX {
            *cursor -= 1;
        }
        match self {
            Expr::Const(_) | Expr::Var(_) => self.clone(),
            Expr::Binary { op, left, right } => {
                let left = left.replace_walk(cursor, replacement);
                let right = right.replace_walk(cursor, replacement);
                Expr::binary(*op, left, right)
            }
            Expr::Scale { factor, expr } => {
                Expr::scale(*factor, expr.replace_walk(cursor, replacement))
            }
            Expr::Round { expr, decimals } => {
                Expr::round(expr.replace_walk(cursor, replacement), *decimals)
            }
            Expr::Unary { op, expr } => Expr::Unary {
                op: *op,
                expr: Box::new(expr.replace_walk(cursor, replacement)),
            },
            Expr::If {
                cond,
                then_branch,
                else_branch,
            } => {
                let left = cond.left.replace_walk(cursor, replacement);
                let right = cond.right.replace_walk(cursor, replacement);
                let then_branch = then_branch.replace_walk(cursor, replacement);
                let else_branch = else_branch.replace_walk(cursor, replacement);
                Expr::branch(Predicate::new(cond.op, left, right), then_branch, else_branch)
            }
        }
    }

    /// Conditions of every `If` in pre-order.
    pub fn predicates(&self) -> Vec<&Predicate> {
        self.nodes()
            .into_iter()
            .filter_map(|node| match node {
                Expr::If { cond, .. } => Some(cond),
                _ => None,
            })
            .collect()
    }

    pub fn mentions(&self, var: VarName) -> bool {
        self.nodes()
            .into_iter()
            .any(|node| matches!(node, Expr::Var(v) if *v == var))
    }
}

// ── Text form ────────────────────────────────────────────────────────

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Const(c) => write!(f, "{c}"),
            Expr::Var(v) => write!(f, "{}", v.as_str()),
            Expr::Binary { op, left, right } if op.is_infix() => {
                write!(f, "({left} {} {right})", op.symbol())
            }
            Expr::Binary { op, left, right } => write!(f, "{}({left}, {right})", op.symbol()),
            Expr::Scale { factor, expr } => write!(f, "scale({factor}, {expr})"),
            Expr::Round { expr, decimals } => write!(f, "round({expr}, {decimals})"),
            Expr::Unary { op, expr } => write!(f, "{}({expr})", op.name()),
            Expr::If {
                cond,
                then_branch,
                else_branch,
            } => write!(f, "if({cond}, {then_branch}, {else_branch})"),
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.left, self.op.symbol(), self.right)
    }
}

impl Serialize for Expr {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Expr {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        crate::parse::parse_expr(&text).map_err(serde::de::Error::custom)
    }
}
