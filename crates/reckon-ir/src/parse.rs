//! Text form of the grammar.
//!
//! ```text
//! expr := number | -number | days | miles | receipts
//!       | ( expr + expr ) | ( expr - expr ) | ( expr * expr ) | ( expr / expr )
//!       | max(expr, expr) | min(expr, expr) | abs(expr)
//!       | scale(number, expr) | round(expr, integer)
//!       | if(expr cmp expr, expr, expr)
//! cmp  := == | != | < | <= | > | >=
//! ```
//!
//! Comparisons are only accepted as the first argument of `if`.

use crate::expr::{BinOp, CmpOp, Expr, Predicate, VarName};
use crate::types::{Case, CorpusRecord, Program, RationaleNote};
use crate::validate::{validate_expr, ExprError, ExprLimits};

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unexpected character '{ch}' at offset {pos}")]
    UnexpectedChar { ch: char, pos: usize },

    #[error("expected {expected} at offset {pos}, found '{found}'")]
    UnexpectedToken {
        expected: String,
        found: String,
        pos: usize,
    },

    #[error("unexpected end of input, expected {expected}")]
    UnexpectedEnd { expected: String },

    #[error("unknown identifier '{name}' at offset {pos}")]
    UnknownIdentifier { name: String, pos: usize },

    #[error("comparison '{symbol}' at offset {pos} is only allowed as an if() condition")]
    PredicateOutsideIf { symbol: String, pos: usize },

    #[error("invalid number '{text}' at offset {pos}")]
    InvalidNumber { text: String, pos: usize },

    #[error("program line {line}: {reason}")]
    Program { line: usize, reason: String },

    #[error("malformed expression: {}", join_errors(.0))]
    Invalid(Vec<ExprError>),

    #[error("invalid case #{index}: {reason}")]
    InvalidCase { index: usize, reason: String },

    #[error("expression nested deeper than {limit} levels at offset {pos}")]
    TooDeep { limit: usize, pos: usize },
}

/// Nesting the parser accepts before giving up. Well above any depth
/// [`ExprLimits`] admits, so limit violations are still reported by
/// validation.
pub const MAX_NESTING: usize = 256;

fn join_errors(errors: &[ExprError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

// ── Lexer ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    LParen,
    RParen,
    Comma,
    Arith(BinOp),
    Cmp(CmpOp),
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Number(n) => n.to_string(),
            Token::Ident(s) => s.clone(),
            Token::LParen => "(".to_string(),
            Token::RParen => ")".to_string(),
            Token::Comma => ",".to_string(),
            Token::Arith(op) => op.symbol().to_string(),
            Token::Cmp(op) => op.symbol().to_string(),
        }
    }
}

fn tokenize(text: &str) -> Result<Vec<(Token, usize)>, ParseError> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let ch = chars[i];
        let start = i;
        match ch {
            c if c.is_whitespace() => {
                i += 1;
                continue;
            }
            '(' => tokens.push((Token::LParen, start)),
            ')' => tokens.push((Token::RParen, start)),
            ',' => tokens.push((Token::Comma, start)),
            '+' => tokens.push((Token::Arith(BinOp::Add), start)),
            '-' => tokens.push((Token::Arith(BinOp::Sub), start)),
            '*' => tokens.push((Token::Arith(BinOp::Mul), start)),
            '/' => tokens.push((Token::Arith(BinOp::Div), start)),
            '=' | '!' | '<' | '>' => {
                let two: String = chars[i..(i + 2).min(chars.len())].iter().collect();
                let (symbol, width) = match CmpOp::from_symbol(&two) {
                    Some(_) => (two, 2),
                    None => (ch.to_string(), 1),
                };
                let op = CmpOp::from_symbol(&symbol)
                    .ok_or(ParseError::UnexpectedChar { ch, pos: start })?;
                tokens.push((Token::Cmp(op), start));
                i += width;
                continue;
            }
            c if c.is_ascii_digit() || c == '.' => {
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let value = text
                    .parse::<f64>()
                    .map_err(|_| ParseError::InvalidNumber { text, pos: start })?;
                tokens.push((Token::Number(value), start));
                continue;
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let name: String = chars[start..i].iter().collect();
                tokens.push((Token::Ident(name), start));
                continue;
            }
            other => return Err(ParseError::UnexpectedChar { ch: other, pos: start }),
        }
        i += 1;
    }

    Ok(tokens)
}

// ── Parser ───────────────────────────────────────────────────────────

struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn offset(&self) -> usize {
        self.tokens.get(self.pos).map(|(_, p)| *p).unwrap_or(usize::MAX)
    }

    fn next(&mut self, expected: &str) -> Result<(Token, usize), ParseError> {
        let item = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or_else(|| ParseError::UnexpectedEnd {
                expected: expected.to_string(),
            })?;
        self.pos += 1;
        Ok(item)
    }

    fn expect(&mut self, want: Token, expected: &str) -> Result<(), ParseError> {
        let (token, pos) = self.next(expected)?;
        if token == want {
            Ok(())
        } else {
            Err(unexpected(expected, &token, pos))
        }
    }

    fn number(&mut self) -> Result<f64, ParseError> {
        let (token, pos) = self.next("number")?;
        match token {
            Token::Number(n) => Ok(n),
            Token::Arith(BinOp::Sub) => match self.next("number")? {
                (Token::Number(n), _) => Ok(-n),
                (other, pos) => Err(unexpected("number", &other, pos)),
            },
            other => Err(unexpected("number", &other, pos)),
        }
    }

    fn expr(&mut self) -> Result<Expr, ParseError> {
        if self.depth >= MAX_NESTING {
            return Err(ParseError::TooDeep {
                limit: MAX_NESTING,
                pos: self.offset(),
            });
        }
        self.depth += 1;
        let expr = self.term();
        self.depth -= 1;
        expr
    }

    fn term(&mut self) -> Result<Expr, ParseError> {
        let (token, pos) = self.next("expression")?;
        match token {
            Token::Number(n) => Ok(Expr::Const(n)),
            Token::Arith(BinOp::Sub) => match self.next("number")? {
                (Token::Number(n), _) => Ok(Expr::Const(-n)),
                (other, pos) => Err(unexpected("number", &other, pos)),
            },
            Token::LParen => {
                let left = self.expr()?;
                let (token, pos) = self.next("operator or ')'")?;
                match token {
                    Token::RParen => Ok(left),
                    Token::Arith(op) => {
                        let right = self.expr()?;
                        self.expect(Token::RParen, "')'")?;
                        Ok(Expr::binary(op, left, right))
                    }
                    Token::Cmp(op) => Err(ParseError::PredicateOutsideIf {
                        symbol: op.symbol().to_string(),
                        pos,
                    }),
                    other => Err(unexpected("operator or ')'", &other, pos)),
                }
            }
            Token::Ident(name) => self.ident(name, pos),
            other => Err(unexpected("expression", &other, pos)),
        }
    }

    fn ident(&mut self, name: String, pos: usize) -> Result<Expr, ParseError> {
        if let Some(var) = VarName::from_name(&name) {
            return Ok(Expr::Var(var));
        }
        match name.as_str() {
            "max" | "min" => {
                let op = if name == "max" { BinOp::Max } else { BinOp::Min };
                self.expect(Token::LParen, "'('")?;
                let left = self.expr()?;
                self.expect(Token::Comma, "','")?;
                let right = self.expr()?;
                self.expect(Token::RParen, "')'")?;
                Ok(Expr::binary(op, left, right))
            }
            "abs" => {
                self.expect(Token::LParen, "'('")?;
                let inner = self.expr()?;
                self.expect(Token::RParen, "')'")?;
                Ok(Expr::abs(inner))
            }
            "scale" => {
                self.expect(Token::LParen, "'('")?;
                let factor = self.number()?;
                self.expect(Token::Comma, "','")?;
                let inner = self.expr()?;
                self.expect(Token::RParen, "')'")?;
                Ok(Expr::scale(factor, inner))
            }
            "round" => {
                self.expect(Token::LParen, "'('")?;
                let inner = self.expr()?;
                self.expect(Token::Comma, "','")?;
                let at = self.offset();
                let decimals = self.number()?;
                if decimals.fract() != 0.0 || !(0.0..=255.0).contains(&decimals) {
                    return Err(ParseError::InvalidNumber {
                        text: decimals.to_string(),
                        pos: at,
                    });
                }
                self.expect(Token::RParen, "')'")?;
                Ok(Expr::round(inner, decimals as u8))
            }
            "if" => {
                self.expect(Token::LParen, "'('")?;
                let left = self.expr()?;
                let (token, at) = self.next("comparison")?;
                let op = match token {
                    Token::Cmp(op) => op,
                    other => return Err(unexpected("comparison", &other, at)),
                };
                let right = self.expr()?;
                self.expect(Token::Comma, "','")?;
                let then_branch = self.expr()?;
                self.expect(Token::Comma, "','")?;
                let else_branch = self.expr()?;
                self.expect(Token::RParen, "')'")?;
                Ok(Expr::branch(
                    Predicate::new(op, left, right),
                    then_branch,
                    else_branch,
                ))
            }
            _ => Err(ParseError::UnknownIdentifier { name, pos }),
        }
    }
}

fn unexpected(expected: &str, found: &Token, pos: usize) -> ParseError {
    ParseError::UnexpectedToken {
        expected: expected.to_string(),
        found: found.describe(),
        pos,
    }
}

/// Parse the text form of an expression.
pub fn parse_expr(text: &str) -> Result<Expr, ParseError> {
    let mut parser = Parser {
        tokens: tokenize(text)?,
        pos: 0,
        depth: 0,
    };
    let expr = parser.expr()?;
    if let Some(token) = parser.peek() {
        if let Token::Cmp(op) = token {
            return Err(ParseError::PredicateOutsideIf {
                symbol: op.symbol().to_string(),
                pos: parser.offset(),
            });
        }
        return Err(unexpected("end of input", token, parser.offset()));
    }
    Ok(expr)
}

/// Parse a program artifact and check it against `limits`.
///
/// Blank lines and `#` comments are ignored. Exactly one `expr:` line is
/// required; each `why <target>: <note>` line attaches a rationale note.
pub fn parse_program(text: &str, limits: &ExprLimits) -> Result<Program, ParseError> {
    let mut root = None;
    let mut rationale = Vec::new();

    for (i, raw) in text.lines().enumerate() {
        let line_no = i + 1;
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some(body) = line.strip_prefix("expr:") {
            if root.is_some() {
                return Err(ParseError::Program {
                    line: line_no,
                    reason: "duplicate expr line".to_string(),
                });
            }
            root = Some(parse_expr(body.trim())?);
        } else if let Some(body) = line.strip_prefix("why ") {
            let (target, note) = body.split_once(':').ok_or_else(|| ParseError::Program {
                line: line_no,
                reason: "rationale line needs 'why <target>: <note>'".to_string(),
            })?;
            rationale.push(RationaleNote {
                target: target.trim().to_string(),
                note: note.trim().to_string(),
            });
        } else {
            return Err(ParseError::Program {
                line: line_no,
                reason: format!("unrecognised line '{line}'"),
            });
        }
    }

    let root = root.ok_or_else(|| ParseError::Program {
        line: 0,
        reason: "missing expr line".to_string(),
    })?;
    validate_expr(&root, limits).map_err(ParseError::Invalid)?;
    Ok(Program { root, rationale })
}

/// Parse a JSON corpus, accepting both flat and nested record layouts.
pub fn parse_corpus(json: &str) -> Result<Vec<Case>, ParseError> {
    let records: Vec<CorpusRecord> = serde_json::from_str(json)?;
    records
        .into_iter()
        .enumerate()
        .map(|(index, record)| {
            let case = record.into_case();
            case.check()
                .map_err(|reason| ParseError::InvalidCase { index, reason })?;
            Ok(case)
        })
        .collect()
}
