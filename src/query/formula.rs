use crate::error::{TrendsError, TrendsResult};
use crate::query::Series;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl BinaryOp {
    fn from_char(c: char) -> Option<Self> {
        match c {
            '+' => Some(BinaryOp::Add),
            '-' => Some(BinaryOp::Sub),
            '*' => Some(BinaryOp::Mul),
            '/' => Some(BinaryOp::Div),
            _ => None,
        }
    }

    /// Higher binds tighter. All operators are left-associative.
    pub fn precedence(&self) -> u8 {
        match self {
            BinaryOp::Add | BinaryOp::Sub => 1,
            BinaryOp::Mul | BinaryOp::Div => 2,
        }
    }

    /// Division by zero yields 0; no result is ever NaN or infinite.
    pub fn apply(&self, lhs: f64, rhs: f64) -> f64 {
        let value = match self {
            BinaryOp::Add => lhs + rhs,
            BinaryOp::Sub => lhs - rhs,
            BinaryOp::Mul => lhs * rhs,
            BinaryOp::Div if rhs == 0.0 => 0.0,
            BinaryOp::Div => lhs / rhs,
        };
        finite_or_zero(value)
    }

    fn symbol(&self) -> char {
        match self {
            BinaryOp::Add => '+',
            BinaryOp::Sub => '-',
            BinaryOp::Mul => '*',
            BinaryOp::Div => '/',
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Index into the series list: `A` is 0.
    Ref(usize),
    Number(f64),
    Neg(Box<Expr>),
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
}

impl Expr {
    fn eval_at(&self, series: &[&Series], index: usize) -> f64 {
        match self {
            Expr::Ref(i) => series[*i].data()[index],
            Expr::Number(n) => *n,
            Expr::Neg(inner) => finite_or_zero(-inner.eval_at(series, index)),
            Expr::Binary { op, lhs, rhs } => {
                op.apply(lhs.eval_at(series, index), rhs.eval_at(series, index))
            }
        }
    }

    fn max_ref(&self) -> Option<usize> {
        match self {
            Expr::Ref(i) => Some(*i),
            Expr::Number(_) => None,
            Expr::Neg(inner) => inner.max_ref(),
            Expr::Binary { lhs, rhs, .. } => lhs.max_ref().max(rhs.max_ref()),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Ref(i) => write!(f, "{}", crate::query::letter(*i)),
            Expr::Number(n) => write!(f, "{}", n),
            Expr::Neg(inner) => write!(f, "-({})", inner),
            Expr::Binary { op, lhs, rhs } => write!(f, "({} {} {})", lhs, op.symbol(), rhs),
        }
    }
}

/// A parsed formula over lettered series.
#[derive(Debug, Clone, PartialEq)]
pub struct Formula {
    source: String,
    expr: Expr,
}

impl Formula {
    pub fn parse(source: &str) -> TrendsResult<Self> {
        let tokens = tokenize(source)?;
        let mut parser = Parser {
            source,
            tokens: &tokens,
            pos: 0,
            depth: 0,
        };
        let expr = parser.parse_expr(0)?;

        if let Some(token) = parser.peek() {
            return Err(match token.kind {
                TokenKind::RParen => formula_error(source, "unbalanced parentheses"),
                _ => formula_error(source, &format!("unexpected token at position {}", token.pos)),
            });
        }

        Ok(Self {
            source: source.to_string(),
            expr,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    /// Fails if the formula names a letter beyond `series_count`.
    pub fn check_references(&self, series_count: usize) -> TrendsResult<()> {
        match self.expr.max_ref() {
            Some(max) if max >= series_count => Err(formula_error(
                &self.source,
                &format!(
                    "references {} but only {} series supplied",
                    crate::query::letter(max),
                    series_count
                ),
            )),
            _ => Ok(()),
        }
    }

    /// Evaluates bucket by bucket; output `i` depends only on inputs at `i`.
    pub fn evaluate(&self, series: &[&Series]) -> TrendsResult<Series> {
        self.check_references(series.len())?;

        let len = series.first().map_or(0, |s| s.len());
        if series.iter().any(|s| s.len() != len) {
            return Err(formula_error(&self.source, "series lengths differ"));
        }

        let data = (0..len).map(|i| self.expr.eval_at(series, i)).collect();
        Ok(Series::new(data))
    }
}

/// Parses, checks and evaluates in one step.
pub fn evaluate(formula: &str, series: &[Series]) -> TrendsResult<Series> {
    let parsed = Formula::parse(formula)?;
    let refs: Vec<&Series> = series.iter().collect();
    parsed.evaluate(&refs)
}

/// Infinite and NaN values serialize as `null`; series carry 0 instead.
pub(crate) fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

fn formula_error(source: &str, message: &str) -> TrendsError {
    TrendsError::FormulaError(format!("'{}': {}", source, message))
}

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    Letter(usize),
    Number(f64),
    Op(BinaryOp),
    LParen,
    RParen,
}

#[derive(Debug, Clone, PartialEq)]
struct Token {
    kind: TokenKind,
    pos: usize,
}

fn tokenize(source: &str) -> TrendsResult<Vec<Token>> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < chars.len() {
        let c = chars[pos];
        let kind = if c.is_whitespace() {
            pos += 1;
            continue;
        } else if c.is_ascii_uppercase() {
            TokenKind::Letter((c as u8 - b'A') as usize)
        } else if c.is_ascii_digit() || c == '.' {
            let start = pos;
            while pos + 1 < chars.len() && (chars[pos + 1].is_ascii_digit() || chars[pos + 1] == '.') {
                pos += 1;
            }
            let literal: String = chars[start..=pos].iter().collect();
            let value = literal
                .parse::<f64>()
                .map_err(|_| formula_error(source, &format!("bad number '{}'", literal)))?;
            tokens.push(Token {
                kind: TokenKind::Number(value),
                pos: start,
            });
            pos += 1;
            continue;
        } else if c == '(' {
            TokenKind::LParen
        } else if c == ')' {
            TokenKind::RParen
        } else if let Some(op) = BinaryOp::from_char(c) {
            TokenKind::Op(op)
        } else {
            return Err(formula_error(source, &format!("unknown token '{}' at position {}", c, pos)));
        };

        tokens.push(Token { kind, pos });
        pos += 1;
    }

    if tokens.is_empty() {
        return Err(formula_error(source, "empty expression"));
    }
    Ok(tokens)
}

/// Deepest nesting of parentheses and unary signs accepted by the parser.
const MAX_NESTING: usize = 256;

struct Parser<'a> {
    source: &'a str,
    tokens: &'a [Token],
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<&'a Token> {
        let token = self.tokens.get(self.pos);
        self.pos += 1;
        token
    }

    /// Precedence climbing: only operators binding at least `min_prec` are consumed here.
    fn parse_expr(&mut self, min_prec: u8) -> TrendsResult<Expr> {
        let mut lhs = self.parse_unary()?;

        while let Some(Token {
            kind: TokenKind::Op(op),
            ..
        }) = self.peek()
        {
            let op = *op;
            if op.precedence() < min_prec {
                break;
            }
            self.next();
            let rhs = self.parse_expr(op.precedence() + 1)?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }

        Ok(lhs)
    }

    /// Every nested parenthesis and unary sign passes through here, so the
    /// depth check bounds the recursion.
    fn parse_unary(&mut self) -> TrendsResult<Expr> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(formula_error(self.source, "formula nested too deeply"));
        }
        let expr = self.parse_signed();
        self.depth -= 1;
        expr
    }

    fn parse_signed(&mut self) -> TrendsResult<Expr> {
        match self.peek().map(|t| &t.kind) {
            Some(TokenKind::Op(BinaryOp::Sub)) => {
                self.next();
                Ok(Expr::Neg(Box::new(self.parse_unary()?)))
            }
            Some(TokenKind::Op(BinaryOp::Add)) => {
                self.next();
                self.parse_unary()
            }
            _ => self.parse_primary(),
        }
    }

    fn parse_primary(&mut self) -> TrendsResult<Expr> {
        let source = self.source;
        match self.next() {
            Some(Token {
                kind: TokenKind::Letter(i),
                ..
            }) => Ok(Expr::Ref(*i)),
            Some(Token {
                kind: TokenKind::Number(n),
                ..
            }) => Ok(Expr::Number(*n)),
            Some(Token {
                kind: TokenKind::LParen,
                ..
            }) => {
                let inner = self.parse_expr(0)?;
                match self.next() {
                    Some(Token {
                        kind: TokenKind::RParen,
                        ..
                    }) => Ok(inner),
                    _ => Err(formula_error(source, "unbalanced parentheses")),
                }
            }
            Some(Token {
                kind: TokenKind::RParen,
                ..
            }) => Err(formula_error(source, "unbalanced parentheses")),
            Some(Token {
                kind: TokenKind::Op(op),
                pos,
            }) => Err(formula_error(
                source,
                &format!("operator '{}' at position {} is missing an operand", op.symbol(), pos),
            )),
            None => Err(formula_error(source, "unexpected end of formula")),
        }
    }
}
