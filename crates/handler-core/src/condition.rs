//! Boolean conditions gating task execution.
//!
//! A condition is a small expression evaluated against the experiment
//! document, e.g.
//!
//! ```text
//! status.stage == "Completed" && !(status.recommendedBaseline in ["v1", "v2"])
//! ```
//!
//! Identifiers resolve against the top-level fields of the experiment
//! (`metadata`, `spec`, `status`, ...). Missing fields evaluate to `null`.

use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::debug;

use crate::experiment::Experiment;

/// Errors that can occur while compiling or evaluating a condition.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConditionError {
    /// The condition is not well formed.
    #[error("invalid condition at offset {position}: {message}")]
    Parse { position: usize, message: String },

    /// A function call names an unknown function.
    #[error("unknown function: {0}")]
    UnknownFunction(String),

    /// An operator was applied to values of the wrong type.
    #[error("type mismatch: {0}")]
    Type(String),

    /// The condition did not produce a boolean.
    #[error("condition must evaluate to a boolean, got {0}")]
    NotBoolean(&'static str),

    /// The experiment could not be turned into an environment.
    #[error("cannot build condition environment: {0}")]
    Environment(String),
}

/// Result type for condition operations.
pub type Result<T> = std::result::Result<T, ConditionError>;

/// A compiled condition.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    source: String,
    expr: Expr,
}

impl Condition {
    /// Compiles a condition.
    pub fn compile(source: &str) -> Result<Self> {
        let tokens = Lexer::new(source).tokenize()?;
        let mut parser = Parser { tokens, position: 0, end: source.len(), depth: 0 };
        let expr = parser.expression()?;
        if let Some(token) = parser.peek() {
            return Err(parser.error_at(token.offset, format!("unexpected {}", token.kind)));
        }
        Ok(Self { source: source.to_string(), expr })
    }

    /// The source text of the condition.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluates the condition against an environment document.
    pub fn evaluate(&self, environment: &Value) -> Result<bool> {
        match eval(&self.expr, environment)? {
            Value::Bool(result) => Ok(result),
            other => Err(ConditionError::NotBoolean(type_name(&other))),
        }
    }
}

impl FromStr for Condition {
    type Err = ConditionError;

    fn from_str(s: &str) -> Result<Self> {
        Self::compile(s)
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Compiles `source` and evaluates it against `experiment`.
pub fn evaluate(source: &str, experiment: &Experiment) -> Result<bool> {
    let environment =
        experiment.to_document().map_err(|e| ConditionError::Environment(e.to_string()))?;
    let result = Condition::compile(source)?.evaluate(&environment)?;
    debug!(condition = source, result, "Evaluated condition");
    Ok(result)
}

// ---------------------------------------------------------------------------
// Lexer

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    Ident(String),
    Str(String),
    Num(f64),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Dot,
    Comma,
    Not,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    In,
    Minus,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ident(name) => write!(f, "identifier '{name}'"),
            Self::Str(value) => write!(f, "string {value:?}"),
            Self::Num(value) => write!(f, "number {value}"),
            Self::LParen => f.write_str("'('"),
            Self::RParen => f.write_str("')'"),
            Self::LBracket => f.write_str("'['"),
            Self::RBracket => f.write_str("']'"),
            Self::Dot => f.write_str("'.'"),
            Self::Comma => f.write_str("','"),
            Self::Not => f.write_str("'!'"),
            Self::Eq => f.write_str("'=='"),
            Self::Ne => f.write_str("'!='"),
            Self::Lt => f.write_str("'<'"),
            Self::Le => f.write_str("'<='"),
            Self::Gt => f.write_str("'>'"),
            Self::Ge => f.write_str("'>='"),
            Self::And => f.write_str("'&&'"),
            Self::Or => f.write_str("'||'"),
            Self::In => f.write_str("'in'"),
            Self::Minus => f.write_str("'-'"),
        }
    }
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    offset: usize,
}

struct Lexer<'a> {
    source: &'a str,
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
}

impl<'a> Lexer<'a> {
    fn new(source: &'a str) -> Self {
        Self { source, chars: source.char_indices().peekable() }
    }

    fn error(offset: usize, message: impl Into<String>) -> ConditionError {
        ConditionError::Parse { position: offset, message: message.into() }
    }

    fn tokenize(mut self) -> Result<Vec<Token>> {
        let mut tokens = Vec::new();
        while let Some(&(offset, c)) = self.chars.peek() {
            if c.is_whitespace() {
                self.chars.next();
                continue;
            }
            let kind = match c {
                '(' => self.single(TokenKind::LParen),
                ')' => self.single(TokenKind::RParen),
                '[' => self.single(TokenKind::LBracket),
                ']' => self.single(TokenKind::RBracket),
                '.' => self.single(TokenKind::Dot),
                ',' => self.single(TokenKind::Comma),
                '-' => self.single(TokenKind::Minus),
                '!' => self.with_eq(TokenKind::Not, TokenKind::Ne),
                '<' => self.with_eq(TokenKind::Lt, TokenKind::Le),
                '>' => self.with_eq(TokenKind::Gt, TokenKind::Ge),
                '=' => {
                    self.chars.next();
                    self.expect('=', offset)?;
                    TokenKind::Eq
                }
                '&' => {
                    self.chars.next();
                    self.expect('&', offset)?;
                    TokenKind::And
                }
                '|' => {
                    self.chars.next();
                    self.expect('|', offset)?;
                    TokenKind::Or
                }
                '"' | '\'' => self.string(offset, c)?,
                c if c.is_ascii_digit() => self.number(offset)?,
                c if c.is_alphabetic() || c == '_' => self.word(offset),
                other => return Err(Self::error(offset, format!("unexpected character '{other}'"))),
            };
            tokens.push(Token { kind, offset });
        }
        Ok(tokens)
    }

    fn single(&mut self, kind: TokenKind) -> TokenKind {
        self.chars.next();
        kind
    }

    fn with_eq(&mut self, plain: TokenKind, with_eq: TokenKind) -> TokenKind {
        self.chars.next();
        if self.chars.next_if(|&(_, c)| c == '=').is_some() { with_eq } else { plain }
    }

    fn expect(&mut self, expected: char, offset: usize) -> Result<()> {
        match self.chars.next() {
            Some((_, c)) if c == expected => Ok(()),
            _ => Err(Self::error(offset, format!("expected '{expected}{expected}'"))),
        }
    }

    fn string(&mut self, offset: usize, quote: char) -> Result<TokenKind> {
        self.chars.next();
        let mut value = String::new();
        loop {
            match self.chars.next() {
                Some((_, c)) if c == quote => return Ok(TokenKind::Str(value)),
                Some((_, '\\')) => match self.chars.next() {
                    Some((_, 'n')) => value.push('\n'),
                    Some((_, 't')) => value.push('\t'),
                    Some((_, c)) => value.push(c),
                    None => break,
                },
                Some((_, c)) => value.push(c),
                None => break,
            }
        }
        Err(Self::error(offset, "unterminated string"))
    }

    fn number(&mut self, offset: usize) -> Result<TokenKind> {
        let mut end = offset;
        while let Some((i, c)) = self.chars.next_if(|&(_, c)| c.is_ascii_digit() || c == '.') {
            end = i + c.len_utf8();
        }
        let text = &self.source[offset..end];
        text.parse::<f64>()
            .map(TokenKind::Num)
            .map_err(|_| Self::error(offset, format!("invalid number '{text}'")))
    }

    fn word(&mut self, offset: usize) -> TokenKind {
        let mut end = offset;
        while let Some((i, c)) = self.chars.next_if(|&(_, c)| c.is_alphanumeric() || c == '_') {
            end = i + c.len_utf8();
        }
        match &self.source[offset..end] {
            "and" => TokenKind::And,
            "or" => TokenKind::Or,
            "not" => TokenKind::Not,
            "in" => TokenKind::In,
            word => TokenKind::Ident(word.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Parser

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinaryOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Literal(Value),
    Array(Vec<Expr>),
    Var(String),
    Member(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Negate(Box<Expr>),
    Len(Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
}

/// Deepest expression tree a condition may build.
const MAX_DEPTH: usize = 128;

struct Parser {
    tokens: Vec<Token>,
    position: usize,
    end: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    fn peek_kind(&self) -> Option<&TokenKind> {
        self.peek().map(|t| &t.kind)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.position).cloned();
        self.position += 1;
        token
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.peek_kind() == Some(kind) {
            self.position += 1;
            true
        } else {
            false
        }
    }

    fn error_at(&self, position: usize, message: impl Into<String>) -> ConditionError {
        ConditionError::Parse { position, message: message.into() }
    }

    fn expect(&mut self, kind: &TokenKind) -> Result<()> {
        match self.next() {
            Some(token) if &token.kind == kind => Ok(()),
            Some(token) => {
                let message = format!("expected {kind}, found {}", token.kind);
                Err(self.error_at(token.offset, message))
            }
            None => Err(self.error_at(self.end, format!("expected {kind}, found end of input"))),
        }
    }

    /// Counts one more level of the tree being built.
    fn nest(&mut self) -> Result<()> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            let offset = self.tokens.get(self.position).map_or(self.end, |t| t.offset);
            return Err(self.error_at(offset, format!("nested deeper than {MAX_DEPTH} levels")));
        }
        Ok(())
    }

    fn expression(&mut self) -> Result<Expr> {
        let depth = self.depth;
        self.nest()?;
        let expr = self.or()?;
        self.depth = depth;
        Ok(expr)
    }

    fn or(&mut self) -> Result<Expr> {
        let depth = self.depth;
        let mut left = self.and()?;
        while self.eat(&TokenKind::Or) {
            self.nest()?;
            let right = self.and()?;
            left = Expr::Binary(BinaryOp::Or, Box::new(left), Box::new(right));
        }
        self.depth = depth;
        Ok(left)
    }

    fn and(&mut self) -> Result<Expr> {
        let depth = self.depth;
        let mut left = self.comparison()?;
        while self.eat(&TokenKind::And) {
            self.nest()?;
            let right = self.comparison()?;
            left = Expr::Binary(BinaryOp::And, Box::new(left), Box::new(right));
        }
        self.depth = depth;
        Ok(left)
    }

    fn comparison(&mut self) -> Result<Expr> {
        let left = self.unary()?;
        let op = match self.peek_kind() {
            Some(TokenKind::Eq) => BinaryOp::Eq,
            Some(TokenKind::Ne) => BinaryOp::Ne,
            Some(TokenKind::Lt) => BinaryOp::Lt,
            Some(TokenKind::Le) => BinaryOp::Le,
            Some(TokenKind::Gt) => BinaryOp::Gt,
            Some(TokenKind::Ge) => BinaryOp::Ge,
            Some(TokenKind::In) => BinaryOp::In,
            Some(TokenKind::Not)
                if self.tokens.get(self.position + 1).map(|t| &t.kind) == Some(&TokenKind::In) =>
            {
                self.position += 1;
                BinaryOp::NotIn
            }
            _ => return Ok(left),
        };
        self.position += 1;
        let right = self.unary()?;
        Ok(Expr::Binary(op, Box::new(left), Box::new(right)))
    }

    fn unary(&mut self) -> Result<Expr> {
        let depth = self.depth;
        let expr = if self.eat(&TokenKind::Not) {
            self.nest()?;
            Expr::Not(Box::new(self.unary()?))
        } else if self.eat(&TokenKind::Minus) {
            self.nest()?;
            Expr::Negate(Box::new(self.unary()?))
        } else {
            self.postfix()?
        };
        self.depth = depth;
        Ok(expr)
    }

    fn postfix(&mut self) -> Result<Expr> {
        let depth = self.depth;
        let mut expr = self.primary()?;
        loop {
            if matches!(self.peek_kind(), Some(TokenKind::Dot | TokenKind::LBracket)) {
                self.nest()?;
            }
            if self.eat(&TokenKind::Dot) {
                match self.next() {
                    Some(Token { kind: TokenKind::Ident(field), .. }) => {
                        expr = Expr::Member(Box::new(expr), field);
                    }
                    Some(token) => {
                        let message = format!("expected field name, found {}", token.kind);
                        return Err(self.error_at(token.offset, message));
                    }
                    None => {
                        let message = "expected field name, found end of input";
                        return Err(self.error_at(self.end, message));
                    }
                }
            } else if self.eat(&TokenKind::LBracket) {
                let index = self.expression()?;
                self.expect(&TokenKind::RBracket)?;
                expr = Expr::Index(Box::new(expr), Box::new(index));
            } else {
                self.depth = depth;
                return Ok(expr);
            }
        }
    }

    fn primary(&mut self) -> Result<Expr> {
        let Some(token) = self.next() else {
            return Err(self.error_at(self.end, "unexpected end of input"));
        };
        match token.kind {
            TokenKind::Num(n) => Ok(Expr::Literal(number(n))),
            TokenKind::Str(s) => Ok(Expr::Literal(Value::String(s))),
            TokenKind::LParen => {
                let expr = self.expression()?;
                self.expect(&TokenKind::RParen)?;
                Ok(expr)
            }
            TokenKind::LBracket => {
                let mut items = Vec::new();
                if !self.eat(&TokenKind::RBracket) {
                    loop {
                        items.push(self.expression()?);
                        if self.eat(&TokenKind::RBracket) {
                            break;
                        }
                        self.expect(&TokenKind::Comma)?;
                    }
                }
                Ok(Expr::Array(items))
            }
            TokenKind::Ident(name) => match name.as_str() {
                "true" => Ok(Expr::Literal(Value::Bool(true))),
                "false" => Ok(Expr::Literal(Value::Bool(false))),
                "null" | "nil" => Ok(Expr::Literal(Value::Null)),
                _ if self.peek_kind() == Some(&TokenKind::LParen) => self.call(name),
                _ => Ok(Expr::Var(name)),
            },
            other => Err(self.error_at(token.offset, format!("unexpected {other}"))),
        }
    }

    fn call(&mut self, name: String) -> Result<Expr> {
        self.expect(&TokenKind::LParen)?;
        let mut args = Vec::new();
        if !self.eat(&TokenKind::RParen) {
            loop {
                args.push(self.expression()?);
                if self.eat(&TokenKind::RParen) {
                    break;
                }
                self.expect(&TokenKind::Comma)?;
            }
        }
        match (name.as_str(), args.len()) {
            ("len", 1) => Ok(Expr::Len(Box::new(args.remove(0)))),
            ("len", n) => Err(ConditionError::Type(format!("len takes 1 argument, got {n}"))),
            _ => Err(ConditionError::UnknownFunction(name)),
        }
    }
}

// ---------------------------------------------------------------------------
// Evaluation

#[allow(clippy::cast_possible_truncation)]
fn number(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < 9.0e15 {
        Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n).map_or(Value::Null, Value::Number)
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn as_bool(value: &Value, context: &str) -> Result<bool> {
    value.as_bool().ok_or_else(|| {
        ConditionError::Type(format!("{context} expects bool, got {}", type_name(value)))
    })
}

fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => left == right,
    }
}

fn eval(expr: &Expr, env: &Value) -> Result<Value> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Array(items) => {
            Ok(Value::Array(items.iter().map(|e| eval(e, env)).collect::<Result<_>>()?))
        }
        Expr::Var(name) => Ok(env.get(name).cloned().unwrap_or(Value::Null)),
        Expr::Member(base, field) => {
            Ok(eval(base, env)?.get(field).cloned().unwrap_or(Value::Null))
        }
        Expr::Index(base, index) => index_value(&eval(base, env)?, &eval(index, env)?),
        Expr::Not(inner) => Ok(Value::Bool(!as_bool(&eval(inner, env)?, "'!'")?)),
        Expr::Negate(inner) => match eval(inner, env)? {
            Value::Number(n) => Ok(number(-n.as_f64().unwrap_or_default())),
            other => Err(ConditionError::Type(format!(
                "'-' expects number, got {}",
                type_name(&other)
            ))),
        },
        Expr::Len(inner) => match eval(inner, env)? {
            Value::Null => Ok(Value::from(0)),
            Value::String(s) => Ok(Value::from(s.chars().count())),
            Value::Array(items) => Ok(Value::from(items.len())),
            Value::Object(map) => Ok(Value::from(map.len())),
            other => Err(ConditionError::Type(format!("len of {}", type_name(&other)))),
        },
        Expr::Binary(BinaryOp::And, left, right) => {
            if !as_bool(&eval(left, env)?, "'&&'")? {
                return Ok(Value::Bool(false));
            }
            Ok(Value::Bool(as_bool(&eval(right, env)?, "'&&'")?))
        }
        Expr::Binary(BinaryOp::Or, left, right) => {
            if as_bool(&eval(left, env)?, "'||'")? {
                return Ok(Value::Bool(true));
            }
            Ok(Value::Bool(as_bool(&eval(right, env)?, "'||'")?))
        }
        Expr::Binary(op, left, right) => {
            let left = eval(left, env)?;
            let right = eval(right, env)?;
            binary(*op, &left, &right).map(Value::Bool)
        }
    }
}

fn index_value(base: &Value, index: &Value) -> Result<Value> {
    match (base, index) {
        (Value::Null, _) => Ok(Value::Null),
        (Value::Array(items), Value::Number(n)) => {
            let item = n
                .as_u64()
                .and_then(|i| usize::try_from(i).ok())
                .and_then(|i| items.get(i))
                .cloned();
            Ok(item.unwrap_or(Value::Null))
        }
        (Value::Object(map), Value::String(key)) => {
            Ok(map.get(key).cloned().unwrap_or(Value::Null))
        }
        (base, index) => Err(ConditionError::Type(format!(
            "cannot index {} with {}",
            type_name(base),
            type_name(index)
        ))),
    }
}

fn binary(op: BinaryOp, left: &Value, right: &Value) -> Result<bool> {
    match op {
        BinaryOp::Eq => Ok(values_equal(left, right)),
        BinaryOp::Ne => Ok(!values_equal(left, right)),
        BinaryOp::In => contains(right, left),
        BinaryOp::NotIn => contains(right, left).map(|found| !found),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = match (left, right) {
                (Value::Number(a), Value::Number(b)) => {
                    a.as_f64().unwrap_or_default().partial_cmp(&b.as_f64().unwrap_or_default())
                }
                (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
                _ => None,
            };
            let Some(ordering) = ordering else {
                return Err(ConditionError::Type(format!(
                    "cannot compare {} with {}",
                    type_name(left),
                    type_name(right)
                )));
            };
            Ok(match op {
                BinaryOp::Lt => ordering.is_lt(),
                BinaryOp::Le => ordering.is_le(),
                BinaryOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            })
        }
        BinaryOp::And | BinaryOp::Or => unreachable!("logical operators short-circuit in eval"),
    }
}

fn contains(container: &Value, item: &Value) -> Result<bool> {
    match (container, item) {
        (Value::Null, _) => Ok(false),
        (Value::Array(items), item) => {
            Ok(items.iter().any(|candidate| values_equal(candidate, item)))
        }
        (Value::String(haystack), Value::String(needle)) => Ok(haystack.contains(needle.as_str())),
        (Value::Object(map), Value::String(key)) => Ok(map.contains_key(key)),
        (container, item) => Err(ConditionError::Type(format!(
            "'in' cannot look for {} in {}",
            type_name(item),
            type_name(container)
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn env() -> Value {
        json!({
            "metadata": {"name": "exp", "namespace": "team"},
            "spec": {
                "versionInfo": {
                    "baseline": {"name": "v1"},
                    "candidates": [{"name": "v2"}, {"name": "v3"}]
                }
            },
            "status": {
                "stage": "Completed",
                "recommendedBaseline": "v2",
                "completedIterations": 10
            }
        })
    }

    fn check(source: &str) -> Result<bool> {
        Condition::compile(source)?.evaluate(&env())
    }

    #[test]
    fn test_equality_on_fields() {
        assert!(check(r#"status.stage == "Completed""#).unwrap());
        assert!(check("status.stage != 'Running'").unwrap());
        assert!(check("metadata[\"namespace\"] == 'team'").unwrap());
    }

    #[test]
    fn test_numeric_comparison() {
        assert!(check("status.completedIterations >= 10").unwrap());
        assert!(check("status.completedIterations == 10.0").unwrap());
        assert!(!check("status.completedIterations < -1").unwrap());
    }

    #[test]
    fn test_logical_operators() {
        assert!(
            check("status.stage == 'Completed' && status.recommendedBaseline == 'v2'").unwrap()
        );
        assert!(check("status.stage == 'Running' or status.recommendedBaseline == 'v2'").unwrap());
        assert!(check("not (status.stage == 'Running')").unwrap());
        assert!(check("!false && true").unwrap());
    }

    #[test]
    fn test_short_circuit_skips_type_errors() {
        assert!(!check("false && status.stage").unwrap());
        assert!(check("true || 1").unwrap());
    }

    #[test]
    fn test_membership() {
        assert!(check("status.recommendedBaseline in ['v2', 'v3']").unwrap());
        assert!(check("'Comp' in status.stage").unwrap());
        assert!(check("'stage' in status").unwrap());
        assert!(check("'v9' not in ['v2', 'v3']").unwrap());
    }

    #[test]
    fn test_indexing_and_len() {
        assert!(check("spec.versionInfo.candidates[1].name == 'v3'").unwrap());
        assert!(check("len(spec.versionInfo.candidates) == 2").unwrap());
        assert!(check("spec.versionInfo.candidates[5] == null").unwrap());
    }

    #[test]
    fn test_missing_fields_are_null() {
        assert!(check("status.versionRecommendedForPromotion == nil").unwrap());
        assert!(check("missing.deeply.nested == null").unwrap());
        assert!(check("len(status.conditions) == 0").unwrap());
    }

    #[test]
    fn test_non_boolean_result() {
        assert_eq!(check("status.stage").unwrap_err(), ConditionError::NotBoolean("string"));
        assert_eq!(check("missing").unwrap_err(), ConditionError::NotBoolean("null"));
    }

    #[test]
    fn test_type_errors() {
        assert!(matches!(check("status.stage < 3"), Err(ConditionError::Type(_))));
        assert!(matches!(check("!status.stage"), Err(ConditionError::Type(_))));
        assert!(matches!(check("status.stage[0] == 'C'"), Err(ConditionError::Type(_))));
    }

    #[test]
    fn test_parse_errors() {
        let sources = [
            "",
            "status.stage ==",
            "(true",
            "status.stage = 'x'",
            "'unterminated",
            "a.",
            "true false",
            "#",
        ];
        for source in sources {
            assert!(
                matches!(Condition::compile(source), Err(ConditionError::Parse { .. })),
                "{source:?} should not parse"
            );
        }
    }

    #[test]
    fn test_nesting_is_bounded() {
        let shallow = format!("{}true{}", "(".repeat(20), ")".repeat(20));
        assert!(check(&shallow).unwrap());

        let deep = format!("{}true{}", "(".repeat(10_000), ")".repeat(10_000));
        assert!(matches!(Condition::compile(&deep), Err(ConditionError::Parse { .. })));

        let negations = format!("{}true", "!".repeat(10_000));
        assert!(matches!(Condition::compile(&negations), Err(ConditionError::Parse { .. })));

        let chain = vec!["true"; 10_000].join(" && ");
        assert!(matches!(Condition::compile(&chain), Err(ConditionError::Parse { .. })));

        let members = format!("status{}", ".a".repeat(10_000));
        assert!(matches!(Condition::compile(&members), Err(ConditionError::Parse { .. })));
    }

    #[test]
    fn test_unknown_function() {
        assert_eq!(
            Condition::compile("upper(status.stage)").unwrap_err(),
            ConditionError::UnknownFunction("upper".to_string())
        );
    }

    #[test]
    fn test_evaluate_against_experiment() {
        let mut experiment = Experiment::default();
        experiment.metadata.name = "exp".to_string();
        assert!(evaluate("metadata.name == 'exp'", &experiment).unwrap());
        assert!(evaluate("status.stage == null", &experiment).unwrap());
    }
}
