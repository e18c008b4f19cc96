//! `$filter` expressions: lexer, recursive-descent parser and evaluator.
//!
//! Comparisons are type-checked while parsing, so evaluating a parsed filter
//! against an observation cannot fail.

use std::cmp::Ordering;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use uuid::Uuid;

use super::{Field, QueryError};
use crate::data::observation::{MetricKind, Observation};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl CmpOp {
    fn from_keyword(word: &str) -> Option<Self> {
        match word.to_ascii_lowercase().as_str() {
            "eq" => Some(Self::Eq),
            "ne" => Some(Self::Ne),
            "gt" => Some(Self::Gt),
            "ge" => Some(Self::Ge),
            "lt" => Some(Self::Lt),
            "le" => Some(Self::Le),
            _ => None,
        }
    }

    /// The operator that keeps the meaning when the operands swap sides.
    fn flipped(self) -> Self {
        match self {
            Self::Gt => Self::Lt,
            Self::Ge => Self::Le,
            Self::Lt => Self::Gt,
            Self::Le => Self::Ge,
            other => other,
        }
    }

    fn holds(self, ordering: Ordering) -> bool {
        match self {
            Self::Eq => ordering == Ordering::Equal,
            Self::Ne => ordering != Ordering::Equal,
            Self::Gt => ordering == Ordering::Greater,
            Self::Ge => ordering != Ordering::Less,
            Self::Lt => ordering == Ordering::Less,
            Self::Le => ordering != Ordering::Greater,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextFn {
    Contains,
    StartsWith,
    EndsWith,
}

impl TextFn {
    fn from_name(word: &str) -> Option<Self> {
        match word.to_ascii_lowercase().as_str() {
            "contains" => Some(Self::Contains),
            "startswith" => Some(Self::StartsWith),
            "endswith" => Some(Self::EndsWith),
            _ => None,
        }
    }

    fn apply(self, haystack: &str, needle: &str) -> bool {
        match self {
            Self::Contains => haystack.contains(needle),
            Self::StartsWith => haystack.starts_with(needle),
            Self::EndsWith => haystack.ends_with(needle),
        }
    }
}

/// A typed comparison value, already checked against the field it is compared with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Literal {
    Text(String),
    Integer(i64),
    Date(NaiveDate),
    Metric(MetricKind),
    Guid(Uuid),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    And(Box<Filter>, Box<Filter>),
    Or(Box<Filter>, Box<Filter>),
    Not(Box<Filter>),
    Compare {
        field: Field,
        op: CmpOp,
        value: Literal,
    },
    Text {
        func: TextFn,
        field: Field,
        needle: String,
    },
    /// Result of a comparison known at parse time, e.g. `Country eq null`.
    Const(bool),
}

impl Filter {
    pub fn parse(input: &str) -> Result<Self, QueryError> {
        let tokens = lex(input)?;
        let mut parser = Parser {
            tokens,
            pos: 0,
            end: input.len(),
            depth: 0,
        };
        let filter = parser.or_expr()?;
        match parser.peek() {
            None => Ok(filter),
            Some(token) => Err(syntax(token.offset, "unexpected trailing input")),
        }
    }

    pub fn compare(field: Field, op: CmpOp, value: Literal) -> Self {
        Self::Compare { field, op, value }
    }

    pub fn matches(&self, obs: &Observation) -> bool {
        match self {
            Self::And(a, b) => a.matches(obs) && b.matches(obs),
            Self::Or(a, b) => a.matches(obs) || b.matches(obs),
            Self::Not(inner) => !inner.matches(obs),
            Self::Compare { field, op, value } => {
                compare_field(*field, obs, value).is_some_and(|ordering| op.holds(ordering))
            }
            Self::Text { func, field, needle } => func.apply(text_field(*field, obs), needle),
            Self::Const(value) => *value,
        }
    }
}

fn text_field(field: Field, obs: &Observation) -> &str {
    match field {
        Field::Province => obs.province(),
        _ => obs.country(),
    }
}

/// `None` when the literal's type does not fit the field; such a comparison
/// matches nothing under every operator.
fn compare_field(field: Field, obs: &Observation, value: &Literal) -> Option<Ordering> {
    let ordering = match (field, value) {
        (Field::Country, Literal::Text(s)) => obs.country().cmp(s.as_str()),
        (Field::Province, Literal::Text(s)) => obs.province().cmp(s.as_str()),
        (Field::Count, Literal::Integer(n)) => i128::from(obs.count()).cmp(&i128::from(*n)),
        (Field::Date, Literal::Date(d)) => obs.date().cmp(d),
        (Field::Value, Literal::Metric(m)) => obs.metric().cmp(m),
        (Field::Id, Literal::Guid(id)) => obs.id().cmp(id),
        _ => return None,
    };
    Some(ordering)
}

/// Parse an OData date or date-time literal and reduce it to a UTC calendar date.
pub fn parse_date_literal(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc).date_naive());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(dt.date());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M") {
        return Some(dt.date());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()
}

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    LParen,
    RParen,
    Comma,
    Word(String),
    Str(String),
    Int(i64),
    /// `datetime'...'`, `datetimeoffset'...'`, `date'...'` or a bare ISO date/time.
    DateTime(String),
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    offset: usize,
}

fn syntax(position: usize, message: impl Into<String>) -> QueryError {
    QueryError::Syntax {
        position,
        message: message.into(),
    }
}

fn lex(input: &str) -> Result<Vec<Token>, QueryError> {
    let chars: Vec<(usize, char)> = input.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let (offset, c) = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token { kind: TokenKind::LParen, offset });
                i += 1;
            }
            ')' => {
                tokens.push(Token { kind: TokenKind::RParen, offset });
                i += 1;
            }
            ',' => {
                tokens.push(Token { kind: TokenKind::Comma, offset });
                i += 1;
            }
            '\'' => {
                let (text, next) = lex_quoted(&chars, i)?;
                tokens.push(Token { kind: TokenKind::Str(text), offset });
                i = next;
            }
            c if c.is_ascii_digit() || (c == '-' && chars.get(i + 1).is_some_and(|(_, n)| n.is_ascii_digit())) => {
                let start = i;
                i += 1;
                while i < chars.len() && is_temporal_char(chars[i].1) {
                    i += 1;
                }
                let text: String = chars[start..i].iter().map(|(_, c)| c).collect();
                let kind = match text.parse::<i64>() {
                    Ok(n) => TokenKind::Int(n),
                    Err(_) if text.contains('-') || text.contains(':') => TokenKind::DateTime(text),
                    Err(_) => return Err(syntax(offset, format!("invalid number '{text}'"))),
                };
                tokens.push(Token { kind, offset });
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].1.is_ascii_alphanumeric() || chars[i].1 == '_') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().map(|(_, c)| c).collect();
                let is_date_prefix = matches!(
                    word.to_ascii_lowercase().as_str(),
                    "datetime" | "datetimeoffset" | "date"
                );
                if is_date_prefix && chars.get(i).is_some_and(|(_, c)| *c == '\'') {
                    let (text, next) = lex_quoted(&chars, i)?;
                    tokens.push(Token { kind: TokenKind::DateTime(text), offset });
                    i = next;
                } else {
                    tokens.push(Token { kind: TokenKind::Word(word), offset });
                }
            }
            other => return Err(syntax(offset, format!("unexpected character '{other}'"))),
        }
    }

    Ok(tokens)
}

fn is_temporal_char(c: char) -> bool {
    c.is_ascii_digit() || matches!(c, '-' | ':' | '.' | '+' | 'T' | 'Z' | 't' | 'z')
}

/// Read a single-quoted string starting at `start`; `''` escapes a quote.
fn lex_quoted(chars: &[(usize, char)], start: usize) -> Result<(String, usize), QueryError> {
    let mut text = String::new();
    let mut i = start + 1;
    loop {
        match chars.get(i) {
            None => return Err(syntax(chars[start].0, "unterminated string literal")),
            Some((_, '\'')) if chars.get(i + 1).is_some_and(|(_, c)| *c == '\'') => {
                text.push('\'');
                i += 2;
            }
            Some((_, '\'')) => return Ok((text, i + 1)),
            Some((_, c)) => {
                text.push(*c);
                i += 1;
            }
        }
    }
}

/// An operand before type checking.
#[derive(Debug, Clone)]
enum Operand {
    Field(Field),
    Str(String),
    Int(i64),
    DateTime(String),
    Null,
}

impl Operand {
    fn describe(&self) -> String {
        match self {
            Self::Field(f) => f.name().to_string(),
            Self::Str(s) => format!("'{s}'"),
            Self::Int(n) => n.to_string(),
            Self::DateTime(s) => s.clone(),
            Self::Null => "null".to_string(),
        }
    }
}

/// Deepest allowed nesting of parentheses and `not`.
pub const MAX_NESTING: usize = 64;

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    end: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Result<Token, QueryError> {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or_else(|| syntax(self.end, "unexpected end of expression"))?;
        self.pos += 1;
        Ok(token)
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token { kind: TokenKind::Word(w), .. }) if w.eq_ignore_ascii_case(keyword))
    }

    /// Consume the opening token of a nested expression.
    fn descend(&mut self) -> Result<(), QueryError> {
        let offset = self.peek().map_or(self.end, |token| token.offset);
        if self.depth == MAX_NESTING {
            return Err(syntax(offset, "expression nested too deeply"));
        }
        self.depth += 1;
        self.pos += 1;
        Ok(())
    }

    fn expect(&mut self, expected: TokenKind, what: &str) -> Result<(), QueryError> {
        let token = self.next()?;
        if token.kind == expected {
            Ok(())
        } else {
            Err(syntax(token.offset, format!("expected {what}")))
        }
    }

    fn or_expr(&mut self) -> Result<Filter, QueryError> {
        let mut left = self.and_expr()?;
        while self.peek_keyword("or") {
            self.pos += 1;
            let right = self.and_expr()?;
            left = Filter::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Filter, QueryError> {
        let mut left = self.unary()?;
        while self.peek_keyword("and") {
            self.pos += 1;
            let right = self.unary()?;
            left = Filter::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Filter, QueryError> {
        if self.peek_keyword("not") {
            self.descend()?;
            let inner = self.unary()?;
            self.depth -= 1;
            return Ok(Filter::Not(Box::new(inner)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Filter, QueryError> {
        let is_group = matches!(self.peek(), Some(Token { kind: TokenKind::LParen, .. }));
        if is_group {
            self.descend()?;
            let inner = self.or_expr()?;
            self.expect(TokenKind::RParen, "')'")?;
            self.depth -= 1;
            return Ok(inner);
        }

        let call = match (self.peek(), self.tokens.get(self.pos + 1)) {
            (
                Some(Token { kind: TokenKind::Word(w), .. }),
                Some(Token { kind: TokenKind::LParen, .. }),
            ) => TextFn::from_name(w),
            _ => None,
        };
        if let Some(func) = call {
            return self.text_call(func);
        }

        self.comparison()
    }

    fn text_call(&mut self, func: TextFn) -> Result<Filter, QueryError> {
        self.pos += 2;
        let field_token = self.next()?;
        let field = match field_token.kind {
            TokenKind::Word(w) => Field::parse(&w)?,
            _ => return Err(syntax(field_token.offset, "expected a property name")),
        };
        self.expect(TokenKind::Comma, "','")?;
        let needle_token = self.next()?;
        let needle = match needle_token.kind {
            TokenKind::Str(s) => s,
            _ => return Err(syntax(needle_token.offset, "expected a string literal")),
        };
        self.expect(TokenKind::RParen, "')'")?;

        if !matches!(field, Field::Country | Field::Province) {
            return Err(QueryError::TypeMismatch {
                field: field.name(),
                literal: format!("'{needle}'"),
            });
        }
        Ok(Filter::Text { func, field, needle })
    }

    fn comparison(&mut self) -> Result<Filter, QueryError> {
        let left = self.operand()?;
        let op_token = self.next()?;
        let op = match &op_token.kind {
            TokenKind::Word(w) => CmpOp::from_keyword(w),
            _ => None,
        }
        .ok_or_else(|| syntax(op_token.offset, "expected a comparison operator"))?;
        let right = self.operand()?;

        match (left, right) {
            (Operand::Field(field), literal) => typed_comparison(field, op, literal),
            (literal, Operand::Field(field)) => typed_comparison(field, op.flipped(), literal),
            _ => Err(syntax(op_token.offset, "a comparison needs a property on one side")),
        }
    }

    fn operand(&mut self) -> Result<Operand, QueryError> {
        let token = self.next()?;
        Ok(match token.kind {
            TokenKind::Word(w) if w.eq_ignore_ascii_case("null") => Operand::Null,
            TokenKind::Word(w) => Operand::Field(Field::parse(&w)?),
            TokenKind::Str(s) => Operand::Str(s),
            TokenKind::Int(n) => Operand::Int(n),
            TokenKind::DateTime(s) => Operand::DateTime(s),
            _ => return Err(syntax(token.offset, "expected a property or literal")),
        })
    }
}

fn typed_comparison(field: Field, op: CmpOp, operand: Operand) -> Result<Filter, QueryError> {
    let mismatch = |operand: &Operand| QueryError::TypeMismatch {
        field: field.name(),
        literal: operand.describe(),
    };

    let value = match (field, &operand) {
        (Field::Country | Field::Province, Operand::Str(s)) => Literal::Text(s.clone()),
        (Field::Country | Field::Province | Field::Id, Operand::Null) => {
            // These properties are never null.
            return match op {
                CmpOp::Eq => Ok(Filter::Const(false)),
                CmpOp::Ne => Ok(Filter::Const(true)),
                _ => Err(mismatch(&operand)),
            };
        }
        (Field::Count, Operand::Int(n)) => Literal::Integer(*n),
        (Field::Date, Operand::DateTime(s) | Operand::Str(s)) => {
            Literal::Date(parse_date_literal(s).ok_or_else(|| QueryError::InvalidDate(s.clone()))?)
        }
        (Field::Value, Operand::Str(s)) => Literal::Metric(s.parse()?),
        (Field::Id, Operand::Str(s)) => {
            Literal::Guid(Uuid::parse_str(s).map_err(|_| QueryError::InvalidLiteral {
                field: field.name(),
                value: s.clone(),
            })?)
        }
        _ => return Err(mismatch(&operand)),
    };

    Ok(Filter::Compare { field, op, value })
}
