//! Parser for the SELECT statements the rewriter understands:
//!
//! ```sql
//! SELECT [DISTINCT|ALL] expression+
//! FROM table
//! [WHERE expression]
//! [GROUP BY ... [HAVING ...]] [ORDER BY ...]
//! ```
//!
//! The statement is split into tokens by the `sqlparser` tokenizer, each one
//! tied to its byte offset in the statement, so the rewriter can splice new
//! text between untouched stretches of the original SQL. The
//! `WHERE` clause goes through a shift-reduce evaluator that records every
//! comparison it reduces; everything from `GROUP BY`, `HAVING` or `ORDER BY`
//! onwards is left unexamined.

use log::debug;
use sqlparser::dialect::GenericDialect;
use sqlparser::keywords::Keyword;
use sqlparser::tokenizer::{Token as SqlToken, TokenWithLocation, Tokenizer, Word};
use std::fmt;

use crate::error::ParseError;

/// Half-open range of token indices.
pub type Span = (usize, usize);

/// Contains one variant for each operator a recorded comparison can use.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ComparisonOp {
    LessThan,
    LessEqual,
    Equal,
    GreaterEqual,
    GreaterThan,
    NotEqual,
    In,
    Between,
    Like,
    Is,
}

impl ComparisonOp {
    /// The operator to use once both sides of the comparison are swapped.
    pub fn mirror(self) -> Self {
        match self {
            Self::LessThan => Self::GreaterThan,
            Self::LessEqual => Self::GreaterEqual,
            Self::GreaterEqual => Self::LessEqual,
            Self::GreaterThan => Self::LessThan,
            op => op,
        }
    }
}

impl fmt::Display for ComparisonOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::LessThan => "<",
            Self::LessEqual => "<=",
            Self::Equal => "=",
            Self::GreaterEqual => ">=",
            Self::GreaterThan => ">",
            Self::NotEqual => "<>",
            Self::In => "IN",
            Self::Between => "BETWEEN",
            Self::Like => "LIKE",
            Self::Is => "IS",
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Literal {
    /// As written, a leading `-` included.
    Number(String),
    Text(String),
    /// `NULL`, `NOT NULL`, `TRUE` or `FALSE`.
    Keyword(String),
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Number(n) => f.write_str(n),
            Literal::Text(s) => write!(f, "'{s}'"),
            Literal::Keyword(k) => f.write_str(k),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Operand {
    Column {
        name: String,
        qualifier: Option<String>,
        span: Span,
    },
    Literal {
        value: Literal,
        span: Span,
    },
    /// A parenthesized list of literals.
    List {
        values: Vec<Literal>,
        span: Span,
    },
    /// Anything else: a reduced sub-expression.
    Expression {
        span: Span,
    },
}

impl Operand {
    pub fn span(&self) -> Span {
        match self {
            Operand::Column { span, .. }
            | Operand::Literal { span, .. }
            | Operand::List { span, .. }
            | Operand::Expression { span } => *span,
        }
    }

    fn with_span(self, span: Span) -> Self {
        match self {
            Operand::Column {
                name, qualifier, ..
            } => Operand::Column {
                name,
                qualifier,
                span,
            },
            Operand::Literal { value, .. } => Operand::Literal { value, span },
            Operand::List { values, .. } => Operand::List { values, span },
            Operand::Expression { .. } => Operand::Expression { span },
        }
    }
}

/// A comparison of the `WHERE` clause, `left op right`, or
/// `left BETWEEN right AND extra`.
#[derive(Clone, Debug, PartialEq)]
pub struct Comparison {
    pub left: Operand,
    pub op: ComparisonOp,
    pub right: Operand,
    pub extra: Option<Operand>,
    pub span: Span,
    /// Under a `NOT`, or written `NOT IN`, `NOT BETWEEN`, `NOT LIKE`.
    pub negated: bool,
    /// Combined with other conditions through an `OR`.
    pub disjunctive: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TableRef {
    /// Unquoted, schema qualified with a dot when written so.
    pub name: String,
    pub span: Span,
}

/// A parsed statement: its tokens and where its parts are.
#[derive(Clone, Debug)]
pub struct State {
    source: String,
    /// Byte offset of every token in `source`, then `source.len()`.
    offsets: Vec<usize>,
    pub tokens: Vec<SqlToken>,
    /// Tokens between `SELECT` and `FROM`.
    pub projection: Span,
    pub table: TableRef,
    pub comparisons: Vec<Comparison>,
    /// First token of the `GROUP BY`, `HAVING` or `ORDER BY` tail.
    pub tail: Option<usize>,
}

impl State {
    /// The statement text covered by `span`, exactly as written.
    pub fn text(&self, span: Span) -> String {
        self.source[self.offsets[span.0]..self.offsets[span.1]].to_string()
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Byte offset of every token of `sql`, followed by `sql.len()`. Token
/// locations count lines from `\n` and columns in characters, from 1.
fn byte_offsets(sql: &str, tokens: &[TokenWithLocation]) -> Result<Vec<usize>, ParseError> {
    let mut lines = vec![0];
    lines.extend(sql.match_indices('\n').map(|(i, _)| i + 1));

    let mut offsets = Vec::with_capacity(tokens.len() + 1);
    for token in tokens {
        let (line, column) = (token.location.line as usize, token.location.column as usize);
        let offset = line
            .checked_sub(1)
            .and_then(|line| lines.get(line))
            .and_then(|&start| {
                sql[start..]
                    .char_indices()
                    .map(|(i, _)| start + i)
                    .chain(std::iter::once(sql.len()))
                    .nth(column.checked_sub(1)?)
            });
        match offset {
            Some(offset) if offsets.last().map_or(true, |&last| last <= offset) => {
                offsets.push(offset)
            }
            _ => {
                return Err(ParseError::Tokenizer(format!(
                    "token '{}' at line {line}, column {column} lies outside the statement",
                    token.token
                )))
            }
        }
    }
    offsets.push(sql.len());
    Ok(offsets)
}

/// Parses one SELECT statement.
pub fn parse(sql: &str) -> Result<State, ParseError> {
    let located = Tokenizer::new(&GenericDialect {}, sql)
        .tokenize_with_location()
        .map_err(|e| ParseError::Tokenizer(e.to_string()))?;
    let offsets = byte_offsets(sql, &located)?;
    let tokens = located.into_iter().map(|located| located.token).collect();
    let state = Parser::new(sql, offsets, tokens).statement()?;
    debug!(
        "Parsed statement on {} with {} comparisons",
        state.table.name,
        state.comparisons.len()
    );
    Ok(state)
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum Operator {
    Comparison(ComparisonOp),
    Between,
    /// The `AND` of `BETWEEN ... AND ...`.
    BetweenAnd,
    And,
    Or,
    Not,
    /// `ALL`, `ANY`, `SOME`, `EXISTS`.
    Quantifier,
}

impl Operator {
    fn precedence(self) -> i8 {
        match self {
            Operator::Quantifier | Operator::Comparison(ComparisonOp::In) => 5,
            Operator::Comparison(ComparisonOp::Like) => 3,
            Operator::Comparison(_) => 4,
            Operator::Between => 3,
            Operator::Not => 2,
            Operator::And | Operator::BetweenAnd => 1,
            Operator::Or => 0,
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct PendingOp {
    op: Operator,
    /// Token index of the operator.
    at: usize,
    negated: bool,
}

const RESERVED: &[Keyword] = &[
    Keyword::SELECT,
    Keyword::FROM,
    Keyword::WHERE,
    Keyword::GROUP,
    Keyword::ORDER,
    Keyword::HAVING,
    Keyword::BY,
    Keyword::LIMIT,
    Keyword::OFFSET,
    Keyword::FETCH,
    Keyword::UNION,
    Keyword::INTERSECT,
    Keyword::EXCEPT,
    Keyword::WINDOW,
    Keyword::QUALIFY,
    Keyword::JOIN,
    Keyword::INNER,
    Keyword::LEFT,
    Keyword::RIGHT,
    Keyword::FULL,
    Keyword::CROSS,
    Keyword::OUTER,
    Keyword::NATURAL,
    Keyword::ON,
    Keyword::USING,
    Keyword::AS,
    Keyword::AND,
    Keyword::OR,
    Keyword::NOT,
    Keyword::IN,
    Keyword::BETWEEN,
    Keyword::LIKE,
    Keyword::ILIKE,
    Keyword::IS,
    Keyword::NULL,
    Keyword::TRUE,
    Keyword::FALSE,
    Keyword::ALL,
    Keyword::ANY,
    Keyword::EXISTS,
    Keyword::CASE,
    Keyword::WHEN,
    Keyword::THEN,
    Keyword::ELSE,
    Keyword::END,
    Keyword::DISTINCT,
    Keyword::INSERT,
    Keyword::UPDATE,
    Keyword::DELETE,
];

const JOINS: &[Keyword] = &[
    Keyword::JOIN,
    Keyword::INNER,
    Keyword::LEFT,
    Keyword::RIGHT,
    Keyword::FULL,
    Keyword::CROSS,
    Keyword::OUTER,
    Keyword::NATURAL,
    Keyword::ON,
    Keyword::USING,
];

/// The keyword of an unquoted word.
fn keyword(token: &SqlToken) -> Option<Keyword> {
    match token {
        SqlToken::Word(Word {
            quote_style: None,
            keyword,
            ..
        }) if *keyword != Keyword::NoKeyword => Some(*keyword),
        _ => None,
    }
}

/// A word usable as a table or column name.
fn identifier(token: &SqlToken) -> Option<&Word> {
    match token {
        SqlToken::Word(word) if word.quote_style.is_some() || !RESERVED.contains(&word.keyword) => {
            Some(word)
        }
        _ => None,
    }
}

/// `SOME`, a synonym of `ANY`.
fn is_some_quantifier(token: &SqlToken) -> bool {
    matches!(token, SqlToken::Word(w) if w.quote_style.is_none() && w.value.eq_ignore_ascii_case("SOME"))
}

struct Parser {
    source: String,
    offsets: Vec<usize>,
    tokens: Vec<SqlToken>,
    /// Indices of the tokens that are not whitespace or comments.
    significant: Vec<usize>,
    comparisons: Vec<Comparison>,
}

impl Parser {
    fn new(source: &str, offsets: Vec<usize>, tokens: Vec<SqlToken>) -> Self {
        let significant = tokens
            .iter()
            .enumerate()
            .filter(|(_, t)| !matches!(t, SqlToken::Whitespace(_)))
            .map(|(i, _)| i)
            .collect();
        Self {
            source: source.to_string(),
            offsets,
            tokens,
            significant,
            comparisons: Vec::new(),
        }
    }

    fn len(&self) -> usize {
        self.significant.len()
    }

    /// The `p`-th significant token.
    fn tok(&self, p: usize) -> &SqlToken {
        &self.tokens[self.significant[p]]
    }

    fn kw(&self, p: usize) -> Option<Keyword> {
        keyword(self.tok(p))
    }

    /// Span of the significant tokens `from..=to`.
    fn span(&self, from: usize, to: usize) -> Span {
        (self.significant[from], self.significant[to] + 1)
    }

    fn unexpected(&self, p: usize) -> ParseError {
        match self.tok(p) {
            SqlToken::Word(word) if keyword(self.tok(p)).is_some() => {
                ParseError::UnexpectedKeyword(word.value.to_uppercase())
            }
            token => ParseError::Syntax(format!("unexpected '{token}'")),
        }
    }

    fn statement(self) -> Result<State, ParseError> {
        if self.len() == 0 {
            return Err(ParseError::Empty);
        }
        match self.kw(0) {
            Some(Keyword::SELECT) => self.select(),
            Some(Keyword::INSERT | Keyword::UPDATE | Keyword::DELETE) => Err(
                ParseError::UnsupportedStatement(self.tok(0).to_string().to_uppercase()),
            ),
            _ => Err(ParseError::UnsupportedStatement(self.tok(0).to_string())),
        }
    }

    fn select(mut self) -> Result<State, ParseError> {
        let n = self.len();

        // SELECT [DISTINCT|ALL] expression+
        let from = (1..n)
            .find(|&p| self.kw(p) == Some(Keyword::FROM))
            .ok_or_else(|| ParseError::Syntax("missing FROM clause".into()))?;
        if from == 1 {
            return Err(ParseError::Syntax("empty projection".into()));
        }
        let projection = (self.significant[0] + 1, self.significant[from]);

        // FROM table
        let (table, mut p) = self.table(from + 1)?;

        // [WHERE expression]
        let mut tail = None;
        let mut seen_where = false;
        while p < n {
            match self.kw(p) {
                Some(Keyword::WHERE) if !seen_where => {
                    seen_where = true;
                    let end = self.clause_end(p + 1);
                    if end == p + 1 {
                        return Err(ParseError::Syntax("empty WHERE clause".into()));
                    }
                    self.expression(p + 1, end)?;
                    p = end;
                }
                // [GROUP BY ... [HAVING ...]] [ORDER BY ...]
                Some(Keyword::GROUP | Keyword::HAVING | Keyword::ORDER) => {
                    tail = Some(self.significant[p]);
                    break;
                }
                _ if *self.tok(p) == SqlToken::SemiColon => {
                    if p + 1 < n {
                        return Err(ParseError::Unsupported("multiple statements".into()));
                    }
                    break;
                }
                _ => return Err(self.unexpected(p)),
            }
        }

        Ok(State {
            source: self.source,
            offsets: self.offsets,
            tokens: self.tokens,
            projection,
            table,
            comparisons: self.comparisons,
            tail,
        })
    }

    /// Reads the table reference starting at `p`, returning it with the
    /// position following it.
    fn table(&self, mut p: usize) -> Result<(TableRef, usize), ParseError> {
        let n = self.len();
        if p >= n {
            return Err(ParseError::Syntax("missing table after FROM".into()));
        }
        if *self.tok(p) == SqlToken::LParen {
            return Err(ParseError::Unsupported("subqueries".into()));
        }
        let first = identifier(self.tok(p)).ok_or_else(|| self.unexpected(p))?;

        let start = p;
        let mut parts = vec![first.value.clone()];
        p += 1;
        while p + 1 < n && *self.tok(p) == SqlToken::Period {
            let part = identifier(self.tok(p + 1)).ok_or_else(|| self.unexpected(p + 1))?;
            parts.push(part.value.clone());
            p += 2;
        }
        let span = self.span(start, p - 1);

        if p < n {
            match self.tok(p) {
                SqlToken::Comma => return Err(ParseError::Unsupported("multiple tables".into())),
                token => match keyword(token) {
                    Some(kw) if JOINS.contains(&kw) => {
                        return Err(ParseError::Unsupported("joins".into()))
                    }
                    Some(Keyword::AS) => return Err(ParseError::Unsupported("aliases".into())),
                    _ if identifier(token).is_some() => {
                        return Err(ParseError::Unsupported("aliases".into()))
                    }
                    _ => {}
                },
            }
        }

        let table = TableRef {
            name: parts.join("."),
            span,
        };
        Ok((table, p))
    }

    /// First position from `p` closing the `WHERE` clause.
    fn clause_end(&self, mut p: usize) -> usize {
        let mut depth = 0usize;
        while p < self.len() {
            match self.tok(p) {
                SqlToken::LParen => depth += 1,
                SqlToken::RParen => depth = depth.saturating_sub(1),
                SqlToken::SemiColon if depth == 0 => break,
                _ if depth == 0
                    && matches!(
                        self.kw(p),
                        Some(Keyword::GROUP | Keyword::HAVING | Keyword::ORDER)
                    ) =>
                {
                    break
                }
                _ => {}
            }
            p += 1;
        }
        p
    }

    /// Position of the parenthesis closing the one opened at `open`.
    fn matching(&self, open: usize, to: usize) -> Result<usize, ParseError> {
        let mut depth = 0usize;
        for p in open..to {
            match self.tok(p) {
                SqlToken::LParen => depth += 1,
                SqlToken::RParen => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(p);
                    }
                }
                _ => {}
            }
        }
        Err(ParseError::Syntax("unbalanced parentheses".into()))
    }

    /// Evaluates the expression between positions `from` and `to` (excluded),
    /// recording its comparisons.
    fn expression(&mut self, from: usize, to: usize) -> Result<Operand, ParseError> {
        let mut args: Vec<Operand> = Vec::new();
        let mut ops: Vec<PendingOp> = Vec::new();
        let mut expect_operand = true;
        let mut p = from;

        while p < to {
            if expect_operand {
                p = self.operand(p, to, &mut args, &mut ops, &mut expect_operand)?;
                continue;
            }

            let at = self.significant[p];
            let mut negated = false;
            let op = match self.tok(p) {
                SqlToken::Eq | SqlToken::DoubleEq => Operator::Comparison(ComparisonOp::Equal),
                SqlToken::Neq => Operator::Comparison(ComparisonOp::NotEqual),
                SqlToken::Lt => Operator::Comparison(ComparisonOp::LessThan),
                SqlToken::LtEq => Operator::Comparison(ComparisonOp::LessEqual),
                SqlToken::Gt => Operator::Comparison(ComparisonOp::GreaterThan),
                SqlToken::GtEq => Operator::Comparison(ComparisonOp::GreaterEqual),
                SqlToken::Plus
                | SqlToken::Minus
                | SqlToken::Mul
                | SqlToken::Div
                | SqlToken::Mod
                | SqlToken::StringConcat
                | SqlToken::Ampersand
                | SqlToken::Pipe
                | SqlToken::Caret => {
                    return Err(ParseError::Unsupported("arithmetic operators".into()))
                }
                token => match keyword(token) {
                    Some(Keyword::AND)
                        if matches!(ops.last(), Some(PendingOp { op: Operator::Between, .. })) =>
                    {
                        Operator::BetweenAnd
                    }
                    Some(Keyword::AND) => Operator::And,
                    Some(Keyword::OR) => Operator::Or,
                    Some(Keyword::IN) => Operator::Comparison(ComparisonOp::In),
                    Some(Keyword::LIKE | Keyword::ILIKE) => {
                        Operator::Comparison(ComparisonOp::Like)
                    }
                    Some(Keyword::IS) => Operator::Comparison(ComparisonOp::Is),
                    Some(Keyword::BETWEEN) => Operator::Between,
                    Some(Keyword::NOT) if p + 1 < to => {
                        negated = true;
                        p += 1;
                        match self.kw(p) {
                            Some(Keyword::IN) => Operator::Comparison(ComparisonOp::In),
                            Some(Keyword::LIKE | Keyword::ILIKE) => {
                                Operator::Comparison(ComparisonOp::Like)
                            }
                            Some(Keyword::BETWEEN) => Operator::Between,
                            _ => return Err(self.unexpected(p)),
                        }
                    }
                    None if identifier(token).is_some() => {
                        return Err(ParseError::Unsupported("aliases".into()))
                    }
                    _ => return Err(self.unexpected(p)),
                },
            };

            if op != Operator::BetweenAnd {
                while let Some(top) = ops.last() {
                    if top.op.precedence() < op.precedence() {
                        break;
                    }
                    self.reduce(&mut args, &mut ops)?;
                }
            }
            ops.push(PendingOp { op, at, negated });
            expect_operand = true;
            p += 1;
        }

        if expect_operand {
            return Err(ParseError::Syntax("incomplete expression".into()));
        }
        while !ops.is_empty() {
            self.reduce(&mut args, &mut ops)?;
        }
        match (args.pop(), args.is_empty()) {
            (Some(operand), true) => Ok(operand),
            _ => Err(ParseError::Syntax("invalid comparison clause".into())),
        }
    }

    /// Shifts the operand (or prefix operator) found at `p` and returns the
    /// next position.
    fn operand(
        &mut self,
        p: usize,
        to: usize,
        args: &mut Vec<Operand>,
        ops: &mut Vec<PendingOp>,
        expect_operand: &mut bool,
    ) -> Result<usize, ParseError> {
        if *self.tok(p) == SqlToken::LParen {
            let close = self.matching(p, to)?;
            args.push(self.parenthesized(p, close)?);
            *expect_operand = false;
            return Ok(close + 1);
        }

        let literal = |value: Literal, span: Span| Operand::Literal { value, span };
        let next_is = |q: usize, token: SqlToken| q < to && *self.tok(q) == token;

        let (operand, next) = match self.tok(p) {
            SqlToken::Number(n, _) => (literal(Literal::Number(n.clone()), self.span(p, p)), p + 1),
            SqlToken::Minus => match (p + 1 < to).then(|| self.tok(p + 1)) {
                Some(SqlToken::Number(n, _)) => (
                    literal(Literal::Number(format!("-{n}")), self.span(p, p + 1)),
                    p + 2,
                ),
                _ => return Err(ParseError::Unsupported("arithmetic operators".into())),
            },
            SqlToken::SingleQuotedString(s) => {
                (literal(Literal::Text(s.clone()), self.span(p, p)), p + 1)
            }
            token => match keyword(token) {
                Some(kw @ (Keyword::NULL | Keyword::TRUE | Keyword::FALSE)) => (
                    literal(Literal::Keyword(format!("{kw:?}")), self.span(p, p)),
                    p + 1,
                ),
                Some(Keyword::NOT) if p + 1 < to && self.kw(p + 1) == Some(Keyword::NULL) => (
                    literal(Literal::Keyword("NOT NULL".into()), self.span(p, p + 1)),
                    p + 2,
                ),
                Some(Keyword::NOT) => {
                    ops.push(PendingOp {
                        op: Operator::Not,
                        at: self.significant[p],
                        negated: false,
                    });
                    return Ok(p + 1);
                }
                Some(Keyword::ALL | Keyword::ANY | Keyword::EXISTS) => {
                    ops.push(PendingOp {
                        op: Operator::Quantifier,
                        at: self.significant[p],
                        negated: false,
                    });
                    return Ok(p + 1);
                }
                _ if is_some_quantifier(token) => {
                    ops.push(PendingOp {
                        op: Operator::Quantifier,
                        at: self.significant[p],
                        negated: false,
                    });
                    return Ok(p + 1);
                }
                Some(Keyword::CASE) => return Err(ParseError::Unsupported("CASE".into())),
                Some(Keyword::SELECT) => {
                    return Err(ParseError::Unsupported("subqueries".into()))
                }
                _ => {
                    let first = identifier(token).ok_or_else(|| self.unexpected(p))?;
                    let mut name = first.value.clone();
                    let mut qualifier = None;
                    let mut last = p;
                    if next_is(p + 1, SqlToken::Period) && p + 2 < to {
                        let column = identifier(self.tok(p + 2)).ok_or_else(|| self.unexpected(p + 2))?;
                        qualifier = Some(std::mem::replace(&mut name, column.value.clone()));
                        last = p + 2;
                        if next_is(last + 1, SqlToken::Period) {
                            return Err(ParseError::Syntax(
                                "column identifiers may contain only one dot separating table name and column name".into(),
                            ));
                        }
                    }
                    if next_is(last + 1, SqlToken::LParen) {
                        return Err(ParseError::Unsupported("functions".into()));
                    }
                    let span = self.span(p, last);
                    (
                        Operand::Column {
                            name,
                            qualifier,
                            span,
                        },
                        last + 1,
                    )
                }
            },
        };

        args.push(operand);
        *expect_operand = false;
        Ok(next)
    }

    /// Resolves the parenthesized group `open..=close`: a value list, or a
    /// nested expression.
    fn parenthesized(&mut self, open: usize, close: usize) -> Result<Operand, ParseError> {
        let span = self.span(open, close);
        if close == open + 1 {
            return Err(ParseError::Syntax("empty parentheses".into()));
        }
        if self.kw(open + 1) == Some(Keyword::SELECT) {
            return Err(ParseError::Unsupported("subqueries".into()));
        }

        // Split on the commas of this level.
        let mut items = Vec::new();
        let mut depth = 0usize;
        let mut start = open + 1;
        for p in open + 1..close {
            match self.tok(p) {
                SqlToken::LParen => depth += 1,
                SqlToken::RParen => depth = depth.saturating_sub(1),
                SqlToken::Comma if depth == 0 => {
                    items.push((start, p));
                    start = p + 1;
                }
                _ => {}
            }
        }
        items.push((start, close));
        if items.iter().any(|&(from, to)| from == to) {
            return Err(ParseError::Syntax("comma".into()));
        }

        if items.len() == 1 {
            let operand = self.expression(open + 1, close)?;
            return Ok(match operand {
                Operand::Literal { value, .. } => Operand::List {
                    values: vec![value],
                    span,
                },
                operand => operand.with_span(span),
            });
        }

        let mut values = Vec::with_capacity(items.len());
        for (from, to) in items {
            match self.expression(from, to)? {
                Operand::Literal { value, .. } => values.push(value),
                _ => {
                    return Err(ParseError::Syntax(
                        "value lists may only contain literals".into(),
                    ))
                }
            }
        }
        Ok(Operand::List { values, span })
    }

    fn record(
        &mut self,
        left: Operand,
        op: ComparisonOp,
        right: Operand,
        extra: Option<Operand>,
        negated: bool,
    ) -> Operand {
        let end = extra.as_ref().unwrap_or(&right).span().1;
        let span = (left.span().0, end);
        self.comparisons.push(Comparison {
            left,
            op,
            right,
            extra,
            span,
            negated,
            disjunctive: false,
        });
        Operand::Expression { span }
    }

    /// Applies `mark` to every comparison recorded inside `span`.
    fn mark(&mut self, span: Span, mark: impl Fn(&mut Comparison)) {
        self.comparisons
            .iter_mut()
            .filter(|c| c.span.0 >= span.0 && c.span.1 <= span.1)
            .for_each(mark);
    }

    fn reduce(&mut self, args: &mut Vec<Operand>, ops: &mut Vec<PendingOp>) -> Result<(), ParseError> {
        let dangling = || ParseError::Syntax("dangling operator".into());
        let pending = ops.pop().ok_or_else(dangling)?;

        let reduced = match pending.op {
            Operator::BetweenAnd => {
                let between = ops
                    .pop()
                    .filter(|b| b.op == Operator::Between)
                    .ok_or_else(|| ParseError::Syntax("AND without BETWEEN".into()))?;
                let right = args.pop().ok_or_else(dangling)?;
                let middle = args.pop().ok_or_else(dangling)?;
                let left = args.pop().ok_or_else(dangling)?;
                self.record(left, ComparisonOp::Between, middle, Some(right), between.negated)
            }
            Operator::Between => return Err(ParseError::Syntax("BETWEEN without AND".into())),
            Operator::Comparison(op) => {
                let right = args.pop().ok_or_else(dangling)?;
                let left = args.pop().ok_or_else(dangling)?;
                self.record(left, op, right, None, pending.negated)
            }
            Operator::And | Operator::Or => {
                let right = args.pop().ok_or_else(dangling)?;
                let left = args.pop().ok_or_else(dangling)?;
                let span = (left.span().0, right.span().1);
                if pending.op == Operator::Or {
                    self.mark(span, |c| c.disjunctive = true);
                }
                Operand::Expression { span }
            }
            Operator::Not | Operator::Quantifier => {
                let operand = args.pop().ok_or_else(dangling)?;
                let span = (pending.at, operand.span().1);
                if pending.op == Operator::Not {
                    self.mark(span, |c| c.negated = true);
                }
                Operand::Expression { span }
            }
        };
        args.push(reduced);
        Ok(())
    }
}
