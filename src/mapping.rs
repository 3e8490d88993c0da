//! Column mappings: from generalized values to the tokens of the encrypted
//! groups that may hold matching rows.
//!
//! Every mapping answers the same predicates (`eq`, `neq`, `lt`, `le`, `gt`,
//! `ge`, `between`, `in_values`) with a set of tokens. The query rewriter only
//! depends on the [`MultidimensionalMapping`] trait, implemented by
//! [`HeterogeneousMapping`].

pub mod categorical;
pub mod column;
pub mod creation;
pub mod derivation;
pub mod heterogeneous;
pub mod interval_tree;
pub mod range;
pub mod tokens;

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::error::{MappingError, Result};

pub use column::ColumnMapping;
pub use heterogeneous::HeterogeneousMapping;

/// An opaque identifier of one encrypted group (or of a plain generalization
/// when tokens are kept in clear).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Token {
    Int(u64),
    Text(String),
}

impl Token {
    pub fn is_text(&self) -> bool {
        matches!(self, Token::Text(_))
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Int(i) => write!(f, "{i}"),
            Token::Text(s) => f.write_str(s),
        }
    }
}

impl From<u64> for Token {
    fn from(value: u64) -> Self {
        Token::Int(value)
    }
}

impl From<&str> for Token {
    fn from(value: &str) -> Self {
        Token::Text(value.to_string())
    }
}

/// A comparison value taken from a predicate.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Number(f64),
    Text(String),
}

impl Value {
    /// Numeric mappings only accept numbers.
    pub fn as_number(&self, column: &str) -> std::result::Result<f64, MappingError> {
        match self {
            Value::Number(n) => Ok(*n),
            Value::Text(s) => s.trim().parse::<f64>().map_err(|_| MappingError::NotNumeric {
                column: column.to_string(),
                value: s.clone(),
            }),
        }
    }

    /// Categorical mappings compare labels, so numbers are matched by their
    /// canonical text (`6260`, not `6260.0`).
    pub fn as_label(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) => f.write_str(&format_number(*n)),
            Value::Text(s) => f.write_str(s),
        }
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Number(value as f64)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

/// Integral numbers are printed without a fractional part.
pub fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

/// Renders a closed numeric generalization: `[start-end]`, or the bare point.
pub fn render_range(start: f64, end: f64) -> String {
    if start != end {
        format!("[{}-{}]", format_number(start), format_number(end))
    } else {
        format_number(start)
    }
}

/// The predicate contract of a multi-column mapping.
pub trait MultidimensionalMapping {
    fn eq(&self, column: &str, value: &Value) -> Result<BTreeSet<Token>>;
    fn neq(&self, column: &str, value: &Value) -> Result<BTreeSet<Token>>;
    fn lt(&self, column: &str, value: &Value) -> Result<BTreeSet<Token>>;
    fn le(&self, column: &str, value: &Value) -> Result<BTreeSet<Token>>;
    fn gt(&self, column: &str, value: &Value) -> Result<BTreeSet<Token>>;
    fn ge(&self, column: &str, value: &Value) -> Result<BTreeSet<Token>>;
    /// Inclusive on both ends.
    fn between(&self, column: &str, low: &Value, high: &Value) -> Result<BTreeSet<Token>>;
    /// Union of `eq` over every value.
    fn in_values(&self, column: &str, values: &[Value]) -> Result<BTreeSet<Token>>;

    /// Whether the tokens of `column` are group identifiers.
    fn is_gid(&self, column: &str) -> Result<bool>;
    fn generalizations(&self, column: &str) -> Result<Vec<String>>;
    fn tokens(&self, column: &str) -> Result<Vec<Vec<Token>>>;
}
