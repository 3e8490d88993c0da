//! Rewrites a SELECT statement over plaintext columns into one over tokens.
//!
//! The projection becomes the encrypted tuple column, the table reference is
//! optionally joined with the server-side representation of the index, and
//! every comparison of the `WHERE` clause becomes a semi-join against the
//! tokens the mapping returns:
//!
//! ```sql
//! SELECT * FROM wrapped WHERE "AGE" <= 18
//! -- becomes
//! SELECT "EncTuples" FROM wrapped WHERE "AGE" IN (VALUES (1),(2))
//! ```
//!
//! In key-value mode no SQL is produced: the tokens of every comparison are
//! collected per column, and comparisons on the same column are intersected.

use clap::ValueEnum;
use log::debug;
use std::collections::{BTreeMap, BTreeSet};

use crate::error::{MappingError, Result};
use crate::mapping::{MultidimensionalMapping, Token, Value};
use crate::sql_parser::{self, Comparison, ComparisonOp, Literal, Operand, Span, State};

/// Column of the server-side table holding the encrypted tuples.
pub const ENCRYPTED_COLUMN: &str = "EncTuples";
/// Column name substituted for columns whose tokens are group ids.
pub const GROUP_ID_COLUMN: &str = "GroupId";

/// How tokens are stored next to the encrypted tuples on the server.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum Representation {
    /// Token columns live in the encrypted table itself.
    #[default]
    Flat,
    /// A `mapping` table joined on `GroupId`.
    GroupMapping,
    /// One table per column, referenced through `GroupIdToColumns`.
    Normalized,
}

/// What happens to `GROUP BY`, `HAVING` and `ORDER BY`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum TailPolicy {
    /// Grouping and ordering happen client side, after decryption.
    #[default]
    Drop,
    Reattach,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    #[default]
    Sql,
    KeyValue,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct RewriteOptions {
    pub representation: Representation,
    pub tail: TailPolicy,
    pub mode: Mode,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Rewrite {
    Sql {
        query: String,
        /// Unquoted name of the queried table.
        table: String,
    },
    KeyValue {
        labels: BTreeMap<String, BTreeSet<Token>>,
        table: String,
    },
}

impl Rewrite {
    pub fn table(&self) -> &str {
        match self {
            Rewrite::Sql { table, .. } | Rewrite::KeyValue { table, .. } => table,
        }
    }
}

/// A comparison with the column on the left.
struct Resolved<'a> {
    column: String,
    op: ComparisonOp,
    value: &'a Operand,
    comparison: &'a Comparison,
}

/// Rewrites `sql` against `mapping`.
pub fn rewrite<M>(sql: &str, mapping: &M, options: &RewriteOptions) -> Result<Rewrite>
where
    M: MultidimensionalMapping + ?Sized,
{
    let state = sql_parser::parse(sql)?;
    let resolved = state
        .comparisons
        .iter()
        .map(|comparison| resolve(&state, comparison))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    let table = state.table.name.clone();

    if options.mode == Mode::KeyValue {
        let mut labels: BTreeMap<String, BTreeSet<Token>> = BTreeMap::new();
        for r in &resolved {
            if r.comparison.negated || r.comparison.disjunctive {
                return Err(MappingError::NonConjunctive(r.column.clone()).into());
            }
            let tokens = evaluate(&state, mapping, r)?;
            let column = physical_column(mapping, &r.column)?;
            match labels.get_mut(&column) {
                Some(current) => current.retain(|token| tokens.contains(token)),
                None => {
                    labels.insert(column, tokens);
                }
            }
        }
        debug!("Planned lookups on {table}: {labels:?}");
        return Ok(Rewrite::KeyValue { labels, table });
    }

    let mut replacements: Vec<(Span, String)> = vec![(state.projection, format!(" \"{ENCRYPTED_COLUMN}\" "))];
    replacements.push((state.table.span, table_reference(&state, &resolved, options.representation)));
    for r in &resolved {
        if r.comparison.negated {
            return Err(MappingError::Negated(r.column.clone()).into());
        }
        let tokens = evaluate(&state, mapping, r)?;
        let fragment = if tokens.is_empty() {
            "FALSE".to_string()
        } else {
            format!(
                "\"{}\" IN (VALUES {})",
                physical_column(mapping, &r.column)?,
                values(&tokens)
            )
        };
        replacements.push((r.comparison.span, fragment));
    }
    replacements.sort_by_key(|(span, _)| span.0);

    let end = match (state.tail, options.tail) {
        (Some(tail), TailPolicy::Drop) => tail,
        _ => state.tokens.len(),
    };
    let mut query = String::new();
    let mut cursor = 0;
    for (span, text) in replacements {
        query.push_str(&state.text((cursor, span.0)));
        query.push_str(&text);
        cursor = span.1;
    }
    query.push_str(&state.text((cursor, end)));
    if end < state.tokens.len() {
        query.truncate(query.trim_end().len());
    }

    debug!("Rewrote {sql:?} as {query:?}");
    Ok(Rewrite::Sql { query, table })
}

fn resolve<'a>(state: &State, comparison: &'a Comparison) -> std::result::Result<Resolved<'a>, MappingError> {
    let text = |operand: &Operand| state.text(operand.span());
    if let Some(extra @ Operand::Column { .. }) = &comparison.extra {
        return Err(MappingError::ColumnComparison {
            left: text(&comparison.left),
            right: text(extra),
        });
    }

    let (column, op, value) = match (&comparison.left, &comparison.right) {
        (Operand::Column { .. }, Operand::Column { .. }) => {
            return Err(MappingError::ColumnComparison {
                left: text(&comparison.left),
                right: text(&comparison.right),
            })
        }
        (Operand::Column { name, .. }, value) => (name, comparison.op, value),
        (value, Operand::Column { name, .. })
            if !matches!(comparison.op, ComparisonOp::In | ComparisonOp::Between) =>
        {
            (name, comparison.op.mirror(), value)
        }
        _ => return Err(MappingError::MissingColumn(state.text(comparison.span))),
    };

    Ok(Resolved {
        column: column.clone(),
        op,
        value,
        comparison,
    })
}

/// Tokens of the groups that may satisfy the comparison.
fn evaluate<M>(state: &State, mapping: &M, r: &Resolved) -> Result<BTreeSet<Token>>
where
    M: MultidimensionalMapping + ?Sized,
{
    let column = r.column.as_str();
    let single = |operand: &Operand| value(state, column, operand);
    let tokens = match r.op {
        ComparisonOp::Equal => mapping.eq(column, &single(r.value)?)?,
        ComparisonOp::NotEqual => mapping.neq(column, &single(r.value)?)?,
        ComparisonOp::LessThan => mapping.lt(column, &single(r.value)?)?,
        ComparisonOp::LessEqual => mapping.le(column, &single(r.value)?)?,
        ComparisonOp::GreaterThan => mapping.gt(column, &single(r.value)?)?,
        ComparisonOp::GreaterEqual => mapping.ge(column, &single(r.value)?)?,
        ComparisonOp::Between => {
            let high = r
                .comparison
                .extra
                .as_ref()
                .ok_or_else(|| MappingError::MissingColumn(state.text(r.comparison.span)))?;
            mapping.between(column, &single(r.value)?, &single(high)?)?
        }
        ComparisonOp::In => match r.value {
            Operand::List { values, .. } => {
                let values = values
                    .iter()
                    .map(|literal| literal_value(column, literal))
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                mapping.in_values(column, &values)?
            }
            other => return Err(invalid(state, column, other).into()),
        },
        op @ (ComparisonOp::Like | ComparisonOp::Is) => {
            return Err(MappingError::UnsupportedOperator(op.to_string()).into())
        }
    };
    debug!("{} {} {} -> {} tokens", column, r.op, state.text(r.value.span()), tokens.len());
    Ok(tokens)
}

fn value(state: &State, column: &str, operand: &Operand) -> std::result::Result<Value, MappingError> {
    match operand {
        Operand::Literal { value, .. } => literal_value(column, value),
        other => Err(invalid(state, column, other)),
    }
}

fn literal_value(column: &str, literal: &Literal) -> std::result::Result<Value, MappingError> {
    let invalid = || MappingError::InvalidValue {
        column: column.to_string(),
        value: literal.to_string(),
    };
    match literal {
        // Kept as written: numeric mappings parse it, categorical ones match
        // `01234` or `1.50` as labels.
        Literal::Number(n) => match n.parse::<f64>() {
            Ok(_) => Ok(Value::Text(n.clone())),
            Err(_) => Err(invalid()),
        },
        Literal::Text(s) => Ok(Value::Text(s.clone())),
        Literal::Keyword(_) => Err(invalid()),
    }
}

fn invalid(state: &State, column: &str, operand: &Operand) -> MappingError {
    MappingError::InvalidValue {
        column: column.to_string(),
        value: state.text(operand.span()),
    }
}

fn physical_column<M>(mapping: &M, column: &str) -> Result<String>
where
    M: MultidimensionalMapping + ?Sized,
{
    Ok(if mapping.is_gid(column)? {
        GROUP_ID_COLUMN.to_string()
    } else {
        column.to_string()
    })
}

fn table_reference(state: &State, resolved: &[Resolved], representation: Representation) -> String {
    let table = state.text(state.table.span);
    match representation {
        Representation::Flat => table,
        Representation::GroupMapping => {
            format!("{table} JOIN mapping USING (\"{GROUP_ID_COLUMN}\")")
        }
        Representation::Normalized => {
            let columns: BTreeSet<&str> = resolved.iter().map(|r| r.column.as_str()).collect();
            let mut rewritten = format!("{table} JOIN \"GroupIdToColumns\" USING (\"{GROUP_ID_COLUMN}\")");
            for column in columns {
                rewritten.push_str(&format!(
                    " JOIN \"{column}\" ON (\"{column}Id\" = \"{column}\".\"Id\")"
                ));
            }
            rewritten
        }
    }
}

/// `1),(2` or `'a'),('b'`, in token order.
fn values(tokens: &BTreeSet<Token>) -> String {
    let rows: Vec<String> = tokens
        .iter()
        .map(|token| match token {
            Token::Int(i) => format!("({i})"),
            Token::Text(s) => format!("('{}')", s.replace('\'', "''")),
        })
        .collect();
    rows.join(",")
}
