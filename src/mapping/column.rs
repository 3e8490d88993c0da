use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::categorical::{BitmapMapping, RoaringMapping, SetMapping};
use super::interval_tree::IntervalTreeMapping;
use super::range::RangeMapping;
use super::tokens::TokenTable;
use super::{Token, Value};
use crate::config::MappingType;
use crate::error::Result;

/// One column mapping, of any of the five kinds.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum ColumnMapping {
    Range(RangeMapping),
    IntervalTree(IntervalTreeMapping),
    Bitmap(BitmapMapping),
    Roaring(RoaringMapping),
    Set(SetMapping),
}

/// Forwards a call to the mapping held by any variant.
macro_rules! dispatch {
    ($self:ident, $mapping:ident => $call:expr) => {
        match $self {
            ColumnMapping::Range($mapping) => $call,
            ColumnMapping::IntervalTree($mapping) => $call,
            ColumnMapping::Bitmap($mapping) => $call,
            ColumnMapping::Roaring($mapping) => $call,
            ColumnMapping::Set($mapping) => $call,
        }
    };
}

impl ColumnMapping {
    pub fn mapping_type(&self) -> MappingType {
        match self {
            ColumnMapping::Range(_) => MappingType::Range,
            ColumnMapping::IntervalTree(_) => MappingType::IntervalTree,
            ColumnMapping::Bitmap(_) => MappingType::Bitmap,
            ColumnMapping::Roaring(_) => MappingType::Roaring,
            ColumnMapping::Set(_) => MappingType::Set,
        }
    }

    pub fn column(&self) -> &str {
        dispatch!(self, m => m.column())
    }

    pub fn token_table(&self) -> &TokenTable {
        dispatch!(self, m => m.token_table())
    }

    pub fn eq(&self, value: &Value) -> Result<BTreeSet<Token>> {
        dispatch!(self, m => m.eq(value))
    }

    pub fn neq(&self, value: &Value) -> Result<BTreeSet<Token>> {
        dispatch!(self, m => m.neq(value))
    }

    pub fn lt(&self, value: &Value) -> Result<BTreeSet<Token>> {
        dispatch!(self, m => m.lt(value))
    }

    pub fn le(&self, value: &Value) -> Result<BTreeSet<Token>> {
        dispatch!(self, m => m.le(value))
    }

    pub fn gt(&self, value: &Value) -> Result<BTreeSet<Token>> {
        dispatch!(self, m => m.gt(value))
    }

    pub fn ge(&self, value: &Value) -> Result<BTreeSet<Token>> {
        dispatch!(self, m => m.ge(value))
    }

    pub fn between(&self, low: &Value, high: &Value) -> Result<BTreeSet<Token>> {
        dispatch!(self, m => m.between(low, high))
    }

    pub fn in_values(&self, values: &[Value]) -> Result<BTreeSet<Token>> {
        let mut tokens = BTreeSet::new();
        for value in values {
            tokens.extend(self.eq(value)?);
        }
        Ok(tokens)
    }

    pub fn generalizations(&self) -> Vec<String> {
        dispatch!(self, m => m.generalizations())
    }

    pub fn tokens(&self) -> Result<Vec<Vec<Token>>> {
        dispatch!(self, m => m.tokens())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::categorical::CategoricalMapping;
    use crate::mapping::tokens::TokenEntry;

    fn table(tokens: &[u64]) -> TokenTable {
        let entries = tokens
            .iter()
            .map(|&t| TokenEntry::Static(vec![Token::Int(t)]))
            .collect();
        TokenTable::new(entries, [0; 16], None)
    }

    #[test]
    fn dispatch_to_the_variant() {
        let ages = ColumnMapping::IntervalTree(IntervalTreeMapping::new(
            "AGE",
            vec![(0.0, 9.0), (10.0, 19.0)],
            table(&[1, 2]),
        ));
        assert_eq!(ages.mapping_type(), MappingType::IntervalTree);
        assert_eq!(ages.column(), "AGE");
        assert_eq!(
            ages.in_values(&[Value::Number(3.0), Value::Number(12.0)]).unwrap(),
            [Token::Int(1), Token::Int(2)].into()
        );

        let cities = ColumnMapping::Set(CategoricalMapping::new(
            "CITY",
            &[vec!["Rome".to_string()]],
            table(&[7]),
        ));
        assert_eq!(cities.generalizations(), vec!["Rome"]);
        assert!(cities.le(&"Rome".into()).is_err());
    }
}
