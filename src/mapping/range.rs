use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::tokens::TokenTable;
use super::{render_range, Token, Value};
use crate::error::Result;

/// Numeric generalizations `[start-end]` kept sorted by `start`, with a second
/// ordering by descending `end` for one-sided scans.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RangeMapping {
    column: String,
    ranges: Vec<(f64, f64)>,
    by_end: Vec<usize>,
    tokens: TokenTable,
}

impl RangeMapping {
    /// `ranges[i]` holds the generalization whose tokens are `tokens.entries[i]`.
    pub fn new(column: &str, ranges: Vec<(f64, f64)>, tokens: TokenTable) -> Self {
        let TokenTable {
            entries,
            salt,
            key,
        } = tokens;
        let mut pairs: Vec<_> = ranges.into_iter().zip(entries).collect();
        pairs.sort_by(|(a, _), (b, _)| a.0.total_cmp(&b.0).then(a.1.total_cmp(&b.1)));
        let (ranges, entries): (Vec<_>, Vec<_>) = pairs.into_iter().unzip();

        let mut by_end: Vec<usize> = (0..ranges.len()).collect();
        by_end.sort_by(|&i, &j| ranges[j].1.total_cmp(&ranges[i].1));

        Self {
            column: column.to_string(),
            ranges,
            by_end,
            tokens: TokenTable::new(entries, salt, key),
        }
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    pub fn token_table(&self) -> &TokenTable {
        &self.tokens
    }

    fn number(&self, value: &Value) -> Result<f64> {
        Ok(value.as_number(&self.column)?)
    }

    fn starting_before(&self, bound: f64, inclusive: bool) -> Vec<usize> {
        self.ranges
            .iter()
            .take_while(|(start, _)| if inclusive { *start <= bound } else { *start < bound })
            .enumerate()
            .map(|(i, _)| i)
            .collect()
    }

    fn ending_after(&self, bound: f64, inclusive: bool) -> Vec<usize> {
        self.by_end
            .iter()
            .take_while(|&&i| {
                let end = self.ranges[i].1;
                if inclusive {
                    end >= bound
                } else {
                    end > bound
                }
            })
            .copied()
            .collect()
    }

    pub fn le(&self, value: &Value) -> Result<BTreeSet<Token>> {
        let v = self.number(value)?;
        self.tokens.union(self.starting_before(v, true))
    }

    pub fn lt(&self, value: &Value) -> Result<BTreeSet<Token>> {
        let v = self.number(value)?;
        self.tokens.union(self.starting_before(v, false))
    }

    pub fn ge(&self, value: &Value) -> Result<BTreeSet<Token>> {
        let v = self.number(value)?;
        self.tokens.union(self.ending_after(v, true))
    }

    pub fn gt(&self, value: &Value) -> Result<BTreeSet<Token>> {
        let v = self.number(value)?;
        self.tokens.union(self.ending_after(v, false))
    }

    /// Generalizations overlapping `[low, high]`.
    pub fn between(&self, low: &Value, high: &Value) -> Result<BTreeSet<Token>> {
        let (low, high) = (self.number(low)?, self.number(high)?);
        let after: BTreeSet<usize> = self.ending_after(low, true).into_iter().collect();
        let slots = self
            .starting_before(high, true)
            .into_iter()
            .filter(|slot| after.contains(slot));
        self.tokens.union(slots)
    }

    pub fn eq(&self, value: &Value) -> Result<BTreeSet<Token>> {
        self.between(value, value)
    }

    pub fn neq(&self, value: &Value) -> Result<BTreeSet<Token>> {
        let mut tokens = self.lt(value)?;
        tokens.extend(self.gt(value)?);
        Ok(tokens)
    }

    pub fn generalizations(&self) -> Vec<String> {
        self.ranges
            .iter()
            .map(|&(start, end)| render_range(start, end))
            .collect()
    }

    pub fn tokens(&self) -> Result<Vec<Vec<Token>>> {
        self.tokens.all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::tokens::TokenEntry;

    fn ages() -> RangeMapping {
        let entries = [2, 1, 3]
            .into_iter()
            .map(|t| TokenEntry::Static(vec![Token::Int(t)]))
            .collect();
        RangeMapping::new(
            "AGE",
            vec![(10.0, 19.0), (0.0, 9.0), (75.0, 79.0)],
            TokenTable::new(entries, [0; 16], None),
        )
    }

    fn ints(tokens: &[u64]) -> BTreeSet<Token> {
        tokens.iter().map(|&t| Token::Int(t)).collect()
    }

    #[test]
    fn one_sided_scans() {
        let mapping = ages();
        assert_eq!(mapping.le(&18.0.into()).unwrap(), ints(&[1, 2]));
        assert_eq!(mapping.lt(&10.0.into()).unwrap(), ints(&[1]));
        assert_eq!(mapping.ge(&19.0.into()).unwrap(), ints(&[2, 3]));
        assert_eq!(mapping.gt(&19.0.into()).unwrap(), ints(&[3]));
    }

    #[test]
    fn point_and_range_queries() {
        let mapping = ages();
        assert_eq!(mapping.eq(&5.0.into()).unwrap(), ints(&[1]));
        assert_eq!(mapping.eq(&50.0.into()).unwrap(), ints(&[]));
        assert_eq!(
            mapping.between(&75.0.into(), &79.0.into()).unwrap(),
            ints(&[3])
        );
        assert_eq!(mapping.neq(&5.0.into()).unwrap(), ints(&[2, 3]));
    }

    #[test]
    fn completeness() {
        let mapping = ages();
        let all = ints(&[1, 2, 3]);
        for v in [-1.0, 0.0, 9.0, 12.0, 40.0, 79.0, 100.0] {
            let v = Value::Number(v);
            let mut union = mapping.eq(&v).unwrap();
            union.extend(mapping.lt(&v).unwrap());
            union.extend(mapping.gt(&v).unwrap());
            assert_eq!(union, all);
            assert_eq!(mapping.eq(&v).unwrap(), mapping.between(&v, &v).unwrap());
        }
        let (a, b) = (Value::Number(5.0), Value::Number(76.0));
        let expected: BTreeSet<_> = mapping
            .ge(&a)
            .unwrap()
            .intersection(&mapping.le(&b).unwrap())
            .cloned()
            .collect();
        assert_eq!(mapping.between(&a, &b).unwrap(), expected);
    }

    #[test]
    fn generalizations_are_sorted_by_start() {
        let mapping = ages();
        assert_eq!(mapping.generalizations(), vec!["[0-9]", "[10-19]", "[75-79]"]);
        assert_eq!(
            mapping.tokens().unwrap(),
            vec![vec![Token::Int(1)], vec![Token::Int(2)], vec![Token::Int(3)]]
        );
    }

    #[test]
    fn reject_text_values() {
        assert!(matches!(
            ages().le(&"young".into()),
            Err(crate::error::Error::Mapping(
                crate::error::MappingError::NotNumeric { .. }
            ))
        ));
    }
}
