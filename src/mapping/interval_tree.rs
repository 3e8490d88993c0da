//! Interval tree over numeric generalizations.
//!
//! The tree works on half-open intervals: a generalization `[start-end]` is
//! stored as `[start, end + DELTA)`, so a point query at `v` finds every
//! generalization with `start <= v < end + DELTA`.
//!
//! Nodes are laid out implicitly over the intervals sorted by `start`: the
//! node covering `lo..hi` is `mid = lo + (hi - lo) / 2`, its left subtree
//! covers `lo..mid` and its right subtree `mid + 1..hi`. Each node keeps the
//! largest `end` found in its subtree, which lets a query skip subtrees that
//! end before the queried range begins.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::tokens::TokenTable;
use super::{render_range, Token, Value};
use crate::error::Result;

pub const DELTA: f64 = 1.0;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Interval {
    pub start: f64,
    /// Exclusive.
    pub end: f64,
    pub slot: usize,
}

/// Upper limit on the `start` of matching intervals.
#[derive(Clone, Copy, Debug)]
enum StartBound {
    Below(f64),
    AtMost(f64),
    Unbounded,
}

impl StartBound {
    fn admits(&self, start: f64) -> bool {
        match *self {
            StartBound::Below(bound) => start < bound,
            StartBound::AtMost(bound) => start <= bound,
            StartBound::Unbounded => true,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct IntervalTree {
    intervals: Vec<Interval>,
    max_end: Vec<f64>,
}

impl IntervalTree {
    pub fn new(mut intervals: Vec<Interval>) -> Self {
        intervals.sort_by(|a, b| a.start.total_cmp(&b.start).then(a.end.total_cmp(&b.end)));
        let mut tree = Self {
            max_end: vec![f64::NEG_INFINITY; intervals.len()],
            intervals,
        };
        tree.build(0, tree.intervals.len());
        tree
    }

    fn build(&mut self, lo: usize, hi: usize) -> f64 {
        if lo >= hi {
            return f64::NEG_INFINITY;
        }
        let mid = lo + (hi - lo) / 2;
        let left = self.build(lo, mid);
        let right = self.build(mid + 1, hi);
        let max_end = self.intervals[mid].end.max(left).max(right);
        self.max_end[mid] = max_end;
        max_end
    }

    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    /// Intervals in `start` order.
    pub fn intervals(&self) -> &[Interval] {
        &self.intervals
    }

    /// Slots of the intervals ending after `low` whose start satisfies `high`.
    fn search(&self, low: f64, high: StartBound) -> Vec<usize> {
        let mut found = Vec::new();
        self.search_node(0, self.intervals.len(), low, high, &mut found);
        found
    }

    fn search_node(&self, lo: usize, hi: usize, low: f64, high: StartBound, found: &mut Vec<usize>) {
        if lo >= hi {
            return;
        }
        let mid = lo + (hi - lo) / 2;
        if self.max_end[mid] <= low {
            return;
        }
        self.search_node(lo, mid, low, high, found);

        let interval = &self.intervals[mid];
        // Everything from `mid` onwards starts at least as late.
        if !high.admits(interval.start) {
            return;
        }
        if interval.end > low {
            found.push(interval.slot);
        }
        self.search_node(mid + 1, hi, low, high, found);
    }

    /// Intervals containing `point`.
    pub fn at(&self, point: f64) -> Vec<usize> {
        self.search(point, StartBound::AtMost(point))
    }

    /// Intervals overlapping `[begin, end)`.
    pub fn overlapping(&self, begin: f64, end: f64) -> Vec<usize> {
        self.search(begin, StartBound::Below(end))
    }

    /// Intervals ending after `begin`.
    pub fn ending_after(&self, begin: f64) -> Vec<usize> {
        self.search(begin, StartBound::Unbounded)
    }

    /// Intervals starting before `end`.
    pub fn starting_before(&self, end: f64) -> Vec<usize> {
        self.search(f64::NEG_INFINITY, StartBound::Below(end))
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IntervalTreeMapping {
    column: String,
    tree: IntervalTree,
    tokens: TokenTable,
}

impl IntervalTreeMapping {
    /// `ranges[i]` is the closed generalization whose tokens are
    /// `tokens.entries[i]`.
    pub fn new(column: &str, ranges: Vec<(f64, f64)>, tokens: TokenTable) -> Self {
        let TokenTable {
            entries,
            salt,
            key,
        } = tokens;
        let mut pairs: Vec<_> = ranges.into_iter().zip(entries).collect();
        pairs.sort_by(|(a, _), (b, _)| a.0.total_cmp(&b.0).then(a.1.total_cmp(&b.1)));
        let (ranges, entries): (Vec<(f64, f64)>, Vec<_>) = pairs.into_iter().unzip();

        let intervals = ranges
            .iter()
            .enumerate()
            .map(|(slot, &(start, end))| Interval {
                start,
                end: end + DELTA,
                slot,
            })
            .collect();

        Self {
            column: column.to_string(),
            tree: IntervalTree::new(intervals),
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

    pub fn eq(&self, value: &Value) -> Result<BTreeSet<Token>> {
        self.tokens.union(self.tree.at(self.number(value)?))
    }

    pub fn between(&self, low: &Value, high: &Value) -> Result<BTreeSet<Token>> {
        let (low, high) = (self.number(low)?, self.number(high)?);
        self.tokens.union(self.tree.overlapping(low, high + DELTA))
    }

    pub fn ge(&self, value: &Value) -> Result<BTreeSet<Token>> {
        self.tokens.union(self.tree.ending_after(self.number(value)?))
    }

    pub fn gt(&self, value: &Value) -> Result<BTreeSet<Token>> {
        self.tokens.union(self.tree.ending_after(self.number(value)? + DELTA))
    }

    pub fn le(&self, value: &Value) -> Result<BTreeSet<Token>> {
        self.tokens.union(self.tree.starting_before(self.number(value)? + DELTA))
    }

    pub fn lt(&self, value: &Value) -> Result<BTreeSet<Token>> {
        self.tokens.union(self.tree.starting_before(self.number(value)?))
    }

    /// Drops only the generalization that is exactly the point `value`.
    pub fn neq(&self, value: &Value) -> Result<BTreeSet<Token>> {
        let mut tokens = self.lt(value)?;
        tokens.extend(self.gt(value)?);
        Ok(tokens)
    }

    pub fn generalizations(&self) -> Vec<String> {
        self.tree
            .intervals()
            .iter()
            .map(|interval| render_range(interval.start, interval.end - DELTA))
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

    fn mapping(ranges: Vec<(f64, f64)>) -> IntervalTreeMapping {
        let entries = (0..ranges.len() as u64)
            .map(|t| TokenEntry::Static(vec![Token::Int(t)]))
            .collect();
        IntervalTreeMapping::new("AGE", ranges, TokenTable::new(entries, [0; 16], None))
    }

    fn ints(tokens: &[u64]) -> BTreeSet<Token> {
        tokens.iter().map(|&t| Token::Int(t)).collect()
    }

    #[test]
    fn tree_queries_match_a_linear_scan() {
        let intervals: Vec<Interval> = [(5.0, 9.0), (0.0, 30.0), (12.0, 13.0), (3.0, 4.0), (20.0, 40.0), (7.0, 8.0)]
            .iter()
            .enumerate()
            .map(|(slot, &(start, end))| Interval { start, end, slot })
            .collect();
        let tree = IntervalTree::new(intervals.clone());

        let scan = |pred: &dyn Fn(&Interval) -> bool| -> BTreeSet<usize> {
            intervals.iter().filter(|i| pred(i)).map(|i| i.slot).collect()
        };
        let set = |v: Vec<usize>| -> BTreeSet<usize> { v.into_iter().collect() };

        for p in [-1.0, 0.0, 3.5, 7.0, 12.5, 25.0, 40.0] {
            assert_eq!(set(tree.at(p)), scan(&|i: &Interval| i.start <= p && p < i.end));
            assert_eq!(set(tree.ending_after(p)), scan(&|i: &Interval| i.end > p));
            assert_eq!(set(tree.starting_before(p)), scan(&|i: &Interval| i.start < p));
            assert_eq!(
                set(tree.overlapping(p, p + 6.0)),
                scan(&|i: &Interval| i.start < p + 6.0 && i.end > p)
            );
        }
    }

    #[test]
    fn closed_generalizations() {
        // slots after sorting: [0-9] -> 0, [10-19] -> 1, [75-79] -> 2
        let ages = mapping(vec![(0.0, 9.0), (10.0, 19.0), (75.0, 79.0)]);
        assert_eq!(ages.eq(&9.0.into()).unwrap(), ints(&[0]));
        assert_eq!(ages.eq(&10.0.into()).unwrap(), ints(&[1]));
        assert_eq!(ages.le(&18.0.into()).unwrap(), ints(&[0, 1]));
        assert_eq!(ages.lt(&10.0.into()).unwrap(), ints(&[0]));
        assert_eq!(ages.ge(&19.0.into()).unwrap(), ints(&[1, 2]));
        assert_eq!(ages.gt(&19.0.into()).unwrap(), ints(&[2]));
        assert_eq!(
            ages.between(&75.0.into(), &79.0.into()).unwrap(),
            ints(&[2])
        );
        assert_eq!(ages.generalizations(), vec!["[0-9]", "[10-19]", "[75-79]"]);
    }

    #[test]
    fn neq_excludes_the_matching_point() {
        let ages = mapping(vec![(0.0, 9.0), (10.0, 10.0), (11.0, 20.0)]);
        assert_eq!(ages.neq(&10.0.into()).unwrap(), ints(&[0, 2]));
        assert_eq!(ages.neq(&5.0.into()).unwrap(), ints(&[0, 1, 2]));
        assert_eq!(ages.generalizations()[1], "10");
    }

    #[test]
    fn empty_tree() {
        let tree = IntervalTree::new(Vec::new());
        assert!(tree.is_empty());
        assert!(tree.at(1.0).is_empty());
    }
}
