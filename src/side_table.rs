//! Side table assigning, to every group, one token per indexed column.
//!
//! A generalization may own several tokens (runtime tokens hand out one per
//! group). Groups sharing the generalization take its tokens round-robin
//! through a per-column cursor vector, one cursor per generalization.

use log::{info, warn};
use rayon::prelude::*;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Mutex;

use crate::config::MappingType;
use crate::dataset::Dataset;
use crate::error::{ConfigurationError, MappingError, Result};
use crate::mapping::creation::canonical_generalization;
use crate::mapping::derivation::{collision_probability, TOKEN_BITS};
use crate::mapping::{HeterogeneousMapping, MultidimensionalMapping, Token};
use crate::rewriting::GROUP_ID_COLUMN;

/// Next token to hand out for every generalization of one column.
#[derive(Debug)]
pub struct TokenCursors {
    cursors: Mutex<Vec<u32>>,
}

impl TokenCursors {
    pub fn new(generalizations: usize) -> Self {
        Self {
            cursors: Mutex::new(vec![0; generalizations]),
        }
    }

    /// Returns the current cursor of `slot` and moves it forward.
    pub fn next(&self, slot: usize) -> u32 {
        let mut cursors = self.cursors.lock().unwrap_or_else(|e| e.into_inner());
        let current = cursors[slot];
        cursors[slot] = current.wrapping_add(1);
        current
    }

    pub fn snapshot(&self) -> Vec<u32> {
        self.cursors.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

/// Tokens and cursors of one indexed column.
struct ColumnTokens {
    column: String,
    mapping_type: MappingType,
    slots: HashMap<String, usize>,
    tokens: Vec<Vec<Token>>,
    cursors: TokenCursors,
}

impl ColumnTokens {
    fn new(mapping: &HeterogeneousMapping, column: &str) -> Result<Self> {
        let generalizations = mapping.generalizations(column)?;
        let tokens = mapping.tokens(column)?;

        let collisions = mapping.column(column)?.token_table().collisions()?;
        for (token, count) in &collisions {
            warn!("Token {token} of {column} repeats {count} times");
        }
        let total: usize = tokens.iter().map(Vec::len).sum();
        if !collisions.is_empty() {
            info!(
                "{column}: {} colliding tokens out of {total} (expected probability {:.3e})",
                collisions.len(),
                collision_probability(total, TOKEN_BITS)
            );
        }

        let slots = generalizations
            .into_iter()
            .enumerate()
            .map(|(slot, generalization)| (generalization, slot))
            .collect();
        Ok(Self {
            column: column.to_string(),
            mapping_type: mapping.mapping_type(column)?,
            cursors: TokenCursors::new(tokens.len()),
            slots,
            tokens,
        })
    }

    fn assign(&self, cell: &str) -> Result<Token> {
        let generalization = canonical_generalization(self.mapping_type, &self.column, cell)?;
        let slot = *self.slots.get(&generalization).ok_or_else(|| {
            MappingError::UnknownGeneralization {
                column: self.column.clone(),
                value: cell.to_string(),
            }
        })?;
        let tokens = &self.tokens[slot];
        if tokens.is_empty() {
            return Err(MappingError::UnknownGeneralization {
                column: self.column.clone(),
                value: cell.to_string(),
            }
            .into());
        }
        let cursor = self.cursors.next(slot) as usize;
        Ok(tokens[cursor % tokens.len()].clone())
    }

    /// Every generalization handed out a whole number of token rounds.
    fn check_cursors(&self) -> Result<()> {
        for (slot, cursor) in self.cursors.snapshot().into_iter().enumerate() {
            let count = self.tokens[slot].len();
            if count == 0 || cursor as usize % count != 0 {
                return Err(MappingError::MisalignedCursor {
                    column: self.column.clone(),
                    cursor,
                    count,
                }
                .into());
            }
        }
        Ok(())
    }
}

/// One row per group: its id and the token of every indexed column.
#[derive(Clone, Debug, PartialEq)]
pub struct GroupTokenTable {
    pub columns: Vec<String>,
    pub rows: Vec<(u64, Vec<Token>)>,
}

impl GroupTokenTable {
    pub fn write_csv(&self, path: &Path) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        writer.write_record(std::iter::once(GROUP_ID_COLUMN).chain(self.columns.iter().map(String::as_str)))?;
        for (gid, tokens) in &self.rows {
            let mut record = vec![gid.to_string()];
            record.extend(tokens.iter().map(Token::to_string));
            writer.write_record(&record)?;
        }
        writer.flush()?;
        info!("Wrote {} group tokens to {}", self.rows.len(), path.display());
        Ok(())
    }
}

/// Builds the side table of every mapped column whose tokens are not already
/// group ids, from the first row of each group of `dataset`.
pub fn build_group_token_table(
    mapping: &HeterogeneousMapping,
    dataset: &Dataset,
) -> Result<GroupTokenTable> {
    let mut columns = Vec::new();
    for column in mapping.columns() {
        if !mapping.is_gid(column)? {
            columns.push(column.clone());
        }
    }
    let tables = columns
        .par_iter()
        .map(|column| ColumnTokens::new(mapping, column))
        .collect::<Result<Vec<_>>>()?;

    let positions = columns
        .iter()
        .map(|column| {
            dataset
                .index_of(column)
                .ok_or_else(|| ConfigurationError::UnknownColumn(column.clone()))
        })
        .collect::<std::result::Result<Vec<_>, _>>()?;

    // First row of every group, by group id.
    let group_ids = dataset.group_ids()?;
    let mut groups: BTreeMap<u64, usize> = BTreeMap::new();
    for (row, gid) in group_ids.into_iter().enumerate() {
        groups.entry(gid).or_insert(row);
    }
    let groups: Vec<(u64, usize)> = groups.into_iter().collect();

    let rows = groups
        .par_iter()
        .map(|&(group, row)| {
            let record = &dataset.records[row];
            let tokens = tables
                .iter()
                .zip(&positions)
                .map(|(table, &position)| table.assign(&record[position]))
                .collect::<Result<Vec<_>>>()?;
            Ok((group, tokens))
        })
        .collect::<Result<Vec<_>>>()?;

    for table in &tables {
        table.check_cursors()?;
    }
    info!(
        "Assigned tokens of {} columns to {} groups",
        columns.len(),
        rows.len()
    );
    Ok(GroupTokenTable { columns, rows })
}
