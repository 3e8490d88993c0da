//! The per-column mappings of a whole table, and their at-rest format.

use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use super::{ColumnMapping, MultidimensionalMapping, Token, Value};
use crate::config::MappingType;
use crate::crypto;
use crate::error::{ConfigurationError, MappingError, Result};

/// Column mappings plus the schema of the table they index. Columns of the
/// schema without a mapping are not indexed.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HeterogeneousMapping {
    schema: Vec<String>,
    mappings: BTreeMap<String, ColumnMapping>,
    is_gids: BTreeMap<String, bool>,
}

impl HeterogeneousMapping {
    pub fn new(
        schema: Vec<String>,
        mappings: BTreeMap<String, ColumnMapping>,
        mut is_gids: BTreeMap<String, bool>,
    ) -> Result<Self> {
        if let Some(column) = mappings.keys().find(|c| !schema.contains(c)) {
            return Err(ConfigurationError::UnknownColumn(column.clone()).into());
        }
        is_gids.retain(|column, _| mappings.contains_key(column));
        for column in mappings.keys() {
            is_gids.entry(column.clone()).or_insert(false);
        }
        Ok(Self {
            schema,
            mappings,
            is_gids,
        })
    }

    pub fn schema(&self) -> &[String] {
        &self.schema
    }

    /// Mapped columns, in name order.
    pub fn columns(&self) -> impl Iterator<Item = &String> {
        self.mappings.keys()
    }

    pub fn column(&self, column: &str) -> std::result::Result<&ColumnMapping, MappingError> {
        self.mappings
            .get(column)
            .ok_or_else(|| MappingError::UnknownColumn(column.to_string()))
    }

    pub fn mapping_type(&self, column: &str) -> Result<MappingType> {
        Ok(self.column(column)?.mapping_type())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Decodes a mapping, checking the invariants [`HeterogeneousMapping::new`]
    /// establishes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mapping: Self = bincode::deserialize(bytes)?;
        mapping.check()?;
        Ok(mapping)
    }

    fn check(&self) -> std::result::Result<(), ConfigurationError> {
        let inconsistent = |column: &str, reason: &str| ConfigurationError::InconsistentMapping {
            column: column.to_string(),
            reason: reason.to_string(),
        };
        for (column, mapping) in &self.mappings {
            if !self.schema.contains(column) {
                return Err(inconsistent(column, "not in the schema"));
            }
            if mapping.column() != column.as_str() {
                return Err(inconsistent(column, "stored under another column name"));
            }
            if !self.is_gids.contains_key(column) {
                return Err(inconsistent(column, "no group id flag"));
            }
        }
        match self.is_gids.keys().find(|c| !self.mappings.contains_key(*c)) {
            Some(column) => Err(inconsistent(column, "group id flag without a mapping")),
            None => Ok(()),
        }
    }

    /// Writes the mapping to `path`, sealed and base64 armored when a key is
    /// given.
    pub fn save(&self, path: &Path, key: Option<&[u8]>) -> Result<()> {
        let bytes = self.to_bytes()?;
        match key {
            Some(key) => fs::write(path, crypto::seal(key, &bytes)?)?,
            None => {
                let keyed: Vec<&String> = self
                    .mappings
                    .iter()
                    .filter(|(_, m)| m.token_table().key.is_some())
                    .map(|(c, _)| c)
                    .collect();
                if !keyed.is_empty() {
                    warn!(
                        "Saving an unencrypted mapping that stores the token key of {keyed:?}"
                    );
                }
                fs::write(path, bytes)?;
            }
        }
        info!(
            "Saved mapping of {} columns to {}{}",
            self.mappings.len(),
            path.display(),
            if key.is_some() { " (encrypted)" } else { "" }
        );
        Ok(())
    }

    /// Reads a mapping written by [`HeterogeneousMapping::save`] with the same
    /// key. A wrong key fails with [`crate::error::CryptoError::DecryptionFailed`].
    pub fn load(path: &Path, key: Option<&[u8]>) -> Result<Self> {
        let mapping = match key {
            Some(key) => {
                let armored = fs::read_to_string(path)?;
                Self::from_bytes(&crypto::open(key, &armored)?)?
            }
            None => Self::from_bytes(&fs::read(path)?)?,
        };
        info!(
            "Loaded mapping of {} columns from {}",
            mapping.mappings.len(),
            path.display()
        );
        Ok(mapping)
    }
}

impl MultidimensionalMapping for HeterogeneousMapping {
    fn eq(&self, column: &str, value: &Value) -> Result<BTreeSet<Token>> {
        self.column(column)?.eq(value)
    }

    fn neq(&self, column: &str, value: &Value) -> Result<BTreeSet<Token>> {
        self.column(column)?.neq(value)
    }

    fn lt(&self, column: &str, value: &Value) -> Result<BTreeSet<Token>> {
        self.column(column)?.lt(value)
    }

    fn le(&self, column: &str, value: &Value) -> Result<BTreeSet<Token>> {
        self.column(column)?.le(value)
    }

    fn gt(&self, column: &str, value: &Value) -> Result<BTreeSet<Token>> {
        self.column(column)?.gt(value)
    }

    fn ge(&self, column: &str, value: &Value) -> Result<BTreeSet<Token>> {
        self.column(column)?.ge(value)
    }

    fn between(&self, column: &str, low: &Value, high: &Value) -> Result<BTreeSet<Token>> {
        self.column(column)?.between(low, high)
    }

    fn in_values(&self, column: &str, values: &[Value]) -> Result<BTreeSet<Token>> {
        self.column(column)?.in_values(values)
    }

    fn is_gid(&self, column: &str) -> Result<bool> {
        Ok(*self
            .is_gids
            .get(column)
            .ok_or_else(|| MappingError::UnknownColumn(column.to_string()))?)
    }

    fn generalizations(&self, column: &str) -> Result<Vec<String>> {
        Ok(self.column(column)?.generalizations())
    }

    fn tokens(&self, column: &str) -> Result<Vec<Vec<Token>>> {
        self.column(column)?.tokens()
    }
}
