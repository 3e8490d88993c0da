//! Row source for mapping creation.
//!
//! An anonymized dataset is a CSV file whose header names the columns. Every
//! row carries the identifier of the group it belongs to in the `GID` column;
//! rows of the same group share the same generalization on every indexed
//! column, so mapping creation only needs one row per group.

use std::collections::HashSet;
use std::path::Path;

use crate::error::{ConfigurationError, Error, MappingError, Result};

/// Column holding the group identifier.
pub const GID_COLUMN: &str = "GID";
/// Column holding the original row position, never indexed.
pub const INDEX_COLUMN: &str = "INDEX";

/// An in-memory anonymized table. Every cell is kept as the string found in
/// the CSV file: generalizations are parsed by the mapping that indexes them.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Dataset {
    pub headers: Vec<String>,
    pub records: Vec<Vec<String>>,
}

impl Dataset {
    pub fn new(headers: Vec<String>, records: Vec<Vec<String>>) -> Self {
        Self { headers, records }
    }

    /// Loads a CSV file with a header line.
    pub fn from_csv(path: &Path) -> Result<Self> {
        let reader = csv::Reader::from_path(path)?;
        Self::from_reader(reader)
    }

    pub fn from_reader<R: std::io::Read>(mut reader: csv::Reader<R>) -> Result<Self> {
        let headers = reader.headers()?.iter().map(String::from).collect();
        let mut records = Vec::new();
        for record in reader.records() {
            records.push(record?.iter().map(String::from).collect());
        }
        Ok(Self { headers, records })
    }

    /// Given a column identifier, returns its position in the header.
    pub fn index_of(&self, column: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == column)
    }

    /// Keeps the first row of every group, in file order.
    pub fn drop_duplicate_groups(&mut self) -> Result<()> {
        let gid = self
            .index_of(GID_COLUMN)
            .ok_or_else(|| ConfigurationError::MissingGroupColumn(GID_COLUMN.into()))?;
        let mut seen = HashSet::new();
        self.records.retain(|record| seen.insert(record[gid].clone()));
        Ok(())
    }

    /// Columns that can be indexed: everything but `INDEX` and `GID`.
    pub fn indexable_columns(&self) -> Vec<String> {
        self.headers
            .iter()
            .filter(|h| h.as_str() != GID_COLUMN && h.as_str() != INDEX_COLUMN)
            .cloned()
            .collect()
    }

    /// Cells of the given column, one per record.
    pub fn column(&self, column: &str) -> Result<Vec<&str>> {
        let index = self
            .index_of(column)
            .ok_or_else(|| ConfigurationError::UnknownColumn(column.to_string()))?;
        Ok(self.records.iter().map(|r| r[index].as_str()).collect())
    }

    /// Group identifiers, one per record.
    pub fn group_ids(&self) -> Result<Vec<u64>> {
        self.column(GID_COLUMN)
            .map_err(|_| ConfigurationError::MissingGroupColumn(GID_COLUMN.into()))?
            .into_iter()
            .map(|gid| {
                gid.trim().parse::<u64>().map_err(|_| {
                    Error::from(MappingError::InvalidGeneralization {
                        column: GID_COLUMN.into(),
                        value: gid.to_string(),
                        expected: "group id".into(),
                    })
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Dataset {
        let csv = "INDEX,GID,AGE,CITY\n\
                   0,1,[0-9],\"{Milan,Rome}\"\n\
                   1,1,[0-9],\"{Milan,Rome}\"\n\
                   2,2,[10-19],Bergamo\n";
        Dataset::from_reader(csv::Reader::from_reader(csv.as_bytes())).unwrap()
    }

    #[test]
    fn read_csv_headers_and_records() {
        let dataset = sample();
        assert_eq!(dataset.headers, vec!["INDEX", "GID", "AGE", "CITY"]);
        assert_eq!(dataset.records.len(), 3);
        assert_eq!(dataset.records[0][3], "{Milan,Rome}");
        assert_eq!(dataset.indexable_columns(), vec!["AGE", "CITY"]);
    }

    #[test]
    fn one_row_per_group() {
        let mut dataset = sample();
        dataset.drop_duplicate_groups().unwrap();
        assert_eq!(dataset.records.len(), 2);
        assert_eq!(dataset.group_ids().unwrap(), vec![1, 2]);
        assert_eq!(dataset.column("AGE").unwrap(), vec!["[0-9]", "[10-19]"]);
    }

    #[test]
    fn missing_group_column() {
        let mut dataset = Dataset::new(vec!["AGE".into()], vec![vec!["1".into()]]);
        assert!(dataset.drop_duplicate_groups().is_err());
        assert!(dataset.group_ids().is_err());
    }
}
