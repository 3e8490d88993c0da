//! Per-column mapping configuration.
//!
//! A configuration file is a JSON object keyed by column name:
//!
//! ```json
//! { "AGE": { "type": "range", "runtime": true }, "OCC": { "type": "bitmap" } }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs::read_to_string;
use std::path::Path;
use std::str::FromStr;

use crate::error::{ConfigurationError, Result};

/// The five kinds of column mapping.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MappingType {
    Range,
    IntervalTree,
    Bitmap,
    Roaring,
    Set,
}

impl MappingType {
    pub const ALL: [MappingType; 5] = [
        MappingType::Range,
        MappingType::IntervalTree,
        MappingType::Bitmap,
        MappingType::Roaring,
        MappingType::Set,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Range => "range",
            Self::IntervalTree => "interval-tree",
            Self::Bitmap => "bitmap",
            Self::Roaring => "roaring",
            Self::Set => "set",
        }
    }

    /// Numeric mappings order their generalizations, categorical ones do not.
    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Range | Self::IntervalTree)
    }
}

impl fmt::Display for MappingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MappingType {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ConfigurationError::UnknownMappingType(s.to_string()))
    }
}

/// How the tokens of a column are produced.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenMode {
    /// Random permutation of `0..n`.
    Static,
    /// The generalization strings themselves.
    Plain,
    /// Keyed hash of the generalization string.
    Hash,
    /// The ids of the groups sharing the generalization.
    GroupId,
    /// `(seed, count)` pairs expanded on demand.
    Runtime,
}

impl TokenMode {
    pub fn needs_key(&self) -> bool {
        matches!(self, Self::Hash | Self::Runtime)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ColumnConfig {
    #[serde(rename = "type")]
    pub mapping_type: MappingType,
    #[serde(default)]
    pub plain: bool,
    #[serde(default)]
    pub hash: bool,
    #[serde(default)]
    pub gid: bool,
    #[serde(default)]
    pub runtime: bool,
}

impl ColumnConfig {
    pub fn new(mapping_type: MappingType) -> Self {
        Self {
            mapping_type,
            plain: false,
            hash: false,
            gid: false,
            runtime: false,
        }
    }

    /// Resolves the modifier flags into a single [`TokenMode`].
    pub fn token_mode(&self, column: &str) -> std::result::Result<TokenMode, ConfigurationError> {
        let flags = [self.plain, self.hash, self.gid, self.runtime];
        match flags.iter().filter(|&&f| f).count() {
            0 => Ok(TokenMode::Static),
            1 if self.plain => Ok(TokenMode::Plain),
            1 if self.hash => Ok(TokenMode::Hash),
            1 if self.gid => Ok(TokenMode::GroupId),
            1 => Ok(TokenMode::Runtime),
            _ => Err(ConfigurationError::ConflictingFlags(column.to_string())),
        }
    }
}

/// Column name to configuration, iterated in column-name order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MappingConfig(pub BTreeMap<String, ColumnConfig>);

impl MappingConfig {
    /// Applies the same configuration to every column.
    pub fn uniform<I, S>(columns: I, config: ColumnConfig) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(
            columns
                .into_iter()
                .map(|c| (c.into(), config.clone()))
                .collect(),
        )
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let raw: Vec<(String, ColumnConfig)> = serde_json::from_str::<RawConfig>(json)?.0;
        let mut columns = BTreeMap::new();
        for (column, config) in raw {
            if columns.contains_key(&column) {
                return Err(ConfigurationError::DuplicateColumn(column).into());
            }
            columns.insert(column, config);
        }
        Ok(Self(columns))
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        Self::from_json(&read_to_string(path)?)
    }

    /// Checks flags and columns before any mapping work begins.
    pub fn validate(&self, available: &[String], key: Option<&[u8]>) -> Result<()> {
        for (column, config) in &self.0 {
            if !available.iter().any(|c| c == column) {
                return Err(ConfigurationError::UnknownColumn(column.clone()).into());
            }
            if config.token_mode(column)?.needs_key() && key.is_none() {
                return Err(ConfigurationError::MissingKey(column.clone()).into());
            }
        }
        Ok(())
    }

    pub fn columns(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }
}

/// Keeps duplicate keys visible: `serde_json` would silently keep the last one
/// when deserializing straight into a map.
struct RawConfig(Vec<(String, ColumnConfig)>);

impl<'de> Deserialize<'de> for RawConfig {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct Entries;

        impl<'de> serde::de::Visitor<'de> for Entries {
            type Value = RawConfig;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map from column names to column configurations")
            }

            fn visit_map<A>(self, mut map: A) -> std::result::Result<RawConfig, A::Error>
            where
                A: serde::de::MapAccess<'de>,
            {
                let mut entries = Vec::new();
                while let Some(entry) = map.next_entry::<String, ColumnConfig>()? {
                    entries.push(entry);
                }
                Ok(RawConfig(entries))
            }
        }

        deserializer.deserialize_map(Entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn parse_mapping_types() {
        for t in MappingType::ALL {
            assert_eq!(MappingType::from_str(t.as_str()), Ok(t));
        }
        assert_eq!(
            MappingType::from_str("btree"),
            Err(ConfigurationError::UnknownMappingType("btree".into()))
        );
    }

    #[test]
    fn json_configuration() {
        let config = MappingConfig::from_json(
            r#"{"AGE": {"type": "interval-tree", "runtime": true}, "OCC": {"type": "roaring"}}"#,
        )
        .unwrap();
        let age = &config.0["AGE"];
        assert_eq!(age.mapping_type, MappingType::IntervalTree);
        assert_eq!(age.token_mode("AGE"), Ok(TokenMode::Runtime));
        assert_eq!(config.0["OCC"].token_mode("OCC"), Ok(TokenMode::Static));
    }

    #[test]
    fn reject_duplicate_columns() {
        let result = MappingConfig::from_json(r#"{"AGE": {"type": "range"}, "AGE": {"type": "set"}}"#);
        assert!(matches!(
            result,
            Err(Error::Configuration(ConfigurationError::DuplicateColumn(c))) if c == "AGE"
        ));
    }

    #[test]
    fn reject_conflicting_flags() {
        let mut config = ColumnConfig::new(MappingType::Range);
        config.gid = true;
        config.hash = true;
        assert_eq!(
            config.token_mode("AGE"),
            Err(ConfigurationError::ConflictingFlags("AGE".into()))
        );
    }

    #[test]
    fn validate_columns_and_keys() {
        let mut runtime = ColumnConfig::new(MappingType::Range);
        runtime.runtime = true;
        let config = MappingConfig::uniform(["AGE"], runtime);
        let available = vec!["AGE".to_string()];

        assert!(matches!(
            config.validate(&available, None),
            Err(Error::Configuration(ConfigurationError::MissingKey(_)))
        ));
        assert!(config.validate(&available, Some(&[0u8; 32])).is_ok());
        assert!(matches!(
            config.validate(&["OCC".to_string()], Some(&[0u8; 32])),
            Err(Error::Configuration(ConfigurationError::UnknownColumn(_)))
        ));
    }
}
