//! Builds column mappings from an anonymized dataset.
//!
//! For every configured column:
//! 1. collect the distinct generalizations (first appearance order) with the
//!    number of groups sharing each of them,
//! 2. parse them as `[start-end]` ranges or `{a,b}` category sets,
//! 3. assign tokens according to the column's [`TokenMode`],
//! 4. build the index structure of the requested [`MappingType`].

use base64::{engine::general_purpose::STANDARD, Engine};
use log::info;
use rand::seq::SliceRandom;
use rand::{thread_rng, Rng};
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use super::categorical::CategoricalMapping;
use super::derivation::SALT_SIZE;
use super::interval_tree::IntervalTreeMapping;
use super::range::RangeMapping;
use super::tokens::{TokenEntry, TokenTable};
use super::{render_range, ColumnMapping, HeterogeneousMapping, Token};
use crate::config::{ColumnConfig, MappingConfig, MappingType, TokenMode};
use crate::dataset::Dataset;
use crate::error::{ConfigurationError, CryptoError, MappingError, Result};

/// Width of the seeds handed out to runtime tokens.
pub const RUNTIME_TOKEN_BITS: u32 = 32;

const HASH_CONTEXT: &str = "secure_index generalization tokens";

pub fn is_range(value: &str) -> bool {
    value.starts_with('[') && (value.ends_with(']') || value.ends_with(')'))
}

pub fn is_set(value: &str) -> bool {
    value.starts_with('{') && value.ends_with('}')
}

/// Splits `[start-end]` into its extremes. A scalar is the range `[v-v]`.
///
/// The separator is the first `-` that does not open the string, so negative
/// extremes such as `[-5--1]` are read as `(-5, -1)`.
pub fn extract_extremes(value: &str) -> Option<(&str, &str)> {
    if !is_range(value) {
        return Some((value, value));
    }
    let inner = &value[1..value.len() - 1];
    let separator = inner
        .char_indices()
        .skip(1)
        .find(|&(_, c)| c == '-')
        .map(|(i, _)| i)?;
    Some((&inner[..separator], &inner[separator + 1..]))
}

pub fn parse_range(column: &str, value: &str) -> std::result::Result<(f64, f64), MappingError> {
    let invalid = || MappingError::InvalidGeneralization {
        column: column.to_string(),
        value: value.to_string(),
        expected: "numeric range".into(),
    };
    let (start, end) = extract_extremes(value).ok_or_else(invalid)?;
    let start = start.trim().parse::<f64>().map_err(|_| invalid())?;
    let end = end.trim().parse::<f64>().map_err(|_| invalid())?;
    Ok((start, end))
}

/// Categories of a generalization, sorted and distinct.
pub fn items(value: &str) -> Vec<String> {
    if is_set(value) {
        value[1..value.len() - 1]
            .split(',')
            .map(String::from)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    } else {
        vec![value.to_string()]
    }
}

/// The form a cell takes in [`ColumnMapping::generalizations`].
pub fn canonical_generalization(
    mapping_type: MappingType,
    column: &str,
    value: &str,
) -> std::result::Result<String, MappingError> {
    if mapping_type.is_numeric() {
        let (start, end) = parse_range(column, value)?;
        return Ok(render_range(start, end));
    }
    Ok(match items(value).as_slice() {
        [single] => single.clone(),
        many => format!("{{{}}}", many.join(",")),
    })
}

/// Distinct generalizations of a column and the groups sharing them.
struct Generalizations<'a> {
    values: Vec<&'a str>,
    frequencies: Vec<u32>,
    groups: Vec<BTreeSet<u64>>,
}

impl<'a> Generalizations<'a> {
    fn collect(cells: &[&'a str], group_ids: Option<&[u64]>) -> Self {
        let mut position: HashMap<&str, usize> = HashMap::new();
        let mut values = Vec::new();
        let mut frequencies = Vec::new();
        let mut groups: Vec<BTreeSet<u64>> = Vec::new();

        for (row, &cell) in cells.iter().enumerate() {
            let slot = *position.entry(cell).or_insert_with(|| {
                values.push(cell);
                frequencies.push(0);
                groups.push(BTreeSet::new());
                values.len() - 1
            });
            frequencies[slot] += 1;
            if let Some(gids) = group_ids {
                groups[slot].insert(gids[row]);
            }
        }

        Self {
            values,
            frequencies,
            groups,
        }
    }

    fn len(&self) -> usize {
        self.values.len()
    }
}

fn required_key<'k>(column: &str, key: Option<&'k [u8]>) -> Result<&'k [u8]> {
    Ok(key.ok_or_else(|| ConfigurationError::MissingKey(column.to_string()))?)
}

/// Number of bits needed to count `n` distinct values.
fn counter_bits(n: usize) -> u32 {
    if n <= 1 {
        0
    } else {
        usize::BITS - (n - 1).leading_zeros()
    }
}

/// Assigns the token entries of every generalization, in slot order.
fn tokenize(
    column: &str,
    mode: TokenMode,
    generalizations: &Generalizations,
    key: Option<&[u8]>,
    salt: &[u8; SALT_SIZE],
) -> Result<Vec<TokenEntry>> {
    let mut rng = thread_rng();
    let n = generalizations.len();

    let entries: Vec<TokenEntry> = match mode {
        TokenMode::Plain => generalizations
            .values
            .iter()
            .map(|&value| TokenEntry::Static(vec![Token::Text(value.to_string())]))
            .collect(),

        TokenMode::GroupId => generalizations
            .groups
            .iter()
            .map(|gids| TokenEntry::Static(gids.iter().copied().map(Token::Int).collect()))
            .collect(),

        TokenMode::Hash => {
            let hash_key = blake3::derive_key(HASH_CONTEXT, required_key(column, key)?);
            generalizations
                .values
                .iter()
                .map(|value| {
                    let digest = blake3::Hasher::new_keyed(&hash_key)
                        .update(salt)
                        .update(value.as_bytes())
                        .finalize();
                    TokenEntry::Static(vec![Token::Text(STANDARD.encode(digest.as_bytes()))])
                })
                .collect()
        }

        TokenMode::Runtime => {
            let key = required_key(column, key)?;
            if key.len() != 16 && key.len() != 32 {
                return Err(CryptoError::InvalidKeyLength(key.len()).into());
            }
            // The low bits count the generalizations, so seeds never repeat.
            let counter = counter_bits(n);
            let limit = (1u64 << (RUNTIME_TOKEN_BITS - counter)) - 1;
            let mut seeds: Vec<u64> = (0..n as u64)
                .map(|i| (rng.gen_range(0..=limit) << counter) + i)
                .collect();
            seeds.shuffle(&mut rng);
            seeds
                .into_iter()
                .zip(&generalizations.frequencies)
                .map(|(seed, &count)| TokenEntry::Runtime { seed, count })
                .collect()
        }

        TokenMode::Static => {
            let mut tokens: Vec<u64> = (0..n as u64).collect();
            tokens.shuffle(&mut rng);
            tokens
                .into_iter()
                .map(|t| TokenEntry::Static(vec![Token::Int(t)]))
                .collect()
        }
    };
    Ok(entries)
}

/// Maps one column of `dataset`.
pub fn create_column_mapping(
    dataset: &Dataset,
    column: &str,
    config: &ColumnConfig,
    key: Option<&[u8]>,
) -> Result<ColumnMapping> {
    let mode = config.token_mode(column)?;
    let cells = dataset.column(column)?;
    let group_ids = match mode {
        TokenMode::GroupId => Some(dataset.group_ids()?),
        _ => None,
    };
    let generalizations = Generalizations::collect(&cells, group_ids.as_deref());

    let salt: [u8; SALT_SIZE] = thread_rng().gen();
    let entries = tokenize(column, mode, &generalizations, key, &salt)?;
    let kept_key = if mode.needs_key() {
        key.map(<[u8]>::to_vec)
    } else {
        None
    };
    let tokens = TokenTable::new(entries, salt, kept_key);

    info!(
        "Map {column} using {} ({} generalizations, {mode:?} tokens)",
        config.mapping_type,
        generalizations.len()
    );

    let mapping = match config.mapping_type {
        MappingType::Range | MappingType::IntervalTree => {
            let ranges = generalizations
                .values
                .iter()
                .map(|value| parse_range(column, value))
                .collect::<std::result::Result<Vec<_>, _>>()?;
            if config.mapping_type == MappingType::Range {
                ColumnMapping::Range(RangeMapping::new(column, ranges, tokens))
            } else {
                ColumnMapping::IntervalTree(IntervalTreeMapping::new(column, ranges, tokens))
            }
        }
        categorical => {
            let members: Vec<Vec<String>> =
                generalizations.values.iter().map(|v| items(v)).collect();
            match categorical {
                MappingType::Bitmap => {
                    ColumnMapping::Bitmap(CategoricalMapping::new(column, &members, tokens))
                }
                MappingType::Roaring => {
                    ColumnMapping::Roaring(CategoricalMapping::new(column, &members, tokens))
                }
                _ => ColumnMapping::Set(CategoricalMapping::new(column, &members, tokens)),
            }
        }
    };
    Ok(mapping)
}

/// Maps every configured column of `dataset`, one column per worker.
pub fn create_heterogeneous_mapping(
    dataset: &Dataset,
    config: &MappingConfig,
    key: Option<&[u8]>,
) -> Result<HeterogeneousMapping> {
    config.validate(&dataset.indexable_columns(), key)?;

    let mappings = config
        .0
        .par_iter()
        .map(|(column, column_config)| {
            create_column_mapping(dataset, column, column_config, key)
                .map(|mapping| (column.clone(), mapping))
        })
        .collect::<Result<BTreeMap<String, ColumnMapping>>>()?;

    let is_gids = config
        .0
        .iter()
        .map(|(column, column_config)| (column.clone(), column_config.gid))
        .collect();

    HeterogeneousMapping::new(dataset.headers.clone(), mappings, is_gids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{MultidimensionalMapping, Value};

    fn dataset() -> Dataset {
        let rows = [
            ("0", "1", "[0-9]", "Rome"),
            ("1", "2", "[10-19]", "{Rome,Milan}"),
            ("2", "3", "[10-19]", "Bergamo"),
            ("3", "4", "[-5--1]", "Rome"),
        ];
        Dataset::new(
            ["INDEX", "GID", "AGE", "CITY"].map(String::from).to_vec(),
            rows.iter()
                .map(|&(i, g, a, c)| vec![i.into(), g.into(), a.into(), c.into()])
                .collect(),
        )
    }

    fn config(mapping_type: MappingType, mode: Option<&str>) -> ColumnConfig {
        let mut config = ColumnConfig::new(mapping_type);
        match mode {
            Some("plain") => config.plain = true,
            Some("hash") => config.hash = true,
            Some("gid") => config.gid = true,
            Some("runtime") => config.runtime = true,
            _ => {}
        }
        config
    }

    #[test]
    fn parse_extremes() {
        assert_eq!(extract_extremes("[0-9]"), Some(("0", "9")));
        assert_eq!(extract_extremes("[-5--1]"), Some(("-5", "-1")));
        assert_eq!(extract_extremes("[-5-3)"), Some(("-5", "3")));
        assert_eq!(extract_extremes("42"), Some(("42", "42")));
        assert_eq!(extract_extremes("[42]"), None);
        assert_eq!(parse_range("AGE", "[1.5-2]"), Ok((1.5, 2.0)));
        assert!(matches!(
            parse_range("AGE", "young"),
            Err(MappingError::InvalidGeneralization { .. })
        ));
    }

    #[test]
    fn parse_items() {
        assert_eq!(items("{Rome,Milan}"), vec!["Milan", "Rome"]);
        assert_eq!(items("Rome"), vec!["Rome"]);
        assert_eq!(
            canonical_generalization(MappingType::Set, "CITY", "{Rome,Milan}"),
            Ok("{Milan,Rome}".into())
        );
        assert_eq!(
            canonical_generalization(MappingType::Range, "AGE", "[0.0-9.0]"),
            Ok("[0-9]".into())
        );
        assert_eq!(
            canonical_generalization(MappingType::IntervalTree, "AGE", "[7-7]"),
            Ok("7".into())
        );
    }

    #[test]
    fn counter_width() {
        assert_eq!(counter_bits(1), 0);
        assert_eq!(counter_bits(2), 1);
        assert_eq!(counter_bits(3), 2);
        assert_eq!(counter_bits(4), 2);
        assert_eq!(counter_bits(5), 3);
    }

    #[test]
    fn plain_tokens_round_trip() {
        let dataset = dataset();
        for mapping_type in MappingType::ALL {
            let column = if mapping_type.is_numeric() { "AGE" } else { "CITY" };
            let mapping =
                create_column_mapping(&dataset, column, &config(mapping_type, Some("plain")), None)
                    .unwrap();
            assert_eq!(mapping.mapping_type(), mapping_type);

            let generalizations = mapping.generalizations();
            let tokens = mapping.tokens().unwrap();
            assert_eq!(generalizations.len(), 3);
            for (generalization, tokens) in generalizations.iter().zip(tokens) {
                let expected = canonical_generalization(mapping_type, column, generalization).unwrap();
                assert_eq!(&expected, generalization);
                let Token::Text(original) = &tokens[0] else {
                    panic!("plain tokens are text");
                };
                assert_eq!(
                    canonical_generalization(mapping_type, column, original).unwrap(),
                    *generalization
                );
            }
        }
    }

    #[test]
    fn static_tokens_are_a_permutation() {
        let mapping =
            create_column_mapping(&dataset(), "AGE", &config(MappingType::Range, None), None).unwrap();
        let mut tokens: Vec<Token> = mapping.tokens().unwrap().into_iter().flatten().collect();
        tokens.sort();
        assert_eq!(tokens, vec![Token::Int(0), Token::Int(1), Token::Int(2)]);
    }

    #[test]
    fn group_id_tokens() {
        let mapping =
            create_column_mapping(&dataset(), "AGE", &config(MappingType::Range, Some("gid")), None)
                .unwrap();
        assert_eq!(
            mapping.eq(&15.0.into()).unwrap(),
            [Token::Int(2), Token::Int(3)].into()
        );
        assert_eq!(mapping.le(&Value::Number(-1.0)).unwrap(), [Token::Int(4)].into());
    }

    #[test]
    fn runtime_tokens_follow_frequencies() {
        let key = [6u8; 32];
        let mapping = create_column_mapping(
            &dataset(),
            "AGE",
            &config(MappingType::IntervalTree, Some("runtime")),
            Some(&key),
        )
        .unwrap();
        let table = mapping.token_table();
        let mut counters = Vec::new();
        for (generalization, entry) in mapping.generalizations().iter().zip(&table.entries) {
            let TokenEntry::Runtime { seed, count } = *entry else {
                panic!("runtime entries expected");
            };
            assert!(seed < 1 << RUNTIME_TOKEN_BITS);
            counters.push(seed & 0b11);
            let expected = if generalization == "[10-19]" { 2 } else { 1 };
            assert_eq!(count, expected);
        }
        counters.sort();
        assert_eq!(counters, vec![0, 1, 2]);
        assert_eq!(mapping.eq(&12.0.into()).unwrap().len(), 2);
    }

    #[test]
    fn hashed_tokens_need_a_key() {
        let dataset = dataset();
        let hashed = config(MappingType::Set, Some("hash"));
        assert!(create_column_mapping(&dataset, "CITY", &hashed, None).is_err());

        let mapping = create_column_mapping(&dataset, "CITY", &hashed, Some(&[1u8; 32])).unwrap();
        let tokens = mapping.tokens().unwrap();
        assert_eq!(tokens.len(), 3);
        assert!(tokens.iter().all(|t| t.len() == 1 && t[0].is_text()));
        assert_ne!(tokens[0], tokens[1]);
    }

    #[test]
    fn non_numeric_ranges_fail() {
        let result = create_column_mapping(&dataset(), "CITY", &config(MappingType::Range, None), None);
        assert!(result.is_err());
    }

    #[test]
    fn heterogeneous_creation() {
        let mut columns = MappingConfig::default();
        columns.0.insert("AGE".into(), config(MappingType::Range, Some("gid")));
        columns.0.insert("CITY".into(), config(MappingType::Bitmap, None));
        let mapping = create_heterogeneous_mapping(&dataset(), &columns, None).unwrap();

        assert!(mapping.is_gid("AGE").unwrap());
        assert!(!mapping.is_gid("CITY").unwrap());
        assert_eq!(mapping.eq("CITY", &"Milan".into()).unwrap().len(), 1);
        assert!(mapping.eq("INDEX", &1.0.into()).is_err());

        columns.0.insert("GID".into(), config(MappingType::Set, None));
        assert!(create_heterogeneous_mapping(&dataset(), &columns, None).is_err());
    }
}
