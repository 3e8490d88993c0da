use std::collections::{BTreeMap, BTreeSet};
use std::fs;

use secure_index::config::{ColumnConfig, MappingConfig, MappingType};
use secure_index::crypto::derive_key;
use secure_index::error::{Error, MappingError};
use secure_index::mapping::creation::{create_heterogeneous_mapping, items, parse_range};
use secure_index::rewriting::{Mode, Representation, TailPolicy};
use secure_index::side_table::build_group_token_table;
use secure_index::{
    rewrite, Dataset, HeterogeneousMapping, MultidimensionalMapping, Rewrite, RewriteOptions, Token,
    Value,
};

const DATASET: &str = r#"INDEX,GID,AGE,CITY,OCC
0,1,[0-9],Rome,6260
1,1,[0-9],Rome,6260
2,2,[10-19],"{Milan,Rome}",4700
3,3,[75-79],Bergamo,4700
4,4,[10-19],Bergamo,"{4700,6260}"
"#;

fn dataset() -> Dataset {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("anonymized.csv");
    fs::write(&path, DATASET).unwrap();
    let mut dataset = Dataset::from_csv(&path).unwrap();
    dataset.drop_duplicate_groups().unwrap();
    dataset
}

fn config() -> MappingConfig {
    let mut config = MappingConfig::default();
    config
        .0
        .insert("AGE".into(), ColumnConfig::new(MappingType::Range));
    config
        .0
        .insert("CITY".into(), ColumnConfig::new(MappingType::Set));
    let mut occupation = ColumnConfig::new(MappingType::Bitmap);
    occupation.plain = true;
    config.0.insert("OCC".into(), occupation);
    config
}

fn tokens(mapping: &HeterogeneousMapping, column: &str, generalization: &str) -> BTreeSet<Token> {
    let slot = mapping
        .generalizations(column)
        .unwrap()
        .iter()
        .position(|g| g == generalization)
        .unwrap();
    mapping.tokens(column).unwrap()[slot].iter().cloned().collect()
}

fn values(tokens: &BTreeSet<Token>) -> String {
    tokens
        .iter()
        .map(|t| format!("({t})"))
        .collect::<Vec<_>>()
        .join(",")
}

#[test]
fn encrypted_mapping_rewrites_queries() {
    let dataset = dataset();
    let key = derive_key("password");
    let mapping = create_heterogeneous_mapping(&dataset, &config(), Some(&key)).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mapping.enc");
    mapping.save(&path, Some(&key)).unwrap();
    let mapping = HeterogeneousMapping::load(&path, Some(&key)).unwrap();

    let mut young = tokens(&mapping, "AGE", "[0-9]");
    young.extend(tokens(&mapping, "AGE", "[10-19]"));
    let rewritten = rewrite(
        r#"SELECT * FROM wrapped WHERE "AGE" <= 18"#,
        &mapping,
        &RewriteOptions::default(),
    )
    .unwrap();
    assert_eq!(
        rewritten,
        Rewrite::Sql {
            query: format!(
                r#"SELECT "EncTuples" FROM wrapped WHERE "AGE" IN (VALUES {})"#,
                values(&young)
            ),
            table: "wrapped".into(),
        }
    );
    assert_eq!(
        mapping.between("AGE", &75.0.into(), &79.0.into()).unwrap(),
        tokens(&mapping, "AGE", "[75-79]")
    );
}

#[test]
fn rewriting_twice_gives_the_same_statement() {
    let mapping = create_heterogeneous_mapping(&dataset(), &config(), None).unwrap();
    let query = "SELECT AGE, CITY FROM wrapped WHERE AGE = 18 AND CITY IN ('Rome', 'Bergamo') \
                 ORDER BY AGE";
    let options = RewriteOptions {
        representation: Representation::Normalized,
        tail: TailPolicy::Reattach,
        mode: Mode::Sql,
    };
    let first = rewrite(query, &mapping, &options).unwrap();
    let second = rewrite(query, &mapping, &options).unwrap();
    assert_eq!(first, second);

    let Rewrite::Sql { query, .. } = first else {
        panic!("expected SQL");
    };
    assert!(query.starts_with(
        r#"SELECT "EncTuples" FROM wrapped JOIN "GroupIdToColumns" USING ("GroupId") JOIN "AGE""#
    ));
    assert!(query.ends_with(" ORDER BY AGE"));
}

#[test]
fn key_value_plans_intersect_conditions_on_a_column() {
    let mapping = create_heterogeneous_mapping(&dataset(), &config(), None).unwrap();
    let options = RewriteOptions {
        mode: Mode::KeyValue,
        ..Default::default()
    };
    let plan = rewrite(
        "SELECT * FROM wrapped WHERE AGE >= 10 AND AGE <= 20 AND OCC = 6260",
        &mapping,
        &options,
    )
    .unwrap();

    let mut expected = BTreeMap::new();
    expected.insert("AGE".to_string(), tokens(&mapping, "AGE", "[10-19]"));
    expected.insert(
        "OCC".to_string(),
        [Token::from("6260"), Token::from("{4700,6260}")].into(),
    );
    assert_eq!(
        plan,
        Rewrite::KeyValue {
            labels: expected,
            table: "wrapped".into(),
        }
    );
}

#[test]
fn categorical_mappings_reject_ranges() {
    let mapping = create_heterogeneous_mapping(&dataset(), &config(), None).unwrap();
    assert!(matches!(
        mapping.between("CITY", &"Bergamo".into(), &"Rome".into()),
        Err(Error::Mapping(MappingError::Unsupported { ref column, .. })) if column == "CITY"
    ));
    assert!(matches!(
        rewrite(
            "SELECT * FROM wrapped WHERE CITY > 'Milan'",
            &mapping,
            &RewriteOptions::default()
        ),
        Err(Error::Mapping(MappingError::Unsupported { .. }))
    ));
}

#[test]
fn generalizations_answer_their_own_tokens() {
    let dataset = dataset();
    let key = derive_key("password");
    let kinds = [
        (MappingType::Range, "AGE"),
        (MappingType::IntervalTree, "AGE"),
        (MappingType::Bitmap, "CITY"),
        (MappingType::Roaring, "CITY"),
        (MappingType::Set, "OCC"),
    ];
    for (kind, column) in kinds {
        for runtime in [false, true] {
            let mut settings = ColumnConfig::new(kind);
            settings.runtime = runtime;
            let mut config = MappingConfig::default();
            config.0.insert(column.into(), settings);
            let mapping = create_heterogeneous_mapping(&dataset, &config, Some(&key)).unwrap();

            let generalizations = mapping.generalizations(column).unwrap();
            let tokens = mapping.tokens(column).unwrap();
            assert_eq!(generalizations.len(), tokens.len());
            for (generalization, expected) in generalizations.iter().zip(tokens) {
                let context = format!("{kind:?}, runtime {runtime}, {generalization}");
                let expected: BTreeSet<Token> = expected.into_iter().collect();
                assert!(!expected.is_empty(), "{context}");

                if matches!(kind, MappingType::Range | MappingType::IntervalTree) {
                    let (low, high) = parse_range(column, generalization).unwrap();
                    let found = mapping.between(column, &low.into(), &high.into()).unwrap();
                    assert_eq!(found, expected, "{context}");
                } else {
                    let members: Vec<Value> = items(generalization)
                        .iter()
                        .map(|member| Value::from(member.as_str()))
                        .collect();
                    for member in &members {
                        let found = mapping.eq(column, member).unwrap();
                        assert!(found.is_superset(&expected), "{context}");
                    }
                    let found = mapping.in_values(column, &members).unwrap();
                    assert!(found.is_superset(&expected), "{context}");
                }
            }
        }
    }
}

#[test]
fn side_table_covers_every_group() {
    let dataset = dataset();
    let mapping = create_heterogeneous_mapping(&dataset, &config(), None).unwrap();
    let table = build_group_token_table(&mapping, &dataset).unwrap();
    assert_eq!(table.columns, vec!["AGE", "CITY", "OCC"]);
    assert_eq!(table.rows.len(), 4);
    assert_eq!(table.rows[3].1[2], Token::from("{4700,6260}"));
}
