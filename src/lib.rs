//! Secure index over outsourced, anonymized tables.
//!
//! Rows are encrypted group by group; every indexable column keeps a mapping
//! from its generalizations to the opaque tokens of the groups holding them.
//! Queries written over the plaintext columns are rewritten over tokens:
//!
//! ```no_run
//! use secure_index::mapping::HeterogeneousMapping;
//! use secure_index::rewriting::{rewrite, Rewrite, RewriteOptions};
//!
//! # fn main() -> secure_index::Result<()> {
//! let mapping = HeterogeneousMapping::load("mapping.bin".as_ref(), None)?;
//! let sql = r#"SELECT * FROM wrapped WHERE "AGE" <= 18"#;
//! if let Rewrite::Sql { query, .. } = rewrite(sql, &mapping, &RewriteOptions::default())? {
//!     println!("{query}");
//! }
//! # Ok(())
//! # }
//! ```
pub mod config;
pub mod crypto;
pub mod dataset;
pub mod error;
pub mod mapping;
pub mod rewriting;
pub mod side_table;
pub mod sql_parser;

pub use config::{ColumnConfig, MappingConfig, MappingType};
pub use dataset::Dataset;
pub use error::{Error, Result};
pub use mapping::{HeterogeneousMapping, MultidimensionalMapping, Token, Value};
pub use rewriting::{rewrite, Rewrite, RewriteOptions};
