//! Error taxonomy shared by the whole crate.
//!
//! Errors fall into four families: configuration problems rejected before any
//! work starts, SQL that the parser refuses, predicates the mapping cannot
//! answer, and cryptographic failures. None of them is retried internally.

use thiserror::Error;

/// Invalid mapping configuration, caught before a mapping is built.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigurationError {
    #[error("{0} is not a valid type of mapping")]
    UnknownMappingType(String),

    #[error("column '{0}': only one flag among gid, hash, plain and runtime can be set")]
    ConflictingFlags(String),

    #[error("column '{0}' does not exist in the dataset")]
    UnknownColumn(String),

    #[error("column '{0}' is configured more than once")]
    DuplicateColumn(String),

    #[error("column '{0}' needs a key to derive its tokens")]
    MissingKey(String),

    #[error("the dataset has no '{0}' column")]
    MissingGroupColumn(String),

    #[error("a password is required to {0}")]
    MissingPassword(String),

    #[error("stored mapping of column '{column}' is inconsistent: {reason}")]
    InconsistentMapping { column: String, reason: String },
}

/// Malformed or unsupported SQL.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("empty SQL statement provided")]
    Empty,

    #[error("could not tokenize statement: {0}")]
    Tokenizer(String),

    #[error("'{0}' is not supported yet")]
    UnsupportedStatement(String),

    #[error("{0} not supported")]
    Unsupported(String),

    #[error("unexpected keyword '{0}'; this may be an invalid or unsupported keyword")]
    UnexpectedKeyword(String),

    #[error("invalid syntax: {0}")]
    Syntax(String),
}

/// A predicate the mapping cannot answer.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MappingError {
    #[error("{0} does not exist in the mapping")]
    UnknownColumn(String),

    #[error("{kind} mapping on column '{column}' does not implement the {operation} method")]
    Unsupported {
        column: String,
        kind: String,
        operation: String,
    },

    #[error("{0} is not supported as a comparison operator")]
    UnsupportedOperator(String),

    #[error("column '{column}': {value} is not numeric")]
    NotNumeric { column: String, value: String },

    #[error("column '{column}': {value} cannot be used as a comparison value")]
    InvalidValue { column: String, value: String },

    #[error("comparisons among two columns are not supported ({left}, {right})")]
    ColumnComparison { left: String, right: String },

    #[error("comparison '{0}' does not reference any column")]
    MissingColumn(String),

    #[error("column '{column}': '{value}' is not a valid {expected} generalization")]
    InvalidGeneralization {
        column: String,
        value: String,
        expected: String,
    },

    #[error("column '{column}': generalization '{value}' is not in the mapping")]
    UnknownGeneralization { column: String, value: String },

    #[error("comparison on column '{0}' is combined with OR or NOT and cannot be planned as a conjunction")]
    NonConjunctive(String),

    #[error("comparison on column '{0}' is negated and cannot be rewritten over tokens")]
    Negated(String),

    #[error("column '{column}': token cursor {cursor} is not a multiple of {count} tokens")]
    MisalignedCursor {
        column: String,
        cursor: u32,
        count: usize,
    },
}

/// Key, cipher and envelope failures.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CryptoError {
    #[error("invalid key length: {0} bytes")]
    InvalidKeyLength(usize),

    #[error("encryption failed")]
    EncryptionFailed,

    #[error("decryption failed: wrong password or corrupted ciphertext")]
    DecryptionFailed,

    #[error("invalid armor: {0}")]
    Armor(String),
}

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Mapping(#[from] MappingError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("invalid configuration file: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
