use clap::{Args, Parser, Subcommand, ValueEnum};
use log::info;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use secure_index::config::{ColumnConfig, MappingConfig, MappingType};
use secure_index::crypto::{derive_key, KEY_SIZE};
use secure_index::dataset::Dataset;
use secure_index::error::ConfigurationError;
use secure_index::mapping::creation::create_heterogeneous_mapping;
use secure_index::rewriting::{rewrite, Mode, Representation, Rewrite, RewriteOptions, TailPolicy};
use secure_index::side_table::build_group_token_table;
use secure_index::{HeterogeneousMapping, MultidimensionalMapping, Value};

#[derive(Parser, Debug)]
#[command(version, about = "Secure index over anonymized, encrypted tables")]
struct Cli {
    /// Password deriving the key of encrypted mappings and keyed tokens.
    #[arg(long, env = "SECURE_INDEX_PASSWORD", global = true, hide_env_values = true)]
    password: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build the mapping of an anonymized dataset.
    Create(CreateArgs),
    /// Rewrite a SELECT statement over tokens.
    Rewrite(RewriteArgs),
    /// Evaluate one predicate on one column of a mapping.
    Lookup(LookupArgs),
    /// Write the group id to tokens table of a dataset.
    SideTable(SideTableArgs),
}

#[derive(Args, Debug)]
struct MappingFile {
    /// Path to the mapping.
    mapping: PathBuf,
    /// The mapping is encrypted.
    #[arg(short, long = "enc")]
    encrypted: bool,
}

#[derive(Args, Debug)]
struct CreateArgs {
    /// Path to the anonymized dataset.
    input: PathBuf,
    /// Path where to store the mapping.
    output: PathBuf,
    /// JSON file configuring every column; overrides the flags below.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Columns to map (all indexable columns by default).
    #[arg(short, long = "column")]
    columns: Vec<String>,
    #[arg(short = 't', long = "type", default_value = "range")]
    mapping_type: MappingType,
    /// Encrypt the mapping.
    #[arg(short, long = "enc")]
    encrypt: bool,
    /// Tokens are group ids.
    #[arg(short, long)]
    gid: bool,
    /// Tokens are keyed hashes of the generalizations.
    #[arg(long)]
    hash: bool,
    /// Tokens are the generalizations in clear.
    #[arg(short, long)]
    plain: bool,
    /// Tokens are derived at query time, one per group.
    #[arg(short, long)]
    runtime: bool,
}

#[derive(Args, Debug)]
struct RewriteArgs {
    #[command(flatten)]
    file: MappingFile,
    /// The SELECT statement.
    query: String,
    #[arg(short, long, value_enum, default_value_t)]
    representation: Representation,
    #[arg(long, value_enum, default_value_t)]
    tail: TailPolicy,
    /// Plan key-value store lookups instead of rewriting SQL.
    #[arg(short, long)]
    kvstore: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Predicate {
    Eq,
    Neq,
    Lt,
    Le,
    Gt,
    Ge,
    Between,
    In,
}

#[derive(Args, Debug)]
struct LookupArgs {
    #[command(flatten)]
    file: MappingFile,
    column: String,
    #[arg(value_enum)]
    predicate: Predicate,
    #[arg(required = true)]
    values: Vec<String>,
}

#[derive(Args, Debug)]
struct SideTableArgs {
    #[command(flatten)]
    file: MappingFile,
    /// Path to the anonymized dataset the mapping was built from.
    input: PathBuf,
    /// Path of the CSV table to write.
    output: PathBuf,
}

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

fn key(password: Option<&str>, purpose: &str) -> CliResult<[u8; KEY_SIZE]> {
    let password = password.ok_or_else(|| ConfigurationError::MissingPassword(purpose.to_string()))?;
    Ok(derive_key(password))
}

fn load(file: &MappingFile, password: Option<&str>) -> CliResult<HeterogeneousMapping> {
    let key = if file.encrypted {
        Some(key(password, "read an encrypted mapping")?)
    } else {
        None
    };
    Ok(HeterogeneousMapping::load(&file.mapping, key.as_ref().map(|k| k.as_slice()))?)
}

fn read_dataset(path: &Path) -> CliResult<Dataset> {
    let mut dataset = Dataset::from_csv(path)?;
    dataset.drop_duplicate_groups()?;
    info!("Read {} groups from {}", dataset.records.len(), path.display());
    Ok(dataset)
}

fn create(args: CreateArgs, password: Option<&str>) -> CliResult<()> {
    let dataset = read_dataset(&args.input)?;
    let config = match &args.config {
        Some(path) => MappingConfig::from_json_file(path)?,
        None => {
            let columns = if args.columns.is_empty() {
                dataset.indexable_columns()
            } else {
                args.columns.clone()
            };
            let mut column = ColumnConfig::new(args.mapping_type);
            column.gid = args.gid;
            column.hash = args.hash;
            column.plain = args.plain;
            column.runtime = args.runtime;
            MappingConfig::uniform(columns, column)
        }
    };

    let key = match password {
        Some(password) => Some(derive_key(password)),
        None if args.encrypt => {
            return Err(ConfigurationError::MissingPassword("encrypt the mapping".into()).into())
        }
        None => None,
    };
    let key = key.as_ref().map(|k| k.as_slice());

    let mapping = create_heterogeneous_mapping(&dataset, &config, key)?;
    mapping.save(&args.output, if args.encrypt { key } else { None })?;
    Ok(())
}

fn run_rewrite(args: RewriteArgs, password: Option<&str>) -> CliResult<()> {
    let mapping = load(&args.file, password)?;
    let options = RewriteOptions {
        representation: args.representation,
        tail: args.tail,
        mode: if args.kvstore { Mode::KeyValue } else { Mode::Sql },
    };
    match rewrite(&args.query, &mapping, &options)? {
        Rewrite::Sql { query, table } => {
            info!("Rewritten query targets table {table}");
            println!("{query}");
        }
        Rewrite::KeyValue { labels, table } => {
            let labels: BTreeMap<String, Vec<String>> = labels
                .into_iter()
                .map(|(column, tokens)| (column, tokens.iter().map(ToString::to_string).collect()))
                .collect();
            let plan = serde_json::json!({ "table": table, "labels": labels });
            println!("{}", serde_json::to_string_pretty(&plan)?);
        }
    }
    Ok(())
}

fn lookup(args: LookupArgs, password: Option<&str>) -> CliResult<()> {
    let mapping = load(&args.file, password)?;
    // Numeric mappings parse the values, categorical ones match them as written.
    let values: Vec<Value> = args.values.iter().map(|v| Value::Text(v.clone())).collect();

    let column = args.column.as_str();
    let tokens = match (args.predicate, values.as_slice()) {
        (Predicate::In, values) => mapping.in_values(column, values)?,
        (Predicate::Between, [low, high]) => mapping.between(column, low, high)?,
        (Predicate::Eq, [value]) => mapping.eq(column, value)?,
        (Predicate::Neq, [value]) => mapping.neq(column, value)?,
        (Predicate::Lt, [value]) => mapping.lt(column, value)?,
        (Predicate::Le, [value]) => mapping.le(column, value)?,
        (Predicate::Gt, [value]) => mapping.gt(column, value)?,
        (Predicate::Ge, [value]) => mapping.ge(column, value)?,
        (predicate, values) => {
            return Err(format!("{predicate:?} does not take {} values", values.len()).into())
        }
    };
    for token in tokens {
        println!("{token}");
    }
    Ok(())
}

fn side_table(args: SideTableArgs, password: Option<&str>) -> CliResult<()> {
    let mapping = load(&args.file, password)?;
    let dataset = read_dataset(&args.input)?;
    build_group_token_table(&mapping, &dataset)?.write_csv(&args.output)?;
    Ok(())
}

fn main() -> CliResult<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let password = cli.password.as_deref();
    match cli.command {
        Command::Create(args) => create(args, password),
        Command::Rewrite(args) => run_rewrite(args, password),
        Command::Lookup(args) => lookup(args, password),
        Command::SideTable(args) => side_table(args, password),
    }
}
