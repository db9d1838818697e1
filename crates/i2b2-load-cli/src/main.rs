//! i2b2-load CLI - bulk loading of i2b2 extracts.

use clap::{Parser, Subcommand, ValueEnum};
use i2b2_load::{
    ColumnType, Config, DateFormat, LoadError, LoadMode, LoadService, LoadStats, ProvisionReport,
};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{info, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[derive(Parser)]
#[command(name = "i2b2-load")]
#[command(about = "Bulk loading of tab-delimited extracts into i2b2 tables")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load an observation fact extract into the configured fact table
    LoadFacts {
        /// Tab-delimited extract with a header line
        file: PathBuf,

        /// Override load.batch_size
        #[arg(long)]
        batch_size: Option<usize>,

        /// Override load.mode
        #[arg(long, value_enum)]
        mode: Option<ModeArg>,
    },

    /// Create the ontology metadata table if needed and load a directory of extracts
    ProvisionMetadata {
        /// Directory of extract files, loaded in name order
        dir: PathBuf,

        /// Override metadata.table
        #[arg(long)]
        table: Option<String>,

        /// Override metadata.index_prefix
        #[arg(long)]
        index_prefix: Option<String>,
    },

    /// Load an extract into an arbitrary table
    Load {
        /// Destination table
        table: String,

        /// Tab-delimited extract with a header line
        file: PathBuf,

        /// Submission mode
        #[arg(long, value_enum)]
        mode: Option<ModeArg>,

        /// Rows per batch
        #[arg(long)]
        batch_size: Option<usize>,

        /// chrono pattern for date and timestamp columns
        #[arg(long, default_value = "%Y-%m-%d")]
        date_format: String,

        /// Skip lines starting with this prefix
        #[arg(long)]
        comment_prefix: Option<String>,
    },

    /// Delete the rows of a table where a column equals a value
    Delete {
        table: String,
        column: String,
        value: String,

        /// Column type; introspected from the target when omitted
        #[arg(long = "type", value_enum)]
        column_type: Option<TypeArg>,
    },

    /// List the values of a column, trimmed and lower-cased
    ColumnValues {
        table: String,
        column: String,

        /// Only distinct values, sorted
        #[arg(long)]
        unique: bool,
    },

    /// Test the target database connection
    HealthCheck,
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Batch,
    Row,
}

impl From<ModeArg> for LoadMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Batch => LoadMode::Batch,
            ModeArg::Row => LoadMode::Row,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum TypeArg {
    Text,
    Smallint,
    Integer,
    Bigint,
    Float,
    Double,
    Decimal,
    Date,
    Time,
    Timestamp,
    Boolean,
}

impl From<TypeArg> for ColumnType {
    fn from(ty: TypeArg) -> Self {
        match ty {
            TypeArg::Text => ColumnType::Text,
            TypeArg::Smallint => ColumnType::SmallInt,
            TypeArg::Integer => ColumnType::Integer,
            TypeArg::Bigint => ColumnType::BigInt,
            TypeArg::Float => ColumnType::Float,
            TypeArg::Double => ColumnType::Double,
            TypeArg::Decimal => ColumnType::Decimal,
            TypeArg::Date => ColumnType::Date,
            TypeArg::Time => ColumnType::Time,
            TypeArg::Timestamp => ColumnType::Timestamp,
            TypeArg::Boolean => ColumnType::Boolean,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<(), LoadError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format);

    let mut config = Config::load(&cli.config)?;
    info!("Loaded configuration from {:?} ({})", cli.config, config.hash());

    match cli.command {
        Commands::LoadFacts {
            file,
            batch_size,
            mode,
        } => {
            if let Some(size) = batch_size {
                config.load.batch_size = size;
            }
            if let Some(mode) = mode {
                config.load.mode = mode.into();
            }
            config.validate()?;

            let service = LoadService::new(config).await?;
            let stats = service.load_observation_facts(&file).await?;
            print_stats(&stats, cli.output_json)?;
        }

        Commands::ProvisionMetadata {
            dir,
            table,
            index_prefix,
        } => {
            if let Some(table) = table {
                config.metadata.table = table;
            }
            if let Some(prefix) = index_prefix {
                config.metadata.index_prefix = prefix;
            }
            config.validate()?;

            let service = LoadService::new(config).await?;
            let report = service.provision_metadata(&dir).await?;
            print_report(&report, cli.output_json)?;
        }

        Commands::Load {
            table,
            file,
            mode,
            batch_size,
            date_format,
            comment_prefix,
        } => {
            let date_format = DateFormat::new(date_format);
            date_format.validate()?;
            let mut options = config
                .load
                .options(date_format)
                .with_comment_prefix(comment_prefix);
            if let Some(mode) = mode {
                options = options.with_mode(mode.into());
            }
            if let Some(size) = batch_size {
                if size == 0 {
                    return Err(LoadError::Config("--batch-size must be at least 1".into()));
                }
                options = options.with_batch_size(size);
            }

            let service = LoadService::new(config).await?;
            let stats = service.load_file(&table, &file, options).await?;
            print_stats(&stats, cli.output_json)?;
        }

        Commands::Delete {
            table,
            column,
            value,
            column_type,
        } => {
            let service = LoadService::new(config).await?;
            let deleted = service
                .delete_by_column_value(&table, &column, &value, column_type.map(Into::into))
                .await?;

            if cli.output_json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&serde_json::json!({
                        "table": table,
                        "column": column,
                        "value": value,
                        "rows_deleted": deleted,
                    }))?
                );
            } else {
                println!("Deleted {} rows from {} where {} = '{}'", deleted, table, column, value);
            }
        }

        Commands::ColumnValues {
            table,
            column,
            unique,
        } => {
            let service = LoadService::new(config).await?;
            let values: Vec<String> = if unique {
                service
                    .unique_column_values(&table, &column)
                    .await?
                    .into_iter()
                    .collect()
            } else {
                service.column_values(&table, &column).await?
            };

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&values)?);
            } else {
                for value in &values {
                    println!("{}", value);
                }
            }
        }

        Commands::HealthCheck => {
            let service = LoadService::new(config).await?;
            let result = service.health_check().await;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("Health Check Results:");
                println!(
                    "  Target ({}): {} ({}ms)",
                    result.db_type,
                    if result.healthy { "OK" } else { "FAILED" },
                    result.latency_ms
                );
                if let Some(ref product) = result.product_name {
                    println!("    Product: {}", product);
                }
                if let Some(ref schema) = result.schema {
                    println!("    Schema: {}", schema);
                }
                if let Some(ref dialect) = result.dialect {
                    println!("    Dialect: {}", dialect);
                }
                if let Some(ref err) = result.error {
                    println!("    Error: {}", err);
                }
                println!(
                    "\n  Overall: {}",
                    if result.healthy { "HEALTHY" } else { "UNHEALTHY" }
                );
            }

            if !result.healthy {
                return Err(LoadError::pool(
                    result.error.unwrap_or_default(),
                    "health check",
                ));
            }
        }
    }

    Ok(())
}

fn print_stats(stats: &LoadStats, json: bool) -> Result<(), LoadError> {
    if json {
        println!("{}", serde_json::to_string_pretty(stats)?);
        return Ok(());
    }

    println!("\nLoad completed!");
    println!("  Table: {}", stats.table);
    println!("  File: {}", stats.file);
    println!("  Duration: {:.2}s", stats.elapsed_seconds);
    println!("  Rows loaded: {}", stats.rows_loaded);
    println!("  Rows rejected: {}", stats.rows_rejected);
    println!("  Lines skipped: {}", stats.lines_skipped);
    println!("  Batches: {}", stats.batches_submitted);
    println!("  Throughput: {} rows/sec", stats.rows_per_second());
    Ok(())
}

fn print_report(report: &ProvisionReport, json: bool) -> Result<(), LoadError> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    println!("\nProvisioning completed!");
    println!("  Table: {} ({})", report.table, report.dialect);
    println!("  Outcome: {:?}", report.outcome);
    println!("  Duration: {:.2}s", report.elapsed_seconds);
    println!("  Files: {}", report.loads.len());
    println!("  Rows loaded: {}", report.rows_loaded());
    println!("  Rows rejected: {}", report.rows_rejected());
    if let Some(ref indexes) = report.indexes {
        println!(
            "  Indexes: {} created, {} failed",
            indexes.executed,
            indexes.failed
        );
    }
    Ok(())
}

fn setup_logging(verbosity: &str, format: &str) {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // stdout carries results
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}
