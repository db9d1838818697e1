//! File-to-table ingestion.
//!
//! [`BatchLoader`] drives one extract into one table:
//!
//! 1. Prepare the INSERT for the extract header and introspect column types
//! 2. Stream data lines, skipping blanks and (optionally) comment lines
//! 3. Coerce each line; rows that fail are logged and dropped
//! 4. Submit rows in batches of `batch_size`, plus the remainder at EOF
//!
//! In [`LoadMode::Row`] every row is executed on its own and execution
//! failures only drop that row.

pub mod coerce;
pub mod introspect;

use std::collections::BTreeSet;
use std::path::Path;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::core::{Batch, CoercedRow, ColumnType, PreparedStatement, Session, SessionFactory};
use crate::error::{LoadError, Result};
use crate::extract::{split_fields, DelimitedFile, DEFAULT_DELIMITER};

pub use coerce::{coerce_field, coerce_row, DateFormat};
pub use introspect::{describe, insert_statement, prepare_insert};

/// How rows are submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadMode {
    /// Accumulate rows and submit them `batch_size` at a time.
    #[default]
    Batch,
    /// Execute each row individually; failures drop only that row.
    Row,
}

/// Per-load settings.
#[derive(Debug, Clone)]
pub struct LoadOptions {
    pub batch_size: usize,
    pub mode: LoadMode,
    pub date_format: DateFormat,
    pub delimiter: char,
    /// Lines starting with this prefix are skipped.
    pub comment_prefix: Option<String>,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            batch_size: crate::core::DEFAULT_BATCH_SIZE,
            mode: LoadMode::Batch,
            date_format: DateFormat::default(),
            delimiter: DEFAULT_DELIMITER,
            comment_prefix: None,
        }
    }
}

impl LoadOptions {
    /// Observation fact extracts: fact date format, no comment lines.
    pub fn observation_facts() -> Self {
        Self {
            date_format: DateFormat::OBSERVATION_FACT,
            ..Self::default()
        }
    }

    /// Ontology metadata extracts: ISO dates, `#` comment lines.
    pub fn metadata() -> Self {
        Self {
            date_format: DateFormat::METADATA,
            comment_prefix: Some("#".to_string()),
            ..Self::default()
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_mode(mut self, mode: LoadMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_date_format(mut self, date_format: DateFormat) -> Self {
        self.date_format = date_format;
        self
    }

    pub fn with_delimiter(mut self, delimiter: char) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn with_comment_prefix(mut self, prefix: Option<String>) -> Self {
        self.comment_prefix = prefix.filter(|p| !p.is_empty());
        self
    }
}

/// Counters for one file load.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LoadStats {
    pub table: String,
    pub file: String,
    /// Data lines read, header excluded.
    pub lines_read: u64,
    /// Blank and comment lines among them.
    pub lines_skipped: u64,
    pub rows_loaded: u64,
    pub rows_rejected: u64,
    pub batches_submitted: u64,
    pub elapsed_seconds: f64,
}

impl LoadStats {
    fn new(table: &str, file: &Path) -> Self {
        Self {
            table: table.to_string(),
            file: file.display().to_string(),
            ..Self::default()
        }
    }

    pub fn rows_per_second(&self) -> i64 {
        if self.elapsed_seconds > 0.0 {
            (self.rows_loaded as f64 / self.elapsed_seconds) as i64
        } else {
            0
        }
    }
}

/// Loads extracts and runs the fixed delete/select shapes against a target.
///
/// Every operation opens its own session and releases it before returning.
pub struct BatchLoader<'a, F: SessionFactory> {
    factory: &'a F,
    options: LoadOptions,
}

impl<'a, F: SessionFactory> BatchLoader<'a, F> {
    pub fn new(factory: &'a F, options: LoadOptions) -> Self {
        Self { factory, options }
    }

    pub fn options(&self) -> &LoadOptions {
        &self.options
    }

    /// Load one extract file into `table`.
    pub async fn load_file(&self, table: &str, path: impl AsRef<Path>) -> Result<LoadStats> {
        let extract = DelimitedFile::open(path, self.options.delimiter).await?;
        let mut session = self.factory.open().await?;
        load_extract(&mut session, table, &extract, &self.options).await
    }

    /// Delete the rows of `table` whose `column` equals `value`.
    ///
    /// With no `column_type` the type is introspected from the prepared
    /// DELETE. Returns the affected row count.
    pub async fn delete_by_column_value(
        &self,
        table: &str,
        column: &str,
        value: &str,
        column_type: Option<ColumnType>,
    ) -> Result<u64> {
        let mut session = self.factory.open().await?;
        let sql = format!(
            "DELETE FROM {}.{} WHERE {} = ?",
            session.schema(),
            table.to_lowercase(),
            column.to_lowercase()
        );
        debug!("Preparing {}", sql);
        let stmt = session.prepare(&sql).await?;

        let column_type = match column_type {
            Some(ty) => ty,
            None => describe(&stmt)?.first().copied().ok_or_else(|| {
                LoadError::Introspection(format!("no parameter type for {}.{}", table, column))
            })?,
        };
        let param = coerce_field(1, column_type, value, &self.options.date_format)?;

        let deleted = session.execute_row(&stmt, &[param]).await?;
        info!("{}: deleted {} rows where {} = '{}'", table, deleted, column, value);
        Ok(deleted)
    }

    /// Values of `column` in `table`, trimmed and lower-cased, NULLs skipped.
    pub async fn column_values(&self, table: &str, column: &str) -> Result<Vec<String>> {
        let mut session = self.factory.open().await?;
        let sql = format!(
            "SELECT {} FROM {}.{}",
            column.to_lowercase(),
            session.schema(),
            table.to_lowercase()
        );
        Ok(session
            .query_strings(&sql)
            .await?
            .into_iter()
            .map(|v| v.trim().to_lowercase())
            .collect())
    }

    /// Distinct values of `column`, as [`column_values`](Self::column_values).
    pub async fn unique_column_values(&self, table: &str, column: &str) -> Result<BTreeSet<String>> {
        Ok(self.column_values(table, column).await?.into_iter().collect())
    }

    /// Active schema of the target.
    pub async fn schema(&self) -> Result<String> {
        Ok(self.factory.open().await?.schema().to_string())
    }

    /// Product name the target reports.
    pub async fn database_vendor(&self) -> Result<String> {
        Ok(self.factory.open().await?.product_name().to_string())
    }
}

/// Load `extract` into `table` on an already open session.
///
/// Introspection and batch submission failures abort the load; coercion and
/// bind failures (and, in row mode, execution failures) drop the row.
pub async fn load_extract<S: Session>(
    session: &mut S,
    table: &str,
    extract: &DelimitedFile,
    options: &LoadOptions,
) -> Result<LoadStats> {
    let start = Instant::now();
    let mut stats = LoadStats::new(table, extract.path());
    info!(
        "Loading {} into {} (mode: {:?}, batch size: {})",
        extract.path().display(),
        table,
        options.mode,
        options.batch_size
    );

    let (stmt, types) = prepare_insert(session, table, extract.headers()).await?;
    let comment_prefix = options.comment_prefix.as_deref();

    let mut batch = Batch::new(options.batch_size);
    let mut rows = extract.rows().await?;

    while let Some(line) = rows.next_line().await? {
        stats.lines_read += 1;
        if line.is_blank() || line.is_comment(comment_prefix) {
            stats.lines_skipped += 1;
            continue;
        }

        let fields = split_fields(&line.text, options.delimiter);
        let row = match coerce_row(&types, &fields, &options.date_format)
            .and_then(|row| bind(&stmt, row))
        {
            Ok(row) => row,
            Err(e) => {
                warn!("{}: dropping line {}: {}", table, line.number, e);
                stats.rows_rejected += 1;
                continue;
            }
        };

        match options.mode {
            LoadMode::Row => match session.execute_row(&stmt, &row).await {
                Ok(_) => stats.rows_loaded += 1,
                Err(e) => {
                    warn!("{}: line {} rejected: {}", table, line.number, e);
                    stats.rows_rejected += 1;
                }
            },
            LoadMode::Batch => {
                batch.push(row);
                if batch.is_full() {
                    submit(session, &stmt, &mut batch, &mut stats).await?;
                }
            }
        }
    }

    if !batch.is_empty() {
        submit(session, &stmt, &mut batch, &mut stats).await?;
    }

    stats.elapsed_seconds = start.elapsed().as_secs_f64();
    info!(
        "{}: {} rows loaded, {} rejected in {:.1}s ({} rows/s)",
        table,
        stats.rows_loaded,
        stats.rows_rejected,
        stats.elapsed_seconds,
        stats.rows_per_second()
    );

    Ok(stats)
}

/// Check a coerced row against the statement's parameter count.
fn bind<P: PreparedStatement>(stmt: &P, row: CoercedRow) -> Result<CoercedRow> {
    if row.len() != stmt.parameter_count() {
        return Err(LoadError::Bind(format!(
            "{} values for {} parameters",
            row.len(),
            stmt.parameter_count()
        )));
    }
    Ok(row)
}

async fn submit<S: Session>(
    session: &mut S,
    stmt: &S::Statement,
    batch: &mut Batch,
    stats: &mut LoadStats,
) -> Result<()> {
    debug!("{}: submitting batch of {} rows", stats.table, batch.len());
    if let Err(e) = session.execute_batch(stmt, batch.rows()).await {
        warn!(
            "{}: batch {} of {} rows failed after {} rows loaded",
            stats.table,
            stats.batches_submitted + 1,
            batch.len(),
            stats.rows_loaded
        );
        return Err(e);
    }

    stats.rows_loaded += batch.len() as u64;
    stats.batches_submitted += 1;
    batch.clear();
    Ok(())
}
