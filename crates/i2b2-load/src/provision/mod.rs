//! Table provisioning.
//!
//! [`SchemaProvisioner`] creates a table from its vendor template when it
//! does not exist yet, loads every extract in a directory into it, then
//! creates the indexes. All of it runs on one session.

pub mod template;

use std::path::Path;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::core::{Session, SessionFactory};
use crate::dialect::Dialect;
use crate::error::{LoadError, Result};
use crate::extract::{list_files, DelimitedFile};
use crate::loader::{load_extract, LoadOptions, LoadStats};

pub use template::{
    substitute, template_path, BundledTemplates, DirTemplateSource, IndexFailurePolicy,
    IndexReport, IndexScript, TemplateKind, VendorTemplateEngine, DEFAULT_FAMILY, PREFIX_TOKEN,
    TABLE_TOKEN,
};

/// What to do when the target reports a product with no templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnsupportedDialectPolicy {
    /// Fail with [`LoadError::UnsupportedDialect`].
    #[default]
    Fail,
    /// Skip table and index creation, still load the extracts.
    Skip,
}

/// What happened to the table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum TableOutcome {
    Created,
    AlreadyExists,
    Skipped { product_name: String },
}

/// Result of one provisioning run.
#[derive(Debug, Clone, Serialize)]
pub struct ProvisionReport {
    pub table: String,
    pub dialect: String,
    pub outcome: TableOutcome,
    pub loads: Vec<LoadStats>,
    /// Present only when the table was created by this run.
    pub indexes: Option<IndexReport>,
    pub elapsed_seconds: f64,
}

impl ProvisionReport {
    pub fn rows_loaded(&self) -> u64 {
        self.loads.iter().map(|s| s.rows_loaded).sum()
    }

    pub fn rows_rejected(&self) -> u64 {
        self.loads.iter().map(|s| s.rows_rejected).sum()
    }
}

pub struct SchemaProvisioner<'a, F: SessionFactory> {
    factory: &'a F,
    templates: VendorTemplateEngine<'a>,
    load_options: LoadOptions,
    unsupported_dialect: UnsupportedDialectPolicy,
    index_failures: IndexFailurePolicy,
}

impl<'a, F: SessionFactory> SchemaProvisioner<'a, F> {
    pub fn new(factory: &'a F, templates: VendorTemplateEngine<'a>, load_options: LoadOptions) -> Self {
        Self {
            factory,
            templates,
            load_options,
            unsupported_dialect: UnsupportedDialectPolicy::default(),
            index_failures: IndexFailurePolicy::default(),
        }
    }

    pub fn with_unsupported_dialect(mut self, policy: UnsupportedDialectPolicy) -> Self {
        self.unsupported_dialect = policy;
        self
    }

    pub fn with_index_failures(mut self, policy: IndexFailurePolicy) -> Self {
        self.index_failures = policy;
        self
    }

    /// Create `table` if needed, load every file in `source_dir` (sorted by
    /// name), then create indexes if the table is new.
    pub async fn provision(
        &self,
        table: &str,
        prefix: &str,
        source_dir: impl AsRef<Path>,
    ) -> Result<ProvisionReport> {
        let start = Instant::now();
        let source_dir = source_dir.as_ref();
        let files = list_files(source_dir).await?;

        let mut session = self.factory.open().await?;
        let dialect = Dialect::from_product_name(session.product_name());
        info!(
            "Provisioning {} on {} ({} files in {})",
            table,
            dialect,
            files.len(),
            source_dir.display()
        );

        let outcome = self.ensure_table(&mut session, &dialect, table, prefix).await?;

        let mut loads = Vec::with_capacity(files.len());
        for file in &files {
            let extract = DelimitedFile::open(file, self.load_options.delimiter).await?;
            loads.push(load_extract(&mut session, table, &extract, &self.load_options).await?);
        }

        let indexes = if outcome == TableOutcome::Created {
            Some(
                self.templates
                    .create_indexes(&mut session, &dialect, table, prefix, self.index_failures)
                    .await?,
            )
        } else {
            None
        };

        let report = ProvisionReport {
            table: table.to_string(),
            dialect: dialect.name().to_string(),
            outcome,
            loads,
            indexes,
            elapsed_seconds: start.elapsed().as_secs_f64(),
        };
        info!(
            "{}: provisioned ({:?}), {} rows from {} files in {:.1}s",
            table,
            report.outcome,
            report.rows_loaded(),
            report.loads.len(),
            report.elapsed_seconds
        );
        Ok(report)
    }

    async fn ensure_table(
        &self,
        session: &mut F::Session,
        dialect: &Dialect,
        table: &str,
        prefix: &str,
    ) -> Result<TableOutcome> {
        let Some((sql, params)) = dialect.table_exists_query(session.schema(), table) else {
            return match self.unsupported_dialect {
                UnsupportedDialectPolicy::Fail => {
                    Err(LoadError::UnsupportedDialect(dialect.name().to_string()))
                }
                UnsupportedDialectPolicy::Skip => {
                    warn!(
                        "No templates for '{}', skipping creation of {}",
                        dialect.name(),
                        table
                    );
                    Ok(TableOutcome::Skipped {
                        product_name: dialect.name().to_string(),
                    })
                }
            };
        };

        if session.query_exists(sql, &params).await? {
            info!("Table {} already exists, leaving it as is", table);
            return Ok(TableOutcome::AlreadyExists);
        }

        self.templates
            .create_table(session, dialect, table, prefix)
            .await?;
        Ok(TableOutcome::Created)
    }
}
