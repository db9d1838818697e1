//! Vendor DDL templates.
//!
//! Templates are plain SQL carrying two case-sensitive tokens: `I2B2` for
//! the table name and `i2b2` for the short prefix used in derived index
//! names. Table scripts live per dialect, index scripts are shared:
//!
//! ```text
//! <family>/<dialect-dir>/<family>_table.sql
//! <family>/<family>_table_indices.sql
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::core::{Session, TemplateSource};
use crate::dialect::Dialect;
use crate::error::{LoadError, Result};

/// Token replaced by the table name.
pub const TABLE_TOKEN: &str = "I2B2";

/// Token replaced by the index-name prefix.
pub const PREFIX_TOKEN: &str = "i2b2";

/// Template family used when none is configured.
pub const DEFAULT_FAMILY: &str = "metadata";

const COMMENT_PREFIX: &str = "--";

/// Logical template kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateKind {
    Table,
    Indexes,
}

/// What to do when an index statement fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexFailurePolicy {
    /// Stop at the first failing statement.
    #[default]
    Abort,
    /// Log the failure and run the remaining statements.
    Continue,
}

/// Outcome of running an index script.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexReport {
    pub executed: usize,
    pub failed: usize,
    pub comments_skipped: usize,
}

/// Rendered index script.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexScript {
    pub statements: Vec<String>,
    pub comments_skipped: usize,
}

/// Relative path of a template.
pub fn template_path(family: &str, kind: TemplateKind, dialect: &Dialect) -> Result<PathBuf> {
    let dir = match dialect {
        Dialect::Postgres | Dialect::Oracle | Dialect::SqlServer => dialect.template_dir(),
        Dialect::Unsupported(name) => return Err(LoadError::UnsupportedDialect(name.clone())),
    };

    let mut path = PathBuf::from(family);
    match kind {
        TemplateKind::Table => {
            if let Some(dir) = dir {
                path.push(dir);
            }
            path.push(format!("{}_table.sql", family));
        }
        TemplateKind::Indexes => path.push(format!("{}_table_indices.sql", family)),
    }
    Ok(path)
}

/// Replace both tokens in one left-to-right pass.
///
/// Replacement text is never rescanned, so a table name containing `i2b2`
/// stays as given.
pub fn substitute(text: &str, table: &str, prefix: &str) -> String {
    let mut out = String::with_capacity(text.len() + table.len());
    let mut rest = text;

    while let Some(ch) = rest.chars().next() {
        if let Some(tail) = rest.strip_prefix(TABLE_TOKEN) {
            out.push_str(table);
            rest = tail;
        } else if let Some(tail) = rest.strip_prefix(PREFIX_TOKEN) {
            out.push_str(prefix);
            rest = tail;
        } else {
            out.push(ch);
            rest = &rest[ch.len_utf8()..];
        }
    }

    out
}

fn strip_terminator(statement: &str) -> &str {
    let trimmed = statement.trim_end();
    trimmed.strip_suffix(';').unwrap_or(trimmed).trim_end()
}

/// Template files under a directory root.
#[derive(Debug, Clone)]
pub struct DirTemplateSource {
    root: PathBuf,
}

impl DirTemplateSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl TemplateSource for DirTemplateSource {
    fn read(&self, path: &Path) -> Result<String> {
        let full = self.root.join(path);
        std::fs::read_to_string(&full)
            .map_err(|e| LoadError::template(full.display().to_string(), e.to_string()))
    }
}

/// The i2b2 ontology templates compiled into the library.
#[derive(Debug, Clone, Copy, Default)]
pub struct BundledTemplates;

impl BundledTemplates {
    const FILES: &'static [(&'static str, &'static str)] = &[
        (
            "metadata/postgresql/metadata_table.sql",
            include_str!("../../templates/metadata/postgresql/metadata_table.sql"),
        ),
        (
            "metadata/oracle/metadata_table.sql",
            include_str!("../../templates/metadata/oracle/metadata_table.sql"),
        ),
        (
            "metadata/sqlserver/metadata_table.sql",
            include_str!("../../templates/metadata/sqlserver/metadata_table.sql"),
        ),
        (
            "metadata/metadata_table_indices.sql",
            include_str!("../../templates/metadata/metadata_table_indices.sql"),
        ),
    ];
}

impl TemplateSource for BundledTemplates {
    fn read(&self, path: &Path) -> Result<String> {
        let key = path
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        Self::FILES
            .iter()
            .find(|(name, _)| *name == key)
            .map(|(_, text)| text.to_string())
            .ok_or_else(|| LoadError::template(key, "no bundled template"))
    }
}

/// Resolves and renders table and index scripts for a dialect.
pub struct VendorTemplateEngine<'a> {
    source: &'a dyn TemplateSource,
    family: String,
}

impl<'a> VendorTemplateEngine<'a> {
    pub fn new(source: &'a dyn TemplateSource, family: impl Into<String>) -> Self {
        Self {
            source,
            family: family.into(),
        }
    }

    pub fn family(&self) -> &str {
        &self.family
    }

    /// The table script as one statement.
    ///
    /// Line breaks are kept so trailing `--` comments end at their line.
    pub fn table_statement(&self, dialect: &Dialect, table: &str, prefix: &str) -> Result<String> {
        let path = template_path(&self.family, TemplateKind::Table, dialect)?;
        let joined = self
            .source
            .read_lines(&path)?
            .into_iter()
            .filter(|line| !line.starts_with(COMMENT_PREFIX))
            .collect::<Vec<_>>()
            .join("\n");

        let statement = strip_terminator(&joined);
        if statement.is_empty() {
            return Err(LoadError::template(
                path.display().to_string(),
                "template has no statement",
            ));
        }
        Ok(substitute(statement, table, prefix))
    }

    /// The index script, one statement per non-comment line.
    pub fn index_statements(&self, dialect: &Dialect, table: &str, prefix: &str) -> Result<IndexScript> {
        let path = template_path(&self.family, TemplateKind::Indexes, dialect)?;
        let mut script = IndexScript::default();

        for line in self.source.read_lines(&path)? {
            if line.starts_with(COMMENT_PREFIX) {
                script.comments_skipped += 1;
                continue;
            }
            let statement = strip_terminator(&line);
            if !statement.is_empty() {
                script.statements.push(substitute(statement, table, prefix));
            }
        }

        Ok(script)
    }

    /// Render and execute the table script.
    pub async fn create_table<S: Session>(
        &self,
        session: &mut S,
        dialect: &Dialect,
        table: &str,
        prefix: &str,
    ) -> Result<()> {
        let statement = self.table_statement(dialect, table, prefix)?;
        debug!("Executing {}", statement);
        session.execute(&statement).await?;
        info!("Created table {} ({} template)", table, dialect);
        Ok(())
    }

    /// Render and execute the index script.
    pub async fn create_indexes<S: Session>(
        &self,
        session: &mut S,
        dialect: &Dialect,
        table: &str,
        prefix: &str,
        policy: IndexFailurePolicy,
    ) -> Result<IndexReport> {
        let script = self.index_statements(dialect, table, prefix)?;
        let mut report = IndexReport {
            comments_skipped: script.comments_skipped,
            ..IndexReport::default()
        };

        for statement in &script.statements {
            debug!("Executing {}", statement);
            match session.execute(statement).await {
                Ok(()) => report.executed += 1,
                Err(e) => match policy {
                    IndexFailurePolicy::Abort => return Err(e),
                    IndexFailurePolicy::Continue => {
                        error!("Index statement failed: {}: {}", statement, e);
                        report.failed += 1;
                    }
                },
            }
        }

        info!(
            "{}: {} index statements executed, {} failed",
            table, report.executed, report.failed
        );
        Ok(report)
    }
}
