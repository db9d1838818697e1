//! Core traits at the seam between the load engine and its collaborators.
//!
//! - [`SessionFactory`] / [`Session`]: an open connection to the destination
//!   database, with its active schema and reported product name
//! - [`PreparedStatement`]: a statement prepared on a session, exposing its
//!   parameter metadata
//! - [`TemplateSource`]: resolves DDL template text by relative path
//!
//! The engine is generic over these traits so the PostgreSQL and SQL Server
//! drivers, and the in-memory session used by tests, dispatch statically.

use std::path::Path;

use async_trait::async_trait;

use crate::error::Result;

use super::value::{ColumnTypes, CoercedRow, SqlValue};

/// Opens sessions against one logical target database.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    type Session: Session;

    /// Acquire a session. The connection is released when the session drops.
    async fn open(&self) -> Result<Self::Session>;
}

/// A statement prepared on a [`Session`].
pub trait PreparedStatement: Send + Sync {
    /// Canonical statement text, with `?` bind markers.
    fn sql(&self) -> &str;

    /// Number of bind parameters.
    fn parameter_count(&self) -> usize;

    /// Parameter types in placeholder order, as reported by the database.
    fn parameter_types(&self) -> Result<ColumnTypes>;
}

/// An open connection scope on the destination database.
///
/// Statement text handed to a session uses `?` bind markers; the driver
/// rewrites them to its native form.
#[async_trait]
pub trait Session: Send {
    type Statement: PreparedStatement;

    /// Active schema that unqualified generated statements target.
    fn schema(&self) -> &str;

    /// Database product name as the driver reports it
    /// (e.g. "PostgreSQL", "Microsoft SQL Server").
    fn product_name(&self) -> &str;

    /// Prepare a statement and describe its parameters.
    async fn prepare(&mut self, sql: &str) -> Result<Self::Statement>;

    /// Execute a prepared statement once with one row of parameters.
    async fn execute_row(&mut self, stmt: &Self::Statement, row: &[SqlValue]) -> Result<u64>;

    /// Submit many rows for a prepared statement as one unit.
    ///
    /// Either every row is written or the error is returned.
    async fn execute_batch(&mut self, stmt: &Self::Statement, rows: &[CoercedRow]) -> Result<u64>;

    /// Execute a DDL or other parameterless statement.
    async fn execute(&mut self, sql: &str) -> Result<()>;

    /// Run a query with text parameters and report whether it returned a row.
    async fn query_exists(&mut self, sql: &str, params: &[String]) -> Result<bool>;

    /// Run a query and return the first column of every row as text.
    ///
    /// NULLs are skipped.
    async fn query_strings(&mut self, sql: &str) -> Result<Vec<String>>;
}

/// Resolves template resource text by relative path.
pub trait TemplateSource: Send + Sync {
    /// Full text of the template at `path`.
    fn read(&self, path: &Path) -> Result<String>;

    /// Template text as trimmed, non-blank lines.
    fn read_lines(&self, path: &Path) -> Result<Vec<String>> {
        Ok(self
            .read(path)?
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(String::from)
            .collect())
    }
}
