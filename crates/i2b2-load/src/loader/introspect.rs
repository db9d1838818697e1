//! Destination column type discovery.
//!
//! The loader never hardcodes a table layout: it builds the INSERT for the
//! extract's header, prepares it, and asks the database what each parameter
//! is.

use tracing::debug;

use crate::core::{ColumnTypes, PreparedStatement, Session};
use crate::error::{LoadError, Result};

/// Build the canonical INSERT for `columns`.
///
/// Column names are lower-cased and the placeholder count matches the column
/// count: `INSERT INTO schema.table (a,b) VALUES (?,?)`.
pub fn insert_statement<S: AsRef<str>>(schema: &str, table: &str, columns: &[S]) -> String {
    let column_list = columns
        .iter()
        .map(|c| c.as_ref().to_lowercase())
        .collect::<Vec<_>>()
        .join(",");
    let placeholders = vec!["?"; columns.len()].join(",");

    format!(
        "INSERT INTO {}.{} ({}) VALUES ({})",
        schema, table, column_list, placeholders
    )
}

/// Prepare the INSERT for `columns` and read its parameter types.
///
/// Any failure here is fatal for the load; there is no fallback layout.
pub async fn prepare_insert<S: Session>(
    session: &mut S,
    table: &str,
    columns: &[String],
) -> Result<(S::Statement, ColumnTypes)> {
    if columns.is_empty() {
        return Err(LoadError::Introspection(format!(
            "no header columns for table {}",
            table
        )));
    }

    let sql = insert_statement(session.schema(), &table.to_lowercase(), columns);
    debug!("Preparing {}", sql);

    let stmt = session.prepare(&sql).await?;
    let types = describe(&stmt)?;

    if types.len() != columns.len() {
        return Err(LoadError::Introspection(format!(
            "{} reports {} parameters for {} columns",
            table,
            types.len(),
            columns.len()
        )));
    }

    Ok((stmt, types))
}

/// Parameter types of an already prepared statement.
pub fn describe<P: PreparedStatement>(stmt: &P) -> Result<ColumnTypes> {
    let types = stmt.parameter_types()?;
    if types.len() != stmt.parameter_count() {
        return Err(LoadError::Introspection(format!(
            "statement '{}' describes {} of {} parameters",
            stmt.sql(),
            types.len(),
            stmt.parameter_count()
        )));
    }
    Ok(types)
}
