//! Database dialects.
//!
//! A [`Dialect`] is derived from the product name a session reports and is
//! the only place dialect-specific choices are made: which template
//! directory applies, what the catalog existence check looks like, and how
//! `?` bind markers are spelled natively.

use std::fmt;

/// Database product family targeted by a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dialect {
    Postgres,
    Oracle,
    SqlServer,
    /// Any other product; carries the reported name.
    Unsupported(String),
}

impl Dialect {
    /// Normalize a reported product name.
    ///
    /// Matching is exact but case-insensitive, after trimming.
    pub fn from_product_name(product_name: &str) -> Self {
        match product_name.trim().to_lowercase().as_str() {
            "postgresql" => Dialect::Postgres,
            "oracle" => Dialect::Oracle,
            "microsoft sql server" => Dialect::SqlServer,
            _ => Dialect::Unsupported(product_name.trim().to_string()),
        }
    }

    /// Get the dialect identifier.
    pub fn name(&self) -> &str {
        match self {
            Dialect::Postgres => "postgresql",
            Dialect::Oracle => "oracle",
            Dialect::SqlServer => "sqlserver",
            Dialect::Unsupported(name) => name,
        }
    }

    /// Whether templates and catalog queries exist for this dialect.
    pub fn is_supported(&self) -> bool {
        !matches!(self, Dialect::Unsupported(_))
    }

    /// Directory holding this dialect's table templates.
    pub fn template_dir(&self) -> Option<&'static str> {
        match self {
            Dialect::Postgres => Some("postgresql"),
            Dialect::Oracle => Some("oracle"),
            Dialect::SqlServer => Some("sqlserver"),
            Dialect::Unsupported(_) => None,
        }
    }

    /// Get a native parameter placeholder for the given 1-based index.
    ///
    /// - PostgreSQL: `$1`
    /// - SQL Server: `@P1`
    /// - Oracle: `:1`
    pub fn param_placeholder(&self, index: usize) -> String {
        match self {
            Dialect::Postgres => format!("${}", index),
            Dialect::SqlServer => format!("@P{}", index),
            Dialect::Oracle => format!(":{}", index),
            Dialect::Unsupported(_) => "?".to_string(),
        }
    }

    /// Rewrite `?` bind markers into this dialect's native placeholders.
    ///
    /// Markers inside single-quoted literals are kept as they are.
    pub fn native_sql(&self, sql: &str) -> String {
        let mut out = String::with_capacity(sql.len() + 16);
        let mut in_literal = false;
        let mut index = 0;

        for ch in sql.chars() {
            match ch {
                '\'' => {
                    in_literal = !in_literal;
                    out.push(ch);
                }
                '?' if !in_literal => {
                    index += 1;
                    out.push_str(&self.param_placeholder(index));
                }
                _ => out.push(ch),
            }
        }

        out
    }

    /// Catalog query testing whether `table` exists, with its text parameters.
    ///
    /// Both the upper- and lower-cased spellings of the name are accepted.
    pub fn table_exists_query(&self, schema: &str, table: &str) -> Option<(&'static str, Vec<String>)> {
        match self {
            Dialect::Postgres => Some((
                "SELECT 1 FROM pg_tables WHERE schemaname = ? AND (tablename = UPPER(?) OR tablename = LOWER(?))",
                vec![schema.to_string(), table.to_string(), table.to_string()],
            )),
            Dialect::Oracle => Some((
                "SELECT 1 FROM user_tables WHERE table_name = UPPER(?) OR table_name = LOWER(?)",
                vec![table.to_string(), table.to_string()],
            )),
            Dialect::SqlServer => Some((
                "SELECT 1 FROM INFORMATION_SCHEMA.TABLES WHERE table_schema = ? AND (table_name = UPPER(?) OR table_name = LOWER(?))",
                vec![schema.to_string(), table.to_string(), table.to_string()],
            )),
            Dialect::Unsupported(_) => None,
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
