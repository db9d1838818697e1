//! Error types for the loader library.

use thiserror::Error;

use crate::core::ColumnType;

/// Main error type for load and provisioning operations.
#[derive(Error, Debug)]
pub enum LoadError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// PostgreSQL connection or query error
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// SQL Server connection or query error
    #[error("SQL Server error: {0}")]
    Mssql(#[from] tiberius::error::Error),

    /// Connection pool error with context
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// The INSERT statement could not be described by the database
    #[error("Column type introspection failed: {0}")]
    Introspection(String),

    /// A single field could not be converted to its column type
    #[error("Cannot coerce '{value}' at column {position} to {column_type}: {message}")]
    Coercion {
        position: usize,
        column_type: ColumnType,
        value: String,
        message: String,
    },

    /// A coerced row does not fit the prepared statement
    #[error("Bind failed: {0}")]
    Bind(String),

    /// Template could not be resolved or rendered
    #[error("Template {path}: {message}")]
    Template { path: String, message: String },

    /// Connected database product has no template or catalog query support
    #[error("Unsupported database product '{0}' - expected PostgreSQL, Oracle or Microsoft SQL Server")]
    UnsupportedDialect(String),

    /// Load failed for a specific table
    #[error("Load failed for table {table}: {message}")]
    Load { table: String, message: String },

    /// IO error (extract files, template directories)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LoadError {
    /// Create a Pool error with context about where it occurred
    pub fn pool(message: impl ToString, context: impl Into<String>) -> Self {
        LoadError::Pool {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Create a Load error
    pub fn load(table: impl Into<String>, message: impl Into<String>) -> Self {
        LoadError::Load {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Create a Template error
    pub fn template(path: impl Into<String>, message: impl Into<String>) -> Self {
        LoadError::Template {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Whether the error only concerns one row of an extract.
    ///
    /// Row-local errors are logged and the row is dropped; everything else
    /// aborts the load.
    pub fn is_row_local(&self) -> bool {
        matches!(self, LoadError::Coercion { .. } | LoadError::Bind(_))
    }

    /// Process exit code for the CLI.
    pub fn exit_code(&self) -> u8 {
        match self {
            LoadError::Config(_) | LoadError::Yaml(_) => 2,
            LoadError::Postgres(_) | LoadError::Mssql(_) | LoadError::Pool { .. } => 3,
            LoadError::Template { .. } | LoadError::UnsupportedDialect(_) => 4,
            LoadError::Io(_) => 5,
            _ => 1,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for load operations.
pub type Result<T> = std::result::Result<T, LoadError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_local_classification() {
        let coercion = LoadError::Coercion {
            position: 2,
            column_type: ColumnType::Integer,
            value: "abc".to_string(),
            message: "invalid digit found in string".to_string(),
        };
        assert!(coercion.is_row_local());
        assert!(LoadError::Bind("arity".into()).is_row_local());
        assert!(!LoadError::Introspection("no params".into()).is_row_local());
        assert!(!LoadError::load("observation_fact", "batch rejected").is_row_local());
    }

    #[test]
    fn test_coercion_message() {
        let err = LoadError::Coercion {
            position: 3,
            column_type: ColumnType::Date,
            value: "31-Foo-20".to_string(),
            message: "input contains invalid characters".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Cannot coerce '31-Foo-20' at column 3 to date: input contains invalid characters"
        );
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(LoadError::Config("x".into()).exit_code(), 2);
        assert_eq!(LoadError::pool("timeout", "opening session").exit_code(), 3);
        assert_eq!(LoadError::UnsupportedDialect("DB2".into()).exit_code(), 4);
        assert_eq!(LoadError::load("t", "m").exit_code(), 1);
    }

    #[test]
    fn test_format_detailed_includes_chain() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing.tsv");
        let err = LoadError::from(io);
        let detailed = err.format_detailed();
        assert!(detailed.starts_with("Error: IO error: missing.tsv"));
    }
}
