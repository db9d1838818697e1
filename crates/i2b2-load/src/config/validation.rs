//! Configuration validation.

use super::Config;
use crate::drivers::SslMode;
use crate::error::{LoadError, Result};

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    let target = &config.target;
    if target.host.is_empty() {
        return Err(LoadError::Config("target.host is required".into()));
    }
    if target.database.is_empty() {
        return Err(LoadError::Config("target.database is required".into()));
    }
    if target.user.is_empty() {
        return Err(LoadError::Config("target.user is required".into()));
    }
    if target.max_connections == 0 {
        return Err(LoadError::Config(
            "target.max_connections must be at least 1".into(),
        ));
    }
    if matches!(target.schema.as_deref(), Some(s) if s.trim().is_empty()) {
        return Err(LoadError::Config(
            "target.schema must not be empty when set".into(),
        ));
    }
    SslMode::for_target(target)?;

    if config.load.batch_size == 0 {
        return Err(LoadError::Config(
            "load.batch_size must be at least 1".into(),
        ));
    }
    if config.load.delimiter == '\n' || config.load.delimiter == '\r' {
        return Err(LoadError::Config(
            "load.delimiter cannot be a line terminator".into(),
        ));
    }

    if config.facts.table.trim().is_empty() {
        return Err(LoadError::Config("facts.table is required".into()));
    }
    if config.metadata.table.trim().is_empty() {
        return Err(LoadError::Config("metadata.table is required".into()));
    }
    if config.metadata.index_prefix.trim().is_empty() {
        return Err(LoadError::Config("metadata.index_prefix is required".into()));
    }
    if config.templates.family.trim().is_empty() {
        return Err(LoadError::Config("templates.family is required".into()));
    }

    for (field, format) in [
        ("facts.date_format", &config.facts.date_format),
        ("metadata.date_format", &config.metadata.date_format),
    ] {
        if let Err(LoadError::Config(msg)) = format.validate() {
            return Err(LoadError::Config(format!("{}: {}", field, msg)));
        }
    }

    Ok(())
}
