//! # i2b2-load
//!
//! Bulk loading of tab-delimited extracts into i2b2 tables.
//!
//! This library provides:
//!
//! - **Batch loading** of observation fact and ontology extracts, with
//!   column types introspected from the prepared INSERT
//! - **Row mode** that isolates failures to the offending row
//! - **Table provisioning** from per-vendor DDL templates (PostgreSQL,
//!   Oracle, SQL Server) followed by index creation
//! - **PostgreSQL and SQL Server drivers** over pooled connections
//!
//! ## Example
//!
//! ```rust,no_run
//! use i2b2_load::{Config, LoadService};
//!
//! #[tokio::main]
//! async fn main() -> i2b2_load::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let service = LoadService::new(config).await?;
//!     let stats = service.load_observation_facts("observation_fact.tsv").await?;
//!     println!("Loaded {} rows", stats.rows_loaded);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod dialect;
pub mod drivers;
pub mod error;
pub mod extract;
pub mod loader;
pub mod provision;
pub mod service;

#[cfg(test)]
pub mod testing;

// Re-exports for convenient access
pub use config::{Config, DatabaseType, TargetConfig};
pub use core::{ColumnType, Session, SessionFactory, SqlValue, TemplateSource};
pub use dialect::Dialect;
pub use error::{LoadError, Result};
pub use loader::{BatchLoader, DateFormat, LoadMode, LoadOptions, LoadStats};
pub use provision::{
    IndexFailurePolicy, ProvisionReport, SchemaProvisioner, TableOutcome,
    UnsupportedDialectPolicy, VendorTemplateEngine,
};
pub use service::{HealthCheckResult, LoadService, TargetPoolImpl};
