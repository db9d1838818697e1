//! Configuration type definitions.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::loader::{DateFormat, LoadMode, LoadOptions};
use crate::provision::{IndexFailurePolicy, UnsupportedDialectPolicy, DEFAULT_FAMILY};

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Destination database.
    pub target: TargetConfig,

    /// Row submission settings shared by every load.
    #[serde(default)]
    pub load: LoadConfig,

    /// DDL template location.
    #[serde(default)]
    pub templates: TemplatesConfig,

    /// Observation fact loads.
    #[serde(default)]
    pub facts: FactsConfig,

    /// Ontology metadata provisioning.
    #[serde(default)]
    pub metadata: MetadataConfig,
}

/// Supported destination drivers.
///
/// There is no `oracle` value: Oracle targets need an external
/// `SessionFactory` and bypass [`LoadService`](crate::service::LoadService).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    Postgres,
    Mssql,
}

impl DatabaseType {
    pub fn default_port(&self) -> u16 {
        match self {
            DatabaseType::Postgres => 5432,
            DatabaseType::Mssql => 1433,
        }
    }
}

impl fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatabaseType::Postgres => f.write_str("postgres"),
            DatabaseType::Mssql => f.write_str("mssql"),
        }
    }
}

/// Destination database configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Driver to use.
    pub r#type: DatabaseType,

    /// Database host.
    pub host: String,

    /// Database port (default: the driver's standard port).
    #[serde(default)]
    pub port: Option<u16>,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password.
    #[serde(default)]
    pub password: String,

    /// Schema that generated statements target.
    /// When unset the session's current schema is used.
    #[serde(default)]
    pub schema: Option<String>,

    /// SSL mode (default: "require").
    #[serde(default = "default_require")]
    pub ssl_mode: String,

    /// Pool size (default: 4).
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

impl TargetConfig {
    pub fn port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.r#type.default_port())
    }
}

impl fmt::Debug for TargetConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetConfig")
            .field("type", &self.r#type)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("schema", &self.schema)
            .field("ssl_mode", &self.ssl_mode)
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

/// Row submission configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadConfig {
    /// Rows per batch (default: 10000).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Batch or row-at-a-time submission.
    #[serde(default)]
    pub mode: LoadMode,

    /// Field delimiter (default: TAB).
    #[serde(default = "default_delimiter")]
    pub delimiter: char,

    /// Comment line prefix for metadata extracts (default: "#").
    #[serde(default = "default_comment_prefix")]
    pub comment_prefix: Option<String>,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            mode: LoadMode::default(),
            delimiter: default_delimiter(),
            comment_prefix: default_comment_prefix(),
        }
    }
}

impl LoadConfig {
    /// Options with no comment skipping and the given date format.
    pub fn options(&self, date_format: DateFormat) -> LoadOptions {
        LoadOptions::default()
            .with_batch_size(self.batch_size)
            .with_mode(self.mode)
            .with_delimiter(self.delimiter)
            .with_date_format(date_format)
    }
}

/// Template configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplatesConfig {
    /// Template root directory. Bundled templates are used when unset.
    #[serde(default)]
    pub dir: Option<PathBuf>,

    /// Template family (default: "metadata").
    #[serde(default = "default_family")]
    pub family: String,
}

impl Default for TemplatesConfig {
    fn default() -> Self {
        Self {
            dir: None,
            family: default_family(),
        }
    }
}

/// Observation fact configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactsConfig {
    /// Fact table (default: "observation_fact").
    #[serde(default = "default_fact_table")]
    pub table: String,

    /// Date format of fact extracts (default: "%d-%b-%y").
    #[serde(default = "default_fact_date_format")]
    pub date_format: DateFormat,
}

impl Default for FactsConfig {
    fn default() -> Self {
        Self {
            table: default_fact_table(),
            date_format: default_fact_date_format(),
        }
    }
}

/// Ontology metadata configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataConfig {
    /// Ontology table (default: "sharephe_metadata").
    #[serde(default = "default_metadata_table")]
    pub table: String,

    /// Prefix for derived index names (default: "shp").
    #[serde(default = "default_index_prefix")]
    pub index_prefix: String,

    /// Date format of metadata extracts (default: "%Y-%m-%d").
    #[serde(default)]
    pub date_format: DateFormat,

    /// Behavior when the target has no templates (default: fail).
    #[serde(default)]
    pub unsupported_dialect: UnsupportedDialectPolicy,

    /// Behavior when an index statement fails (default: abort).
    #[serde(default)]
    pub index_failures: IndexFailurePolicy,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            table: default_metadata_table(),
            index_prefix: default_index_prefix(),
            date_format: DateFormat::default(),
            unsupported_dialect: UnsupportedDialectPolicy::default(),
            index_failures: IndexFailurePolicy::default(),
        }
    }
}

fn default_require() -> String {
    "require".to_string()
}

fn default_max_connections() -> usize {
    4
}

fn default_batch_size() -> usize {
    crate::core::DEFAULT_BATCH_SIZE
}

fn default_delimiter() -> char {
    '\t'
}

fn default_comment_prefix() -> Option<String> {
    Some("#".to_string())
}

fn default_family() -> String {
    DEFAULT_FAMILY.to_string()
}

fn default_fact_table() -> String {
    "observation_fact".to_string()
}

fn default_fact_date_format() -> DateFormat {
    DateFormat::OBSERVATION_FACT
}

fn default_metadata_table() -> String {
    "sharephe_metadata".to_string()
}

fn default_index_prefix() -> String {
    "shp".to_string()
}
