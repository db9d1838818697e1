//! Configuration-driven entry point.
//!
//! [`LoadService`] owns the target connection pool and the template source
//! and exposes the load, provision, delete and query operations with the
//! table names, date formats and policies taken from [`Config`].

use std::collections::BTreeSet;
use std::path::Path;
use std::time::Instant;

use serde::Serialize;
use tracing::{info, warn};

use crate::config::{Config, DatabaseType};
use crate::core::{ColumnType, Session, SessionFactory, TemplateSource};
use crate::dialect::Dialect;
use crate::drivers::{MssqlSessionFactory, PgSessionFactory};
use crate::error::Result;
use crate::loader::{BatchLoader, LoadOptions, LoadStats};
use crate::provision::{
    BundledTemplates, DirTemplateSource, ProvisionReport, SchemaProvisioner, VendorTemplateEngine,
};

/// Target pool, one variant per supported driver.
///
/// Oracle has no variant; see [`crate::drivers`].
pub enum TargetPoolImpl {
    Postgres(PgSessionFactory),
    Mssql(MssqlSessionFactory),
}

impl TargetPoolImpl {
    /// Connect the pool described by `config.target`.
    pub async fn from_config(config: &Config) -> Result<Self> {
        match config.target.r#type {
            DatabaseType::Postgres => Ok(Self::Postgres(
                PgSessionFactory::connect(&config.target).await?,
            )),
            DatabaseType::Mssql => Ok(Self::Mssql(
                MssqlSessionFactory::connect(&config.target).await?,
            )),
        }
    }

    pub fn db_type(&self) -> &'static str {
        match self {
            Self::Postgres(_) => "postgres",
            Self::Mssql(_) => "mssql",
        }
    }

    /// Schema resolved when the pool was connected.
    pub fn schema(&self) -> &str {
        match self {
            Self::Postgres(p) => p.schema(),
            Self::Mssql(p) => p.schema(),
        }
    }
}

/// Outcome of [`LoadService::health_check`].
#[derive(Debug, Clone, Serialize)]
pub struct HealthCheckResult {
    pub db_type: String,
    pub healthy: bool,
    pub latency_ms: u64,
    pub schema: Option<String>,
    pub product_name: Option<String>,
    pub dialect: Option<String>,
    pub error: Option<String>,
}

/// Loads and provisions against the configured PostgreSQL or SQL Server
/// target. Oracle targets use an external `SessionFactory` with
/// [`BatchLoader`] and [`SchemaProvisioner`] instead.
pub struct LoadService {
    config: Config,
    pool: TargetPoolImpl,
    templates: Box<dyn TemplateSource>,
}

impl LoadService {
    /// Connect to the target and select the template source.
    pub async fn new(config: Config) -> Result<Self> {
        info!(
            "Connecting to {} target {}:{}/{} (config {})",
            config.target.r#type,
            config.target.host,
            config.target.port(),
            config.target.database,
            &config.hash()[..12]
        );
        let pool = TargetPoolImpl::from_config(&config).await?;
        let templates = template_source(&config);
        Ok(Self {
            config,
            pool,
            templates,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn pool(&self) -> &TargetPoolImpl {
        &self.pool
    }

    /// Load an observation fact extract into the configured fact table.
    pub async fn load_observation_facts(&self, file: impl AsRef<Path>) -> Result<LoadStats> {
        let file = file.as_ref();
        match &self.pool {
            TargetPoolImpl::Postgres(p) => load_observation_facts(p, &self.config, file).await,
            TargetPoolImpl::Mssql(p) => load_observation_facts(p, &self.config, file).await,
        }
    }

    /// Create the configured ontology table if needed and load every
    /// extract in `dir` into it.
    pub async fn provision_metadata(&self, dir: impl AsRef<Path>) -> Result<ProvisionReport> {
        let dir = dir.as_ref();
        let templates = self.templates.as_ref();
        match &self.pool {
            TargetPoolImpl::Postgres(p) => provision_metadata(p, &self.config, templates, dir).await,
            TargetPoolImpl::Mssql(p) => provision_metadata(p, &self.config, templates, dir).await,
        }
    }

    /// Load any extract into any table with explicit options.
    pub async fn load_file(
        &self,
        table: &str,
        file: impl AsRef<Path>,
        options: LoadOptions,
    ) -> Result<LoadStats> {
        let file = file.as_ref();
        match &self.pool {
            TargetPoolImpl::Postgres(p) => BatchLoader::new(p, options).load_file(table, file).await,
            TargetPoolImpl::Mssql(p) => BatchLoader::new(p, options).load_file(table, file).await,
        }
    }

    pub async fn delete_by_column_value(
        &self,
        table: &str,
        column: &str,
        value: &str,
        column_type: Option<ColumnType>,
    ) -> Result<u64> {
        let options = self.config.fact_load_options();
        match &self.pool {
            TargetPoolImpl::Postgres(p) => {
                BatchLoader::new(p, options)
                    .delete_by_column_value(table, column, value, column_type)
                    .await
            }
            TargetPoolImpl::Mssql(p) => {
                BatchLoader::new(p, options)
                    .delete_by_column_value(table, column, value, column_type)
                    .await
            }
        }
    }

    pub async fn column_values(&self, table: &str, column: &str) -> Result<Vec<String>> {
        let options = self.config.fact_load_options();
        match &self.pool {
            TargetPoolImpl::Postgres(p) => {
                BatchLoader::new(p, options).column_values(table, column).await
            }
            TargetPoolImpl::Mssql(p) => {
                BatchLoader::new(p, options).column_values(table, column).await
            }
        }
    }

    pub async fn unique_column_values(&self, table: &str, column: &str) -> Result<BTreeSet<String>> {
        Ok(self.column_values(table, column).await?.into_iter().collect())
    }

    /// Open a session and report what the target says about itself.
    pub async fn health_check(&self) -> HealthCheckResult {
        let db_type = self.pool.db_type();
        match &self.pool {
            TargetPoolImpl::Postgres(p) => health_check(db_type, p).await,
            TargetPoolImpl::Mssql(p) => health_check(db_type, p).await,
        }
    }
}

fn template_source(config: &Config) -> Box<dyn TemplateSource> {
    match &config.templates.dir {
        Some(dir) => {
            info!("Using templates from {}", dir.display());
            Box::new(DirTemplateSource::new(dir.clone()))
        }
        None => Box::new(BundledTemplates),
    }
}

async fn load_observation_facts<F: SessionFactory>(
    factory: &F,
    config: &Config,
    file: &Path,
) -> Result<LoadStats> {
    BatchLoader::new(factory, config.fact_load_options())
        .load_file(&config.facts.table, file)
        .await
}

async fn provision_metadata<F: SessionFactory>(
    factory: &F,
    config: &Config,
    templates: &dyn TemplateSource,
    dir: &Path,
) -> Result<ProvisionReport> {
    let engine = VendorTemplateEngine::new(templates, config.templates.family.clone());
    SchemaProvisioner::new(factory, engine, config.metadata_load_options())
        .with_unsupported_dialect(config.metadata.unsupported_dialect)
        .with_index_failures(config.metadata.index_failures)
        .provision(&config.metadata.table, &config.metadata.index_prefix, dir)
        .await
}

async fn health_check<F: SessionFactory>(db_type: &str, factory: &F) -> HealthCheckResult {
    let start = Instant::now();
    let mut result = HealthCheckResult {
        db_type: db_type.to_string(),
        healthy: false,
        latency_ms: 0,
        schema: None,
        product_name: None,
        dialect: None,
        error: None,
    };

    match factory.open().await {
        Ok(session) => {
            let dialect = Dialect::from_product_name(session.product_name());
            result.healthy = true;
            result.schema = Some(session.schema().to_string());
            result.product_name = Some(session.product_name().to_string());
            result.dialect = Some(dialect.name().to_string());
        }
        Err(e) => {
            warn!("Health check failed: {}", e);
            result.error = Some(e.to_string());
        }
    }
    result.latency_ms = start.elapsed().as_millis() as u64;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::SqlValue;
    use crate::provision::TableOutcome;
    use crate::testing::{MemoryDatabase, MemoryTable};
    use chrono::NaiveDate;
    use tempfile::TempDir;

    fn config(extra: &str) -> Config {
        let yaml = format!(
            "target:\n  type: postgres\n  host: localhost\n  database: i2b2\n  user: i2b2\n  ssl_mode: disable\n{}",
            extra
        );
        Config::from_yaml(&yaml).unwrap()
    }

    #[tokio::test]
    async fn test_observation_facts_use_fact_table_and_date_format() {
        let db = MemoryDatabase::postgres("i2b2demodata");
        db.create_table(
            MemoryTable::new("observation_fact")
                .column("encounter_num", ColumnType::Integer)
                .column("concept_cd", ColumnType::Text)
                .column("start_date", ColumnType::Date),
        );
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("facts.tsv");
        std::fs::write(
            &file,
            "encounter_num\tconcept_cd\tstart_date\n7\tICD9:250\t15-Mar-21\n",
        )
        .unwrap();

        let stats = load_observation_facts(&db, &config(""), &file).await.unwrap();

        assert_eq!(stats.table, "observation_fact");
        assert_eq!(stats.rows_loaded, 1);
        assert_eq!(
            db.rows("observation_fact")[0][2],
            SqlValue::Date(NaiveDate::from_ymd_opt(2021, 3, 15).unwrap())
        );
    }

    #[tokio::test]
    async fn test_provision_metadata_uses_configured_names() {
        let db = MemoryDatabase::postgres("i2b2metadata");
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("phenotypes.tsv"),
            "c_hlevel\tc_fullname\tupdate_date\n# header note\n1\t\\phe\\\t2023-05-01\n",
        )
        .unwrap();
        let config = config("metadata:\n  table: phe_metadata\n  index_prefix: phe\n");

        let report = provision_metadata(&db, &config, &BundledTemplates, dir.path())
            .await
            .unwrap();

        assert_eq!(report.table, "phe_metadata");
        assert_eq!(report.outcome, TableOutcome::Created);
        assert_eq!(report.rows_loaded(), 1);
        assert_eq!(report.loads[0].lines_skipped, 1);
        let executed = db.executed();
        assert!(executed[0].starts_with("CREATE TABLE phe_metadata"));
        assert!(executed
            .iter()
            .any(|s| s.contains("META_FULLNAME_IDX_phe ON phe_metadata")));
    }

    #[tokio::test]
    async fn test_provision_metadata_skip_policy_from_config() {
        let db = MemoryDatabase::new("SQLite", "main");
        let dir = TempDir::new().unwrap();
        let config = config("metadata:\n  unsupported_dialect: skip\n");

        let report = provision_metadata(&db, &config, &BundledTemplates, dir.path())
            .await
            .unwrap();
        assert!(matches!(report.outcome, TableOutcome::Skipped { .. }));
    }

    #[tokio::test]
    async fn test_health_check_reports_target() {
        let db = MemoryDatabase::new("Microsoft SQL Server", "dbo");
        let result = health_check("mssql", &db).await;

        assert!(result.healthy);
        assert_eq!(result.schema.as_deref(), Some("dbo"));
        assert_eq!(result.product_name.as_deref(), Some("Microsoft SQL Server"));
        assert_eq!(result.dialect.as_deref(), Some("sqlserver"));
        assert!(result.error.is_none());
        assert_eq!(db.open_sessions(), 0);
    }

    #[tokio::test]
    async fn test_health_check_reports_open_failure() {
        let db = MemoryDatabase::postgres("public");
        db.fail_open();
        let result = health_check("postgres", &db).await;

        assert!(!result.healthy);
        assert!(result.schema.is_none());
        assert!(result.error.unwrap().contains("connection refused"));
    }

    #[test]
    fn test_template_source_selection() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("metadata/postgresql")).unwrap();
        std::fs::write(
            dir.path().join("metadata/postgresql/metadata_table.sql"),
            "CREATE TABLE I2B2 (id INT)",
        )
        .unwrap();
        let from_dir = config(&format!("templates:\n  dir: {}\n", dir.path().display()));

        let source = template_source(&from_dir);
        let text = source
            .read(Path::new("metadata/postgresql/metadata_table.sql"))
            .unwrap();
        assert_eq!(text, "CREATE TABLE I2B2 (id INT)");

        let bundled = template_source(&config(""));
        assert!(bundled
            .read(Path::new("metadata/postgresql/metadata_table.sql"))
            .unwrap()
            .contains("CREATE TABLE I2B2"));
    }
}
