//! PostgreSQL sessions over a deadpool-postgres pool.
//!
//! Parameter types come from the server's description of the prepared
//! statement. Batches run in one transaction with every row's INSERT
//! pipelined on the connection.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod};
use futures::future::try_join_all;
use rust_decimal::Decimal;
use tokio_postgres::types::{ToSql, Type};
use tokio_postgres::{Config as PgConfig, SimpleQueryMessage, Statement};
use tracing::{debug, info, warn};

use crate::config::TargetConfig;
use crate::core::{
    CoercedRow, ColumnType, ColumnTypes, PreparedStatement, Session, SessionFactory, SqlValue,
};
use crate::dialect::Dialect;
use crate::drivers::common::{pg_connector, SslMode};
use crate::error::{LoadError, Result};

/// Product name reported by PostgreSQL sessions.
pub const PRODUCT_NAME: &str = "PostgreSQL";

/// Connection pool timeout.
const POOL_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

type PgParam = Box<dyn ToSql + Sync + Send>;

/// Opens [`PgSession`]s from a pool.
pub struct PgSessionFactory {
    pool: Pool,
    schema: String,
}

impl PgSessionFactory {
    /// Build the pool, test a connection and resolve the target schema.
    pub async fn connect(config: &TargetConfig) -> Result<Self> {
        let mut pg_config = PgConfig::new();
        pg_config.host(&config.host);
        pg_config.port(config.port());
        pg_config.dbname(&config.database);
        pg_config.user(&config.user);
        pg_config.password(&config.password);
        pg_config.application_name("i2b2-load");

        // Connection options for reliability
        pg_config.keepalives(true);
        pg_config.keepalives_idle(Duration::from_secs(30));
        pg_config.connect_timeout(POOL_CONNECTION_TIMEOUT);

        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };

        let ssl_mode = SslMode::for_target(config)?;
        let mgr = match pg_connector(ssl_mode)? {
            None => {
                warn!("PostgreSQL TLS is disabled. Credentials will be transmitted in plaintext.");
                Manager::from_config(pg_config, tokio_postgres::NoTls, mgr_config)
            }
            Some(connector) => Manager::from_config(pg_config, connector, mgr_config),
        };
        let pool = Pool::builder(mgr)
            .max_size(config.max_connections)
            .build()
            .map_err(|e| LoadError::pool(e, "creating PostgreSQL pool"))?;

        // Test connection
        let client = pool
            .get()
            .await
            .map_err(|e| LoadError::pool(e, "testing PostgreSQL connection"))?;
        let schema = match &config.schema {
            Some(schema) => schema.clone(),
            None => client
                .query_one("SELECT current_schema()", &[])
                .await?
                .get::<_, Option<String>>(0)
                .unwrap_or_else(|| "public".to_string()),
        };

        info!(
            "Connected to PostgreSQL target: {}:{}/{} (schema: {}, ssl_mode: {})",
            config.host,
            config.port(),
            config.database,
            schema,
            ssl_mode
        );

        Ok(Self { pool, schema })
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }
}

#[async_trait]
impl SessionFactory for PgSessionFactory {
    type Session = PgSession;

    async fn open(&self) -> Result<PgSession> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| LoadError::pool(e, "getting PostgreSQL connection"))?;
        Ok(PgSession {
            client,
            schema: self.schema.clone(),
        })
    }
}

/// A pooled PostgreSQL connection. Returned to the pool on drop.
pub struct PgSession {
    client: Object,
    schema: String,
}

/// A server-side prepared statement.
pub struct PgStatement {
    sql: String,
    statement: Statement,
}

impl PreparedStatement for PgStatement {
    fn sql(&self) -> &str {
        &self.sql
    }

    fn parameter_count(&self) -> usize {
        self.statement.params().len()
    }

    fn parameter_types(&self) -> Result<ColumnTypes> {
        self.statement
            .params()
            .iter()
            .enumerate()
            .map(|(i, ty)| column_type(ty).ok_or_else(|| unmapped(&self.sql, i + 1, ty.name())))
            .collect()
    }
}

fn unmapped(sql: &str, position: usize, type_name: &str) -> LoadError {
    LoadError::Introspection(format!(
        "parameter {} of '{}' has unsupported type {}",
        position, sql, type_name
    ))
}

/// Map a PostgreSQL parameter type to a column type tag.
pub fn column_type(ty: &Type) -> Option<ColumnType> {
    let mapped = match ty.name() {
        "text" | "varchar" | "bpchar" | "name" => ColumnType::Text,
        "int2" => ColumnType::SmallInt,
        "int4" => ColumnType::Integer,
        "int8" => ColumnType::BigInt,
        "float4" => ColumnType::Float,
        "float8" => ColumnType::Double,
        "numeric" => ColumnType::Decimal,
        "date" => ColumnType::Date,
        "time" => ColumnType::Time,
        "timestamp" | "timestamptz" => ColumnType::Timestamp,
        "bool" => ColumnType::Boolean,
        "bytea" => ColumnType::Binary,
        _ => return None,
    };
    Some(mapped)
}

/// A NULL typed for the destination parameter.
fn null_param(ty: &Type) -> PgParam {
    match ty.name() {
        "int2" => Box::new(None::<i16>),
        "int4" => Box::new(None::<i32>),
        "int8" => Box::new(None::<i64>),
        "float4" => Box::new(None::<f32>),
        "float8" => Box::new(None::<f64>),
        "numeric" => Box::new(None::<Decimal>),
        "date" => Box::new(None::<NaiveDate>),
        "time" => Box::new(None::<NaiveTime>),
        "timestamp" => Box::new(None::<NaiveDateTime>),
        "timestamptz" => Box::new(None::<DateTime<Utc>>),
        "bool" => Box::new(None::<bool>),
        "bytea" => Box::new(None::<Vec<u8>>),
        _ => Box::new(None::<String>),
    }
}

fn to_param(value: &SqlValue, ty: &Type) -> PgParam {
    match value {
        SqlValue::Null(_) => null_param(ty),
        SqlValue::Bool(v) => Box::new(*v),
        SqlValue::I16(v) => Box::new(*v),
        SqlValue::I32(v) => Box::new(*v),
        SqlValue::I64(v) => Box::new(*v),
        SqlValue::F32(v) => Box::new(*v),
        SqlValue::F64(v) => Box::new(*v),
        SqlValue::Text(v) => Box::new(v.clone()),
        SqlValue::Bytes(v) => Box::new(v.clone()),
        SqlValue::Decimal(v) => Box::new(*v),
        SqlValue::Date(v) => Box::new(*v),
        SqlValue::Time(v) => Box::new(*v),
        SqlValue::DateTime(v) if *ty == Type::TIMESTAMPTZ => Box::new(Utc.from_utc_datetime(v)),
        SqlValue::DateTime(v) => Box::new(*v),
    }
}

fn to_params(stmt: &PgStatement, row: &[SqlValue]) -> Result<Vec<PgParam>> {
    let types = stmt.statement.params();
    if row.len() != types.len() {
        return Err(LoadError::Bind(format!(
            "{} values for {} parameters",
            row.len(),
            types.len()
        )));
    }
    Ok(row.iter().zip(types).map(|(v, ty)| to_param(v, ty)).collect())
}

fn as_refs(params: &[PgParam]) -> Vec<&(dyn ToSql + Sync)> {
    params.iter().map(|p| p.as_ref() as &(dyn ToSql + Sync)).collect()
}

#[async_trait]
impl Session for PgSession {
    type Statement = PgStatement;

    fn schema(&self) -> &str {
        &self.schema
    }

    fn product_name(&self) -> &str {
        PRODUCT_NAME
    }

    async fn prepare(&mut self, sql: &str) -> Result<PgStatement> {
        let native = Dialect::Postgres.native_sql(sql);
        let statement = self.client.prepare(&native).await?;
        Ok(PgStatement {
            sql: sql.to_string(),
            statement,
        })
    }

    async fn execute_row(&mut self, stmt: &PgStatement, row: &[SqlValue]) -> Result<u64> {
        let params = to_params(stmt, row)?;
        Ok(self.client.execute(&stmt.statement, &as_refs(&params)).await?)
    }

    async fn execute_batch(&mut self, stmt: &PgStatement, rows: &[CoercedRow]) -> Result<u64> {
        let params = rows
            .iter()
            .map(|row| to_params(stmt, row))
            .collect::<Result<Vec<_>>>()?;
        let refs: Vec<_> = params.iter().map(|p| as_refs(p)).collect();

        let tx = self.client.transaction().await?;
        let counts = try_join_all(refs.iter().map(|r| tx.execute(&stmt.statement, r.as_slice()))).await?;
        tx.commit().await?;

        debug!("Committed {} rows", rows.len());
        Ok(counts.into_iter().sum())
    }

    async fn execute(&mut self, sql: &str) -> Result<()> {
        self.client.batch_execute(sql).await?;
        Ok(())
    }

    async fn query_exists(&mut self, sql: &str, params: &[String]) -> Result<bool> {
        let native = Dialect::Postgres.native_sql(sql);
        let refs: Vec<&(dyn ToSql + Sync)> =
            params.iter().map(|p| p as &(dyn ToSql + Sync)).collect();
        Ok(!self.client.query(&native, &refs).await?.is_empty())
    }

    async fn query_strings(&mut self, sql: &str) -> Result<Vec<String>> {
        let messages = self.client.simple_query(sql).await?;
        Ok(messages
            .into_iter()
            .filter_map(|m| match m {
                SimpleQueryMessage::Row(row) => row.get(0).map(String::from),
                _ => None,
            })
            .collect())
    }
}
