//! SQL Server sessions over a bb8 pool of tiberius clients.
//!
//! TDS has no client-side prepare, so a statement is "prepared" by asking
//! the server to describe its parameters with
//! `sp_describe_undeclared_parameters`. Batches are sent as multi-row
//! `INSERT ... VALUES` statements inside one transaction.

use std::time::Duration;

use async_trait::async_trait;
use bb8::{Pool, PooledConnection};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use tiberius::numeric::Numeric;
use tiberius::{AuthMethod, Client, ColumnData, Config, EncryptionLevel, FromSql, Query, Row};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, info, warn};

use crate::config::TargetConfig;
use crate::core::{
    CoercedRow, ColumnType, ColumnTypes, PreparedStatement, Session, SessionFactory, SqlValue,
};
use crate::dialect::Dialect;
use crate::drivers::common::SslMode;
use crate::error::{LoadError, Result};

/// Product name reported by SQL Server sessions.
pub const PRODUCT_NAME: &str = "Microsoft SQL Server";

/// Rows per multi-row INSERT.
const MAX_ROWS_PER_INSERT: usize = 1000;

/// Bind parameters per request.
const MAX_PARAMS_PER_REQUEST: usize = 2100;

/// Maximum TDS packet size.
const TDS_MAX_PACKET_SIZE: u32 = 32767;

/// Connection pool timeouts.
const POOL_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(300);
const POOL_MAX_LIFETIME: Duration = Duration::from_secs(1800);
const TCP_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Connection manager for bb8 pool with Tiberius.
#[derive(Clone)]
pub struct TiberiusConnectionManager {
    config: TargetConfig,
    ssl_mode: SslMode,
}

impl TiberiusConnectionManager {
    pub fn new(config: TargetConfig) -> Result<Self> {
        let ssl_mode = SslMode::for_target(&config)?;
        Ok(Self { config, ssl_mode })
    }

    fn build_config(&self) -> Config {
        let mut config = Config::new();
        config.host(&self.config.host);
        config.port(self.config.port());
        config.database(&self.config.database);
        config.application_name("i2b2-load");
        config.authentication(AuthMethod::sql_server(
            &self.config.user,
            &self.config.password,
        ));

        match self.ssl_mode {
            SslMode::Disable => {
                config.encryption(EncryptionLevel::NotSupported);
            }
            SslMode::Require | SslMode::Verify => {
                config.trust_cert();
                config.encryption(EncryptionLevel::Required);
            }
        }

        config.packet_size(TDS_MAX_PACKET_SIZE);
        config
    }
}

fn io_error(e: std::io::Error, context: &str) -> tiberius::error::Error {
    tiberius::error::Error::Io {
        kind: e.kind(),
        message: format!("{}: {}", context, e),
    }
}

#[async_trait]
impl bb8::ManageConnection for TiberiusConnectionManager {
    type Connection = Client<Compat<TcpStream>>;
    type Error = tiberius::error::Error;

    async fn connect(&self) -> std::result::Result<Self::Connection, Self::Error> {
        let config = self.build_config();
        let tcp = TcpStream::connect(config.get_addr())
            .await
            .map_err(|e| io_error(e, "connecting"))?;
        tcp.set_nodelay(true).ok();

        // Keepalives need the std socket; fall back to a fresh connection
        // when the conversion fails.
        let tcp = match tcp.into_std() {
            Ok(std_tcp) => {
                let socket = socket2::Socket::from(std_tcp);
                let keepalive = socket2::TcpKeepalive::new()
                    .with_time(TCP_KEEPALIVE_INTERVAL)
                    .with_interval(TCP_KEEPALIVE_INTERVAL);
                if let Err(e) = socket.set_tcp_keepalive(&keepalive) {
                    warn!("Failed to set TCP keepalive on SQL Server connection: {}", e);
                }

                let std_tcp: std::net::TcpStream = socket.into();
                std_tcp.set_nonblocking(true).ok();
                TcpStream::from_std(std_tcp).map_err(|e| io_error(e, "converting socket"))?
            }
            Err(_) => {
                warn!("Failed to configure TCP keepalives on SQL Server connection");
                let tcp = TcpStream::connect(config.get_addr())
                    .await
                    .map_err(|e| io_error(e, "reconnecting"))?;
                tcp.set_nodelay(true).ok();
                tcp
            }
        };

        Client::connect(config, tcp.compat_write()).await
    }

    async fn is_valid(&self, conn: &mut Self::Connection) -> std::result::Result<(), Self::Error> {
        conn.simple_query("SELECT 1").await?.into_row().await?;
        Ok(())
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        false
    }
}

type MssqlConnection = PooledConnection<'static, TiberiusConnectionManager>;

/// Opens [`MssqlSession`]s from a pool.
pub struct MssqlSessionFactory {
    pool: Pool<TiberiusConnectionManager>,
    schema: String,
}

impl MssqlSessionFactory {
    /// Build the pool, test a connection and resolve the target schema.
    pub async fn connect(config: &TargetConfig) -> Result<Self> {
        let manager = TiberiusConnectionManager::new(config.clone())?;
        let pool = Pool::builder()
            .max_size(config.max_connections as u32)
            .connection_timeout(POOL_CONNECTION_TIMEOUT)
            .idle_timeout(Some(POOL_IDLE_TIMEOUT))
            .max_lifetime(Some(POOL_MAX_LIFETIME))
            .test_on_check_out(true)
            .build(manager)
            .await
            .map_err(|e| LoadError::pool(e, "creating SQL Server pool"))?;

        let schema = {
            let mut conn = pool
                .get()
                .await
                .map_err(|e| LoadError::pool(e, "testing SQL Server connection"))?;
            match &config.schema {
                Some(schema) => {
                    conn.simple_query("SELECT 1").await?.into_row().await?;
                    schema.clone()
                }
                None => conn
                    .simple_query("SELECT SCHEMA_NAME()")
                    .await?
                    .into_row()
                    .await?
                    .and_then(|row| row.get::<&str, _>(0).map(String::from))
                    .unwrap_or_else(|| "dbo".to_string()),
            }
        };

        info!(
            "Connected to SQL Server target: {}:{}/{} (schema: {}, pool_size={})",
            config.host,
            config.port(),
            config.database,
            schema,
            config.max_connections
        );

        Ok(Self { pool, schema })
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }
}

#[async_trait]
impl SessionFactory for MssqlSessionFactory {
    type Session = MssqlSession;

    async fn open(&self) -> Result<MssqlSession> {
        let conn = self
            .pool
            .get_owned()
            .await
            .map_err(|e| LoadError::pool(e, "getting SQL Server connection"))?;
        Ok(MssqlSession {
            conn,
            schema: self.schema.clone(),
        })
    }
}

/// A pooled SQL Server connection. Returned to the pool on drop.
pub struct MssqlSession {
    conn: MssqlConnection,
    schema: String,
}

/// A described statement.
pub struct MssqlStatement {
    sql: String,
    native: String,
    types: ColumnTypes,
}

impl PreparedStatement for MssqlStatement {
    fn sql(&self) -> &str {
        &self.sql
    }

    fn parameter_count(&self) -> usize {
        self.types.len()
    }

    fn parameter_types(&self) -> Result<ColumnTypes> {
        Ok(self.types.clone())
    }
}

/// Map a SQL Server system type name (without length/precision) to a tag.
pub fn column_type(type_name: &str) -> Option<ColumnType> {
    let base = type_name.split('(').next().unwrap_or("").trim().to_lowercase();
    let mapped = match base.as_str() {
        "char" | "varchar" | "nchar" | "nvarchar" | "text" | "ntext" | "xml" => ColumnType::Text,
        "tinyint" | "smallint" => ColumnType::SmallInt,
        "int" => ColumnType::Integer,
        "bigint" => ColumnType::BigInt,
        "real" => ColumnType::Float,
        "float" => ColumnType::Double,
        "decimal" | "numeric" | "money" | "smallmoney" => ColumnType::Decimal,
        "date" => ColumnType::Date,
        "time" => ColumnType::Time,
        "datetime" | "datetime2" | "smalldatetime" => ColumnType::Timestamp,
        "bit" => ColumnType::Boolean,
        "binary" | "varbinary" | "image" => ColumnType::Binary,
        _ => return None,
    };
    Some(mapped)
}

fn bind_value(query: &mut Query<'_>, value: &SqlValue) {
    match value {
        SqlValue::Null(ty) => match ty {
            ColumnType::Text => query.bind(None::<String>),
            ColumnType::SmallInt => query.bind(None::<i16>),
            ColumnType::Integer => query.bind(None::<i32>),
            ColumnType::BigInt => query.bind(None::<i64>),
            ColumnType::Float => query.bind(None::<f32>),
            ColumnType::Double => query.bind(None::<f64>),
            ColumnType::Decimal => query.bind(None::<Numeric>),
            ColumnType::Date => query.bind(None::<NaiveDate>),
            ColumnType::Time => query.bind(None::<NaiveTime>),
            ColumnType::Timestamp => query.bind(None::<NaiveDateTime>),
            ColumnType::Boolean => query.bind(None::<bool>),
            ColumnType::Binary => query.bind(None::<Vec<u8>>),
        },
        SqlValue::Bool(v) => query.bind(*v),
        SqlValue::I16(v) => query.bind(*v),
        SqlValue::I32(v) => query.bind(*v),
        SqlValue::I64(v) => query.bind(*v),
        SqlValue::F32(v) => query.bind(*v),
        SqlValue::F64(v) => query.bind(*v),
        SqlValue::Text(v) => query.bind(v.clone()),
        SqlValue::Bytes(v) => query.bind(v.clone()),
        SqlValue::Decimal(v) => query.bind(Numeric::new_with_scale(v.mantissa(), v.scale() as u8)),
        SqlValue::Date(v) => query.bind(*v),
        SqlValue::Time(v) => query.bind(*v),
        SqlValue::DateTime(v) => query.bind(*v),
    }
}

fn check_arity(stmt: &MssqlStatement, row: &[SqlValue]) -> Result<()> {
    if row.len() != stmt.types.len() {
        return Err(LoadError::Bind(format!(
            "{} values for {} parameters",
            row.len(),
            stmt.types.len()
        )));
    }
    Ok(())
}

/// `INSERT INTO s.t (cols)` part of a canonical single-row INSERT.
fn insert_head(sql: &str) -> Option<&str> {
    let (head, values) = sql.split_once(" VALUES ")?;
    if head.starts_with("INSERT INTO ") && values.trim_start().starts_with('(') {
        Some(head)
    } else {
        None
    }
}

/// Rows per multi-row INSERT for a statement with `columns` parameters.
fn rows_per_insert(columns: usize) -> usize {
    ((MAX_PARAMS_PER_REQUEST - 1) / columns.max(1)).clamp(1, MAX_ROWS_PER_INSERT)
}

/// Multi-row INSERT text for `rows` rows of `columns` values.
fn multi_row_insert(head: &str, columns: usize, rows: usize) -> String {
    let mut sql = String::with_capacity(head.len() + rows * columns * 6);
    sql.push_str(head);
    sql.push_str(" VALUES ");
    let mut index = 0;
    for r in 0..rows {
        if r > 0 {
            sql.push(',');
        }
        sql.push('(');
        for c in 0..columns {
            if c > 0 {
                sql.push(',');
            }
            index += 1;
            sql.push_str(&Dialect::SqlServer.param_placeholder(index));
        }
        sql.push(')');
    }
    sql
}

/// Render one result cell as text; NULL and unsupported kinds give `None`.
fn cell_text(data: &ColumnData<'static>) -> Option<String> {
    match data {
        ColumnData::U8(v) => v.map(|v| v.to_string()),
        ColumnData::I16(v) => v.map(|v| v.to_string()),
        ColumnData::I32(v) => v.map(|v| v.to_string()),
        ColumnData::I64(v) => v.map(|v| v.to_string()),
        ColumnData::F32(v) => v.map(|v| v.to_string()),
        ColumnData::F64(v) => v.map(|v| v.to_string()),
        ColumnData::Bit(v) => v.map(|v| if v { "1" } else { "0" }.to_string()),
        ColumnData::String(v) => v.as_ref().map(|s| s.to_string()),
        ColumnData::Guid(v) => v.map(|v| v.to_string()),
        ColumnData::Numeric(v) => v.map(|v| v.to_string()),
        ColumnData::Binary(v) => v.as_ref().map(|b| String::from_utf8_lossy(b).into_owned()),
        ColumnData::Date(_) => NaiveDate::from_sql(data).ok().flatten().map(|d| d.to_string()),
        ColumnData::Time(_) => NaiveTime::from_sql(data).ok().flatten().map(|t| t.to_string()),
        ColumnData::DateTime(_) | ColumnData::SmallDateTime(_) | ColumnData::DateTime2(_) => {
            NaiveDateTime::from_sql(data).ok().flatten().map(|t| t.to_string())
        }
        _ => None,
    }
}

impl MssqlSession {
    /// Run a statement and drain its results.
    async fn run(&mut self, sql: &str) -> Result<()> {
        self.conn.simple_query(sql).await?.into_results().await?;
        Ok(())
    }

    async fn describe(&mut self, native: &str) -> Result<ColumnTypes> {
        let mut query = Query::new("EXEC sp_describe_undeclared_parameters @tsql = @P1");
        query.bind(native.to_string());
        let rows: Vec<Row> = query
            .query(&mut *self.conn)
            .await?
            .into_first_result()
            .await?;

        let mut described = Vec::with_capacity(rows.len());
        for row in &rows {
            let ordinal = row.get::<i32, _>("parameter_ordinal").unwrap_or(0);
            let type_name = row
                .get::<&str, _>("suggested_system_type_name")
                .unwrap_or_default();
            let ty = column_type(type_name).ok_or_else(|| {
                LoadError::Introspection(format!(
                    "parameter {} of '{}' has unsupported type {}",
                    ordinal, native, type_name
                ))
            })?;
            described.push((ordinal, ty));
        }
        described.sort_by_key(|(ordinal, _)| *ordinal);

        Ok(described.into_iter().map(|(_, ty)| ty).collect())
    }

    async fn insert_chunks(&mut self, stmt: &MssqlStatement, rows: &[CoercedRow]) -> Result<u64> {
        let columns = stmt.types.len();
        let mut written = 0;

        match insert_head(&stmt.sql) {
            Some(head) => {
                for chunk in rows.chunks(rows_per_insert(columns)) {
                    let sql = multi_row_insert(head, columns, chunk.len());
                    let mut query = Query::new(sql);
                    for value in chunk.iter().flatten() {
                        bind_value(&mut query, value);
                    }
                    written += query.execute(&mut *self.conn).await?.total();
                }
            }
            None => {
                for row in rows {
                    let mut query = Query::new(stmt.native.clone());
                    for value in row {
                        bind_value(&mut query, value);
                    }
                    written += query.execute(&mut *self.conn).await?.total();
                }
            }
        }

        Ok(written)
    }
}

#[async_trait]
impl Session for MssqlSession {
    type Statement = MssqlStatement;

    fn schema(&self) -> &str {
        &self.schema
    }

    fn product_name(&self) -> &str {
        PRODUCT_NAME
    }

    async fn prepare(&mut self, sql: &str) -> Result<MssqlStatement> {
        let native = Dialect::SqlServer.native_sql(sql);
        let types = self.describe(&native).await?;
        Ok(MssqlStatement {
            sql: sql.to_string(),
            native,
            types,
        })
    }

    async fn execute_row(&mut self, stmt: &MssqlStatement, row: &[SqlValue]) -> Result<u64> {
        check_arity(stmt, row)?;
        let mut query = Query::new(stmt.native.clone());
        for value in row {
            bind_value(&mut query, value);
        }
        Ok(query.execute(&mut *self.conn).await?.total())
    }

    async fn execute_batch(&mut self, stmt: &MssqlStatement, rows: &[CoercedRow]) -> Result<u64> {
        for row in rows {
            check_arity(stmt, row)?;
        }

        self.run("BEGIN TRANSACTION").await?;
        match self.insert_chunks(stmt, rows).await {
            Ok(written) => {
                self.run("COMMIT TRANSACTION").await?;
                debug!("Committed {} rows", written);
                Ok(written)
            }
            Err(e) => {
                if let Err(rollback) = self.run("IF @@TRANCOUNT > 0 ROLLBACK TRANSACTION").await {
                    warn!("Rollback failed: {}", rollback);
                }
                Err(e)
            }
        }
    }

    async fn execute(&mut self, sql: &str) -> Result<()> {
        self.conn.execute(sql, &[]).await?;
        Ok(())
    }

    async fn query_exists(&mut self, sql: &str, params: &[String]) -> Result<bool> {
        let mut query = Query::new(Dialect::SqlServer.native_sql(sql));
        for param in params {
            query.bind(param.clone());
        }
        Ok(query
            .query(&mut *self.conn)
            .await?
            .into_row()
            .await?
            .is_some())
    }

    async fn query_strings(&mut self, sql: &str) -> Result<Vec<String>> {
        let rows = self
            .conn
            .simple_query(sql)
            .await?
            .into_first_result()
            .await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| row.into_iter().next().and_then(|cell| cell_text(&cell)))
            .collect())
    }
}
