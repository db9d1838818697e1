//! In-memory session used by unit tests.
//!
//! Understands just enough SQL to stand in for a database: the generated
//! INSERT / DELETE / SELECT shapes, the catalog existence checks, and
//! `CREATE TABLE` / `CREATE INDEX` statements from the templates. Every
//! submission is recorded so tests can assert on batch sizes and order.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::core::{
    CoercedRow, ColumnType, ColumnTypes, PreparedStatement, Session, SessionFactory, SqlValue,
};
use crate::error::{LoadError, Result};

#[derive(Debug, Clone)]
pub struct MemoryTable {
    name: String,
    columns: Vec<(String, ColumnType)>,
}

impl MemoryTable {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_lowercase(),
            columns: Vec::new(),
        }
    }

    pub fn column(mut self, name: &str, ty: ColumnType) -> Self {
        self.columns.push((name.to_lowercase(), ty));
        self
    }

    fn type_of(&self, column: &str) -> Option<ColumnType> {
        self.columns
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(column))
            .map(|(_, ty)| *ty)
    }
}

#[derive(Debug, Default)]
struct State {
    product_name: String,
    schema: String,
    tables: HashMap<String, MemoryTable>,
    rows: HashMap<String, Vec<Vec<(String, SqlValue)>>>,
    batch_sizes: Vec<usize>,
    row_executions: usize,
    executed: Vec<String>,
    failing_statements: Vec<String>,
    failing_values: Vec<String>,
    fail_batches: bool,
    fail_open: bool,
    open_sessions: usize,
    max_open_sessions: usize,
}

/// Shared in-memory database; clones see the same state.
#[derive(Debug, Clone)]
pub struct MemoryDatabase {
    state: Arc<Mutex<State>>,
}

impl MemoryDatabase {
    pub fn new(product_name: &str, schema: &str) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                product_name: product_name.to_string(),
                schema: schema.to_string(),
                ..State::default()
            })),
        }
    }

    pub fn postgres(schema: &str) -> Self {
        Self::new("PostgreSQL", schema)
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn create_table(&self, table: MemoryTable) {
        self.lock().tables.insert(table.name.clone(), table);
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.lock().tables.contains_key(&name.to_lowercase())
    }

    /// Declared column names of `table`, empty when it does not exist.
    pub fn columns(&self, table: &str) -> Vec<String> {
        self.lock()
            .tables
            .get(&table.to_lowercase())
            .map(|t| t.columns.iter().map(|(name, _)| name.clone()).collect())
            .unwrap_or_default()
    }

    /// Make any statement containing `fragment` fail.
    pub fn fail_statements_containing(&self, fragment: &str) {
        self.lock().failing_statements.push(fragment.to_string());
    }

    /// Make any row containing this text value fail when written.
    pub fn fail_rows_with_value(&self, value: &str) {
        self.lock().failing_values.push(value.to_string());
    }

    pub fn fail_batches(&self) {
        self.lock().fail_batches = true;
    }

    pub fn fail_open(&self) {
        self.lock().fail_open = true;
    }

    pub fn session(&self) -> MemorySession {
        let (schema, product_name) = {
            let mut state = self.lock();
            state.open_sessions += 1;
            state.max_open_sessions = state.max_open_sessions.max(state.open_sessions);
            (state.schema.clone(), state.product_name.clone())
        };
        MemorySession {
            db: self.clone(),
            schema,
            product_name,
        }
    }

    /// Rows of `table` in insertion order, laid out in declared column order.
    pub fn rows(&self, table: &str) -> Vec<CoercedRow> {
        let state = self.lock();
        let Some(def) = state.tables.get(&table.to_lowercase()) else {
            return Vec::new();
        };
        state
            .rows
            .get(&def.name)
            .map(|rows| {
                rows.iter()
                    .map(|row| {
                        def.columns
                            .iter()
                            .map(|(name, ty)| {
                                row.iter()
                                    .find(|(c, _)| c == name)
                                    .map(|(_, v)| v.clone())
                                    .unwrap_or(SqlValue::Null(*ty))
                            })
                            .collect()
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.lock().batch_sizes.clone()
    }

    pub fn row_executions(&self) -> usize {
        self.lock().row_executions
    }

    pub fn executed(&self) -> Vec<String> {
        self.lock().executed.clone()
    }

    pub fn open_sessions(&self) -> usize {
        self.lock().open_sessions
    }

    pub fn max_open_sessions(&self) -> usize {
        self.lock().max_open_sessions
    }
}

#[async_trait]
impl SessionFactory for MemoryDatabase {
    type Session = MemorySession;

    async fn open(&self) -> Result<MemorySession> {
        if self.lock().fail_open {
            return Err(LoadError::pool("connection refused", "opening memory session"));
        }
        Ok(self.session())
    }
}

#[derive(Debug, Clone)]
enum StatementKind {
    Insert { table: String, columns: Vec<String> },
    Delete { table: String, column: String },
}

#[derive(Debug)]
pub struct MemoryStatement {
    sql: String,
    kind: StatementKind,
    types: ColumnTypes,
}

impl PreparedStatement for MemoryStatement {
    fn sql(&self) -> &str {
        &self.sql
    }

    fn parameter_count(&self) -> usize {
        self.sql.matches('?').count()
    }

    fn parameter_types(&self) -> Result<ColumnTypes> {
        Ok(self.types.clone())
    }
}

pub struct MemorySession {
    db: MemoryDatabase,
    schema: String,
    product_name: String,
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        self.db.lock().open_sessions -= 1;
    }
}

fn db_error(message: impl Into<String>) -> LoadError {
    LoadError::load("memory", message)
}

/// `schema.table` or `table` to a lower-cased bare table name.
fn bare_table(qualified: &str) -> String {
    qualified
        .rsplit('.')
        .next()
        .unwrap_or(qualified)
        .trim()
        .to_lowercase()
}

fn parse_insert(sql: &str) -> Option<(String, Vec<String>)> {
    let rest = sql.strip_prefix("INSERT INTO ")?;
    let (table, rest) = rest.split_once(" (")?;
    let (columns, _) = rest.split_once(") VALUES")?;
    Some((
        bare_table(table),
        columns.split(',').map(|c| c.trim().to_string()).collect(),
    ))
}

fn parse_delete(sql: &str) -> Option<(String, String)> {
    let rest = sql.strip_prefix("DELETE FROM ")?.trim_start();
    let (table, rest) = rest.split_once(" WHERE ")?;
    let (column, _) = rest.split_once('=')?;
    Some((bare_table(table), column.trim().to_lowercase()))
}

fn parse_select(sql: &str) -> Option<(String, String)> {
    let rest = sql.strip_prefix("SELECT ")?;
    let (column, table) = rest.split_once(" FROM ")?;
    Some((bare_table(table), column.trim().to_lowercase()))
}

fn ddl_type(type_name: &str) -> ColumnType {
    let upper = type_name.to_uppercase();
    let base = upper.split('(').next().unwrap_or("").trim();
    match base {
        "INT" | "INTEGER" => ColumnType::Integer,
        "SMALLINT" | "TINYINT" => ColumnType::SmallInt,
        "BIGINT" => ColumnType::BigInt,
        "NUMERIC" | "DECIMAL" | "NUMBER" => ColumnType::Decimal,
        "REAL" => ColumnType::Float,
        "FLOAT" | "DOUBLE" => ColumnType::Double,
        "DATE" => ColumnType::Date,
        "TIME" => ColumnType::Time,
        "TIMESTAMP" | "DATETIME" | "DATETIME2" => ColumnType::Timestamp,
        "BIT" | "BOOLEAN" => ColumnType::Boolean,
        "BYTEA" | "VARBINARY" | "BLOB" => ColumnType::Binary,
        _ => ColumnType::Text,
    }
}

fn parse_create_table(sql: &str) -> Option<MemoryTable> {
    let sql = sql
        .lines()
        .map(|line| line.split("--").next().unwrap_or(""))
        .collect::<Vec<_>>()
        .join("\n");
    let rest = sql.strip_prefix("CREATE TABLE ")?;
    let open = rest.find('(')?;
    let close = rest.rfind(')')?;
    let mut table = MemoryTable::new(&bare_table(&rest[..open]));

    let body = &rest[open + 1..close];
    let mut depth = 0;
    let mut start = 0;
    let mut parts = Vec::new();
    for (i, ch) in body.char_indices() {
        match ch {
            '(' => depth += 1,
            ')' => depth -= 1,
            ',' if depth == 0 => {
                parts.push(&body[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&body[start..]);

    for part in parts {
        let mut words = part.split_whitespace();
        let (Some(name), Some(ty)) = (words.next(), words.next()) else {
            continue;
        };
        if matches!(name.to_uppercase().as_str(), "CONSTRAINT" | "PRIMARY" | "UNIQUE") {
            continue;
        }
        table = table.column(name, ddl_type(ty));
    }
    Some(table)
}

fn render(value: &SqlValue) -> Option<String> {
    match value {
        SqlValue::Null(_) => None,
        SqlValue::Bool(b) => Some(if *b { "1" } else { "0" }.to_string()),
        SqlValue::I16(v) => Some(v.to_string()),
        SqlValue::I32(v) => Some(v.to_string()),
        SqlValue::I64(v) => Some(v.to_string()),
        SqlValue::F32(v) => Some(v.to_string()),
        SqlValue::F64(v) => Some(v.to_string()),
        SqlValue::Text(v) => Some(v.clone()),
        SqlValue::Bytes(v) => Some(String::from_utf8_lossy(v).into_owned()),
        SqlValue::Decimal(v) => Some(v.to_string()),
        SqlValue::Date(v) => Some(v.to_string()),
        SqlValue::Time(v) => Some(v.to_string()),
        SqlValue::DateTime(v) => Some(v.to_string()),
    }
}

impl MemorySession {
    fn check_statement(&self, state: &State, sql: &str) -> Result<()> {
        if let Some(fragment) = state.failing_statements.iter().find(|f| sql.contains(f.as_str())) {
            return Err(db_error(format!("statement rejected ({})", fragment)));
        }
        Ok(())
    }

    fn write_row(state: &mut State, stmt: &MemoryStatement, row: &[SqlValue]) -> Result<u64> {
        if row.len() != stmt.types.len() {
            return Err(db_error(format!(
                "expected {} parameters, got {}",
                stmt.types.len(),
                row.len()
            )));
        }
        if row
            .iter()
            .filter_map(render)
            .any(|v| state.failing_values.contains(&v))
        {
            return Err(db_error("row rejected by constraint"));
        }

        match &stmt.kind {
            StatementKind::Insert { table, columns } => {
                let record = columns.iter().cloned().zip(row.iter().cloned()).collect();
                state.rows.entry(table.clone()).or_default().push(record);
                Ok(1)
            }
            StatementKind::Delete { table, column } => {
                let Some(rows) = state.rows.get_mut(table) else {
                    return Ok(0);
                };
                let before = rows.len();
                rows.retain(|r| !r.iter().any(|(c, v)| c == column && v == &row[0]));
                Ok((before - rows.len()) as u64)
            }
        }
    }
}

#[async_trait]
impl Session for MemorySession {
    type Statement = MemoryStatement;

    fn schema(&self) -> &str {
        &self.schema
    }

    fn product_name(&self) -> &str {
        &self.product_name
    }

    async fn prepare(&mut self, sql: &str) -> Result<MemoryStatement> {
        let state = self.db.lock();
        self.check_statement(&state, sql)?;

        let (kind, columns) = if let Some((table, columns)) = parse_insert(sql) {
            (
                StatementKind::Insert {
                    table: table.clone(),
                    columns: columns.clone(),
                },
                (table, columns),
            )
        } else if let Some((table, column)) = parse_delete(sql) {
            (
                StatementKind::Delete {
                    table: table.clone(),
                    column: column.clone(),
                },
                (table, vec![column]),
            )
        } else {
            return Err(db_error(format!("cannot prepare '{}'", sql)));
        };

        let (table, columns) = columns;
        let def = state
            .tables
            .get(&table)
            .ok_or_else(|| db_error(format!("relation \"{}\" does not exist", table)))?;
        let types = columns
            .iter()
            .map(|c| {
                def.type_of(c)
                    .ok_or_else(|| db_error(format!("column \"{}\" does not exist", c)))
            })
            .collect::<Result<ColumnTypes>>()?;

        Ok(MemoryStatement {
            sql: sql.to_string(),
            kind,
            types,
        })
    }

    async fn execute_row(&mut self, stmt: &MemoryStatement, row: &[SqlValue]) -> Result<u64> {
        let mut state = self.db.lock();
        state.row_executions += 1;
        Self::write_row(&mut state, stmt, row)
    }

    async fn execute_batch(&mut self, stmt: &MemoryStatement, rows: &[CoercedRow]) -> Result<u64> {
        let mut state = self.db.lock();
        if state.fail_batches {
            return Err(db_error("batch rejected"));
        }
        state.batch_sizes.push(rows.len());

        // All or nothing
        let snapshot = state.rows.clone();
        let mut written = 0;
        for row in rows {
            match Self::write_row(&mut state, stmt, row) {
                Ok(n) => written += n,
                Err(e) => {
                    state.rows = snapshot;
                    return Err(e);
                }
            }
        }
        Ok(written)
    }

    async fn execute(&mut self, sql: &str) -> Result<()> {
        let mut state = self.db.lock();
        self.check_statement(&state, sql)?;
        state.executed.push(sql.to_string());

        if let Some(table) = parse_create_table(sql) {
            if state.tables.contains_key(&table.name) {
                return Err(db_error(format!("relation \"{}\" already exists", table.name)));
            }
            state.tables.insert(table.name.clone(), table);
        }
        Ok(())
    }

    async fn query_exists(&mut self, sql: &str, params: &[String]) -> Result<bool> {
        let state = self.db.lock();
        self.check_statement(&state, sql)?;
        Ok(params
            .iter()
            .any(|p| state.tables.contains_key(&p.to_lowercase())))
    }

    async fn query_strings(&mut self, sql: &str) -> Result<Vec<String>> {
        let state = self.db.lock();
        self.check_statement(&state, sql)?;
        let (table, column) =
            parse_select(sql).ok_or_else(|| db_error(format!("cannot run '{}'", sql)))?;
        if !state.tables.contains_key(&table) {
            return Err(db_error(format!("relation \"{}\" does not exist", table)));
        }

        Ok(state
            .rows
            .get(&table)
            .map(|rows| {
                rows.iter()
                    .filter_map(|r| r.iter().find(|(c, _)| c == &column))
                    .filter_map(|(_, v)| render(v))
                    .collect()
            })
            .unwrap_or_default())
    }
}
