//! Relational backend seam and its SQLite implementation.
//!
//! The engine issues only additive, idempotent-safe operations: table
//! creation, `ALTER TABLE ... ADD COLUMN`, equality selects, inserts, and
//! updates by identity. Column DDL is produced by an explicit builder that
//! applies modifiers in a fixed order (base type, then nullability, then
//! index/unique) so generated statements never depend on map iteration
//! order.

use std::{
    path::Path,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use anyhow::{Context, Result, anyhow};
use itertools::Itertools;
use rusqlite::{
    Connection, OptionalExtension, params_from_iter,
    types::{ToSql, ToSqlOutput},
};

use crate::{
    data::{CANONICAL_DATE_FORMAT, CANONICAL_DATETIME_FORMAT, Value},
    schema::{ColumnSpec, ColumnType, TableSchema},
};

const BUSY_TIMEOUT_MS: u64 = 5_000;

pub trait RelationalBackend {
    fn has_table(&self, table: &str) -> Result<bool>;
    fn column_listing(&self, table: &str) -> Result<Vec<String>>;
    fn create_table(&self, schema: &TableSchema, unique_key: &[String]) -> Result<()>;
    fn add_columns(&self, table: &str, columns: &[ColumnSpec]) -> Result<()>;
    fn select_ids_by_eq(&self, table: &str, criteria: &[(String, Value)]) -> Result<Vec<i64>>;
    fn insert(&self, table: &str, row: &[(String, Value)]) -> Result<()>;
    fn update_by_id(&self, table: &str, id: i64, row: &[(String, Option<Value>)]) -> Result<()>;
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::String(s) => ToSqlOutput::from(s.as_str()),
            Value::Integer(i) => ToSqlOutput::from(*i),
            Value::Decimal(d) => ToSqlOutput::from(d.to_string()),
            Value::Date(d) => ToSqlOutput::from(d.format(CANONICAL_DATE_FORMAT).to_string()),
            Value::DateTime(dt) | Value::Timestamp(dt) => {
                ToSqlOutput::from(dt.format(CANONICAL_DATETIME_FORMAT).to_string())
            }
        })
    }
}

pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn sql_type(spec: &ColumnSpec) -> String {
    match &spec.datatype {
        ColumnType::String => match spec.length {
            Some(length) => format!("VARCHAR({length})"),
            None => "TEXT".to_string(),
        },
        ColumnType::Integer => "INTEGER".to_string(),
        ColumnType::Decimal(decimal) => format!("DECIMAL({},{})", decimal.total, decimal.places),
        ColumnType::Date { .. } | ColumnType::DateTime { .. } | ColumnType::Timestamp => {
            "TIMESTAMP".to_string()
        }
    }
}

/// Normalized DDL for one column: the inline definition plus deferred
/// index statements. Modifier order is fixed: type, nullable, index/unique.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDdl {
    pub definition: String,
    pub statements: Vec<String>,
}

pub fn build_column_ddl(table: &str, spec: &ColumnSpec) -> ColumnDdl {
    let mut definition = format!("{} {}", quote_ident(&spec.name), sql_type(spec));
    if !spec.nullable {
        definition.push_str(" NOT NULL");
    }

    let mut statements = Vec::new();
    if spec.index {
        statements.push(format!(
            "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
            quote_ident(&format!("idx_{}_{}", table, spec.name)),
            quote_ident(table),
            quote_ident(&spec.name)
        ));
    }
    if spec.unique {
        statements.push(format!(
            "CREATE UNIQUE INDEX IF NOT EXISTS {} ON {} ({})",
            quote_ident(&format!("uq_{}_{}", table, spec.name)),
            quote_ident(table),
            quote_ident(&spec.name)
        ));
    }
    ColumnDdl {
        definition,
        statements,
    }
}

#[derive(Clone)]
pub struct SqliteBackend {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteBackend {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Opening database {}", path.display()))?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory().context("Opening in-memory database")?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.busy_timeout(Duration::from_millis(BUSY_TIMEOUT_MS))
            .context("Configuring busy timeout")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Shares the underlying connection, e.g. with the history store.
    pub fn connection(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.conn)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("database connection mutex poisoned"))
    }
}

impl RelationalBackend for SqliteBackend {
    fn has_table(&self, table: &str) -> Result<bool> {
        let conn = self.conn()?;
        let found = conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [table],
                |_row| Ok(true),
            )
            .optional()
            .with_context(|| format!("Checking for table '{table}'"))?;
        Ok(found.unwrap_or(false))
    }

    fn column_listing(&self, table: &str) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!("PRAGMA table_info({})", quote_ident(table)))
            .with_context(|| format!("Listing columns of '{table}'"))?;
        let columns = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(columns)
    }

    fn create_table(&self, schema: &TableSchema, unique_key: &[String]) -> Result<()> {
        let mut definitions = vec![format!(
            "{} INTEGER PRIMARY KEY AUTOINCREMENT",
            quote_ident("id")
        )];
        let mut deferred: Vec<String> = Vec::new();
        for spec in schema.columns.iter().filter(|spec| spec.name != "id") {
            let ddl = build_column_ddl(&schema.table, spec);
            definitions.push(ddl.definition);
            deferred.extend(ddl.statements);
        }

        let conn = self.conn()?;
        let create = format!(
            "CREATE TABLE {} ({})",
            quote_ident(&schema.table),
            definitions.iter().join(", ")
        );
        conn.execute(&create, [])
            .with_context(|| format!("Creating table '{}'", schema.table))?;
        for statement in &deferred {
            conn.execute(statement, [])
                .with_context(|| format!("Indexing table '{}'", schema.table))?;
        }
        if !unique_key.is_empty() {
            let statement = format!(
                "CREATE UNIQUE INDEX IF NOT EXISTS {} ON {} ({})",
                quote_ident(&format!("uq_{}", schema.table)),
                quote_ident(&schema.table),
                unique_key.iter().map(|name| quote_ident(name)).join(", ")
            );
            conn.execute(&statement, []).with_context(|| {
                format!("Creating uniqueness key on '{}'", schema.table)
            })?;
        }
        Ok(())
    }

    fn add_columns(&self, table: &str, columns: &[ColumnSpec]) -> Result<()> {
        let conn = self.conn()?;
        for spec in columns.iter().filter(|spec| spec.name != "id") {
            let ddl = build_column_ddl(table, spec);
            let alter = format!(
                "ALTER TABLE {} ADD COLUMN {}",
                quote_ident(table),
                ddl.definition
            );
            conn.execute(&alter, [])
                .with_context(|| format!("Adding column '{}' to '{table}'", spec.name))?;
            for statement in &ddl.statements {
                conn.execute(statement, [])
                    .with_context(|| format!("Indexing column '{}' on '{table}'", spec.name))?;
            }
        }
        Ok(())
    }

    fn select_ids_by_eq(&self, table: &str, criteria: &[(String, Value)]) -> Result<Vec<i64>> {
        let clause = criteria
            .iter()
            .enumerate()
            .map(|(idx, (name, _))| format!("{} = ?{}", quote_ident(name), idx + 1))
            .join(" AND ");
        let sql = format!(
            "SELECT {} FROM {} WHERE {clause} ORDER BY {}",
            quote_ident("id"),
            quote_ident(table),
            quote_ident("id")
        );
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&sql)
            .with_context(|| format!("Querying '{table}' by uniqueness key"))?;
        let ids = stmt
            .query_map(
                params_from_iter(criteria.iter().map(|(_, value)| value)),
                |row| row.get::<_, i64>(0),
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }

    fn insert(&self, table: &str, row: &[(String, Value)]) -> Result<()> {
        let names = row.iter().map(|(name, _)| quote_ident(name)).join(", ");
        let placeholders = (1..=row.len()).map(|idx| format!("?{idx}")).join(", ");
        let sql = format!(
            "INSERT INTO {} ({names}) VALUES ({placeholders})",
            quote_ident(table)
        );
        let conn = self.conn()?;
        conn.execute(&sql, params_from_iter(row.iter().map(|(_, value)| value)))
            .with_context(|| format!("Inserting row into '{table}'"))?;
        Ok(())
    }

    /// `None` values are bound as SQL NULL, clearing the stored cell.
    fn update_by_id(&self, table: &str, id: i64, row: &[(String, Option<Value>)]) -> Result<()> {
        let assignments = row
            .iter()
            .enumerate()
            .map(|(idx, (name, _))| format!("{} = ?{}", quote_ident(name), idx + 1))
            .join(", ");
        let sql = format!(
            "UPDATE {} SET {assignments} WHERE {} = ?{}",
            quote_ident(table),
            quote_ident("id"),
            row.len() + 1
        );
        let conn = self.conn()?;
        let mut params: Vec<&dyn ToSql> = row
            .iter()
            .map(|(_, value)| value as &dyn ToSql)
            .collect();
        params.push(&id);
        conn.execute(&sql, params_from_iter(params))
            .with_context(|| format!("Updating row #{id} in '{table}'"))?;
        Ok(())
    }
}
