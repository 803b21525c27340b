use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};
use std::time::Instant;

use crate::dialect::{sql_dialect, SqlDialect};
use crate::error::DbError;
use crate::source::SqlSource;
use crate::value::Value;

/// One fetched row: ordered (column name, value) pairs. Column names come
/// back uppercased from the driver.
pub type Row = Vec<(String, Value)>;

/// Find a field in a row by name.
pub fn find_in_row<'a>(row: &'a Row, name: &str) -> Option<&'a Value> {
    row.iter().find(|(n, _)| n == name).map(|(_, v)| v)
}

/// Parameter marker style a driver expects in prepared SQL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaceholderStyle {
    /// `?`
    #[default]
    Positional,
    /// `:1`, `:2`, ...
    Numbered,
    /// `:name`
    Named,
}

/// One introspected column, as reported by `get_columns`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDescr {
    pub name: String,
    pub sql_type: String,
    pub size: Option<usize>,
    pub not_null: bool,
    /// Defaults echoing the vendor's current-timestamp function come back
    /// normalized to the `sysdate` sentinel.
    pub default: Option<String>,
    pub pk: bool,
    pub fk_table: Option<String>,
    pub fk_column: Option<String>,
}

/// Factory for connection backends, registered by name.
pub trait SqlDriver: Send + Sync {
    /// Registry name, canonically uppercase.
    fn name(&self) -> &'static str;

    fn create_backend(&self) -> Box<dyn SqlConnectBackend>;

    fn placeholder_style(&self) -> PlaceholderStyle {
        PlaceholderStyle::Positional
    }
}

/// Raw driver connection: open/close, transaction boundary, statement
/// execution, row fetch, and optional introspection.
///
/// One statement is active at a time; `prepare` replaces the previous one.
pub trait SqlConnectBackend: Send {
    fn open(&mut self, dialect: &dyn SqlDialect, source: &SqlSource) -> Result<(), DbError>;
    fn close(&mut self) -> Result<(), DbError>;
    fn commit(&mut self) -> Result<(), DbError>;
    fn rollback(&mut self) -> Result<(), DbError>;

    fn exec_direct(&mut self, sql: &str) -> Result<(), DbError>;
    fn prepare(&mut self, sql: &str) -> Result<(), DbError>;
    fn exec(&mut self, params: &[Value]) -> Result<(), DbError>;
    fn fetch_row(&mut self) -> Result<Option<Row>, DbError>;

    /// Drop the active statement without touching the transaction.
    fn clear_statement(&mut self) {}

    fn get_tables(&mut self) -> Result<Vec<String>, DbError> {
        Err(DbError::driver("introspection not supported by this driver"))
    }

    fn table_exists(&mut self, table_name: &str) -> Result<bool, DbError> {
        let upper = table_name.to_ascii_uppercase();
        Ok(self
            .get_tables()?
            .iter()
            .any(|t| t.to_ascii_uppercase() == upper))
    }

    fn get_columns(&mut self, table_name: &str) -> Result<Vec<ColumnDescr>, DbError> {
        let _ = table_name;
        Err(DbError::driver("introspection not supported by this driver"))
    }
}

/// A live connection: driver backend plus dialect, echo logging, and the
/// bad-connection flag the pool keys retirement on.
pub struct SqlConnection {
    source: SqlSource,
    dialect: Arc<dyn SqlDialect>,
    placeholder_style: PlaceholderStyle,
    backend: Box<dyn SqlConnectBackend>,
    echo: bool,
    bad: bool,
    activity: bool,
    pub(crate) free_since: Option<Instant>,
}

impl SqlConnection {
    /// Open a connection through the driver registry.
    pub fn open(source: SqlSource) -> Result<SqlConnection, DbError> {
        let driver = sql_driver(&source.driver)?;
        let dialect = sql_dialect(&source.dialect)?;
        let mut backend = driver.create_backend();
        backend.open(dialect.as_ref(), &source)?;
        log::debug!(target: "engine.sql", "connected to '{}'", source.id);
        Ok(SqlConnection {
            source,
            dialect,
            placeholder_style: driver.placeholder_style(),
            backend,
            echo: false,
            bad: false,
            activity: false,
            free_since: None,
        })
    }

    /// Assemble a connection from explicit parts, bypassing the registry.
    pub fn from_parts(
        source: SqlSource,
        dialect: Arc<dyn SqlDialect>,
        placeholder_style: PlaceholderStyle,
        backend: Box<dyn SqlConnectBackend>,
    ) -> SqlConnection {
        SqlConnection {
            source,
            dialect,
            placeholder_style,
            backend,
            echo: false,
            bad: false,
            activity: false,
            free_since: None,
        }
    }

    pub fn source(&self) -> &SqlSource {
        &self.source
    }

    pub fn dialect(&self) -> &Arc<dyn SqlDialect> {
        &self.dialect
    }

    pub fn placeholder_style(&self) -> PlaceholderStyle {
        self.placeholder_style
    }

    pub fn set_echo(&mut self, echo: bool) {
        self.echo = echo;
    }

    pub fn is_bad(&self) -> bool {
        self.bad
    }

    /// Whether the transaction has seen a statement since the last
    /// commit/rollback.
    pub fn activity(&self) -> bool {
        self.activity
    }

    fn mark_bad(&mut self, err: &DbError) {
        if !self.bad {
            log::warn!(target: "engine.sql", "marking connection bad: {}", err);
            self.bad = true;
        }
    }

    fn guard<T>(&mut self, result: Result<T, DbError>) -> Result<T, DbError> {
        if let Err(ref e) = result {
            self.mark_bad(e);
        }
        result
    }

    pub fn exec_direct(&mut self, sql: &str) -> Result<(), DbError> {
        if self.echo {
            log::debug!(target: "engine.sql", "exec_direct: {}", sql);
        }
        self.activity = true;
        let r = self.backend.exec_direct(sql);
        self.guard(r)
    }

    pub fn prepare(&mut self, sql: &str) -> Result<(), DbError> {
        if self.echo {
            log::debug!(target: "engine.sql", "prepare: {}", sql);
        }
        self.activity = true;
        let r = self.backend.prepare(sql);
        self.guard(r)
    }

    pub fn exec(&mut self, params: &[Value]) -> Result<(), DbError> {
        if self.echo {
            let rendered: Vec<String> = params
                .iter()
                .enumerate()
                .map(|(i, p)| format!("p{}=\"{}\"", i + 1, p.sql_str()))
                .collect();
            log::debug!(target: "engine.sql", "exec prepared: {}", rendered.join(" "));
        }
        let r = self.backend.exec(params);
        self.guard(r)
    }

    pub fn fetch_row(&mut self) -> Result<Option<Row>, DbError> {
        let r = self.backend.fetch_row();
        let r = self.guard(r)?;
        if self.echo {
            match &r {
                Some(row) => {
                    let rendered: Vec<String> = row
                        .iter()
                        .map(|(n, v)| format!("{}={}", n, v.sql_str()))
                        .collect();
                    log::debug!(target: "engine.sql", "fetch: {}", rendered.join(" "));
                }
                None => log::debug!(target: "engine.sql", "fetch: no more rows"),
            }
        }
        Ok(r)
    }

    /// Fetch up to `max_rows` rows; `-1` means all, `0` means none without
    /// touching the cursor.
    pub fn fetch_rows(&mut self, max_rows: i64) -> Result<Vec<Row>, DbError> {
        let mut rows = Vec::new();
        if max_rows == 0 {
            return Ok(rows);
        }
        while let Some(row) = self.fetch_row()? {
            rows.push(row);
            if max_rows > 0 && rows.len() as i64 >= max_rows {
                break;
            }
        }
        Ok(rows)
    }

    pub fn commit(&mut self) -> Result<(), DbError> {
        if self.echo {
            log::debug!(target: "engine.sql", "commit");
        }
        self.activity = false;
        let r = self.backend.commit();
        self.guard(r)
    }

    pub fn rollback(&mut self) -> Result<(), DbError> {
        if self.echo {
            log::debug!(target: "engine.sql", "rollback");
        }
        self.activity = false;
        let r = self.backend.rollback();
        self.guard(r)
    }

    /// Roll back quietly and drop the active statement; used when a
    /// connection returns to the pool.
    pub fn clear(&mut self) {
        if self.activity {
            if let Err(e) = self.rollback() {
                log::debug!(target: "engine.sql", "rollback on clear failed: {}", e);
            }
        }
        self.backend.clear_statement();
    }

    pub fn get_tables(&mut self) -> Result<Vec<String>, DbError> {
        let r = self.backend.get_tables();
        self.guard(r)
    }

    pub fn table_exists(&mut self, table_name: &str) -> Result<bool, DbError> {
        let r = self.backend.table_exists(table_name);
        self.guard(r)
    }

    pub fn get_columns(&mut self, table_name: &str) -> Result<Vec<ColumnDescr>, DbError> {
        let r = self.backend.get_columns(table_name);
        self.guard(r)
    }
}

impl Drop for SqlConnection {
    fn drop(&mut self) {
        if self.activity {
            if let Err(e) = self.backend.rollback() {
                log::debug!(target: "engine.sql", "rollback on close failed: {}", e);
            }
        }
        if let Err(e) = self.backend.close() {
            log::debug!(target: "engine.sql", "error while closing connection: {}", e);
        }
    }
}

/// Pull-based row iterator over the active statement of a connection.
/// Single-pass and not restartable.
pub struct RowsIter<'a> {
    conn: &'a mut SqlConnection,
    done: bool,
}

impl<'a> RowsIter<'a> {
    pub fn new(conn: &'a mut SqlConnection) -> RowsIter<'a> {
        RowsIter { conn, done: false }
    }
}

impl Iterator for RowsIter<'_> {
    type Item = Result<Row, DbError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.conn.fetch_row() {
            Ok(Some(row)) => Some(Ok(row)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

type DriverMap = HashMap<String, Arc<dyn SqlDriver>>;

static DRIVERS: OnceLock<RwLock<DriverMap>> = OnceLock::new();

fn registry() -> &'static RwLock<DriverMap> {
    DRIVERS.get_or_init(|| RwLock::new(DriverMap::new()))
}

/// Look up a driver by name, case-insensitively. Unknown schemes are
/// rejected here.
pub fn sql_driver(name: &str) -> Result<Arc<dyn SqlDriver>, DbError> {
    let map = registry()
        .read()
        .map_err(|_| DbError::driver("driver registry poisoned"))?;
    map.get(&name.to_ascii_uppercase())
        .cloned()
        .ok_or_else(|| DbError::UnknownDriver(name.to_string()))
}

/// Register a driver. Returns false if the name was taken.
pub fn register_sql_driver(driver: Arc<dyn SqlDriver>) -> bool {
    let mut map = match registry().write() {
        Ok(map) => map,
        Err(_) => return false,
    };
    let name = driver.name().to_string();
    if map.contains_key(&name) {
        return false;
    }
    map.insert(name, driver);
    true
}

pub fn list_sql_drivers() -> Vec<String> {
    match registry().read() {
        Ok(map) => {
            let mut names: Vec<String> = map.keys().cloned().collect();
            names.sort();
            names
        }
        Err(_) => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_driver_rejected() {
        assert!(matches!(
            sql_driver("NO_SUCH_DRIVER"),
            Err(DbError::UnknownDriver(_))
        ));
    }

    #[test]
    fn test_find_in_row() {
        let row: Row = vec![
            ("ID".to_string(), Value::LongInt(1)),
            ("NAME".to_string(), Value::Str("x".to_string())),
        ];
        assert_eq!(find_in_row(&row, "NAME"), Some(&Value::Str("x".to_string())));
        assert_eq!(find_in_row(&row, "MISSING"), None);
    }
}
