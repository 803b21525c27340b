use std::collections::VecDeque;
use std::sync::Arc;

use rusqlite::types::ValueRef;
use rusqlite::Connection;

use sqlweave_core::{
    register_sql_driver, ColumnDescr, DbError, PlaceholderStyle, Row, SqlConnectBackend,
    SqlDialect, SqlDriver, SqlSource, Value, SYSDATE_SENTINEL,
};

/// Register the SQLite driver in the process-wide driver registry.
/// Returns false if a driver named `SQLITE` is already present.
pub fn register() -> bool {
    register_sql_driver(Arc::new(SqliteDriver))
}

pub struct SqliteDriver;

impl SqlDriver for SqliteDriver {
    fn name(&self) -> &'static str {
        "SQLITE"
    }

    fn create_backend(&self) -> Box<dyn SqlConnectBackend> {
        Box::new(SqliteBackend::new())
    }

    fn placeholder_style(&self) -> PlaceholderStyle {
        PlaceholderStyle::Positional
    }
}

/// Connection backend over one `rusqlite::Connection`.
///
/// SQLite steps statements to completion when rows are pulled, so result
/// rows are buffered at execution time; `fetch_row` drains the buffer.
pub struct SqliteBackend {
    conn: Option<Connection>,
    prepared: Option<String>,
    rows: VecDeque<Row>,
    in_txn: bool,
}

impl SqliteBackend {
    pub fn new() -> SqliteBackend {
        SqliteBackend {
            conn: None,
            prepared: None,
            rows: VecDeque::new(),
            in_txn: false,
        }
    }

    fn conn(&mut self) -> Result<&mut Connection, DbError> {
        self.conn
            .as_mut()
            .ok_or_else(|| DbError::driver("connection is closed"))
    }

    fn begin_if_needed(&mut self) -> Result<(), DbError> {
        if !self.in_txn {
            self.conn()?
                .execute_batch("BEGIN")
                .map_err(driver_err)?;
            self.in_txn = true;
        }
        Ok(())
    }

    fn end_txn(&mut self, sql: &str) -> Result<(), DbError> {
        if self.in_txn {
            self.in_txn = false;
            self.conn()?.execute_batch(sql).map_err(driver_err)?;
        }
        Ok(())
    }

    fn run(&mut self, sql: &str, params: &[Value]) -> Result<(), DbError> {
        self.begin_if_needed()?;
        self.rows.clear();
        let fetched = {
            let conn = self.conn()?;
            let mut stmt = conn.prepare_cached(sql).map_err(driver_err)?;
            let names: Vec<String> = stmt
                .column_names()
                .iter()
                .map(|n| n.to_ascii_uppercase())
                .collect();
            let bound = params.iter().map(bind_value).collect::<Vec<_>>();
            let mut rows = stmt
                .query(rusqlite::params_from_iter(bound))
                .map_err(driver_err)?;
            let mut fetched = VecDeque::new();
            while let Some(row) = rows.next().map_err(driver_err)? {
                let mut out: Row = Vec::with_capacity(names.len());
                for (i, name) in names.iter().enumerate() {
                    let value = match row.get_ref(i).map_err(driver_err)? {
                        ValueRef::Null => Value::Null,
                        ValueRef::Integer(x) => Value::LongInt(x),
                        ValueRef::Real(x) => Value::Float(x),
                        ValueRef::Text(t) => Value::Str(String::from_utf8_lossy(t).into_owned()),
                        ValueRef::Blob(b) => Value::Blob(b.to_vec()),
                    };
                    out.push((name.clone(), value));
                }
                fetched.push_back(out);
            }
            fetched
        };
        self.rows = fetched;
        Ok(())
    }
}

impl Default for SqliteBackend {
    fn default() -> Self {
        SqliteBackend::new()
    }
}

fn driver_err(e: rusqlite::Error) -> DbError {
    DbError::driver(e.to_string())
}

fn bind_value(value: &Value) -> rusqlite::types::Value {
    use rusqlite::types::Value as Sq;
    match value {
        Value::Null => Sq::Null,
        Value::Int(x) => Sq::Integer(i64::from(*x)),
        Value::LongInt(x) => Sq::Integer(*x),
        Value::Str(s) => Sq::Text(s.clone()),
        Value::Decimal(s) => Sq::Text(s.clone()),
        // No native timestamp type; bind as an ISO-8601 string.
        Value::DateTime(dt) => Sq::Text(dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string()),
        Value::Float(x) => Sq::Real(*x),
        Value::Blob(b) => Sq::Blob(b.clone()),
    }
}

/// Strip a quoted SQL default down to its text, and normalize the
/// current-timestamp function to the sysdate sentinel.
fn normalize_default(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.eq_ignore_ascii_case("CURRENT_TIMESTAMP") {
        return SYSDATE_SENTINEL.to_string();
    }
    if trimmed.len() >= 2 && trimmed.starts_with('\'') && trimmed.ends_with('\'') {
        return trimmed[1..trimmed.len() - 1].replace("''", "'");
    }
    trimmed.to_string()
}

impl SqlConnectBackend for SqliteBackend {
    fn open(&mut self, _dialect: &dyn SqlDialect, source: &SqlSource) -> Result<(), DbError> {
        let conn = if source.db.is_empty() || source.db == ":memory:" {
            Connection::open_in_memory()
        } else {
            Connection::open(&source.db)
        }
        .map_err(|e| DbError::ConnectionFailed(e.to_string()))?;
        conn.execute_batch("PRAGMA foreign_keys = ON")
            .map_err(driver_err)?;
        self.conn = Some(conn);
        self.in_txn = false;
        Ok(())
    }

    fn close(&mut self) -> Result<(), DbError> {
        self.prepared = None;
        self.rows.clear();
        if let Some(conn) = self.conn.take() {
            conn.close()
                .map_err(|(_, e)| DbError::driver(e.to_string()))?;
        }
        Ok(())
    }

    fn commit(&mut self) -> Result<(), DbError> {
        self.end_txn("COMMIT")
    }

    fn rollback(&mut self) -> Result<(), DbError> {
        self.end_txn("ROLLBACK")
    }

    fn exec_direct(&mut self, sql: &str) -> Result<(), DbError> {
        self.prepared = None;
        self.run(sql, &[])
    }

    fn prepare(&mut self, sql: &str) -> Result<(), DbError> {
        self.rows.clear();
        self.prepared = Some(sql.to_string());
        Ok(())
    }

    fn exec(&mut self, params: &[Value]) -> Result<(), DbError> {
        let sql = self
            .prepared
            .clone()
            .ok_or_else(|| DbError::driver("exec without prepare"))?;
        self.run(&sql, params)
    }

    fn fetch_row(&mut self) -> Result<Option<Row>, DbError> {
        Ok(self.rows.pop_front())
    }

    fn clear_statement(&mut self) {
        self.prepared = None;
        self.rows.clear();
    }

    fn get_tables(&mut self) -> Result<Vec<String>, DbError> {
        self.run(
            "SELECT NAME FROM SQLITE_MASTER WHERE TYPE = 'table' \
             AND NAME NOT LIKE 'sqlite_%' ORDER BY NAME",
            &[],
        )?;
        let mut tables = Vec::new();
        while let Some(row) = self.fetch_row()? {
            if let Some((_, Value::Str(name))) = row.into_iter().next() {
                tables.push(name);
            }
        }
        Ok(tables)
    }

    fn get_columns(&mut self, table_name: &str) -> Result<Vec<ColumnDescr>, DbError> {
        // Foreign keys come from a separate pragma, keyed by column name.
        self.run(&format!("PRAGMA foreign_key_list({})", table_name), &[])?;
        let mut fks: Vec<(String, String, Option<String>)> = Vec::new();
        while let Some(row) = self.fetch_row()? {
            let field = |n: &str| {
                row.iter()
                    .find(|(name, _)| name == n)
                    .map(|(_, v)| v.clone())
                    .unwrap_or(Value::Null)
            };
            let from = field("FROM").as_string().unwrap_or_default();
            let table = field("TABLE").as_string().unwrap_or_default();
            let to = field("TO").as_string().ok();
            fks.push((from, table, to));
        }

        self.run(&format!("PRAGMA table_info({})", table_name), &[])?;
        let mut columns = Vec::new();
        while let Some(row) = self.fetch_row()? {
            let field = |n: &str| {
                row.iter()
                    .find(|(name, _)| name == n)
                    .map(|(_, v)| v.clone())
                    .unwrap_or(Value::Null)
            };
            let name = field("NAME").as_string().unwrap_or_default();
            let sql_type = field("TYPE").as_string().unwrap_or_default();
            let (sql_type, size) = match (sql_type.find('('), sql_type.find(')')) {
                (Some(open), Some(close)) if close > open => {
                    let size = sql_type[open + 1..close].trim().parse().ok();
                    (sql_type[..open].to_string(), size)
                }
                _ => (sql_type, None),
            };
            let fk = fks
                .iter()
                .find(|(from, _, _)| from.eq_ignore_ascii_case(&name));
            columns.push(ColumnDescr {
                not_null: field("NOTNULL").as_longint().unwrap_or(0) != 0,
                default: field("DFLT_VALUE")
                    .as_string()
                    .ok()
                    .map(|raw| normalize_default(&raw)),
                pk: field("PK").as_longint().unwrap_or(0) != 0,
                fk_table: fk.map(|(_, table, _)| table.clone()),
                fk_column: fk.and_then(|(_, _, to)| to.clone()),
                name,
                sql_type,
                size,
            });
        }
        Ok(columns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_backend() -> SqliteBackend {
        let mut backend = SqliteBackend::new();
        let source = SqlSource::from_url("sqlite://:memory:").unwrap();
        let dialect = sqlweave_core::sql_dialect("SQLITE").unwrap();
        backend.open(dialect.as_ref(), &source).unwrap();
        backend
    }

    #[test]
    fn test_exec_and_fetch() {
        let mut b = open_backend();
        b.exec_direct("CREATE TABLE T_A (ID INTEGER PRIMARY KEY, NAME VARCHAR(10))")
            .unwrap();
        b.prepare("INSERT INTO T_A (ID, NAME) VALUES (?, ?)").unwrap();
        b.exec(&[Value::LongInt(1), Value::Str("one".to_string())])
            .unwrap();
        b.exec(&[Value::LongInt(2), Value::Str("two".to_string())])
            .unwrap();
        b.exec_direct("SELECT ID, NAME FROM T_A ORDER BY ID").unwrap();
        let row = b.fetch_row().unwrap().unwrap();
        assert_eq!(row[0], ("ID".to_string(), Value::LongInt(1)));
        assert_eq!(row[1], ("NAME".to_string(), Value::Str("one".to_string())));
        let row = b.fetch_row().unwrap().unwrap();
        assert_eq!(row[0].1, Value::LongInt(2));
        assert!(b.fetch_row().unwrap().is_none());
    }

    #[test]
    fn test_rollback_discards_writes() {
        let mut b = open_backend();
        b.exec_direct("CREATE TABLE T_A (ID INTEGER PRIMARY KEY)").unwrap();
        b.commit().unwrap();
        b.exec_direct("INSERT INTO T_A (ID) VALUES (1)").unwrap();
        b.rollback().unwrap();
        b.exec_direct("SELECT COUNT(*) CNT FROM T_A").unwrap();
        let row = b.fetch_row().unwrap().unwrap();
        assert_eq!(row[0].1, Value::LongInt(0));
    }

    #[test]
    fn test_introspection() {
        let mut b = open_backend();
        b.exec_direct(
            "CREATE TABLE T_CLIENT (ID INTEGER PRIMARY KEY, \
             NAME VARCHAR(50) NOT NULL, \
             CREATED TIMESTAMP DEFAULT CURRENT_TIMESTAMP)",
        )
        .unwrap();
        b.exec_direct(
            "CREATE TABLE T_ORDER (ID INTEGER PRIMARY KEY, \
             CLIENT_ID INTEGER, \
             FOREIGN KEY (CLIENT_ID) REFERENCES T_CLIENT(ID))",
        )
        .unwrap();

        let tables = b.get_tables().unwrap();
        assert_eq!(tables, vec!["T_CLIENT".to_string(), "T_ORDER".to_string()]);
        assert!(b.table_exists("t_client").unwrap());
        assert!(!b.table_exists("T_MISSING").unwrap());

        let cols = b.get_columns("T_CLIENT").unwrap();
        let id = cols.iter().find(|c| c.name == "ID").unwrap();
        assert!(id.pk);
        let name = cols.iter().find(|c| c.name == "NAME").unwrap();
        assert!(name.not_null);
        assert_eq!(name.size, Some(50));
        assert_eq!(name.sql_type, "VARCHAR");
        let created = cols.iter().find(|c| c.name == "CREATED").unwrap();
        assert_eq!(created.default.as_deref(), Some(SYSDATE_SENTINEL));

        let cols = b.get_columns("T_ORDER").unwrap();
        let fk = cols.iter().find(|c| c.name == "CLIENT_ID").unwrap();
        assert_eq!(fk.fk_table.as_deref(), Some("T_CLIENT"));
        assert_eq!(fk.fk_column.as_deref(), Some("ID"));
    }

    #[test]
    fn test_datetime_round_trips_as_iso_text() {
        let mut b = open_backend();
        b.exec_direct("CREATE TABLE T_A (ID INTEGER PRIMARY KEY, D TIMESTAMP)")
            .unwrap();
        let dt = sqlweave_core::parse_date_time("2011-02-28 12:30:01").unwrap();
        b.prepare("INSERT INTO T_A (ID, D) VALUES (?, ?)").unwrap();
        b.exec(&[Value::LongInt(1), Value::DateTime(dt)]).unwrap();
        b.exec_direct("SELECT D FROM T_A").unwrap();
        let row = b.fetch_row().unwrap().unwrap();
        let fetched = row[0].1.as_date_time().unwrap();
        assert_eq!(fetched, dt);
    }
}
