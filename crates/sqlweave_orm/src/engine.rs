use std::sync::Arc;
use std::time::Duration;

use sqlweave_core::{
    sql_dialect, DbError, PlaceholderStyle, PooledConnection, Row, RowsIter, SqlConnection,
    SqlDialect, SqlPool, SqlSource, Value,
};

use crate::ddl::{ddl_statements, drop_statements};
use crate::error::OrmError;
use crate::expression::{Expression, SelectExpr, SqlGenContext, SqlGenOptions};
use crate::r#gen::{delete_sql, insert_sql, update_sql, StatementTemplate};
use crate::schema::{Key, Schema, Table};

/// Environment variable prefix for `sql_source_from_env`.
const ENV_PREFIX: &str = "SQLWEAVE_";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineMode {
    ReadOnly,
    ReadWrite,
}

enum EngineConn {
    Own(Box<SqlConnection>),
    Pooled(PooledConnection),
    /// SQL generation only; statement execution fails.
    None,
}

/// Transactional facade over one connection: mode-guarded SELECT/INSERT/
/// UPDATE/DELETE, sequence access, and schema DDL application.
///
/// An engine is single-owner. To share a pool across threads, give each
/// thread its own engine via [`Engine::from_pool`]; the checkout is scoped
/// to the engine's lifetime.
pub struct Engine {
    mode: EngineMode,
    conn: EngineConn,
    dialect: Arc<dyn SqlDialect>,
    placeholder_style: PlaceholderStyle,
    touched: bool,
}

impl Engine {
    pub fn new(mode: EngineMode, conn: SqlConnection) -> Engine {
        let dialect = Arc::clone(conn.dialect());
        let placeholder_style = conn.placeholder_style();
        Engine {
            mode,
            conn: EngineConn::Own(Box::new(conn)),
            dialect,
            placeholder_style,
            touched: false,
        }
    }

    /// Open a source directly, outside any pool.
    pub fn open(mode: EngineMode, source: SqlSource) -> Result<Engine, OrmError> {
        Ok(Engine::new(mode, SqlConnection::open(source)?))
    }

    /// Check a connection out of a pool for this engine's lifetime.
    pub fn from_pool(
        mode: EngineMode,
        pool: &SqlPool,
        source_id: &str,
        timeout: Duration,
    ) -> Result<Engine, OrmError> {
        let conn = pool
            .get(source_id, timeout)?
            .ok_or_else(|| DbError::ConnectionFailed(format!("can't get connection within {:?}", timeout)))?;
        let dialect = Arc::clone(conn.dialect());
        let placeholder_style = conn.placeholder_style();
        Ok(Engine {
            mode,
            conn: EngineConn::Pooled(conn),
            dialect,
            placeholder_style,
            touched: false,
        })
    }

    /// SQL generation without a connection.
    pub fn with_dialect(mode: EngineMode, dialect_name: &str) -> Result<Engine, OrmError> {
        Ok(Engine {
            mode,
            conn: EngineConn::None,
            dialect: sql_dialect(dialect_name)?,
            placeholder_style: PlaceholderStyle::Positional,
            touched: false,
        })
    }

    /// Build a source from `SQLWEAVE_URL[_id]`, falling back to the
    /// individual `SQLWEAVE_DRIVER` / `DBTYPE` / `DB` / `USER` / `PASSWD`
    /// variables. The URL wins when both are present.
    pub fn sql_source_from_env(id: Option<&str>) -> Result<SqlSource, OrmError> {
        let url_var = match id {
            Some(id) => format!("{}URL_{}", ENV_PREFIX, id),
            None => format!("{}URL", ENV_PREFIX),
        };
        if let Ok(url) = std::env::var(&url_var) {
            if !url.is_empty() {
                return Ok(SqlSource::from_url(&url)?);
            }
        }
        let get = |name: &str| std::env::var(format!("{}{}", ENV_PREFIX, name)).unwrap_or_default();
        let dbtype = get("DBTYPE");
        if dbtype.is_empty() {
            return Err(DbError::BadSource(format!(
                "neither {} nor {}DBTYPE is set",
                url_var, ENV_PREFIX
            ))
            .into());
        }
        let driver = {
            let d = get("DRIVER");
            if d.is_empty() { dbtype.clone() } else { d }
        };
        let db = get("DB");
        Ok(SqlSource::new(db.clone(), driver, dbtype, db, get("USER"), get("PASSWD")))
    }

    pub fn mode(&self) -> EngineMode {
        self.mode
    }

    pub fn dialect(&self) -> &Arc<dyn SqlDialect> {
        &self.dialect
    }

    pub fn placeholder_style(&self) -> PlaceholderStyle {
        self.placeholder_style
    }

    /// Whether any write or SELECT FOR UPDATE has touched the transaction
    /// since the last commit/rollback.
    pub fn activity(&self) -> bool {
        self.touched
    }

    /// Mark the transaction as started.
    pub fn touch(&mut self) {
        self.touched = true;
    }

    pub fn set_echo(&mut self, echo: bool) {
        if let Ok(conn) = self.conn_mut() {
            conn.set_echo(echo);
        }
    }

    fn conn_mut(&mut self) -> Result<&mut SqlConnection, DbError> {
        match &mut self.conn {
            EngineConn::Own(c) => Ok(c),
            EngineConn::Pooled(c) => Ok(c),
            EngineConn::None => Err(DbError::driver("engine has no connection")),
        }
    }

    fn guard_write(&self, what: &str) -> Result<(), OrmError> {
        if self.mode == EngineMode::ReadOnly {
            return Err(DbError::BadOperationInMode(format!(
                "using {} in read-only mode",
                what
            ))
            .into());
        }
        Ok(())
    }

    fn gen_options(&self) -> SqlGenOptions<'_> {
        SqlGenOptions {
            dialect: Some(self.dialect.as_ref()),
            collect_params: true,
            placeholder_style: self.placeholder_style,
            pager_model: None,
        }
    }

    fn prepare_select(&mut self, select: SelectExpr) -> Result<(), OrmError> {
        if select.for_update_flag() {
            self.guard_write("SELECT FOR UPDATE")?;
            self.touched = true;
        }
        let opts = self.gen_options();
        let mut ctx = SqlGenContext::new();
        let sql = select.into_expr().generate_sql(&opts, &mut ctx)?;
        let conn = self.conn_mut()?;
        conn.prepare(&sql)?;
        conn.exec(&ctx.params)?;
        Ok(())
    }

    /// Execute a SELECT and pull rows lazily.
    pub fn select_iter(&mut self, select: SelectExpr) -> Result<RowsIter<'_>, OrmError> {
        self.prepare_select(select)?;
        Ok(RowsIter::new(self.conn_mut()?))
    }

    /// Convenience SELECT. `max_rows < 0` means unlimited, `0` means no
    /// rows are fetched at all.
    #[allow(clippy::too_many_arguments)]
    pub fn select(
        &mut self,
        what: impl Into<Expression>,
        from: impl Into<Expression>,
        where_: impl Into<Expression>,
        group_by: impl Into<Expression>,
        having: impl Into<Expression>,
        order_by: impl Into<Expression>,
        max_rows: i64,
        for_update: bool,
    ) -> Result<Vec<Row>, OrmError> {
        let select = SelectExpr::new(what)
            .from_(from)
            .where_(where_)
            .group_by_(group_by)
            .having_(having)
            .order_by_(order_by)
            .for_update(for_update);
        self.prepare_select(select)?;
        Ok(self.conn_mut()?.fetch_rows(max_rows)?)
    }

    /// SELECT expecting exactly one row.
    pub fn select_row(
        &mut self,
        what: impl Into<Expression>,
        from: impl Into<Expression>,
        where_: impl Into<Expression>,
    ) -> Result<Row, OrmError> {
        let mut rows = self.select(
            what,
            from,
            where_,
            Expression::empty(),
            Expression::empty(),
            Expression::empty(),
            -1,
            false,
        )?;
        if rows.len() != 1 {
            return Err(DbError::NoDataFound("unable to fetch exactly one row".to_string()).into());
        }
        Ok(rows.pop().expect("checked length above"))
    }

    /// SELECT expecting exactly one value.
    pub fn select1(
        &mut self,
        what: impl Into<Expression>,
        from: impl Into<Expression>,
        where_: impl Into<Expression>,
    ) -> Result<Value, OrmError> {
        let row = self.select_row(what, from, where_)?;
        if row.len() != 1 {
            return Err(OrmError::bad_sql("unable to fetch exactly one column"));
        }
        Ok(row.into_iter().next().expect("checked length above").1)
    }

    fn bind_params(tpl: &StatementTemplate, row: &Row) -> Result<Vec<Value>, OrmError> {
        let mut params = vec![Value::Null; tpl.param_nums.len()];
        for (name, value) in row {
            if let Some(&idx) = tpl.param_nums.get(name) {
                params[idx] = value.fix_type(tpl.type_codes[idx])?;
            }
        }
        Ok(params)
    }

    /// Batch INSERT.
    ///
    /// Sequence tables get their null PKs pre-allocated per row; autoinc
    /// tables have the PK omitted, and generated ids are read back through
    /// the dialect hook when `collect_new_ids` is set. Returns the new ids,
    /// in row order, when either path generated them.
    pub fn insert(
        &mut self,
        table: &Table,
        rows: Vec<Row>,
        collect_new_ids: bool,
    ) -> Result<Vec<i64>, OrmError> {
        self.guard_write("INSERT operation")?;
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        self.touched = true;
        let sql_seq = self.dialect.has_sequences();
        let use_seq = sql_seq && table.seq_name().is_some();
        // Without id collection the rows carry their keys and go through a
        // plain batch INSERT, PK included.
        let use_autoinc =
            !sql_seq && (table.autoinc() || table.seq_name().is_some()) && collect_new_ids;
        let mut new_ids = Vec::new();

        if use_autoinc {
            let tpl = insert_sql(table, self.placeholder_style, false)?;
            if collect_new_ids {
                for row in &rows {
                    let params = Self::bind_params(&tpl, row)?;
                    let last_id_sql = self.dialect.select_last_insert_id(table.name())?;
                    let conn = self.conn_mut()?;
                    conn.prepare(&tpl.sql)?;
                    conn.exec(&params)?;
                    conn.exec_direct(&last_id_sql)?;
                    let id_rows = conn.fetch_rows(-1)?;
                    let id = id_rows
                        .first()
                        .and_then(|r| r.first())
                        .ok_or_else(|| {
                            DbError::NoDataFound("no generated id came back".to_string())
                        })?
                        .1
                        .as_longint()?;
                    new_ids.push(id);
                }
            } else {
                let conn = self.conn_mut()?;
                conn.prepare(&tpl.sql)?;
                for row in &rows {
                    let params = Self::bind_params(&tpl, row)?;
                    self.conn_mut()?.exec(&params)?;
                }
            }
        } else {
            let mut rows = rows;
            if use_seq {
                let pk = table.surrogate_pk()?.to_string();
                let seq = table.seq_name().expect("use_seq checked").to_string();
                for row in &mut rows {
                    let pk_value = row
                        .iter_mut()
                        .find(|(n, _)| n.eq_ignore_ascii_case(&pk));
                    let needs_id = pk_value.as_ref().map_or(true, |(_, v)| v.is_null());
                    if needs_id {
                        let id = self.get_next_value(&seq)?;
                        match row.iter_mut().find(|(n, _)| n.eq_ignore_ascii_case(&pk)) {
                            Some((_, v)) => *v = Value::LongInt(id),
                            None => row.push((pk.clone(), Value::LongInt(id))),
                        }
                        new_ids.push(id);
                    }
                }
            }
            // Identity-column vendors refuse explicit key inserts unless
            // told otherwise.
            let grant = if table.autoinc() && !use_seq {
                self.dialect.grant_insert_id(table.name(), true)
            } else {
                None
            };
            if let Some(sql) = &grant {
                self.conn_mut()?.exec_direct(sql)?;
            }
            let tpl = insert_sql(table, self.placeholder_style, true)?;
            self.conn_mut()?.prepare(&tpl.sql)?;
            for row in &rows {
                let params = Self::bind_params(&tpl, row)?;
                self.conn_mut()?.exec(&params)?;
            }
            if grant.is_some() {
                if let Some(sql) = self.dialect.grant_insert_id(table.name(), false) {
                    self.conn_mut()?.exec_direct(&sql)?;
                }
            }
        }
        Ok(new_ids)
    }

    /// Batch UPDATE keyed on the primary key; read-only columns are
    /// skipped.
    pub fn update(&mut self, table: &Table, rows: &[Row]) -> Result<(), OrmError> {
        self.guard_write("UPDATE operation")?;
        if rows.is_empty() {
            return Ok(());
        }
        self.touched = true;
        let tpl = update_sql(table, self.placeholder_style)?;
        self.conn_mut()?.prepare(&tpl.sql)?;
        for row in rows {
            let params = Self::bind_params(&tpl, row)?;
            self.conn_mut()?.exec(&params)?;
        }
        Ok(())
    }

    /// One DELETE per key.
    pub fn delete_from(&mut self, table: &Table, keys: &[Key]) -> Result<(), OrmError> {
        self.guard_write("DELETE operation")?;
        if keys.is_empty() {
            return Ok(());
        }
        self.touched = true;
        let tpl = delete_sql(table, self.placeholder_style)?;
        self.conn_mut()?.prepare(&tpl.sql)?;
        for key in keys {
            let row: Row = key.fields.clone();
            let params = Self::bind_params(&tpl, &row)?;
            self.conn_mut()?.exec(&params)?;
        }
        Ok(())
    }

    /// Raw statement execution, write mode only.
    pub fn exec_proc(&mut self, sql: &str) -> Result<(), OrmError> {
        self.guard_write("a PROCEDURE")?;
        self.touched = true;
        self.conn_mut()?.exec_direct(sql)?;
        Ok(())
    }

    pub fn commit(&mut self) -> Result<(), OrmError> {
        self.guard_write("COMMIT operation")?;
        self.conn_mut()?.commit()?;
        self.touched = false;
        Ok(())
    }

    pub fn rollback(&mut self) -> Result<(), OrmError> {
        self.conn_mut()?.rollback()?;
        self.touched = false;
        Ok(())
    }

    pub fn get_curr_value(&mut self, seq_name: &str) -> Result<i64, OrmError> {
        let what = self.dialect.select_curr_value(seq_name)?;
        let dual = self.dialect.dual_name().to_string();
        Ok(self
            .select1(Expression::sql(what), Expression::sql(dual), Expression::empty())?
            .as_longint()?)
    }

    pub fn get_next_value(&mut self, seq_name: &str) -> Result<i64, OrmError> {
        let what = self.dialect.select_next_value(seq_name)?;
        let dual = self.dialect.dual_name().to_string();
        Ok(self
            .select1(Expression::sql(what), Expression::sql(dual), Expression::empty())?
            .as_longint()?)
    }

    /// Table names present in the database, per driver introspection.
    pub fn get_tables(&mut self) -> Result<Vec<String>, OrmError> {
        Ok(self.conn_mut()?.get_tables()?)
    }

    pub fn table_exists(&mut self, table_name: &str) -> Result<bool, OrmError> {
        Ok(self.conn_mut()?.table_exists(table_name)?)
    }

    pub fn get_columns(
        &mut self,
        table_name: &str,
    ) -> Result<Vec<sqlweave_core::ColumnDescr>, OrmError> {
        Ok(self.conn_mut()?.get_columns(table_name)?)
    }

    /// Apply all tables, sequences, and FK constraints in dependency order.
    pub fn create_schema(&mut self, schema: &Schema, ignore_errors: bool) -> Result<(), OrmError> {
        self.guard_write("CREATE SCHEMA")?;
        let stmts = ddl_statements(schema, self.dialect.as_ref())?;
        self.apply_ddl(stmts, ignore_errors)
    }

    /// Drop all tables and sequences in reverse dependency order.
    pub fn drop_schema(&mut self, schema: &Schema, ignore_errors: bool) -> Result<(), OrmError> {
        self.guard_write("DROP SCHEMA")?;
        let stmts = drop_statements(schema, self.dialect.as_ref())?;
        self.apply_ddl(stmts, ignore_errors)
    }

    fn apply_ddl(&mut self, stmts: Vec<String>, ignore_errors: bool) -> Result<(), OrmError> {
        let commit_ddl = self.dialect.commit_ddl();
        for stmt in stmts {
            self.touched = true;
            let result = self.conn_mut()?.exec_direct(&stmt);
            match result {
                Ok(()) => {
                    if commit_ddl {
                        self.conn_mut()?.commit()?;
                        self.touched = false;
                    }
                }
                Err(e) if ignore_errors => {
                    log::warn!(target: "engine", "ignored DDL failure: {}: {}", stmt, e);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_only_mode_guards_writes() {
        let mut engine = Engine::with_dialect(EngineMode::ReadOnly, "sqlite").unwrap();
        let mut table = Table::new("T_A", "", "A");
        table
            .add_column(crate::schema::Column::new(
                "ID",
                sqlweave_core::ValueType::LongInt,
                0,
                crate::schema::ColumnFlags::PK,
            ))
            .unwrap();
        let err = engine.insert(&table, vec![Vec::new()], false).unwrap_err();
        assert!(matches!(err, OrmError::Db(DbError::BadOperationInMode(_))));
        let err = engine.update(&table, &[Vec::new()]).unwrap_err();
        assert!(matches!(err, OrmError::Db(DbError::BadOperationInMode(_))));
        let err = engine.exec_proc("DELETE FROM T_A").unwrap_err();
        assert!(matches!(err, OrmError::Db(DbError::BadOperationInMode(_))));
        let err = engine.commit().unwrap_err();
        assert!(matches!(err, OrmError::Db(DbError::BadOperationInMode(_))));
    }

    #[test]
    fn test_for_update_guarded_in_read_only() {
        let mut engine = Engine::with_dialect(EngineMode::ReadOnly, "postgres").unwrap();
        let err = engine
            .select(
                Expression::sql("*"),
                Expression::sql("T_A"),
                Expression::empty(),
                Expression::empty(),
                Expression::empty(),
                Expression::empty(),
                -1,
                true,
            )
            .unwrap_err();
        assert!(matches!(err, OrmError::Db(DbError::BadOperationInMode(_))));
        assert!(!engine.activity());
    }

    #[test]
    fn test_no_connection_engine_fails_on_execution() {
        let mut engine = Engine::with_dialect(EngineMode::ReadWrite, "postgres").unwrap();
        let err = engine
            .select(
                Expression::sql("*"),
                Expression::sql("T_A"),
                Expression::empty(),
                Expression::empty(),
                Expression::empty(),
                Expression::empty(),
                -1,
                false,
            )
            .unwrap_err();
        assert!(matches!(err, OrmError::Db(DbError::Driver(_))));
    }

    #[test]
    fn test_sql_source_from_env() {
        // One test covers both paths so the process environment is not
        // mutated concurrently.
        unsafe {
            std::env::set_var("SQLWEAVE_URL_ENGTEST", "sqlite://env/test.db");
        }
        let source = Engine::sql_source_from_env(Some("ENGTEST")).unwrap();
        assert_eq!(source.dialect, "sqlite");
        assert_eq!(source.db, "env/test.db");

        unsafe {
            std::env::remove_var("SQLWEAVE_URL_ENGTEST");
            std::env::set_var("SQLWEAVE_DBTYPE", "postgres");
            std::env::set_var("SQLWEAVE_DB", "orders");
            std::env::set_var("SQLWEAVE_USER", "joe");
            std::env::set_var("SQLWEAVE_PASSWD", "secret");
        }
        let source = Engine::sql_source_from_env(Some("ENGTEST")).unwrap();
        assert_eq!(source.dialect, "postgres");
        assert_eq!(source.driver, "postgres");
        assert_eq!(source.db, "orders");
        assert_eq!(source.user, "joe");
        assert_eq!(source.passwd, "secret");
        unsafe {
            std::env::remove_var("SQLWEAVE_DBTYPE");
            std::env::remove_var("SQLWEAVE_DB");
            std::env::remove_var("SQLWEAVE_USER");
            std::env::remove_var("SQLWEAVE_PASSWD");
        }
    }
}
