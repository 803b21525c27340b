use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use crate::error::DbError;
use crate::value::{Value, ValueType};

/// Pagination form a dialect understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagerModel {
    /// `... LIMIT n OFFSET m` appended to the statement.
    Postfix,
    /// `... LIMIT m, n`.
    Mysql,
    /// `SELECT FIRST n SKIP m ...`.
    Interbase,
    /// Double-wrap the inner SELECT with `ROWNUM` predicates.
    Oracle,
}

/// Textual default sentinel that stands for the dialect's current-timestamp
/// function. Introspected defaults are normalized back to it.
pub const SYSDATE_SENTINEL: &str = "sysdate";

/// Per-vendor SQL idioms: type spelling, sequence syntax, pagination form,
/// identifier quoting, literal escaping.
///
/// Operations a vendor does not support return a dialect error instead of
/// emitting SQL that would be wrong for that vendor.
pub trait SqlDialect: Send + Sync {
    /// Registry name, canonically uppercase.
    fn name(&self) -> &'static str;

    /// Table to select from when the query has no natural FROM clause.
    /// Empty when the vendor allows a bare SELECT.
    fn dual_name(&self) -> &'static str {
        ""
    }

    fn has_sequences(&self) -> bool {
        false
    }

    fn select_curr_value(&self, seq_name: &str) -> Result<String, DbError> {
        let _ = seq_name;
        Err(DbError::dialect(format!("{}: no sequences", self.name())))
    }

    fn select_next_value(&self, seq_name: &str) -> Result<String, DbError> {
        let _ = seq_name;
        Err(DbError::dialect(format!("{}: no sequences", self.name())))
    }

    fn gen_sequence(&self, seq_name: &str) -> Result<String, DbError> {
        let _ = seq_name;
        Err(DbError::dialect(format!("{}: no sequences", self.name())))
    }

    /// Statement that reads back the identity generated by the last INSERT.
    /// The hook for autoincrement vendors; sequence vendors do not need it.
    fn select_last_insert_id(&self, table_name: &str) -> Result<String, DbError> {
        let _ = table_name;
        Err(DbError::dialect(format!(
            "{}: can't query last inserted id",
            self.name()
        )))
    }

    /// SQL type spelling for a value tag; `size` applies to strings only.
    fn type2sql(&self, t: ValueType, size: usize) -> Result<String, DbError>;

    /// Column suffix marking an auto-increment primary key, if the vendor
    /// has one.
    fn autoinc_flag(&self) -> &'static str {
        ""
    }

    fn primary_key_flag(&self) -> &'static str {
        "PRIMARY KEY"
    }

    /// Current-timestamp function.
    fn sysdate_func(&self) -> &'static str {
        "CURRENT_TIMESTAMP"
    }

    /// Text appended after the closing parenthesis of CREATE TABLE.
    fn suffix_create_table(&self) -> &'static str {
        ""
    }

    /// Whether DDL statements must be followed by an explicit COMMIT.
    fn commit_ddl(&self) -> bool {
        false
    }

    /// Whether FOREIGN KEY constraints are spelled inside CREATE TABLE
    /// rather than added afterwards with ALTER TABLE.
    fn fk_internal(&self) -> bool {
        false
    }

    /// Combine the NOT NULL and DEFAULT clauses in vendor order.
    fn not_null_default(&self, null_clause: &str, default_clause: &str) -> String {
        join_clauses(default_clause, null_clause)
    }

    /// Dialect literal for a value. The textual `sysdate` sentinel becomes
    /// the vendor's current-timestamp function.
    fn sql_value(&self, value: &Value) -> String {
        if let Value::Str(s) = value {
            if s.eq_ignore_ascii_case(SYSDATE_SENTINEL) {
                return self.sysdate_func().to_string();
            }
        }
        value.sql_str()
    }

    /// `None` when the vendor has no pagination form the generator knows;
    /// paged SELECTs then fail with a dialect error.
    fn pager_model(&self) -> Option<PagerModel> {
        Some(PagerModel::Postfix)
    }

    fn quote_identifier(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    /// Statement toggling explicit identity inserts, for vendors that
    /// refuse direct writes to identity columns.
    fn grant_insert_id(&self, table_name: &str, on: bool) -> Option<String> {
        let _ = (table_name, on);
        None
    }
}

fn join_clauses(a: &str, b: &str) -> String {
    match (a.is_empty(), b.is_empty()) {
        (true, true) => String::new(),
        (true, false) => b.to_string(),
        (false, true) => a.to_string(),
        (false, false) => format!("{} {}", a, b),
    }
}

pub struct OracleDialect;

impl SqlDialect for OracleDialect {
    fn name(&self) -> &'static str {
        "ORACLE"
    }

    fn dual_name(&self) -> &'static str {
        "DUAL"
    }

    fn has_sequences(&self) -> bool {
        true
    }

    fn select_curr_value(&self, seq_name: &str) -> Result<String, DbError> {
        Ok(format!("{}.CURRVAL", seq_name))
    }

    fn select_next_value(&self, seq_name: &str) -> Result<String, DbError> {
        Ok(format!("{}.NEXTVAL", seq_name))
    }

    fn gen_sequence(&self, seq_name: &str) -> Result<String, DbError> {
        Ok(format!("CREATE SEQUENCE {}", seq_name))
    }

    fn type2sql(&self, t: ValueType, size: usize) -> Result<String, DbError> {
        match t {
            ValueType::Int => Ok("NUMBER(10)".to_string()),
            ValueType::LongInt => Ok("NUMBER(19)".to_string()),
            ValueType::Str => Ok(varchar("VARCHAR2", size)),
            ValueType::Decimal => Ok("NUMBER(16, 6)".to_string()),
            ValueType::DateTime => Ok("DATE".to_string()),
            ValueType::Float => Ok("BINARY_DOUBLE".to_string()),
            ValueType::Blob => Ok("BLOB".to_string()),
            ValueType::Null => Err(DbError::dialect("no SQL type for the null tag")),
        }
    }

    fn sysdate_func(&self) -> &'static str {
        "SYSDATE"
    }

    fn sql_value(&self, value: &Value) -> String {
        if let Value::Str(s) = value {
            if s.eq_ignore_ascii_case(SYSDATE_SENTINEL) {
                return self.sysdate_func().to_string();
            }
        }
        match value {
            Value::DateTime(_) => format!("TIMESTAMP {}", value.sql_str()),
            other => other.sql_str(),
        }
    }

    fn pager_model(&self) -> Option<PagerModel> {
        Some(PagerModel::Oracle)
    }
}

pub struct PostgresDialect;

impl SqlDialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "POSTGRES"
    }

    fn has_sequences(&self) -> bool {
        true
    }

    fn select_curr_value(&self, seq_name: &str) -> Result<String, DbError> {
        Ok(format!("CURRVAL('{}')", seq_name))
    }

    fn select_next_value(&self, seq_name: &str) -> Result<String, DbError> {
        Ok(format!("NEXTVAL('{}')", seq_name))
    }

    fn gen_sequence(&self, seq_name: &str) -> Result<String, DbError> {
        Ok(format!("CREATE SEQUENCE {}", seq_name))
    }

    fn type2sql(&self, t: ValueType, size: usize) -> Result<String, DbError> {
        match t {
            ValueType::Int => Ok("INTEGER".to_string()),
            ValueType::LongInt => Ok("BIGINT".to_string()),
            ValueType::Str => Ok(varchar("VARCHAR", size)),
            ValueType::Decimal => Ok("DECIMAL(16, 6)".to_string()),
            ValueType::DateTime => Ok("TIMESTAMP".to_string()),
            ValueType::Float => Ok("DOUBLE PRECISION".to_string()),
            ValueType::Blob => Ok("BYTEA".to_string()),
            ValueType::Null => Err(DbError::dialect("no SQL type for the null tag")),
        }
    }

    fn pager_model(&self) -> Option<PagerModel> {
        Some(PagerModel::Postfix)
    }
}

pub struct MysqlDialect;

impl SqlDialect for MysqlDialect {
    fn name(&self) -> &'static str {
        "MYSQL"
    }

    fn dual_name(&self) -> &'static str {
        "DUAL"
    }

    fn select_last_insert_id(&self, _table_name: &str) -> Result<String, DbError> {
        Ok("SELECT LAST_INSERT_ID() LID".to_string())
    }

    fn type2sql(&self, t: ValueType, size: usize) -> Result<String, DbError> {
        match t {
            ValueType::Int => Ok("INT".to_string()),
            ValueType::LongInt => Ok("BIGINT".to_string()),
            ValueType::Str => Ok(varchar("VARCHAR", size)),
            ValueType::Decimal => Ok("DECIMAL(16, 6)".to_string()),
            ValueType::DateTime => Ok("TIMESTAMP".to_string()),
            ValueType::Float => Ok("DOUBLE".to_string()),
            ValueType::Blob => Ok("BLOB".to_string()),
            ValueType::Null => Err(DbError::dialect("no SQL type for the null tag")),
        }
    }

    fn autoinc_flag(&self) -> &'static str {
        "AUTO_INCREMENT"
    }

    fn sysdate_func(&self) -> &'static str {
        "NOW()"
    }

    fn suffix_create_table(&self) -> &'static str {
        " ENGINE=INNODB DEFAULT CHARSET=utf8"
    }

    fn pager_model(&self) -> Option<PagerModel> {
        Some(PagerModel::Mysql)
    }

    fn quote_identifier(&self, name: &str) -> String {
        format!("`{}`", name.replace('`', "``"))
    }
}

pub struct SqliteDialect;

impl SqlDialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "SQLITE"
    }

    fn select_last_insert_id(&self, _table_name: &str) -> Result<String, DbError> {
        Ok("SELECT LAST_INSERT_ROWID() LID".to_string())
    }

    fn type2sql(&self, t: ValueType, size: usize) -> Result<String, DbError> {
        match t {
            ValueType::Int => Ok("INTEGER".to_string()),
            ValueType::LongInt => Ok("INTEGER".to_string()),
            ValueType::Str => Ok(varchar("VARCHAR", size)),
            ValueType::Decimal => Ok("NUMERIC".to_string()),
            ValueType::DateTime => Ok("TIMESTAMP".to_string()),
            ValueType::Float => Ok("DOUBLE".to_string()),
            ValueType::Blob => Ok("BLOB".to_string()),
            ValueType::Null => Err(DbError::dialect("no SQL type for the null tag")),
        }
    }

    fn autoinc_flag(&self) -> &'static str {
        "AUTOINCREMENT"
    }

    fn fk_internal(&self) -> bool {
        true
    }

    fn pager_model(&self) -> Option<PagerModel> {
        Some(PagerModel::Postfix)
    }
}

/// Interbase / Firebird.
pub struct InterbaseDialect;

impl SqlDialect for InterbaseDialect {
    fn name(&self) -> &'static str {
        "INTERBASE"
    }

    fn dual_name(&self) -> &'static str {
        "RDB$DATABASE"
    }

    fn has_sequences(&self) -> bool {
        true
    }

    fn select_curr_value(&self, seq_name: &str) -> Result<String, DbError> {
        Ok(format!("GEN_ID({}, 0)", seq_name))
    }

    fn select_next_value(&self, seq_name: &str) -> Result<String, DbError> {
        Ok(format!("GEN_ID({}, 1)", seq_name))
    }

    fn gen_sequence(&self, seq_name: &str) -> Result<String, DbError> {
        Ok(format!("CREATE GENERATOR {}", seq_name))
    }

    fn type2sql(&self, t: ValueType, size: usize) -> Result<String, DbError> {
        match t {
            ValueType::Int => Ok("INTEGER".to_string()),
            ValueType::LongInt => Ok("BIGINT".to_string()),
            ValueType::Str => Ok(varchar("VARCHAR", size)),
            ValueType::Decimal => Ok("DECIMAL(16, 6)".to_string()),
            ValueType::DateTime => Ok("TIMESTAMP".to_string()),
            ValueType::Float => Ok("DOUBLE PRECISION".to_string()),
            ValueType::Blob => Ok("BLOB".to_string()),
            ValueType::Null => Err(DbError::dialect("no SQL type for the null tag")),
        }
    }

    fn commit_ddl(&self) -> bool {
        true
    }

    fn pager_model(&self) -> Option<PagerModel> {
        Some(PagerModel::Interbase)
    }
}

pub struct MssqlDialect;

impl SqlDialect for MssqlDialect {
    fn name(&self) -> &'static str {
        "MSSQL"
    }

    fn select_last_insert_id(&self, _table_name: &str) -> Result<String, DbError> {
        Ok("SELECT SCOPE_IDENTITY() LID".to_string())
    }

    fn type2sql(&self, t: ValueType, size: usize) -> Result<String, DbError> {
        match t {
            ValueType::Int => Ok("INT".to_string()),
            ValueType::LongInt => Ok("BIGINT".to_string()),
            ValueType::Str => Ok(varchar("NVARCHAR", size)),
            ValueType::Decimal => Ok("DECIMAL(16, 6)".to_string()),
            ValueType::DateTime => Ok("DATETIME".to_string()),
            ValueType::Float => Ok("FLOAT".to_string()),
            ValueType::Blob => Ok("VARBINARY(MAX)".to_string()),
            ValueType::Null => Err(DbError::dialect("no SQL type for the null tag")),
        }
    }

    fn autoinc_flag(&self) -> &'static str {
        "IDENTITY(1, 1)"
    }

    fn sysdate_func(&self) -> &'static str {
        "GETDATE()"
    }

    fn not_null_default(&self, null_clause: &str, default_clause: &str) -> String {
        join_clauses(null_clause, default_clause)
    }

    fn pager_model(&self) -> Option<PagerModel> {
        None
    }

    fn quote_identifier(&self, name: &str) -> String {
        format!("[{}]", name.replace(']', "]]"))
    }

    fn grant_insert_id(&self, table_name: &str, on: bool) -> Option<String> {
        Some(format!(
            "SET IDENTITY_INSERT {} {}",
            table_name,
            if on { "ON" } else { "OFF" }
        ))
    }
}

fn varchar(base: &str, size: usize) -> String {
    if size > 0 {
        format!("{}({})", base, size)
    } else {
        format!("{}(4000)", base)
    }
}

type DialectMap = HashMap<String, Arc<dyn SqlDialect>>;

static DIALECTS: OnceLock<RwLock<DialectMap>> = OnceLock::new();

fn registry() -> &'static RwLock<DialectMap> {
    DIALECTS.get_or_init(|| {
        let std_dialects: [Arc<dyn SqlDialect>; 6] = [
            Arc::new(OracleDialect),
            Arc::new(PostgresDialect),
            Arc::new(MysqlDialect),
            Arc::new(SqliteDialect),
            Arc::new(InterbaseDialect),
            Arc::new(MssqlDialect),
        ];
        let mut map = DialectMap::new();
        for d in std_dialects {
            map.insert(d.name().to_string(), d);
        }
        RwLock::new(map)
    })
}

/// Look up a dialect by name, case-insensitively.
pub fn sql_dialect(name: &str) -> Result<Arc<dyn SqlDialect>, DbError> {
    let map = registry()
        .read()
        .map_err(|_| DbError::dialect("dialect registry poisoned"))?;
    map.get(&name.to_ascii_uppercase())
        .cloned()
        .ok_or_else(|| DbError::UnknownDialect(name.to_string()))
}

/// Register a custom dialect. Returns false if the name was taken.
pub fn register_sql_dialect(dialect: Arc<dyn SqlDialect>) -> bool {
    let mut map = match registry().write() {
        Ok(map) => map,
        Err(_) => return false,
    };
    let name = dialect.name().to_string();
    if map.contains_key(&name) {
        return false;
    }
    map.insert(name, dialect);
    true
}

pub fn list_sql_dialects() -> Vec<String> {
    match registry().read() {
        Ok(map) => {
            let mut names: Vec<String> = map.keys().cloned().collect();
            names.sort();
            names
        }
        Err(_) => Vec::new(),
    }
}
