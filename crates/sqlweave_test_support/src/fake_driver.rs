use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, OnceLock};

use sqlweave_core::{
    register_sql_driver, sql_dialect, DbError, PlaceholderStyle, Row, SqlConnectBackend,
    SqlConnection, SqlDialect, SqlDriver, SqlSource, Value,
};

/// Shared scripted state behind every fake connection to one database
/// name: the statements that ran, the results to hand out, and open/close
/// counters.
#[derive(Default)]
pub struct FakeDb {
    /// Every executed statement with its bound parameters, in order.
    pub executed: Vec<(String, Vec<Value>)>,
    /// Commits and rollbacks, in order.
    pub tx_log: Vec<String>,
    /// Result sets handed out to statements, front first. Statements
    /// beyond the script see an empty result.
    pub results: VecDeque<Vec<Row>>,
    pub open_count: usize,
    pub close_count: usize,
    /// When set, the next statement fails with this message.
    pub fail_next: Option<String>,
}

impl FakeDb {
    pub fn push_result(&mut self, rows: Vec<Row>) {
        self.results.push_back(rows);
    }

    pub fn statements(&self) -> Vec<String> {
        self.executed.iter().map(|(sql, _)| sql.clone()).collect()
    }

    pub fn clear_log(&mut self) {
        self.executed.clear();
        self.tx_log.clear();
    }
}

pub type FakeDbHandle = Arc<Mutex<FakeDb>>;

type FakeDbMap = Mutex<HashMap<String, FakeDbHandle>>;

static DBS: OnceLock<FakeDbMap> = OnceLock::new();

/// The scripted state for a database name, created on first use. Tests
/// isolate themselves by picking unique names.
pub fn fake_db(name: &str) -> FakeDbHandle {
    let map = DBS.get_or_init(|| Mutex::new(HashMap::new()));
    let mut map = map.lock().unwrap_or_else(|e| e.into_inner());
    Arc::clone(
        map.entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(FakeDb::default()))),
    )
}

/// Register the fake driver as `FAKE` in the driver registry.
pub fn register() -> bool {
    register_sql_driver(Arc::new(FakeDriver))
}

pub struct FakeDriver;

impl SqlDriver for FakeDriver {
    fn name(&self) -> &'static str {
        "FAKE"
    }

    fn create_backend(&self) -> Box<dyn SqlConnectBackend> {
        Box::new(FakeBackend {
            db: None,
            rows: VecDeque::new(),
            prepared: None,
        })
    }

    fn placeholder_style(&self) -> PlaceholderStyle {
        PlaceholderStyle::Positional
    }
}

pub struct FakeBackend {
    db: Option<FakeDbHandle>,
    rows: VecDeque<Row>,
    prepared: Option<String>,
}

impl FakeBackend {
    fn db(&self) -> Result<FakeDbHandle, DbError> {
        self.db
            .clone()
            .ok_or_else(|| DbError::driver("connection is closed"))
    }

    fn run(&mut self, sql: &str, params: &[Value]) -> Result<(), DbError> {
        let db = self.db()?;
        let mut db = db.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(msg) = db.fail_next.take() {
            return Err(DbError::driver(msg));
        }
        db.executed.push((sql.to_string(), params.to_vec()));
        self.rows = db.results.pop_front().unwrap_or_default().into();
        Ok(())
    }
}

impl SqlConnectBackend for FakeBackend {
    fn open(&mut self, _dialect: &dyn SqlDialect, source: &SqlSource) -> Result<(), DbError> {
        let handle = fake_db(&source.db);
        handle.lock().unwrap_or_else(|e| e.into_inner()).open_count += 1;
        self.db = Some(handle);
        Ok(())
    }

    fn close(&mut self) -> Result<(), DbError> {
        if let Some(db) = self.db.take() {
            db.lock().unwrap_or_else(|e| e.into_inner()).close_count += 1;
        }
        Ok(())
    }

    fn commit(&mut self) -> Result<(), DbError> {
        let db = self.db()?;
        db.lock()
            .unwrap_or_else(|e| e.into_inner())
            .tx_log
            .push("COMMIT".to_string());
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), DbError> {
        let db = self.db()?;
        db.lock()
            .unwrap_or_else(|e| e.into_inner())
            .tx_log
            .push("ROLLBACK".to_string());
        Ok(())
    }

    fn exec_direct(&mut self, sql: &str) -> Result<(), DbError> {
        self.prepared = None;
        self.run(sql, &[])
    }

    fn prepare(&mut self, sql: &str) -> Result<(), DbError> {
        self.prepared = Some(sql.to_string());
        self.rows.clear();
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
}

/// A ready connection over the fake driver, with the given dialect and
/// scripted state named `db_name`.
pub fn fake_connection(db_name: &str, dialect_name: &str) -> SqlConnection {
    let dialect = sql_dialect(dialect_name).expect("standard dialect");
    let source = SqlSource::new(db_name, "FAKE", dialect_name, db_name, "", "");
    let mut backend = Box::new(FakeBackend {
        db: None,
        rows: VecDeque::new(),
        prepared: None,
    });
    backend
        .open(dialect.as_ref(), &source)
        .expect("fake open never fails");
    SqlConnection::from_parts(source, dialect, PlaceholderStyle::Positional, backend)
}
