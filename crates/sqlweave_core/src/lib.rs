//! Value variants, SQL dialects, driver traits, and the connection pool —
//! the layer below the ORM.

mod dialect;
mod driver;
mod error;
mod pool;
mod source;
mod value;

pub use dialect::{
    InterbaseDialect, MssqlDialect, MysqlDialect, OracleDialect, PagerModel, PostgresDialect,
    SqlDialect, SqliteDialect, list_sql_dialects, register_sql_dialect, sql_dialect,
    SYSDATE_SENTINEL,
};
pub use driver::{
    ColumnDescr, PlaceholderStyle, Row, RowsIter, SqlConnectBackend, SqlConnection, SqlDriver,
    find_in_row, list_sql_drivers, register_sql_driver, sql_driver,
};
pub use error::DbError;
pub use pool::{PoolConfig, PooledConnection, SqlPool};
pub use source::SqlSource;
pub use value::{Value, ValueType, parse_date_time};

pub use chrono;
