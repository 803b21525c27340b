use thiserror::Error;

use crate::value::ValueType;

/// Errors raised below the ORM layer: values, dialects, drivers, sources,
/// the pool, and the engine's mode guard.
///
/// Driver-level failures that cannot be told apart from a broken session
/// additionally mark the connection bad; the pool retires bad connections
/// on return.
#[derive(Debug, Error)]
pub enum DbError {
    /// Conversion between value tags is not possible for this value.
    #[error("can't cast value of type '{0}' to type '{1}'")]
    BadCast(ValueType, ValueType),

    /// A null value was dereferenced where a concrete value was required.
    #[error("can't dereference a NULL value")]
    NullValue,

    /// The dialect does not support the requested operation.
    #[error("dialect error: {0}")]
    Dialect(String),

    /// No dialect registered under this name.
    #[error("unknown dialect: {0}")]
    UnknownDialect(String),

    /// No driver registered under this name.
    #[error("unknown driver: {0}")]
    UnknownDriver(String),

    /// Opening a connection failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// A prepare/exec/fetch/commit/rollback driver call failed.
    #[error("driver error: {0}")]
    Driver(String),

    /// Write or SELECT FOR UPDATE attempted on a read-only engine.
    #[error("bad operation in this mode: {0}")]
    BadOperationInMode(String),

    /// A query expected data and none came back.
    #[error("no data found: {0}")]
    NoDataFound(String),

    /// The pool has no source registered under this id.
    #[error("unknown connection source: {0}")]
    UnknownSource(String),

    /// A connection URL or source dictionary could not be understood.
    #[error("invalid connection source: {0}")]
    BadSource(String),
}

impl DbError {
    pub fn driver(msg: impl Into<String>) -> Self {
        DbError::Driver(msg.into())
    }

    pub fn dialect(msg: impl Into<String>) -> Self {
        DbError::Dialect(msg.into())
    }
}
