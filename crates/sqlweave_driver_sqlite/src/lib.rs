//! SQLite driver binding over `rusqlite`.

mod driver;

pub use driver::{register, SqliteBackend, SqliteDriver};
