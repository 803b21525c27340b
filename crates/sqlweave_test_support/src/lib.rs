//! Scripted fake driver and schema fixtures for tests.

mod fake_driver;
mod fixtures;

pub use fake_driver::{
    fake_connection, fake_db, register, FakeBackend, FakeDb, FakeDbHandle, FakeDriver,
};
pub use fixtures::{client_order_schema, row, user_session_schema};
