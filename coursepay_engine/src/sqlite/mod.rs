//! SQLite backend for the commerce engine.

mod sqlite_impl;

pub mod db;

pub use sqlite_impl::SqliteDatabase;
