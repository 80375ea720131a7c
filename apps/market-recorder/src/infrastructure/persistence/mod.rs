//! Event Store Adapters
//!
//! - **SQLite**: the default append-only file store
//! - **In-memory**: substitutable store for tests

pub mod in_memory;
pub mod sqlite;

pub use in_memory::InMemoryStore;
pub use sqlite::{ORDER_BOOK_TABLE, SqliteStore, TICKER_TABLE};
