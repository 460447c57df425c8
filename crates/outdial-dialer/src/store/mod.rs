//! Store implementations: in-memory for tests and embedding, SQLite for persistence.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
