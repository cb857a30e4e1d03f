//! Session store implementations for Mnemo.

pub mod in_memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use in_memory::InMemorySessionStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteSessionStore;
