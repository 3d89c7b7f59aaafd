//! chainingest-storage: persistent storage for ChainIngest.
//!
//! - [`sqlite`]: SQLite via `sqlx`: checkpoints and handler records in one
//!   database, written under a single transaction per batch.
//!
//! The in-memory store lives in `chainingest-core`
//! (`MemoryCheckpointStore`).

pub mod sqlite;

pub use sqlite::{SqliteStorage, SqliteTx};
