//! # Beacon Repository
//!
//! SQLite persistence for queue entries, export files and export sources.
//!
//! ```text
//! JobProcessor
//!   ↓  Arc<dyn RecordStore>
//! SqliteRecordStore
//!   ↓  DatabasePool
//! SQLite (queues, export_files)
//! ```

pub mod pool;
pub mod sqlite;

pub use pool::*;
pub use sqlite::*;
