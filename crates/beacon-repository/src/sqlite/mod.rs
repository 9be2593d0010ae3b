//! SQLite implementations.

mod export_source;
mod export_store;
mod record_store;

pub use export_source::*;
pub use export_store::*;
pub use record_store::*;
