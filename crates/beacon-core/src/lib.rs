//! # Beacon Core
//!
//! Error types and tracing initialisation shared by every Beacon crate.

pub mod error;
pub mod telemetry;

pub use error::*;
pub use telemetry::{init_telemetry, TelemetryConfig};
