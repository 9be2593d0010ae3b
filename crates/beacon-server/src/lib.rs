//! # Beacon Server Library
//!
//! Composition root for the queue worker: builds the record store, the
//! processor and its handlers, and drives the queue scanner.

pub mod app;
pub mod handlers;
