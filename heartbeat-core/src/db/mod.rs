//! Database layer for heartbeat
//!
//! SQLite storage for the project state record, with:
//! - Schema migrations
//! - Export history for the CLI

pub mod repo;
pub mod schema;

pub use repo::{Database, ExportRecord};
