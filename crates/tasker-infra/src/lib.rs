//! Infrastructure layer for Tasker.
//!
//! Implements the repository traits defined in `tasker-core` on SQLite and
//! loads configuration from the data directory.

pub mod config;
pub mod sqlite;
