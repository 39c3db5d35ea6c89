//! Shared domain types for Tasker.
//!
//! Task instances, their lifecycle status, scheduler configuration and the
//! repository error type.
//!
//! Zero infrastructure dependencies -- only serde, serde_json, uuid, chrono, thiserror.

pub mod config;
pub mod error;
pub mod task;
