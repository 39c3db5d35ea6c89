//! Business logic and repository trait definitions for Tasker.
//!
//! This crate defines the task engine, the scheduler and the "ports"
//! (repository traits) that the infrastructure layer implements. It depends
//! only on `tasker-types` -- never on `tasker-infra` or any database/IO crate.

pub mod repository;
pub mod task;
