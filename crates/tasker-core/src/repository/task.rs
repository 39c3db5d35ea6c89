//! Task repository trait definition.
//!
//! The scheduler only needs `find_due` and `save`; the remaining methods back
//! the CLI and tests.

use chrono::{DateTime, Utc};
use tasker_types::error::RepositoryError;
use tasker_types::task::{NewTask, TaskId, TaskInstance, TaskStatus};

/// Storage port for task instances.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait TaskRepository: Send + Sync {
    /// All instances with `status == todo` and `due_at <= now`.
    fn find_due(
        &self,
        now: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<Vec<TaskInstance>, RepositoryError>> + Send;

    /// Upsert the instance's full mutable state.
    fn save(
        &self,
        task: &TaskInstance,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Insert a new instance built from `new`.
    fn create(
        &self,
        new: NewTask,
    ) -> impl std::future::Future<Output = Result<TaskInstance, RepositoryError>> + Send;

    fn get(
        &self,
        id: &TaskId,
    ) -> impl std::future::Future<Output = Result<Option<TaskInstance>, RepositoryError>> + Send;

    /// List instances, newest first, optionally filtered by status.
    fn list(
        &self,
        status: Option<TaskStatus>,
        limit: u32,
    ) -> impl std::future::Future<Output = Result<Vec<TaskInstance>, RepositoryError>> + Send;

    /// Delete an instance. Returns `true` if it existed.
    fn delete(
        &self,
        id: &TaskId,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;
}
