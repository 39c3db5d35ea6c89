//! Application state shared by the CLI commands.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tasker_core::task::{Scheduler, TaskRegistry};
use tasker_infra::config::{database_url, load_config, resolve_data_dir};
use tasker_infra::sqlite::pool::DatabasePool;
use tasker_infra::sqlite::task::SqliteTaskRepository;
use tasker_types::config::{SchedulerConfig, TaskerConfig};

use crate::builtin;

pub type ConcreteScheduler = Scheduler<SqliteTaskRepository>;

pub struct AppState {
    pub data_dir: PathBuf,
    pub config: TaskerConfig,
    pub repo: Arc<SqliteTaskRepository>,
    pub registry: Arc<TaskRegistry>,
}

impl AppState {
    /// Resolve the data dir, load config, open the database and register the
    /// built-in definitions.
    pub async fn init() -> anyhow::Result<Self> {
        let data_dir = resolve_data_dir();
        tokio::fs::create_dir_all(&data_dir)
            .await
            .with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;

        let config = load_config(&data_dir).await;
        let db_url = database_url(&config, &data_dir);
        let db_pool = DatabasePool::new(&db_url)
            .await
            .with_context(|| format!("Failed to open database at {db_url}"))?;

        let registry = builtin::registry().context("Failed to register built-in tasks")?;

        tracing::debug!(
            data_dir = %data_dir.display(),
            definitions = registry.len(),
            "application state ready"
        );

        Ok(Self {
            data_dir,
            config,
            repo: Arc::new(SqliteTaskRepository::new(db_pool)),
            registry: Arc::new(registry),
        })
    }

    /// A scheduler over this state's repository and registry.
    pub fn scheduler(&self, config: SchedulerConfig) -> ConcreteScheduler {
        Scheduler::new(Arc::clone(&self.repo), Arc::clone(&self.registry), config)
    }
}
