//! Configuration types for Tasker.
//!
//! `TaskerConfig` represents the top-level `config.toml`; `SchedulerConfig`
//! controls the polling loop. All fields have sensible defaults.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level configuration, loaded from `~/.tasker/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskerConfig {
    /// Override for the SQLite URL (defaults to `{data_dir}/tasker.db`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,

    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

/// Settings for the scheduler dispatch loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds to sleep between poll cycles.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Upper bound on instances dispatched at once within one batch.
    #[serde(default = "default_max_concurrent_dispatch")]
    pub max_concurrent_dispatch: usize,

    #[serde(default)]
    pub persist_mode: PersistMode,

    #[serde(default)]
    pub unmatched: UnmatchedPolicy,
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_max_concurrent_dispatch() -> usize {
    1
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            max_concurrent_dispatch: default_max_concurrent_dispatch(),
            persist_mode: PersistMode::default(),
            unmatched: UnmatchedPolicy::default(),
        }
    }
}

impl SchedulerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

/// How often a dispatched instance is written back to the repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersistMode {
    /// One save after the engine returns.
    #[default]
    OncePerDispatch,
    /// Also save after every in-memory step transition.
    EveryStep,
}

/// What the scheduler does with a due instance whose name matches no
/// registered definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum UnmatchedPolicy {
    /// Log and leave the instance untouched; it is re-evaluated next cycle.
    #[default]
    Skip,
    /// Mark the instance `error` after it went unmatched for `cycles`
    /// consecutive cycles.
    FailAfter { cycles: u32 },
}
