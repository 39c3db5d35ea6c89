//! Polling scheduler: finds due task instances and drives them through the
//! execution engine.
//!
//! Each cycle:
//! 1. `find_due(now)` on the repository.
//! 2. Match every instance to its definition by name; unmatched instances are
//!    handled per [`UnmatchedPolicy`].
//! 3. Run the engine on the blocking pool, up to `max_concurrent_dispatch`
//!    instances at once (`JoinSet` + `Semaphore`).
//! 4. Mark exhausted instances `error` and save every dispatched instance.
//!
//! The batch drains before the next poll, so an instance never has two engine
//! runs in flight.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tasker_types::config::{PersistMode, SchedulerConfig, UnmatchedPolicy};
use tasker_types::error::RepositoryError;
use tasker_types::task::{TaskId, TaskInstance, TaskStatus};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::definition::TaskDefinition;
use super::engine::{ExecutionEngine, RunOutcome};
use super::registry::TaskRegistry;
use crate::repository::task::TaskRepository;

// ---------------------------------------------------------------------------
// Error / report types
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("failed to query due tasks: {0}")]
    FindDue(#[from] RepositoryError),

    #[error("dispatch error: {0}")]
    Dispatch(String),
}

/// Per-cycle tally of what happened to the due instances.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    /// Instances returned by `find_due`.
    pub due: usize,
    pub completed: usize,
    pub retrying: usize,
    pub redirected: usize,
    pub already_terminal: usize,
    /// Instances marked `error` after exhausting their retries.
    pub exhausted: usize,
    /// Engine failures that leave the instance `todo` (step not found etc).
    pub engine_errors: usize,
    /// Instances whose name matched no registered definition.
    pub unmatched: usize,
    /// Unmatched instances marked `error` by the `fail_after` policy.
    pub dead_lettered: usize,
    pub panicked: usize,
    pub save_failures: usize,
}

impl CycleReport {
    fn record(&mut self, dispatched: Dispatched) {
        match dispatched.kind {
            DispatchKind::Completed => self.completed += 1,
            DispatchKind::Retrying => self.retrying += 1,
            DispatchKind::Redirected => self.redirected += 1,
            DispatchKind::AlreadyTerminal => self.already_terminal += 1,
            DispatchKind::Exhausted => self.exhausted += 1,
            DispatchKind::EngineError => self.engine_errors += 1,
            DispatchKind::Panicked => self.panicked += 1,
        }
        if dispatched.save_failed {
            self.save_failures += 1;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DispatchKind {
    Completed,
    Retrying,
    Redirected,
    AlreadyTerminal,
    Exhausted,
    EngineError,
    Panicked,
}

#[derive(Debug)]
struct Dispatched {
    kind: DispatchKind,
    save_failed: bool,
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Polls a [`TaskRepository`] and dispatches due instances.
pub struct Scheduler<R: TaskRepository + 'static> {
    repo: Arc<R>,
    registry: Arc<TaskRegistry>,
    config: SchedulerConfig,
    /// Consecutive unmatched cycles per instance, for `fail_after`.
    unmatched_cycles: DashMap<TaskId, u32>,
}

impl<R: TaskRepository + 'static> Scheduler<R> {
    pub fn new(repo: Arc<R>, registry: Arc<TaskRegistry>, config: SchedulerConfig) -> Self {
        Self {
            repo,
            registry,
            config,
            unmatched_cycles: DashMap::new(),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    /// Run one poll-and-dispatch cycle against `now`.
    ///
    /// Only a failed `find_due` is an error; per-instance failures are logged
    /// and counted in the report.
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> Result<CycleReport, SchedulerError> {
        let due = self.repo.find_due(now).await?;
        let mut report = CycleReport {
            due: due.len(),
            ..Default::default()
        };

        if due.is_empty() {
            self.unmatched_cycles.clear();
            return Ok(report);
        }

        tracing::debug!(due = due.len(), "dispatching due tasks");

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_dispatch.max(1)));
        let mut join_set = JoinSet::new();
        let mut unmatched_ids = HashSet::new();

        for task in due {
            let Some(definition) = self.registry.get(&task.name) else {
                unmatched_ids.insert(task.id);
                self.handle_unmatched(task, &mut report).await;
                continue;
            };

            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .map_err(|e| SchedulerError::Dispatch(e.to_string()))?;
            let repo = Arc::clone(&self.repo);
            let persist_mode = self.config.persist_mode;

            join_set.spawn(async move {
                let _permit = permit;
                dispatch(repo, definition, task, persist_mode).await
            });
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(dispatched) => report.record(dispatched),
                Err(e) => {
                    tracing::error!(error = %e, "dispatch task failed to join");
                    report.panicked += 1;
                }
            }
        }

        // Counts only survive for instances that were unmatched again.
        self.unmatched_cycles
            .retain(|id, _| unmatched_ids.contains(id));

        Ok(report)
    }

    /// Poll until `cancel` fires, sleeping the configured interval between
    /// cycles. In-flight dispatch finishes before shutdown is observed.
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!(
            poll_interval_secs = self.config.poll_interval_secs,
            max_concurrent_dispatch = self.config.max_concurrent_dispatch,
            definitions = self.registry.len(),
            "scheduler started"
        );

        loop {
            if cancel.is_cancelled() {
                break;
            }

            match self.run_cycle(Utc::now()).await {
                Ok(report) if report.due > 0 => {
                    tracing::info!(
                        due = report.due,
                        completed = report.completed,
                        retrying = report.retrying,
                        exhausted = report.exhausted,
                        unmatched = report.unmatched,
                        engine_errors = report.engine_errors,
                        save_failures = report.save_failures,
                        "poll cycle finished"
                    );
                }
                Ok(_) => tracing::debug!("poll cycle found no due tasks"),
                Err(e) => tracing::error!(error = %e, "poll cycle failed"),
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.poll_interval()) => {}
            }
        }

        tracing::info!("scheduler stopped");
    }

    async fn handle_unmatched(&self, mut task: TaskInstance, report: &mut CycleReport) {
        report.unmatched += 1;

        let cycles = match self.config.unmatched {
            UnmatchedPolicy::Skip => {
                tracing::warn!(
                    task_id = %task.id,
                    task = task.name.as_str(),
                    "no task definition registered, skipping"
                );
                return;
            }
            UnmatchedPolicy::FailAfter { cycles } => cycles,
        };

        let seen = {
            let mut count = self.unmatched_cycles.entry(task.id).or_insert(0);
            *count += 1;
            *count
        };

        if seen < cycles {
            tracing::warn!(
                task_id = %task.id,
                task = task.name.as_str(),
                seen,
                cycles,
                "no task definition registered, skipping"
            );
            return;
        }

        self.unmatched_cycles.remove(&task.id);
        task.status = Some(TaskStatus::Error);
        tracing::error!(
            task_id = %task.id,
            task = task.name.as_str(),
            cycles,
            "no task definition registered, marking task as error"
        );

        match self.repo.save(&task).await {
            Ok(()) => report.dead_lettered += 1,
            Err(e) => {
                tracing::error!(task_id = %task.id, error = %e, "failed to save task");
                report.save_failures += 1;
            }
        }
    }
}

/// Run the engine for one instance on the blocking pool, then save it.
async fn dispatch<R: TaskRepository + 'static>(
    repo: Arc<R>,
    definition: Arc<TaskDefinition>,
    mut task: TaskInstance,
    persist_mode: PersistMode,
) -> Dispatched {
    let task_id = task.id;
    let handle = tokio::runtime::Handle::current();
    let step_repo = Arc::clone(&repo);

    let joined = tokio::task::spawn_blocking(move || {
        let result = match persist_mode {
            PersistMode::OncePerDispatch => ExecutionEngine::run(&definition, Some(&mut task)),
            PersistMode::EveryStep => {
                let mut persist_step = |t: &TaskInstance| {
                    if let Err(e) = handle.block_on(step_repo.save(t)) {
                        tracing::error!(
                            task_id = %t.id,
                            step = t.current_step.as_str(),
                            error = %e,
                            "failed to persist step transition"
                        );
                    }
                };
                ExecutionEngine::run_observed(&definition, Some(&mut task), &mut persist_step)
            }
        };
        (task, result)
    })
    .await;

    let (mut task, result) = match joined {
        Ok(pair) => pair,
        Err(e) => {
            tracing::error!(task_id = %task_id, error = %e, "step action panicked, task not saved");
            return Dispatched {
                kind: DispatchKind::Panicked,
                save_failed: false,
            };
        }
    };

    let kind = match result {
        Ok(RunOutcome::Completed) => {
            tracing::info!(task_id = %task.id, task = task.name.as_str(), "task completed");
            DispatchKind::Completed
        }
        Ok(RunOutcome::Retrying { .. }) => DispatchKind::Retrying,
        Ok(RunOutcome::Redirected { .. }) => DispatchKind::Redirected,
        Ok(RunOutcome::AlreadyTerminal(_)) => DispatchKind::AlreadyTerminal,
        Err(e) if e.is_terminal_failure() => {
            task.status = Some(TaskStatus::Error);
            tracing::error!(task_id = %task.id, task = task.name.as_str(), error = %e, "task failed");
            DispatchKind::Exhausted
        }
        Err(e) => {
            tracing::error!(task_id = %task.id, task = task.name.as_str(), error = %e, "task engine error");
            DispatchKind::EngineError
        }
    };

    let save_failed = match repo.save(&task).await {
        Ok(()) => false,
        Err(e) => {
            tracing::error!(task_id = %task.id, error = %e, "failed to save task");
            true
        }
    };

    Dispatched { kind, save_failed }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    use chrono::Duration as ChronoDuration;
    use tasker_types::task::NewTask;

    use super::*;
    use crate::task::step::ActionError;

    // -- Mock repository ----------------------------------------------------

    #[derive(Default)]
    struct MockRepo {
        tasks: Mutex<HashMap<TaskId, TaskInstance>>,
        saves: AtomicUsize,
        fail_find: AtomicBool,
        fail_save: AtomicBool,
        /// Number of upcoming saves to reject before succeeding again.
        fail_next_saves: AtomicUsize,
    }

    impl MockRepo {
        fn insert(&self, task: TaskInstance) -> TaskId {
            let id = task.id;
            self.tasks.lock().unwrap().insert(id, task);
            id
        }

        fn snapshot(&self, id: &TaskId) -> TaskInstance {
            self.tasks.lock().unwrap().get(id).cloned().unwrap()
        }

        fn saves(&self) -> usize {
            self.saves.load(Ordering::SeqCst)
        }

        fn set_due_at(&self, id: &TaskId, due_at: DateTime<Utc>) {
            self.tasks.lock().unwrap().get_mut(id).unwrap().due_at = due_at;
        }
    }

    impl TaskRepository for MockRepo {
        async fn find_due(&self, now: DateTime<Utc>) -> Result<Vec<TaskInstance>, RepositoryError> {
            if self.fail_find.load(Ordering::SeqCst) {
                return Err(RepositoryError::Connection);
            }
            Ok(self
                .tasks
                .lock()
                .unwrap()
                .values()
                .filter(|t| t.is_due(now))
                .cloned()
                .collect())
        }

        async fn save(&self, task: &TaskInstance) -> Result<(), RepositoryError> {
            if self.fail_save.load(Ordering::SeqCst) {
                return Err(RepositoryError::Query("disk full".to_string()));
            }
            if self
                .fail_next_saves
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(RepositoryError::Query("database is locked".to_string()));
            }
            self.saves.fetch_add(1, Ordering::SeqCst);
            self.tasks.lock().unwrap().insert(task.id, task.clone());
            Ok(())
        }

        async fn create(&self, new: NewTask) -> Result<TaskInstance, RepositoryError> {
            let mut task = TaskInstance::new(new.name, new.due_at.unwrap_or_else(Utc::now));
            task.args = new.args;
            task.payload = new.payload;
            self.insert(task.clone());
            Ok(task)
        }

        async fn get(&self, id: &TaskId) -> Result<Option<TaskInstance>, RepositoryError> {
            Ok(self.tasks.lock().unwrap().get(id).cloned())
        }

        async fn list(
            &self,
            status: Option<TaskStatus>,
            limit: u32,
        ) -> Result<Vec<TaskInstance>, RepositoryError> {
            Ok(self
                .tasks
                .lock()
                .unwrap()
                .values()
                .filter(|t| status.is_none_or(|s| t.effective_status() == s))
                .take(limit as usize)
                .cloned()
                .collect())
        }

        async fn delete(&self, id: &TaskId) -> Result<bool, RepositoryError> {
            Ok(self.tasks.lock().unwrap().remove(id).is_some())
        }
    }

    // -- Helpers ------------------------------------------------------------

    fn ok(_: &mut TaskInstance) -> Result<(), ActionError> {
        Ok(())
    }

    fn failing(_: &mut TaskInstance) -> Result<(), ActionError> {
        Err(ActionError::new("test failing task"))
    }

    fn registry() -> Arc<TaskRegistry> {
        let mut registry = TaskRegistry::new();
        registry
            .register(TaskDefinition::new("ok").step("s1", ok).step("s2", ok))
            .unwrap();
        registry
            .register(
                TaskDefinition::new("fails")
                    .with_max_retry(3)
                    .step("s1", failing)
                    .step("s2", ok),
            )
            .unwrap();
        registry
            .register(
                TaskDefinition::new("redirects")
                    .step("s1", |t: &mut TaskInstance| {
                        t.current_step = "doesnt_exists".to_string();
                        Ok(())
                    })
                    .step("s2", ok),
            )
            .unwrap();
        registry
            .register(TaskDefinition::new("panics").step("s1", |_: &mut TaskInstance| {
                panic!("step blew up")
            }))
            .unwrap();
        Arc::new(registry)
    }

    fn scheduler(repo: &Arc<MockRepo>, config: SchedulerConfig) -> Scheduler<MockRepo> {
        Scheduler::new(Arc::clone(repo), registry(), config)
    }

    fn due_task(name: &str) -> TaskInstance {
        let mut task = TaskInstance::new(name, Utc::now() - ChronoDuration::seconds(1));
        task.status = None;
        task
    }

    // -- Tests --------------------------------------------------------------

    #[tokio::test]
    async fn test_successful_task_is_done_after_one_cycle() {
        let repo = Arc::new(MockRepo::default());
        let id = repo.insert(due_task("ok"));
        let scheduler = scheduler(&repo, SchedulerConfig::default());

        let report = scheduler.run_cycle(Utc::now()).await.unwrap();

        assert_eq!(report.due, 1);
        assert_eq!(report.completed, 1);
        assert_eq!(repo.saves(), 1);
        let saved = repo.snapshot(&id);
        assert_eq!(saved.status, Some(TaskStatus::Done));
        assert_eq!(saved.current_step, "s2");
    }

    #[tokio::test]
    async fn test_failing_task_errors_on_third_cycle() {
        let repo = Arc::new(MockRepo::default());
        let id = repo.insert(due_task("fails"));
        let scheduler = scheduler(&repo, SchedulerConfig::default());

        for expected in 1..=2 {
            let report = scheduler.run_cycle(Utc::now()).await.unwrap();
            assert_eq!(report.retrying, 1);
            let saved = repo.snapshot(&id);
            assert_eq!(saved.retry_count, expected);
            assert_eq!(saved.status, Some(TaskStatus::Todo));
            assert_eq!(saved.current_step, "s1");
        }

        let report = scheduler.run_cycle(Utc::now()).await.unwrap();
        assert_eq!(report.exhausted, 1);
        let saved = repo.snapshot(&id);
        assert_eq!(saved.status, Some(TaskStatus::Error));
        assert_eq!(saved.retry_count, 2);

        let report = scheduler.run_cycle(Utc::now()).await.unwrap();
        assert_eq!(report.due, 0);
        assert_eq!(repo.saves(), 3);
    }

    #[tokio::test]
    async fn test_future_task_is_not_dispatched() {
        let repo = Arc::new(MockRepo::default());
        let id = repo.insert(TaskInstance::new("ok", Utc::now() + ChronoDuration::hours(1)));
        let scheduler = scheduler(&repo, SchedulerConfig::default());

        let report = scheduler.run_cycle(Utc::now()).await.unwrap();

        assert_eq!(report, CycleReport::default());
        assert_eq!(repo.snapshot(&id).current_step, "");
    }

    #[tokio::test]
    async fn test_unmatched_task_skipped_without_mutation() {
        let repo = Arc::new(MockRepo::default());
        let task = due_task("unknown");
        let id = repo.insert(task.clone());
        let scheduler = scheduler(&repo, SchedulerConfig::default());

        for _ in 0..3 {
            let report = scheduler.run_cycle(Utc::now()).await.unwrap();
            assert_eq!(report.unmatched, 1);
        }

        assert_eq!(repo.saves(), 0);
        assert_eq!(repo.snapshot(&id), task);
    }

    #[tokio::test]
    async fn test_unmatched_task_dead_lettered_after_cycles() {
        let repo = Arc::new(MockRepo::default());
        let id = repo.insert(due_task("unknown"));
        let config = SchedulerConfig {
            unmatched: UnmatchedPolicy::FailAfter { cycles: 2 },
            ..Default::default()
        };
        let scheduler = scheduler(&repo, config);

        let report = scheduler.run_cycle(Utc::now()).await.unwrap();
        assert_eq!(report.dead_lettered, 0);
        assert_eq!(repo.snapshot(&id).status, None);

        let report = scheduler.run_cycle(Utc::now()).await.unwrap();
        assert_eq!(report.dead_lettered, 1);
        assert_eq!(repo.snapshot(&id).status, Some(TaskStatus::Error));
    }

    #[tokio::test]
    async fn test_step_not_found_is_saved_but_stays_todo() {
        let repo = Arc::new(MockRepo::default());
        let mut task = due_task("ok");
        task.current_step = "nonexistent".to_string();
        let id = repo.insert(task);
        let scheduler = scheduler(&repo, SchedulerConfig::default());

        let report = scheduler.run_cycle(Utc::now()).await.unwrap();

        assert_eq!(report.engine_errors, 1);
        assert_eq!(repo.saves(), 1);
        let saved = repo.snapshot(&id);
        assert_eq!(saved.current_step, "nonexistent");
        assert_eq!(saved.status, Some(TaskStatus::Todo));
        assert_eq!(saved.retry_count, 0);
    }

    #[tokio::test]
    async fn test_redirect_to_unknown_step_across_cycles() {
        let repo = Arc::new(MockRepo::default());
        let id = repo.insert(due_task("redirects"));
        let scheduler = scheduler(&repo, SchedulerConfig::default());

        let report = scheduler.run_cycle(Utc::now()).await.unwrap();
        assert_eq!(report.redirected, 1);
        let saved = repo.snapshot(&id);
        assert_eq!(saved.current_step, "doesnt_exists");
        assert_eq!(saved.status, Some(TaskStatus::Todo));

        let report = scheduler.run_cycle(Utc::now()).await.unwrap();
        assert_eq!(report.due, 1);
        assert_eq!(report.engine_errors, 1);
        let saved = repo.snapshot(&id);
        assert_eq!(saved.current_step, "doesnt_exists");
        assert_eq!(saved.status, Some(TaskStatus::Todo));
        assert_eq!(saved.retry_count, 0);
        assert_eq!(repo.saves(), 2);
    }

    #[tokio::test]
    async fn test_unmatched_count_resets_when_task_leaves_the_poll() {
        let repo = Arc::new(MockRepo::default());
        let paused = repo.insert(due_task("unknown"));
        let steady = repo.insert(due_task("unknown"));
        let config = SchedulerConfig {
            unmatched: UnmatchedPolicy::FailAfter { cycles: 3 },
            ..Default::default()
        };
        let scheduler = scheduler(&repo, config);

        let report = scheduler.run_cycle(Utc::now()).await.unwrap();
        assert_eq!(report.unmatched, 2);

        repo.set_due_at(&paused, Utc::now() + ChronoDuration::hours(1));
        let report = scheduler.run_cycle(Utc::now()).await.unwrap();
        assert_eq!(report.unmatched, 1);

        repo.set_due_at(&paused, Utc::now() - ChronoDuration::seconds(1));
        let report = scheduler.run_cycle(Utc::now()).await.unwrap();
        assert_eq!(report.unmatched, 2);
        assert_eq!(report.dead_lettered, 1);
        assert_eq!(repo.snapshot(&steady).status, Some(TaskStatus::Error));
        assert_eq!(repo.snapshot(&paused).status, None);
    }

    #[tokio::test]
    async fn test_unmatched_count_resets_after_an_empty_poll() {
        let repo = Arc::new(MockRepo::default());
        let id = repo.insert(due_task("unknown"));
        let config = SchedulerConfig {
            unmatched: UnmatchedPolicy::FailAfter { cycles: 2 },
            ..Default::default()
        };
        let scheduler = scheduler(&repo, config);

        scheduler.run_cycle(Utc::now()).await.unwrap();

        repo.set_due_at(&id, Utc::now() + ChronoDuration::hours(1));
        let report = scheduler.run_cycle(Utc::now()).await.unwrap();
        assert_eq!(report.due, 0);

        repo.set_due_at(&id, Utc::now() - ChronoDuration::seconds(1));
        let report = scheduler.run_cycle(Utc::now()).await.unwrap();
        assert_eq!(report.dead_lettered, 0);
        assert_eq!(repo.snapshot(&id).status, None);

        let report = scheduler.run_cycle(Utc::now()).await.unwrap();
        assert_eq!(report.dead_lettered, 1);
        assert_eq!(repo.snapshot(&id).status, Some(TaskStatus::Error));
    }

    #[tokio::test]
    async fn test_bad_instances_do_not_halt_the_batch() {
        let repo = Arc::new(MockRepo::default());
        let unmatched = repo.insert(due_task("unknown"));
        let mut lost = due_task("ok");
        lost.current_step = "nonexistent".to_string();
        let lost = repo.insert(lost);
        let exhausted = {
            let mut task = due_task("fails");
            task.retry_count = 2;
            repo.insert(task)
        };
        let healthy = repo.insert(due_task("ok"));
        let config = SchedulerConfig {
            max_concurrent_dispatch: 2,
            ..Default::default()
        };
        let scheduler = scheduler(&repo, config);

        let report = scheduler.run_cycle(Utc::now()).await.unwrap();

        assert_eq!(report.due, 4);
        assert_eq!(report.unmatched, 1);
        assert_eq!(report.engine_errors, 1);
        assert_eq!(report.exhausted, 1);
        assert_eq!(report.completed, 1);
        assert_eq!(repo.snapshot(&healthy).status, Some(TaskStatus::Done));
        assert_eq!(repo.snapshot(&exhausted).status, Some(TaskStatus::Error));
        assert_eq!(repo.snapshot(&lost).status, Some(TaskStatus::Todo));
        assert_eq!(repo.snapshot(&unmatched).status, None);
    }

    #[tokio::test]
    async fn test_every_step_save_failure_does_not_stop_the_run() {
        let repo = Arc::new(MockRepo::default());
        let id = repo.insert(due_task("ok"));
        repo.fail_next_saves.store(1, Ordering::SeqCst);
        let config = SchedulerConfig {
            persist_mode: PersistMode::EveryStep,
            ..Default::default()
        };
        let scheduler = scheduler(&repo, config);

        let report = scheduler.run_cycle(Utc::now()).await.unwrap();

        assert_eq!(report.completed, 1);
        assert_eq!(report.save_failures, 0);
        // The s1 -> s2 save was rejected; s2 -> done and the final save landed.
        assert_eq!(repo.saves(), 2);
        let saved = repo.snapshot(&id);
        assert_eq!(saved.status, Some(TaskStatus::Done));
        assert_eq!(saved.current_step, "s2");
    }

    #[tokio::test]
    async fn test_every_step_persist_mode_saves_each_transition() {
        let repo = Arc::new(MockRepo::default());
        repo.insert(due_task("ok"));
        let config = SchedulerConfig {
            persist_mode: PersistMode::EveryStep,
            ..Default::default()
        };
        let scheduler = scheduler(&repo, config);

        scheduler.run_cycle(Utc::now()).await.unwrap();

        // s1 -> s2, s2 -> done, then the final save.
        assert_eq!(repo.saves(), 3);
    }

    #[tokio::test]
    async fn test_panic_is_isolated_to_one_task() {
        let repo = Arc::new(MockRepo::default());
        let panicking = repo.insert(due_task("panics"));
        let healthy = repo.insert(due_task("ok"));
        let scheduler = scheduler(&repo, SchedulerConfig::default());

        let report = scheduler.run_cycle(Utc::now()).await.unwrap();

        assert_eq!(report.panicked, 1);
        assert_eq!(report.completed, 1);
        assert_eq!(repo.snapshot(&healthy).status, Some(TaskStatus::Done));
        assert_eq!(repo.snapshot(&panicking).status, None);
    }

    #[tokio::test]
    async fn test_concurrent_dispatch_completes_whole_batch() {
        let repo = Arc::new(MockRepo::default());
        let ids: Vec<TaskId> = (0..10).map(|_| repo.insert(due_task("ok"))).collect();
        let config = SchedulerConfig {
            max_concurrent_dispatch: 4,
            ..Default::default()
        };
        let scheduler = scheduler(&repo, config);

        let report = scheduler.run_cycle(Utc::now()).await.unwrap();

        assert_eq!(report.completed, 10);
        for id in ids {
            assert_eq!(repo.snapshot(&id).status, Some(TaskStatus::Done));
        }
    }

    #[tokio::test]
    async fn test_save_failure_is_counted() {
        let repo = Arc::new(MockRepo::default());
        let id = repo.insert(due_task("ok"));
        repo.fail_save.store(true, Ordering::SeqCst);
        let scheduler = scheduler(&repo, SchedulerConfig::default());

        let report = scheduler.run_cycle(Utc::now()).await.unwrap();

        assert_eq!(report.completed, 1);
        assert_eq!(report.save_failures, 1);
        assert_eq!(repo.snapshot(&id).status, None);
    }

    #[tokio::test]
    async fn test_find_due_failure_is_an_error() {
        let repo = Arc::new(MockRepo::default());
        repo.fail_find.store(true, Ordering::SeqCst);
        let scheduler = scheduler(&repo, SchedulerConfig::default());

        let err = scheduler.run_cycle(Utc::now()).await.unwrap_err();
        assert!(matches!(err, SchedulerError::FindDue(RepositoryError::Connection)));
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let repo = Arc::new(MockRepo::default());
        let id = repo.insert(due_task("ok"));
        let scheduler = Arc::new(scheduler(&repo, SchedulerConfig::default()));
        let cancel = CancellationToken::new();

        let handle = tokio::spawn({
            let scheduler = Arc::clone(&scheduler);
            let cancel = cancel.clone();
            async move { scheduler.run(cancel).await }
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("scheduler did not stop")
            .unwrap();

        assert_eq!(repo.snapshot(&id).status, Some(TaskStatus::Done));
    }
}
