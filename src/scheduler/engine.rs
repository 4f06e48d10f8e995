//! Scheduler engine implementation.
//!
//! The scheduler is responsible for:
//! - Hot-reloading the schedule configuration when the file changes
//! - Computing due times from cron expressions
//! - Applying the per-job overlap policy (skip or queue)
//! - Spawning, tracking, and cancelling execution tasks
//! - Reporting runtime status
//!
//! The engine is a single cooperative loop: it never blocks on a running
//! execution, it only decides whether to start, queue, or skip one. Each
//! execution runs as its own tokio task and records its result back into the
//! job's state.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{load_schedule_config, OverlapPolicy, ScheduleConfig, ScheduleJobConfig};
use crate::core::schedule::Schedule;
use crate::core::types::{JobId, RunId};
use crate::execution::{
    dispatch_post_run, format_command_title, CommandExecutor, CommandRegistry, CommandRunRecord,
    ExecutionObserver, ExecutionReport, ExecutionRequest, ExecutorEvent, PostRunRecorder,
    SharedObserver, TitleAssigner,
};
use crate::lock::VaultLock;

use super::state::{JobState, JobStatus, RunStatus, RunningTask, ScheduleStatus};

/// Default polling interval for the scheduler loop.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(30);

/// Mutable engine-level fields shared between the loop and the status
/// surface.
struct EngineShared {
    /// Timezone cron expressions are evaluated in.
    timezone: Tz,
    /// Error from the most recent failed reload.
    config_error: Option<String>,
    /// Modification time of the config file at the last reload attempt.
    last_mtime: Option<SystemTime>,
}

/// The scheduler loop task and its shutdown token.
struct LoopTask {
    handle: JoinHandle<()>,
    shutdown: CancellationToken,
}

/// Observer that titles the agent session opened by a scheduled run.
struct SessionTitleObserver {
    titles: Arc<dyn TitleAssigner>,
    command: String,
}

#[async_trait]
impl ExecutionObserver for SessionTitleObserver {
    async fn on_event(&self, event: ExecutorEvent) {
        let ExecutorEvent::SessionStarted { session_id } = event;
        let title = format_command_title(&self.command);
        if let Err(e) = self.titles.assign(&session_id, &title).await {
            tracing::warn!(
                session_id = %session_id,
                error = %e,
                "Failed to assign session title"
            );
        }
    }
}

/// Builder for [`Scheduler`].
pub struct SchedulerBuilder {
    config_path: PathBuf,
    executor: Arc<dyn CommandExecutor>,
    registry: Arc<dyn CommandRegistry>,
    vault_lock: VaultLock,
    recorder: Option<Arc<dyn PostRunRecorder>>,
    titles: Option<Arc<dyn TitleAssigner>>,
    tick_interval: Duration,
}

impl SchedulerBuilder {
    /// Set the loop polling interval.
    pub fn tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    /// Set the post-run recorder.
    pub fn recorder(mut self, recorder: Arc<dyn PostRunRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Set the session title assigner.
    pub fn titles(mut self, titles: Arc<dyn TitleAssigner>) -> Self {
        self.titles = Some(titles);
        self
    }

    /// Build the scheduler.
    pub fn build(self) -> Scheduler {
        Scheduler {
            inner: Arc::new(SchedulerInner {
                config_path: self.config_path,
                tick_interval: self.tick_interval,
                executor: self.executor,
                registry: self.registry,
                vault_lock: self.vault_lock,
                recorder: self.recorder,
                titles: self.titles,
                shared: Mutex::new(EngineShared {
                    timezone: chrono_tz::UTC,
                    config_error: None,
                    last_mtime: None,
                }),
                jobs: RwLock::new(HashMap::new()),
            }),
            loop_task: Mutex::new(None),
        }
    }
}

/// Scheduler for cron-driven slash commands.
///
/// Construct with [`Scheduler::builder`], then [`start`](Scheduler::start)
/// the loop. The scheduler reads its configuration from the given file every
/// tick (when the file's modification time changes) and keeps the last valid
/// configuration when a reload fails.
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
    loop_task: Mutex<Option<LoopTask>>,
}

struct SchedulerInner {
    config_path: PathBuf,
    tick_interval: Duration,
    executor: Arc<dyn CommandExecutor>,
    registry: Arc<dyn CommandRegistry>,
    vault_lock: VaultLock,
    recorder: Option<Arc<dyn PostRunRecorder>>,
    titles: Option<Arc<dyn TitleAssigner>>,
    shared: Mutex<EngineShared>,
    jobs: RwLock<HashMap<JobId, Arc<Mutex<JobState>>>>,
}

impl Scheduler {
    /// Create a builder with the required collaborators.
    pub fn builder(
        config_path: impl Into<PathBuf>,
        executor: Arc<dyn CommandExecutor>,
        registry: Arc<dyn CommandRegistry>,
        vault_lock: VaultLock,
    ) -> SchedulerBuilder {
        SchedulerBuilder {
            config_path: config_path.into(),
            executor,
            registry,
            vault_lock,
            recorder: None,
            titles: None,
            tick_interval: DEFAULT_TICK_INTERVAL,
        }
    }

    /// Start the scheduler loop. A no-op if the loop is already running.
    pub async fn start(&self) {
        let mut guard = self.loop_task.lock().await;
        if guard.as_ref().is_some_and(|t| !t.handle.is_finished()) {
            return;
        }

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(SchedulerInner::run_loop(
            Arc::clone(&self.inner),
            shutdown.clone(),
        ));
        *guard = Some(LoopTask { handle, shutdown });

        tracing::info!(
            config_path = %self.inner.config_path.display(),
            "Schedule loop started"
        );
    }

    /// Stop the loop, then cancel every job's active run.
    pub async fn stop(&self) {
        let loop_task = self.loop_task.lock().await.take();
        if let Some(task) = loop_task {
            task.shutdown.cancel();
            let _ = task.handle.await;
            tracing::info!("Schedule loop stopped");
        }

        let states: Vec<Arc<Mutex<JobState>>> =
            self.inner.jobs.read().await.values().cloned().collect();
        for state in states {
            SchedulerInner::cancel_state(&state, "shutdown").await;
        }
    }

    /// Return the current schedule status for monitoring.
    ///
    /// The snapshot never mutates state; each job's lock is held only long
    /// enough to copy its fields.
    pub async fn get_status(&self) -> ScheduleStatus {
        let (timezone, config_error) = {
            let shared = self.inner.shared.lock().await;
            (shared.timezone.name().to_string(), shared.config_error.clone())
        };

        let states: Vec<Arc<Mutex<JobState>>> =
            self.inner.jobs.read().await.values().cloned().collect();

        let now = Utc::now();
        let mut jobs: Vec<JobStatus> = Vec::with_capacity(states.len());
        for state in states {
            jobs.push(state.lock().await.snapshot(now));
        }
        jobs.sort_by(|a, b| a.id.cmp(&b.id));

        ScheduleStatus {
            timezone,
            config_path: self.inner.config_path.display().to_string(),
            config_error,
            jobs,
        }
    }

    /// Cancel a job's running execution by id.
    ///
    /// Clears any queued backlog. Returns true if a running task was
    /// actually stopped, false if the job was idle or unknown.
    pub async fn cancel(&self, job_id: &str) -> bool {
        let state = {
            let jobs = self.inner.jobs.read().await;
            jobs.get(&JobId::new(job_id)).cloned()
        };

        match state {
            Some(state) => SchedulerInner::cancel_state(&state, "api").await,
            None => false,
        }
    }

    /// Check whether a job id is currently configured.
    pub async fn has_job(&self, job_id: &str) -> bool {
        self.inner.jobs.read().await.contains_key(&JobId::new(job_id))
    }

    /// Path of the schedule configuration file.
    pub fn config_path(&self) -> &Path {
        &self.inner.config_path
    }
}

impl SchedulerInner {
    /// Main scheduler loop: reload, process due jobs, sleep, repeat.
    async fn run_loop(inner: Arc<Self>, shutdown: CancellationToken) {
        loop {
            Self::tick(&inner).await;

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(inner.tick_interval) => {}
            }
        }
    }

    /// One loop iteration. Every failure path inside is handled in place so
    /// a bad tick never terminates the loop.
    async fn tick(inner: &Arc<Self>) {
        inner.maybe_reload_config().await;
        Self::process_due_jobs(inner).await;
    }

    /// Reload the config file if its modification time changed.
    async fn maybe_reload_config(&self) {
        let mtime = file_mtime(&self.config_path);

        let should_reload = {
            let shared = self.shared.lock().await;
            match shared.last_mtime {
                // Nothing recorded yet: reload once the file exists.
                None => mtime.is_some(),
                Some(previous) => mtime != Some(previous),
            }
        };
        if !should_reload {
            return;
        }

        let config = match load_schedule_config(&self.config_path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    config_path = %self.config_path.display(),
                    "Failed to reload schedule config"
                );
                let mut shared = self.shared.lock().await;
                shared.config_error = Some(e.to_string());
                // Advance the recorded mtime so the broken file is not
                // re-parsed on every tick.
                shared.last_mtime = mtime;
                return;
            }
        };

        // The loader validated the timezone; an unparseable name here means
        // the file changed mid-load and the next tick reloads again.
        let timezone: Tz = config.timezone.parse().unwrap_or(chrono_tz::UTC);
        {
            let mut shared = self.shared.lock().await;
            shared.config_error = None;
            shared.timezone = timezone;
        }

        self.sync_jobs(&config).await;

        {
            let mut shared = self.shared.lock().await;
            shared.last_mtime = file_mtime(&self.config_path);
        }

        tracing::info!(
            config_path = %self.config_path.display(),
            job_count = config.jobs.len(),
            "Schedule config reloaded"
        );
    }

    /// Synchronize the job registry against a freshly loaded config.
    async fn sync_jobs(&self, config: &ScheduleConfig) {
        let now = Utc::now();
        let new_ids: HashSet<JobId> = config
            .jobs
            .iter()
            .map(|job| JobId::new(&job.id))
            .collect();

        let removed: Vec<JobId> = {
            let jobs = self.jobs.read().await;
            jobs.keys()
                .filter(|id| !new_ids.contains(id))
                .cloned()
                .collect()
        };
        for id in removed {
            let state = { self.jobs.read().await.get(&id).cloned() };
            if let Some(state) = state {
                Self::cancel_state(&state, "removed").await;
            }
            self.jobs.write().await.remove(&id);
            tracing::info!(job_id = %id, "Scheduled job removed");
        }

        for job_config in &config.jobs {
            let id = JobId::new(&job_config.id);
            let existing = { self.jobs.read().await.get(&id).cloned() };

            let Some(state) = existing else {
                let schedule =
                    match Schedule::with_timezone(&job_config.cron, &config.timezone) {
                        Ok(schedule) => schedule,
                        Err(e) => {
                            tracing::warn!(job_id = %id, error = %e, "Skipping job with bad schedule");
                            continue;
                        }
                    };
                let next_run = compute_next_run(job_config.enabled, &schedule, now);
                let state = JobState::new(job_config.clone(), schedule, next_run);
                self.jobs.write().await.insert(id, Arc::new(Mutex::new(state)));
                continue;
            };

            let mut state = state.lock().await;
            let previous_cron = state.config.cron.clone();
            let previous_enabled = state.config.enabled;
            let timezone_changed = state.schedule.timezone().name() != config.timezone;
            state.config = job_config.clone();

            if job_config.cron != previous_cron || timezone_changed {
                match Schedule::with_timezone(&job_config.cron, &config.timezone) {
                    Ok(schedule) => state.schedule = schedule,
                    Err(e) => {
                        tracing::warn!(job_id = %id, error = %e, "Skipping job with bad schedule");
                        continue;
                    }
                }
            }

            if job_config.cron != previous_cron || job_config.enabled != previous_enabled {
                state.next_run = compute_next_run(job_config.enabled, &state.schedule, now);
            }
        }
    }

    /// Trigger every job whose next fire time has passed.
    async fn process_due_jobs(inner: &Arc<Self>) {
        let states: Vec<Arc<Mutex<JobState>>> =
            inner.jobs.read().await.values().cloned().collect();

        let now = Utc::now();
        for state in states {
            Self::process_state_due(inner, &state, now).await;
        }
    }

    /// Drain a single job's missed occurrences.
    ///
    /// `next_run` advances from the previously scheduled fire time, not from
    /// wall-clock now, so the schedule never drifts; after a long pause this
    /// fires once per missed occurrence.
    async fn process_state_due(
        inner: &Arc<Self>,
        state_arc: &Arc<Mutex<JobState>>,
        now: DateTime<Utc>,
    ) {
        loop {
            let scheduled_time = {
                let mut state = state_arc.lock().await;
                if !state.config.enabled {
                    return;
                }

                let due = match state.next_run {
                    Some(next) if next <= now => next,
                    _ => return,
                };

                state.last_scheduled_at = Some(due);
                state.next_run = compute_next_run(true, &state.schedule, due);
                due
            };

            Self::trigger_job(inner, state_arc, scheduled_time).await;
        }
    }

    /// Start, queue, or skip one occurrence of a job.
    async fn trigger_job(
        inner: &Arc<Self>,
        state_arc: &Arc<Mutex<JobState>>,
        scheduled_time: DateTime<Utc>,
    ) {
        let mut state = state_arc.lock().await;

        if state.is_running() {
            match state.config.overlap {
                OverlapPolicy::Skip => {
                    state.skipped_runs += 1;
                    tracing::info!(
                        job_id = %state.config.id,
                        scheduled_time = %scheduled_time,
                        "Scheduled job skipped (already running)"
                    );
                }
                OverlapPolicy::Queue => {
                    if state.config.queue_max == 0 || state.queued_runs >= state.config.queue_max {
                        state.skipped_runs += 1;
                        tracing::info!(
                            job_id = %state.config.id,
                            queue_max = state.config.queue_max,
                            scheduled_time = %scheduled_time,
                            "Scheduled job skipped (queue full)"
                        );
                    } else {
                        state.queued_runs += 1;
                        tracing::info!(
                            job_id = %state.config.id,
                            queued_runs = state.queued_runs,
                            scheduled_time = %scheduled_time,
                            "Scheduled job queued"
                        );
                    }
                }
            }
            return;
        }

        Self::spawn_run(inner, &mut state, state_arc);
    }

    /// Spawn the execution task for a job and record it as the active run.
    ///
    /// Caller must hold the job's lock (passed as `state`).
    fn spawn_run(inner: &Arc<Self>, state: &mut JobState, state_arc: &Arc<Mutex<JobState>>) {
        let run_id = RunId::new();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(Arc::clone(inner).run_job(
            Arc::clone(state_arc),
            run_id,
            cancel.clone(),
        ));
        state.running = Some(RunningTask {
            run_id,
            handle,
            cancel,
        });
    }

    /// Execute one run of a job, record the outcome, and start a queued
    /// successor if one is pending.
    ///
    /// Boxed so the queued-run continuation can respawn it.
    fn run_job(
        self: Arc<Self>,
        state_arc: Arc<Mutex<JobState>>,
        run_id: RunId,
        cancel: CancellationToken,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'static>> {
        Box::pin(async move {
            let start_time = Utc::now();
            let config: ScheduleJobConfig = {
                let mut state = state_arc.lock().await;
                state.last_started_at = Some(start_time);
                state.total_runs += 1;
                state.config.clone()
            };

            let mut status = RunStatus::Success;
            let mut error_msg: Option<String> = None;
            let mut report: Option<ExecutionReport> = None;

            if !self.command_exists(&config.command).await {
                status = RunStatus::Error;
                error_msg = Some(format!("Command not found: {}", config.command));
                tracing::warn!(
                    job_id = %config.id,
                    command = %config.command,
                    "Scheduled command not found"
                );
            } else {
                let request = ExecutionRequest::from_job(&config);
                let observer: Option<SharedObserver> = self.titles.as_ref().map(|titles| {
                    Arc::new(SessionTitleObserver {
                        titles: Arc::clone(titles),
                        command: config.command.clone(),
                    }) as SharedObserver
                });

                let execute = async {
                    if config.use_vault_lock {
                        let _guard = self.vault_lock.acquire().await;
                        self.executor.run(request, observer).await
                    } else {
                        self.executor.run(request, observer).await
                    }
                };

                tokio::select! {
                    _ = cancel.cancelled() => {
                        status = RunStatus::Cancelled;
                        error_msg = Some("Cancelled".to_string());
                    }
                    result = execute => match result {
                        Ok(executor_report) => {
                            if !executor_report.success {
                                status = RunStatus::Error;
                                error_msg = executor_report.error.clone();
                            }
                            report = Some(executor_report);
                        }
                        Err(e) => {
                            status = RunStatus::Error;
                            error_msg = Some(e.to_string());
                            tracing::error!(
                                job_id = %config.id,
                                error = %e,
                                "Scheduled job failed"
                            );
                        }
                    }
                }
            }

            let end_time = Utc::now();
            {
                let mut state = state_arc.lock().await;
                // Clear the active handle only if this run still owns it; a
                // cancel may have detached it, and a successor may already
                // be registered.
                if state.running.as_ref().map(|r| r.run_id) == Some(run_id) {
                    state.running = None;
                }
                state.last_finished_at = Some(end_time);
                state.last_status = Some(status);
                state.last_error = error_msg.clone();
                state.last_cost_usd = report.as_ref().and_then(|r| r.cost_usd);
                state.last_duration_ms = report.as_ref().and_then(|r| r.duration_ms);
                if status != RunStatus::Success {
                    state.total_failures += 1;
                }
            }

            if let Some(recorder) = &self.recorder {
                let duration_seconds =
                    (end_time - start_time).num_milliseconds() as f64 / 1000.0;
                dispatch_post_run(
                    Arc::clone(recorder),
                    CommandRunRecord {
                        command: config.command.clone(),
                        status,
                        duration_ms: report.as_ref().and_then(|r| r.duration_ms),
                        duration_seconds,
                        cost_usd: report.as_ref().and_then(|r| r.cost_usd),
                        error: error_msg,
                        scheduled: true,
                    },
                );
            }

            Self::maybe_run_queued(&self, &state_arc).await;
        })
    }

    /// Start one queued run after a completion, if any are pending.
    async fn maybe_run_queued(inner: &Arc<Self>, state_arc: &Arc<Mutex<JobState>>) {
        let mut state = state_arc.lock().await;

        if !state.config.enabled {
            state.queued_runs = 0;
            return;
        }
        if state.queued_runs == 0 {
            return;
        }
        // A fresh trigger may have started a run since this one finished;
        // the backlog then belongs to that run's completion.
        if state.is_running() {
            return;
        }

        state.queued_runs -= 1;
        Self::spawn_run(inner, &mut state, state_arc);
        tracing::info!(
            job_id = %state.config.id,
            queued_runs = state.queued_runs,
            "Scheduled job dequeued"
        );
    }

    /// Cancel a job's active run, discarding the queued backlog.
    ///
    /// Returns true if a running task was actually stopped.
    async fn cancel_state(state_arc: &Arc<Mutex<JobState>>, reason: &str) -> bool {
        let (job_id, running) = {
            let mut state = state_arc.lock().await;
            state.queued_runs = 0;
            (state.config.id.clone(), state.running.take())
        };

        let Some(task) = running else {
            return false;
        };
        if task.handle.is_finished() {
            let _ = task.handle.await;
            return false;
        }

        task.cancel.cancel();
        let _ = task.handle.await;

        tracing::info!(job_id = %job_id, reason, "Scheduled job cancelled");
        true
    }

    /// Check the configured command against the registry.
    ///
    /// A registry failure is treated as "command exists" so a broken
    /// registry cannot silently stop every scheduled job.
    async fn command_exists(&self, command: &str) -> bool {
        match self.registry.list().await {
            Ok(commands) => commands.contains(command),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to list commands");
                true
            }
        }
    }
}

/// Compute the next fire time after `base`, or `None` for a disabled job.
fn compute_next_run(
    enabled: bool,
    schedule: &Schedule,
    base: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    if !enabled {
        return None;
    }
    match schedule.next_after(base) {
        Ok(next) => Some(next),
        Err(e) => {
            tracing::warn!(error = %e, "No next occurrence for schedule");
            None
        }
    }
}

/// Modification time of the config file, if it exists.
fn file_mtime(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::ExecutorError;
    use crate::testing::{
        MemoryTitles, MockCommandExecutor, RecordingRecorder, StaticCommandRegistry,
    };
    use tempfile::TempDir;

    const SINGLE_JOB: &str = r#"
timezone: UTC
jobs:
  - id: sweep
    command: inbox-sweep
    cron: "*/5 * * * *"
"#;

    struct Harness {
        dir: TempDir,
        executor: Arc<MockCommandExecutor>,
        registry: Arc<StaticCommandRegistry>,
        recorder: Arc<RecordingRecorder>,
        titles: Arc<MemoryTitles>,
        vault_lock: VaultLock,
        scheduler: Scheduler,
    }

    impl Harness {
        fn new() -> Self {
            Self::with_config(SINGLE_JOB)
        }

        fn with_config(config: &str) -> Self {
            let dir = TempDir::new().unwrap();
            let config_path = dir.path().join("schedule.yaml");
            std::fs::write(&config_path, config).unwrap();

            let executor = MockCommandExecutor::new();
            let registry = Arc::new(StaticCommandRegistry::new([
                "inbox-sweep",
                "daily-digest",
                "vault:archive",
            ]));
            let recorder = Arc::new(RecordingRecorder::default());
            let titles = Arc::new(MemoryTitles::default());
            let vault_lock = VaultLock::new();

            let scheduler = Scheduler::builder(
                &config_path,
                executor.clone(),
                registry.clone(),
                vault_lock.clone(),
            )
            .tick_interval(Duration::from_millis(20))
            .recorder(recorder.clone())
            .titles(titles.clone())
            .build();

            Self {
                dir,
                executor,
                registry,
                recorder,
                titles,
                vault_lock,
                scheduler,
            }
        }

        fn inner(&self) -> &Arc<SchedulerInner> {
            &self.scheduler.inner
        }

        async fn tick(&self) {
            SchedulerInner::tick(self.inner()).await;
        }

        async fn process_due(&self) {
            SchedulerInner::process_due_jobs(self.inner()).await;
        }

        async fn trigger(&self, state: &Arc<Mutex<JobState>>) {
            SchedulerInner::trigger_job(self.inner(), state, Utc::now()).await;
        }

        fn write_config(&self, config: &str) {
            std::fs::write(self.dir.path().join("schedule.yaml"), config).unwrap();
        }

        /// Load (or re-load) the config regardless of mtime granularity.
        async fn reload(&self) {
            self.inner().shared.lock().await.last_mtime = None;
            self.inner().maybe_reload_config().await;
        }

        async fn job_state(&self, id: &str) -> Arc<Mutex<JobState>> {
            self.inner()
                .jobs
                .read()
                .await
                .get(&JobId::new(id))
                .cloned()
                .unwrap_or_else(|| panic!("job {} not found", id))
        }

        /// Mark the job due at `due` so the next due pass triggers it.
        async fn make_due(&self, id: &str, due: DateTime<Utc>) {
            let state = self.job_state(id).await;
            state.lock().await.next_run = Some(due);
        }
    }

    async fn wait_for_calls(executor: &MockCommandExecutor, expected: usize) {
        for _ in 0..500 {
            if executor.calls() >= expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!(
            "timed out waiting for {} executor calls, saw {}",
            expected,
            executor.calls()
        );
    }

    async fn wait_for_status(state: &Arc<Mutex<JobState>>, expected: RunStatus) {
        for _ in 0..500 {
            {
                let state = state.lock().await;
                if state.last_status == Some(expected) && !state.is_running() {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("timed out waiting for status {:?}", expected);
    }

    async fn wait_for_idle(state: &Arc<Mutex<JobState>>) {
        for _ in 0..500 {
            if !state.lock().await.is_running() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("timed out waiting for job to go idle");
    }

    #[tokio::test]
    async fn test_first_tick_loads_config() {
        let h = Harness::new();
        h.tick().await;

        assert!(h.scheduler.has_job("sweep").await);

        let status = h.scheduler.get_status().await;
        assert_eq!(status.timezone, "UTC");
        assert!(status.config_error.is_none());
        assert_eq!(status.jobs.len(), 1);
        assert_eq!(status.jobs[0].id, "sweep");
        assert!(status.jobs[0].next_run.is_some());
    }

    #[tokio::test]
    async fn test_missing_config_file_yields_empty_schedule() {
        let h = Harness::new();
        std::fs::remove_file(h.dir.path().join("schedule.yaml")).unwrap();

        h.tick().await;

        let status = h.scheduler.get_status().await;
        assert!(status.jobs.is_empty());
        assert!(status.config_error.is_none());
    }

    #[tokio::test]
    async fn test_next_run_is_after_load_time_basis() {
        let before = Utc::now();
        let h = Harness::new();
        h.tick().await;

        let status = h.scheduler.get_status().await;
        for job in &status.jobs {
            assert!(job.next_run.unwrap() >= before);
        }
    }

    #[tokio::test]
    async fn test_reload_failure_keeps_previous_config() {
        let h = Harness::new();
        h.tick().await;
        assert!(h.scheduler.has_job("sweep").await);

        // Scenario C: duplicate job ids fail the reload.
        h.write_config(
            r#"
jobs:
  - id: dup
    command: inbox-sweep
    cron: "* * * * *"
  - id: dup
    command: inbox-sweep
    cron: "* * * * *"
"#,
        );
        h.reload().await;

        let status = h.scheduler.get_status().await;
        let error = status.config_error.expect("config error should be recorded");
        assert!(error.contains("duplicate"), "unexpected error: {}", error);

        // The previous valid config remains active.
        assert!(h.scheduler.has_job("sweep").await);
        assert!(!h.scheduler.has_job("dup").await);
    }

    #[tokio::test]
    async fn test_reload_failure_records_invalid_cron() {
        let h = Harness::new();
        h.tick().await;

        // Scenario D: unparseable cron expression.
        h.write_config(
            r#"
jobs:
  - id: bad
    command: inbox-sweep
    cron: "not-a-cron"
"#,
        );
        h.reload().await;

        let status = h.scheduler.get_status().await;
        let error = status.config_error.expect("config error should be recorded");
        assert!(error.contains("cron"), "unexpected error: {}", error);
        assert!(h.scheduler.has_job("sweep").await);
    }

    #[tokio::test]
    async fn test_broken_config_not_retried_until_mtime_changes() {
        let h = Harness::new();
        h.tick().await;

        h.write_config("jobs: [: : :");
        h.reload().await;
        assert!(h.scheduler.get_status().await.config_error.is_some());

        // Clear the recorded error out-of-band; with an unchanged mtime the
        // next tick must not re-parse (and re-record) the broken file.
        h.inner().shared.lock().await.config_error = None;
        h.inner().maybe_reload_config().await;
        assert!(h.scheduler.get_status().await.config_error.is_none());
    }

    #[tokio::test]
    async fn test_removed_job_is_cancelled_and_dropped() {
        let h = Harness::new();
        h.tick().await;

        h.executor.hold();
        let state = h.job_state("sweep").await;
        h.make_due("sweep", Utc::now()).await;
        h.process_due().await;
        wait_for_calls(&h.executor, 1).await;
        assert!(state.lock().await.is_running());

        h.write_config("jobs: []\n");
        h.reload().await;

        assert!(!h.scheduler.has_job("sweep").await);
        wait_for_status(&state, RunStatus::Cancelled).await;
    }

    #[tokio::test]
    async fn test_disabled_job_has_no_next_run() {
        let h = Harness::new();
        h.tick().await;

        h.write_config(
            r#"
jobs:
  - id: sweep
    command: inbox-sweep
    cron: "*/5 * * * *"
    enabled: false
"#,
        );
        h.reload().await;

        let status = h.scheduler.get_status().await;
        assert!(!status.jobs[0].enabled);
        assert!(status.jobs[0].next_run.is_none());
    }

    #[tokio::test]
    async fn test_cron_change_recomputes_next_run() {
        let h = Harness::new();
        h.tick().await;

        let state = h.job_state("sweep").await;
        // Plant a stale fire time; an unchanged config must preserve it.
        let planted = Utc::now() + chrono::Duration::hours(12);
        state.lock().await.next_run = Some(planted);

        h.reload().await;
        assert_eq!(state.lock().await.next_run, Some(planted));

        h.write_config(
            r#"
jobs:
  - id: sweep
    command: inbox-sweep
    cron: "0 3 * * *"
"#,
        );
        h.reload().await;

        let state = h.job_state("sweep").await;
        let next = state.lock().await.next_run.unwrap();
        assert_ne!(next, planted);
        assert_eq!(state.lock().await.config.cron, "0 3 * * *");
    }

    #[tokio::test]
    async fn test_due_job_runs_and_advances_from_scheduled_time() {
        let h = Harness::with_config(
            r#"
jobs:
  - id: nightly
    command: daily-digest
    cron: "0 3 * * *"
"#,
        );
        h.tick().await;

        let due = Utc::now() - chrono::Duration::seconds(30);
        h.make_due("nightly", due).await;
        h.process_due().await;

        wait_for_calls(&h.executor, 1).await;

        let state = h.job_state("nightly").await;
        wait_for_status(&state, RunStatus::Success).await;

        let state = state.lock().await;
        assert_eq!(state.last_scheduled_at, Some(due));
        // Advanced from the scheduled time, not from now.
        assert!(state.next_run.unwrap() > due);
        assert_eq!(state.total_runs, 1);
        assert_eq!(state.total_failures, 0);
    }

    #[tokio::test]
    async fn test_catch_up_fires_once_per_missed_occurrence() {
        let h = Harness::with_config(
            r#"
jobs:
  - id: sweep
    command: inbox-sweep
    cron: "* * * * *"
    overlap: queue
    queue_max: 10
"#,
        );
        h.tick().await;
        h.executor.hold();

        // A three-minute gap always contains exactly four due occurrences:
        // the planted one plus three minute boundaries.
        let due = Utc::now() - chrono::Duration::minutes(3);
        h.make_due("sweep", due).await;
        h.process_due().await;

        wait_for_calls(&h.executor, 1).await;
        let state = h.job_state("sweep").await;
        let state = state.lock().await;
        assert_eq!(state.queued_runs, 3);
        assert_eq!(state.skipped_runs, 0);
        assert!(state.next_run.unwrap() > Utc::now() - chrono::Duration::minutes(1));
    }

    #[tokio::test]
    async fn test_skip_mode_never_overlaps() {
        // Scenario B: overlap=skip drops occurrences while running.
        let h = Harness::new();
        h.tick().await;
        h.executor.hold();

        let state = h.job_state("sweep").await;
        h.trigger(&state).await;
        wait_for_calls(&h.executor, 1).await;

        h.trigger(&state).await;

        {
            let state = state.lock().await;
            assert_eq!(state.queued_runs, 0);
            assert_eq!(state.skipped_runs, 1);
        }
        assert_eq!(h.executor.calls(), 1);

        h.executor.release(1);
        wait_for_status(&state, RunStatus::Success).await;
        // Skipped occurrences never run later.
        assert_eq!(h.executor.calls(), 1);
    }

    #[tokio::test]
    async fn test_queue_mode_caps_backlog_at_queue_max() {
        // Scenario A: queue_max=1 queues one occurrence, then skips.
        let h = Harness::with_config(
            r#"
jobs:
  - id: sweep
    command: inbox-sweep
    cron: "*/5 * * * *"
    overlap: queue
    queue_max: 1
"#,
        );
        h.tick().await;
        h.executor.hold();

        let state = h.job_state("sweep").await;
        h.trigger(&state).await;
        wait_for_calls(&h.executor, 1).await;

        h.trigger(&state).await;
        {
            let state = state.lock().await;
            assert_eq!(state.queued_runs, 1);
            assert_eq!(state.skipped_runs, 0);
        }

        h.trigger(&state).await;
        {
            let state = state.lock().await;
            assert_eq!(state.queued_runs, 1);
            assert_eq!(state.skipped_runs, 1);
        }
    }

    #[tokio::test]
    async fn test_queue_max_zero_disables_queueing() {
        let h = Harness::with_config(
            r#"
jobs:
  - id: sweep
    command: inbox-sweep
    cron: "*/5 * * * *"
    overlap: queue
    queue_max: 0
"#,
        );
        h.tick().await;
        h.executor.hold();

        let state = h.job_state("sweep").await;
        h.trigger(&state).await;
        wait_for_calls(&h.executor, 1).await;

        h.trigger(&state).await;
        let state = state.lock().await;
        assert_eq!(state.queued_runs, 0);
        assert_eq!(state.skipped_runs, 1);
    }

    #[tokio::test]
    async fn test_queued_run_starts_after_completion() {
        let h = Harness::with_config(
            r#"
jobs:
  - id: sweep
    command: inbox-sweep
    cron: "*/5 * * * *"
    overlap: queue
    queue_max: 2
"#,
        );
        h.tick().await;
        h.executor.hold();

        let state = h.job_state("sweep").await;
        h.trigger(&state).await;
        wait_for_calls(&h.executor, 1).await;
        h.trigger(&state).await;
        h.trigger(&state).await;
        assert_eq!(state.lock().await.queued_runs, 2);

        // Each completion starts exactly one queued successor.
        h.executor.release(1);
        wait_for_calls(&h.executor, 2).await;
        assert_eq!(state.lock().await.queued_runs, 1);

        h.executor.release(1);
        wait_for_calls(&h.executor, 3).await;
        assert_eq!(state.lock().await.queued_runs, 0);

        h.executor.release(1);
        wait_for_status(&state, RunStatus::Success).await;
        assert_eq!(h.executor.calls(), 3);
    }

    #[tokio::test]
    async fn test_cancel_running_job() {
        let h = Harness::new();
        h.tick().await;
        h.executor.hold();

        let state = h.job_state("sweep").await;
        h.trigger(&state).await;
        wait_for_calls(&h.executor, 1).await;
        h.trigger(&state).await; // skipped under the default policy

        assert!(h.scheduler.cancel("sweep").await);

        let state = state.lock().await;
        assert!(!state.is_running());
        assert_eq!(state.queued_runs, 0);
        assert_eq!(state.last_status, Some(RunStatus::Cancelled));
        assert_eq!(state.last_error.as_deref(), Some("Cancelled"));
        assert_eq!(state.total_failures, 1);
    }

    #[tokio::test]
    async fn test_cancel_idle_job_returns_false() {
        let h = Harness::new();
        h.tick().await;

        assert!(!h.scheduler.cancel("sweep").await);
        assert!(!h.scheduler.cancel("no-such-job").await);
    }

    #[tokio::test]
    async fn test_cancelled_backlog_is_not_resurrected() {
        let h = Harness::with_config(
            r#"
jobs:
  - id: sweep
    command: inbox-sweep
    cron: "*/5 * * * *"
    overlap: queue
    queue_max: 5
"#,
        );
        h.tick().await;
        h.executor.hold();

        let state = h.job_state("sweep").await;
        h.trigger(&state).await;
        wait_for_calls(&h.executor, 1).await;
        h.trigger(&state).await;
        h.trigger(&state).await;
        assert_eq!(state.lock().await.queued_runs, 2);

        assert!(h.scheduler.cancel("sweep").await);

        // No queued successor starts after the cancel.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(h.executor.calls(), 1);
        assert_eq!(state.lock().await.queued_runs, 0);
    }

    #[tokio::test]
    async fn test_disabling_job_drops_queued_backlog() {
        let h = Harness::with_config(
            r#"
jobs:
  - id: sweep
    command: inbox-sweep
    cron: "*/5 * * * *"
    overlap: queue
    queue_max: 5
"#,
        );
        h.tick().await;
        h.executor.hold();

        let state = h.job_state("sweep").await;
        h.trigger(&state).await;
        wait_for_calls(&h.executor, 1).await;
        h.trigger(&state).await;
        assert_eq!(state.lock().await.queued_runs, 1);

        h.write_config(
            r#"
jobs:
  - id: sweep
    command: inbox-sweep
    cron: "*/5 * * * *"
    overlap: queue
    queue_max: 5
    enabled: false
"#,
        );
        h.reload().await;

        h.executor.release(1);
        wait_for_idle(&state).await;

        // The queued run is dropped, not started.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(h.executor.calls(), 1);
        let state = state.lock().await;
        assert_eq!(state.queued_runs, 0);
        assert!(state.next_run.is_none());
    }

    #[tokio::test]
    async fn test_unknown_command_fails_without_executor_call() {
        // Scenario E: command missing from the registry.
        let h = Harness::with_config(
            r#"
jobs:
  - id: ghost
    command: does-not-exist
    cron: "*/5 * * * *"
"#,
        );
        h.tick().await;

        let state = h.job_state("ghost").await;
        h.trigger(&state).await;
        wait_for_status(&state, RunStatus::Error).await;

        let state = state.lock().await;
        assert!(state
            .last_error
            .as_deref()
            .unwrap()
            .contains("does-not-exist"));
        assert_eq!(state.total_failures, 1);
        assert_eq!(h.executor.calls(), 0);
    }

    #[tokio::test]
    async fn test_registry_failure_fails_open() {
        let h = Harness::new();
        h.tick().await;
        h.registry.fail_listing(true);

        let state = h.job_state("sweep").await;
        h.trigger(&state).await;
        wait_for_status(&state, RunStatus::Success).await;

        assert_eq!(h.executor.calls(), 1);
    }

    #[tokio::test]
    async fn test_executor_transport_error_is_recorded() {
        let h = Harness::new();
        h.tick().await;
        h.executor
            .push_error(ExecutorError::Transport("runner unreachable".into()));

        let state = h.job_state("sweep").await;
        h.trigger(&state).await;
        wait_for_status(&state, RunStatus::Error).await;

        let state = state.lock().await;
        assert!(state.last_error.as_deref().unwrap().contains("unreachable"));
        assert_eq!(state.total_failures, 1);
    }

    #[tokio::test]
    async fn test_executor_reported_failure_is_recorded() {
        let h = Harness::new();
        h.tick().await;
        h.executor.push_report(ExecutionReport {
            success: false,
            cost_usd: Some(0.12),
            duration_ms: Some(900),
            error: Some("budget exceeded".into()),
        });

        let state = h.job_state("sweep").await;
        h.trigger(&state).await;
        wait_for_status(&state, RunStatus::Error).await;

        let state = state.lock().await;
        assert_eq!(state.last_error.as_deref(), Some("budget exceeded"));
        assert_eq!(state.last_cost_usd, Some(0.12));
        assert_eq!(state.last_duration_ms, Some(900));
    }

    #[tokio::test]
    async fn test_post_run_record_is_dispatched() {
        let h = Harness::new();
        h.tick().await;
        h.executor.push_report(ExecutionReport {
            success: true,
            cost_usd: Some(0.05),
            duration_ms: Some(1500),
            error: None,
        });

        let state = h.job_state("sweep").await;
        h.trigger(&state).await;
        wait_for_status(&state, RunStatus::Success).await;

        for _ in 0..100 {
            if !h.recorder.records().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let records = h.recorder.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].command, "inbox-sweep");
        assert_eq!(records[0].status, RunStatus::Success);
        assert_eq!(records[0].cost_usd, Some(0.05));
        assert!(records[0].scheduled);
    }

    #[tokio::test]
    async fn test_session_title_is_assigned() {
        let h = Harness::new();
        h.tick().await;
        h.executor.set_session_id("sess-42");

        let state = h.job_state("sweep").await;
        h.trigger(&state).await;
        wait_for_status(&state, RunStatus::Success).await;

        assert_eq!(h.titles.get("sess-42").as_deref(), Some("Inbox Sweep"));
    }

    #[tokio::test]
    async fn test_vault_lock_serializes_execution() {
        let h = Harness::with_config(
            r#"
jobs:
  - id: sweep
    command: inbox-sweep
    cron: "*/5 * * * *"
    use_vault_lock: true
"#,
        );
        h.tick().await;

        let guard = h.vault_lock.acquire().await;

        let state = h.job_state("sweep").await;
        h.trigger(&state).await;

        // The run is blocked on the vault lock; the executor must not fire.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(h.executor.calls(), 0);

        drop(guard);
        wait_for_calls(&h.executor, 1).await;
        wait_for_status(&state, RunStatus::Success).await;
    }

    #[tokio::test]
    async fn test_start_and_stop_loop() {
        let h = Harness::new();
        h.scheduler.start().await;
        // Starting twice is a no-op.
        h.scheduler.start().await;

        // The loop's first tick loads the config.
        for _ in 0..100 {
            if h.scheduler.has_job("sweep").await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(h.scheduler.has_job("sweep").await);

        h.executor.hold();
        let state = h.job_state("sweep").await;
        h.make_due("sweep", Utc::now()).await;
        wait_for_calls(&h.executor, 1).await;

        h.scheduler.stop().await;

        let state = state.lock().await;
        assert!(!state.is_running());
        assert_eq!(state.last_status, Some(RunStatus::Cancelled));
    }

    #[tokio::test]
    async fn test_status_sorts_jobs_by_id() {
        let h = Harness::with_config(
            r#"
jobs:
  - id: zulu
    command: inbox-sweep
    cron: "*/5 * * * *"
  - id: alpha
    command: daily-digest
    cron: "@daily"
"#,
        );
        h.tick().await;

        let status = h.scheduler.get_status().await;
        let ids: Vec<&str> = status.jobs.iter().map(|j| j.id.as_str()).collect();
        assert_eq!(ids, ["alpha", "zulu"]);
    }
}
