//! Testing utilities for users of the cadence library.
//!
//! This module provides in-memory implementations of the scheduler's
//! collaborator traits:
//!
//! - [`MockCommandExecutor`]: scripted execution results with an optional
//!   hold point for exercising overlap behavior
//! - [`StaticCommandRegistry`]: a fixed command set with injectable failures
//! - [`RecordingRecorder`]: captures post-run records
//! - [`MemoryTitles`]: an in-memory session title store

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

use crate::execution::{
    CommandExecutor, CommandRegistry, CommandRunRecord, ExecutionObserver, ExecutionReport,
    ExecutionRequest, ExecutorError, ExecutorEvent, PostRunRecorder, RegistryError,
    SharedObserver, TitleAssigner, TitleError,
};

/// A command executor with scripted results.
///
/// By default every run succeeds immediately. Results can be queued with
/// [`push_report`](MockCommandExecutor::push_report) and
/// [`push_error`](MockCommandExecutor::push_error); once the queue is empty,
/// runs fall back to a plain success report.
///
/// With [`hold`](MockCommandExecutor::hold) enabled, each run blocks until a
/// permit is handed out with [`release`](MockCommandExecutor::release),
/// which makes overlap and cancellation scenarios deterministic.
pub struct MockCommandExecutor {
    invocations: Mutex<Vec<ExecutionRequest>>,
    results: Mutex<VecDeque<Result<ExecutionReport, ExecutorError>>>,
    holding: AtomicBool,
    gate: Semaphore,
    session_id: Mutex<Option<String>>,
}

impl MockCommandExecutor {
    /// Create a new mock executor.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            invocations: Mutex::new(Vec::new()),
            results: Mutex::new(VecDeque::new()),
            holding: AtomicBool::new(false),
            gate: Semaphore::new(0),
            session_id: Mutex::new(None),
        })
    }

    /// Queue a report for the next run.
    pub fn push_report(&self, report: ExecutionReport) {
        self.results.lock().unwrap().push_back(Ok(report));
    }

    /// Queue a transport-level error for the next run.
    pub fn push_error(&self, error: ExecutorError) {
        self.results.lock().unwrap().push_back(Err(error));
    }

    /// Make subsequent runs block until released.
    pub fn hold(&self) {
        self.holding.store(true, Ordering::SeqCst);
    }

    /// Let `n` held runs proceed.
    pub fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }

    /// Report this session id to the observer on every run.
    pub fn set_session_id(&self, session_id: impl Into<String>) {
        *self.session_id.lock().unwrap() = Some(session_id.into());
    }

    /// Number of runs started so far.
    pub fn calls(&self) -> usize {
        self.invocations.lock().unwrap().len()
    }

    /// All requests received so far.
    pub fn invocations(&self) -> Vec<ExecutionRequest> {
        self.invocations.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandExecutor for MockCommandExecutor {
    async fn run(
        &self,
        request: ExecutionRequest,
        observer: Option<SharedObserver>,
    ) -> Result<ExecutionReport, ExecutorError> {
        self.invocations.lock().unwrap().push(request);

        let session_id = self.session_id.lock().unwrap().clone();
        if let (Some(observer), Some(session_id)) = (&observer, session_id) {
            observer
                .on_event(ExecutorEvent::SessionStarted { session_id })
                .await;
        }

        if self.holding.load(Ordering::SeqCst) {
            let permit = self
                .gate
                .acquire()
                .await
                .map_err(|_| ExecutorError::Transport("mock executor closed".into()))?;
            permit.forget();
        }

        match self.results.lock().unwrap().pop_front() {
            Some(result) => result,
            None => Ok(ExecutionReport {
                success: true,
                ..Default::default()
            }),
        }
    }
}

/// A registry over a fixed set of command identifiers.
pub struct StaticCommandRegistry {
    commands: HashSet<String>,
    fail: AtomicBool,
}

impl StaticCommandRegistry {
    /// Create a registry knowing the given commands.
    pub fn new<I, S>(commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            commands: commands.into_iter().map(Into::into).collect(),
            fail: AtomicBool::new(false),
        }
    }

    /// Make `list` fail until switched back off.
    pub fn fail_listing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl CommandRegistry for StaticCommandRegistry {
    async fn list(&self) -> Result<HashSet<String>, RegistryError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(RegistryError::Io(std::io::Error::other(
                "injected list failure",
            )));
        }
        Ok(self.commands.clone())
    }
}

/// A recorder that captures every post-run record.
#[derive(Default)]
pub struct RecordingRecorder {
    records: Mutex<Vec<CommandRunRecord>>,
}

impl RecordingRecorder {
    /// All records received so far.
    pub fn records(&self) -> Vec<CommandRunRecord> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl PostRunRecorder for RecordingRecorder {
    async fn record(&self, record: CommandRunRecord) {
        self.records.lock().unwrap().push(record);
    }
}

/// An in-memory session title store.
///
/// The first title assigned to a session wins, matching the semantics of a
/// real title store that only titles untitled sessions.
#[derive(Default)]
pub struct MemoryTitles {
    titles: Mutex<HashMap<String, String>>,
}

impl MemoryTitles {
    /// The stored title for a session, if any.
    pub fn get(&self, session_id: &str) -> Option<String> {
        self.titles.lock().unwrap().get(session_id).cloned()
    }
}

#[async_trait]
impl TitleAssigner for MemoryTitles {
    async fn assign(&self, session_id: &str, title: &str) -> Result<(), TitleError> {
        self.titles
            .lock()
            .unwrap()
            .entry(session_id.to_string())
            .or_insert_with(|| title.to_string());
        Ok(())
    }
}

/// Observer that records every executor event.
pub struct RecordingObserver {
    events: Mutex<Vec<ExecutorEvent>>,
}

impl RecordingObserver {
    /// Create a new recording observer.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
        })
    }

    /// All events received so far.
    pub fn events(&self) -> Vec<ExecutorEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExecutionObserver for RecordingObserver {
    async fn on_event(&self, event: ExecutorEvent) {
        self.events.lock().unwrap().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_executor_defaults_to_success() {
        let executor = MockCommandExecutor::new();
        let report = executor
            .run(
                ExecutionRequest {
                    command: "x".into(),
                    arguments: None,
                    max_budget_usd: None,
                    timeout: None,
                    model: None,
                },
                None,
            )
            .await
            .unwrap();

        assert!(report.success);
        assert_eq!(executor.calls(), 1);
    }

    #[tokio::test]
    async fn test_mock_executor_scripted_results_in_order() {
        let executor = MockCommandExecutor::new();
        executor.push_report(ExecutionReport {
            success: false,
            error: Some("first".into()),
            ..Default::default()
        });
        executor.push_error(ExecutorError::Transport("second".into()));

        let request = ExecutionRequest {
            command: "x".into(),
            arguments: None,
            max_budget_usd: None,
            timeout: None,
            model: None,
        };

        let first = executor.run(request.clone(), None).await.unwrap();
        assert_eq!(first.error.as_deref(), Some("first"));

        let second = executor.run(request.clone(), None).await;
        assert!(matches!(second, Err(ExecutorError::Transport(_))));

        // Queue exhausted: back to plain success.
        assert!(executor.run(request, None).await.unwrap().success);
    }

    #[tokio::test]
    async fn test_memory_titles_first_assignment_wins() {
        let titles = MemoryTitles::default();
        titles.assign("s1", "First").await.unwrap();
        titles.assign("s1", "Second").await.unwrap();

        assert_eq!(titles.get("s1").as_deref(), Some("First"));
    }

    #[tokio::test]
    async fn test_static_registry_failure_injection() {
        let registry = StaticCommandRegistry::new(["a"]);
        assert!(registry.list().await.unwrap().contains("a"));

        registry.fail_listing(true);
        assert!(registry.list().await.is_err());

        registry.fail_listing(false);
        assert!(registry.list().await.is_ok());
    }
}
