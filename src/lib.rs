//! cadence - a hot-reloading cron scheduler for agent slash commands.
//!
//! The scheduler runs slash commands on cron schedules defined in a YAML
//! file, reloading the file whenever it changes. Commands are executed by an
//! external agent runner behind the [`execution::CommandExecutor`] trait;
//! per-job overlap policy decides whether a due occurrence starts, queues,
//! or is skipped while a previous run is still active.

pub mod api;
pub mod config;
pub mod core;
pub mod execution;
pub mod lock;
pub mod scheduler;
pub mod testing;

pub use config::{
    load_schedule_config, parse_schedule_config, ConfigError, OverlapPolicy, ScheduleConfig,
    ScheduleJobConfig,
};
pub use core::schedule::{Schedule, ScheduleError};
pub use core::types::{JobId, RunId};
pub use execution::{
    CommandExecutor, CommandRegistry, CommandRunRecord, DirectoryCommandRegistry,
    ExecutionReport, ExecutionRequest, ExecutorError, LogRecorder, PostRunRecorder,
    ProcessCommandExecutor, TitleAssigner,
};
pub use lock::VaultLock;
pub use scheduler::{JobStatus, RunStatus, ScheduleStatus, Scheduler};
