//! Scheduler engine for cron-driven slash commands.
//!
//! This module provides the main scheduling loop that hot-reloads its
//! configuration, triggers jobs at their cron times, and applies the
//! per-job overlap policy.

mod engine;
mod state;

pub use engine::{Scheduler, SchedulerBuilder, DEFAULT_TICK_INTERVAL};
pub use state::{JobState, JobStatus, RunStatus, RunningTask, ScheduleStatus};
