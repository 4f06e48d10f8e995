//! Configuration type definitions.
//!
//! This module contains the type definitions for the YAML schedule file:
//! the top-level config, per-job definitions, and the overlap policy.

use serde::{Deserialize, Serialize};

/// Overlap behavior when a job fires while a previous run is still active.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlapPolicy {
    /// Drop the new occurrence and count it as skipped.
    #[default]
    Skip,
    /// Queue the occurrence, up to `queue_max` pending runs.
    Queue,
}

/// Configuration for one scheduled slash command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleJobConfig {
    /// Unique job identifier (no whitespace).
    pub id: String,
    /// Slash command name without the leading `/`.
    pub command: String,
    /// Optional arguments appended to the command.
    #[serde(default)]
    pub arguments: Option<String>,
    /// Cron expression (5 fields).
    pub cron: String,
    /// Overlap behavior when the job is already running.
    #[serde(default)]
    pub overlap: OverlapPolicy,
    /// Maximum queued runs when overlap=queue (new runs dropped if exceeded).
    #[serde(default = "default_queue_max")]
    pub queue_max: u32,
    /// Per-run timeout override in seconds.
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
    /// Per-run max budget override in USD.
    #[serde(default)]
    pub max_budget_usd: Option<f64>,
    /// Optional model override.
    #[serde(default)]
    pub model: Option<String>,
    /// Whether the job is enabled.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Whether to hold the vault lock during execution.
    #[serde(default)]
    pub use_vault_lock: bool,
}

fn default_queue_max() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

/// Top-level schedule configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// IANA timezone name used to evaluate cron expressions.
    pub timezone: String,
    /// Job definitions, in file order.
    pub jobs: Vec<ScheduleJobConfig>,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            timezone: system_timezone(),
            jobs: Vec::new(),
        }
    }
}

/// Return the system timezone name, falling back to UTC if unavailable.
pub fn system_timezone() -> String {
    match iana_time_zone::get_timezone() {
        Ok(tz) if tz.parse::<chrono_tz::Tz>().is_ok() => tz,
        _ => "UTC".to_string(),
    }
}
