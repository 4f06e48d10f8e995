//! Schedule configuration loading and validation.
//!
//! Parses the schedule YAML file into [`ScheduleConfig`] and validates every
//! job definition. A missing file is not an error: it yields the default
//! (empty-jobs) configuration so a vault without a schedule file is simply a
//! vault with nothing scheduled.

use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

use crate::core::schedule::Schedule;

use super::types::ScheduleConfig;

/// Errors that can occur when loading the schedule configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read file: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse YAML.
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Invalid or unknown timezone.
    #[error("invalid timezone: {0}")]
    InvalidTimezone(String),

    /// Invalid job identifier.
    #[error("invalid job id {id:?}: {reason}")]
    InvalidJobId { id: String, reason: String },

    /// Invalid command name.
    #[error("job {job}: invalid command {command:?}: {reason}")]
    InvalidCommand {
        job: String,
        command: String,
        reason: String,
    },

    /// Invalid cron expression.
    #[error("job {job}: invalid cron expression {cron:?}")]
    InvalidCron { job: String, cron: String },

    /// Numeric bound out of range.
    #[error("job {job}: {field} must be positive")]
    InvalidBound { job: String, field: String },

    /// Duplicate job identifier.
    #[error("duplicate job id: {0}")]
    DuplicateJobId(String),
}

/// Load the schedule configuration from a file.
///
/// A missing file yields [`ScheduleConfig::default`]. Any parse or
/// validation failure is returned as a [`ConfigError`].
pub fn load_schedule_config(path: impl AsRef<Path>) -> Result<ScheduleConfig, ConfigError> {
    let path = path.as_ref();

    if !path.exists() {
        return Ok(ScheduleConfig::default());
    }

    let content = std::fs::read_to_string(path)?;
    parse_schedule_config(&content)
}

/// Parse and validate the schedule configuration from a YAML string.
pub fn parse_schedule_config(yaml: &str) -> Result<ScheduleConfig, ConfigError> {
    // An empty file is equivalent to a missing one.
    if yaml.trim().is_empty() {
        return Ok(ScheduleConfig::default());
    }

    let config: ScheduleConfig = serde_yaml::from_str(yaml)?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &ScheduleConfig) -> Result<(), ConfigError> {
    if config.timezone.is_empty() || config.timezone.parse::<chrono_tz::Tz>().is_err() {
        return Err(ConfigError::InvalidTimezone(config.timezone.clone()));
    }

    let mut seen_ids: HashSet<&str> = HashSet::new();

    for job in &config.jobs {
        if job.id.is_empty() {
            return Err(ConfigError::InvalidJobId {
                id: job.id.clone(),
                reason: "id must be a non-empty string".into(),
            });
        }
        if job.id.chars().any(char::is_whitespace) {
            return Err(ConfigError::InvalidJobId {
                id: job.id.clone(),
                reason: "id must not contain whitespace".into(),
            });
        }

        if job.command.is_empty() {
            return Err(ConfigError::InvalidCommand {
                job: job.id.clone(),
                command: job.command.clone(),
                reason: "command must be a non-empty string".into(),
            });
        }
        if job.command.starts_with('/') {
            return Err(ConfigError::InvalidCommand {
                job: job.id.clone(),
                command: job.command.clone(),
                reason: "command must not include a leading '/'".into(),
            });
        }
        if job.command.chars().any(char::is_whitespace) {
            return Err(ConfigError::InvalidCommand {
                job: job.id.clone(),
                command: job.command.clone(),
                reason: "command must not contain whitespace".into(),
            });
        }

        if !Schedule::is_valid(&job.cron) {
            return Err(ConfigError::InvalidCron {
                job: job.id.clone(),
                cron: job.cron.clone(),
            });
        }

        if job.timeout_seconds == Some(0) {
            return Err(ConfigError::InvalidBound {
                job: job.id.clone(),
                field: "timeout_seconds".into(),
            });
        }
        if let Some(budget) = job.max_budget_usd {
            if budget <= 0.0 {
                return Err(ConfigError::InvalidBound {
                    job: job.id.clone(),
                    field: "max_budget_usd".into(),
                });
            }
        }

        if !seen_ids.insert(&job.id) {
            return Err(ConfigError::DuplicateJobId(job.id.clone()));
        }
    }

    Ok(())
}
