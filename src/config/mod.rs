//! Schedule configuration loading and parsing.
//!
//! This module provides the YAML-based configuration for scheduled jobs.

mod loader;
mod types;

pub use loader::{load_schedule_config, parse_schedule_config, ConfigError};
pub use types::{system_timezone, OverlapPolicy, ScheduleConfig, ScheduleJobConfig};
