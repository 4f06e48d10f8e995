//! Core types shared across the scheduler.

pub mod schedule;
pub mod types;
