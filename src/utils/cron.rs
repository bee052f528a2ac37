//! Cron expression helpers for policy schedules
//!
//! Policies carry standard 5-field expressions (min hour dom month dow).
//! The `cron` crate wants a leading seconds field, so one is prepended
//! before parsing.

use chrono::{DateTime, Utc};
use cron::Schedule;
use std::str::FromStr;

fn parse_schedule(schedule: &str) -> Option<Schedule> {
    if schedule.split_whitespace().count() != 5 {
        return None;
    }
    Schedule::from_str(&format!("0 {}", schedule)).ok()
}

/// Validate a 5-field cron schedule
pub fn validate_cron_schedule(schedule: &str) -> bool {
    parse_schedule(schedule).is_some()
}

/// Next time a schedule fires after now, if the expression is valid
pub fn next_run(schedule: &str) -> Option<DateTime<Utc>> {
    parse_schedule(schedule)?.upcoming(Utc).next()
}
