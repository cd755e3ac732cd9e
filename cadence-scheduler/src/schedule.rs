//! Next-run computation. Everything here is pure apart from logging, so it can
//! be exercised against fixed instants.

use cadence_models::core::{ScheduleType, ScheduledTask};
use chrono::{DateTime, Duration, Utc};
use croner::{errors::CronError, Cron};
use log::{error, warn};

/// Next execution instant of `task` strictly after `now`.
///
/// ONE_TIME tasks never repeat, so they always yield `None`. Configuration
/// problems (missing interval, unparsable cron) are logged and also yield
/// `None`, which keeps the task from firing.
pub fn next_run(task: &ScheduledTask, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match task.schedule_type {
        ScheduleType::OneTime => None,
        ScheduleType::Interval => match task.interval_seconds {
            Some(secs) if secs > 0 => i64::try_from(secs)
                .ok()
                .and_then(Duration::try_seconds)
                .and_then(|step| now.checked_add_signed(step)),
            _ => {
                warn!(
                    "Task {} ({}) has no usable interval_seconds; it will not be scheduled",
                    task.id, task.name
                );
                None
            }
        },
        ScheduleType::Cron => match task.cron_expression.as_deref() {
            Some(expression) => match next_cron_occurrence(expression, now) {
                Ok(next) => Some(next),
                Err(err) => {
                    error!(
                        "Task {} ({}) has invalid cron expression '{}': {}",
                        task.id, task.name, expression, err
                    );
                    None
                }
            },
            None => {
                warn!(
                    "Task {} ({}) has no cron expression; it will not be scheduled",
                    task.id, task.name
                );
                None
            }
        },
    }
}

/// `next_run` for a task entering the ACTIVE state without one: fresh tasks,
/// restart recovery and schedule edits.
///
/// A ONE_TIME task that has never been attempted is due at its
/// `scheduled_time`, even when that instant is already in the past.
pub fn initial_run(task: &ScheduledTask, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match task.schedule_type {
        ScheduleType::OneTime if task.last_run.is_none() => {
            if task.scheduled_time.is_none() {
                warn!(
                    "Task {} ({}) has no scheduled_time; it will not be scheduled",
                    task.id, task.name
                );
            }
            task.scheduled_time
        }
        _ => next_run(task, now),
    }
}

/// Next match of a standard 5-field cron expression strictly after `after`.
pub fn next_cron_occurrence(
    expression: &str,
    after: DateTime<Utc>,
) -> Result<DateTime<Utc>, CronError> {
    let cron = Cron::new(expression).parse()?;
    let mut next = cron.find_next_occurrence(&after, false)?;
    // Sub-second `after` values can round down onto a matching second.
    while next <= after {
        next = cron.find_next_occurrence(&next, false)?;
    }
    Ok(next)
}

pub fn validate_cron(expression: &str) -> Result<(), CronError> {
    Cron::new(expression).parse().map(|_| ())
}
