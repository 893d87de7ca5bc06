//! # Trigger Evaluator
//!
//! Decides whether a new replication cycle may start. Evaluation is a pure
//! function of the trigger, the recorded history and the current time.
//!
//! | Trigger               | Fires when                                        |
//! |-----------------------|---------------------------------------------------|
//! | none                  | always (continuous replication)                   |
//! | `manual: T`           | `T` differs from `lastManualSync`                 |
//! | `schedule: S`         | `now >= next(S, max(lastSync, lastFailure))`      |
//! | both                  | either of the above                               |
//!
//! A scheduled resource that has never synced or failed fires at once.

use chrono::{DateTime, Utc};
use core_api::TriggerSpec;

use crate::error::TriggerError;
use crate::schedule::Schedule;

/// Recorded history the trigger is evaluated against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TriggerState<'a> {
    pub last_sync_time: Option<DateTime<Utc>>,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub last_manual_sync: Option<&'a str>,
}

impl TriggerState<'_> {
    /// Latest recorded end of a cycle, successful or not.
    fn base(&self) -> Option<DateTime<Utc>> {
        match (self.last_sync_time, self.last_failure_time) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
    }
}

/// Result of evaluating a trigger.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Evaluation {
    pub fire: bool,
    /// Manual token that caused (or contributed to) firing; consumed when
    /// the cycle ends.
    pub manual_token: Option<String>,
    /// Next scheduled run, when a schedule is configured.
    pub next_sync: Option<DateTime<Utc>>,
}

impl Evaluation {
    /// No schedule and no manual token: replicate back to back.
    pub fn is_continuous(trigger: Option<&TriggerSpec>) -> bool {
        schedule_of(trigger).is_none() && manual_of(trigger).is_none()
    }
}

fn schedule_of(trigger: Option<&TriggerSpec>) -> Option<&str> {
    trigger
        .and_then(|t| t.schedule.as_deref())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn manual_of(trigger: Option<&TriggerSpec>) -> Option<&str> {
    trigger
        .and_then(|t| t.manual.as_deref())
        .filter(|m| !m.is_empty())
}

pub fn evaluate(
    trigger: Option<&TriggerSpec>,
    state: &TriggerState<'_>,
    now: DateTime<Utc>,
) -> Result<Evaluation, TriggerError> {
    let schedule = schedule_of(trigger);
    let manual = manual_of(trigger);

    if schedule.is_none() && manual.is_none() {
        return Ok(Evaluation {
            fire: true,
            manual_token: None,
            next_sync: None,
        });
    }

    let manual_token = manual
        .filter(|token| state.last_manual_sync != Some(*token))
        .map(str::to_string);

    let mut next_sync = None;
    let mut scheduled = false;
    if let Some(expression) = schedule {
        let schedule = Schedule::parse(expression)?;
        match state.base() {
            None => {
                scheduled = true;
                next_sync = Some(now);
            }
            Some(base) => {
                next_sync = schedule.next_after(base);
                scheduled = next_sync.map_or(false, |next| now >= next);
            }
        }
    }

    Ok(Evaluation {
        fire: scheduled || manual_token.is_some(),
        manual_token,
        next_sync,
    })
}

/// Whether a new cycle should start now.
pub fn should_sync(
    trigger: Option<&TriggerSpec>,
    state: &TriggerState<'_>,
    now: DateTime<Utc>,
) -> Result<bool, TriggerError> {
    evaluate(trigger, state, now).map(|e| e.fire)
}

/// Next scheduled run after a cycle ended at `ended_at`, if scheduled.
pub fn next_sync_after(
    trigger: Option<&TriggerSpec>,
    ended_at: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>, TriggerError> {
    match schedule_of(trigger) {
        Some(expression) => Ok(Schedule::parse(expression)?.next_after(ended_at)),
        None => Ok(None),
    }
}
