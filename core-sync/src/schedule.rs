//! # Schedules
//!
//! Parses a trigger's `schedule` string into something that can answer
//! "when is the next run after T".
//!
//! Accepted forms:
//! - five-field cron expressions (`0 */6 * * *`)
//! - aliases (`@hourly`, `@daily`, `@weekly`, `@monthly`, `@yearly`)
//! - fixed intervals, `@every <duration>` with Go-style durations
//!   (`@every 1h30m`, `@every 90s`, `@every 1.5h`)

use chrono::{DateTime, Duration, Utc};
use croner::Cron;
use std::fmt;

use crate::error::TriggerError;

const EVERY_PREFIX: &str = "@every ";

pub enum Schedule {
    Cron(Box<Cron>),
    Every(Duration),
}

impl Schedule {
    pub fn parse(expression: &str) -> Result<Self, TriggerError> {
        let expression = expression.trim();
        let invalid = |message: String| TriggerError::InvalidSchedule {
            schedule: expression.to_string(),
            message,
        };

        if let Some(rest) = expression.strip_prefix(EVERY_PREFIX) {
            let interval = parse_go_duration(rest.trim()).map_err(invalid)?;
            return Ok(Schedule::Every(interval));
        }

        let cron = Cron::new(expression)
            .parse()
            .map_err(|e| invalid(e.to_string()))?;
        Ok(Schedule::Cron(Box::new(cron)))
    }

    /// First run strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Schedule::Cron(cron) => cron.find_next_occurrence(&after, false).ok(),
            Schedule::Every(interval) => after.checked_add_signed(*interval),
        }
    }
}

impl fmt::Debug for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Schedule::Cron(_) => f.write_str("Schedule::Cron"),
            Schedule::Every(interval) => write!(f, "Schedule::Every({}s)", interval.num_seconds()),
        }
    }
}

/// Parse a Go `time.Duration` string such as `1h30m`, `2.5s` or `300ms`.
/// Zero and negative durations are rejected.
pub fn parse_go_duration(input: &str) -> Result<Duration, String> {
    if input.is_empty() {
        return Err("empty duration".to_string());
    }
    if input.starts_with('-') {
        return Err("duration must be positive".to_string());
    }

    let too_large = || format!("duration '{}' is too large", input);
    let mut total_nanos: u128 = 0;
    let mut rest = input.strip_prefix('+').unwrap_or(input);

    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let (whole, fraction) = match rest[..number_len].split_once('.') {
            Some((whole, fraction)) => (whole, fraction),
            None => (&rest[..number_len], ""),
        };
        if whole.is_empty() && fraction.is_empty() {
            return Err(format!("expected a number in '{}'", input));
        }
        if fraction.contains('.') {
            return Err(format!("invalid number in '{}'", input));
        }
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let nanos_per_unit: u128 = match &rest[..unit_len] {
            "ns" => 1,
            "us" | "µs" | "μs" => 1_000,
            "ms" => 1_000_000,
            "s" => 1_000_000_000,
            "m" => 60 * 1_000_000_000,
            "h" => 3_600 * 1_000_000_000,
            "" => return Err(format!("missing unit in '{}'", input)),
            unit => return Err(format!("unknown unit '{}' in '{}'", unit, input)),
        };
        rest = &rest[unit_len..];

        // Only digits remain, so a parse failure means overflow.
        let whole: u128 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| too_large())?
        };
        let mut nanos = whole.checked_mul(nanos_per_unit).ok_or_else(too_large)?;

        // Digits finer than a nanosecond are dropped.
        let mut scale = nanos_per_unit;
        for digit in fraction.bytes() {
            scale /= 10;
            if scale == 0 {
                break;
            }
            nanos += u128::from(digit - b'0') * scale;
        }

        total_nanos = total_nanos.checked_add(nanos).ok_or_else(too_large)?;
    }

    if total_nanos == 0 {
        return Err("duration must be positive".to_string());
    }
    let total_nanos = i64::try_from(total_nanos).map_err(|_| too_large())?;
    Ok(Duration::nanoseconds(total_nanos))
}
