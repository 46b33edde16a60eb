use std::collections::BTreeSet;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;

use crate::error::{Result, SchedulerError};

/// Parse a cron expression into a [`Schedule`].
///
/// Classic five-field expressions (`min hour dom month dow`, Sunday = 0 or 7)
/// are rewritten into the six-field form with a leading seconds field and
/// 1-based weekdays. Six/seven-field expressions and `@` descriptors are
/// passed through unchanged.
pub fn parse_schedule(expression: &str) -> Result<Schedule> {
    let trimmed = expression.trim();
    if trimmed.is_empty() {
        return Err(invalid(expression, "empty expression"));
    }

    let normalized = normalize(trimmed);
    Schedule::from_str(&normalized).map_err(|e| invalid(expression, &e.to_string()))
}

/// Next fire time strictly after `from`, or `None` when the schedule has no
/// future occurrence (e.g. a fixed past year).
pub fn next_run_after(schedule: &Schedule, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
    schedule.after(&from).next()
}

fn invalid(expression: &str, reason: &str) -> SchedulerError {
    SchedulerError::InvalidSchedule {
        expression: expression.to_string(),
        reason: reason.to_string(),
    }
}

fn normalize(expression: &str) -> String {
    if expression.starts_with('@') {
        return expression.to_string();
    }

    let fields: Vec<&str> = expression.split_whitespace().collect();
    if fields.len() != 5 {
        return fields.join(" ");
    }

    format!(
        "0 {} {} {} {} {}",
        fields[0],
        fields[1],
        fields[2],
        fields[3],
        translate_weekdays(fields[4])
    )
}

/// Map classic weekday numbers (0-6, 7 = Sunday) onto the parser's 1-7
/// numbering (1 = Sunday). Names, `*` and `?` are left alone.
fn translate_weekdays(field: &str) -> String {
    field
        .split(',')
        .map(|item| {
            let (range, step) = match item.split_once('/') {
                Some((r, s)) => (r, Some(s)),
                None => (item, None),
            };
            // A stepped numeric range is expanded, since shifting wraps 7 onto 1.
            if let Some(days) = step.and_then(|s| expand_stepped(range, s)) {
                return days;
            }
            let range = match range.split_once('-') {
                Some((lo, hi)) => match (lo.parse::<u8>(), hi.parse::<u8>()) {
                    // "x-7" wraps onto Sunday, which is the first day for the parser.
                    (Ok(l), Ok(7)) if l > 0 => format!("{}-7,1", l + 1),
                    (Ok(0), Ok(7)) => "1-7".to_string(),
                    _ => format!("{}-{}", shift_weekday(lo), shift_weekday(hi)),
                },
                None => shift_weekday(range),
            };
            match step {
                Some(s) => format!("{range}/{s}"),
                None => range,
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// `lo-hi/step` or `lo/step` as an explicit list of parser weekdays.
/// `None` when the item is not plain numbers in 0-7, so the parser reports it.
fn expand_stepped(range: &str, step: &str) -> Option<String> {
    let (lo, hi) = match range.split_once('-') {
        Some((lo, hi)) => (lo.parse::<u8>().ok()?, hi.parse::<u8>().ok()?),
        None => (range.parse::<u8>().ok()?, 6),
    };
    let step = step.parse::<usize>().ok().filter(|s| *s > 0)?;
    if lo > hi || hi > 7 {
        return None;
    }
    let days: BTreeSet<u8> = (lo..=hi).step_by(step).map(|d| d % 7 + 1).collect();
    Some(
        days.iter()
            .map(u8::to_string)
            .collect::<Vec<_>>()
            .join(","),
    )
}

fn shift_weekday(token: &str) -> String {
    match token.parse::<u8>() {
        Ok(n) => ((n % 7) + 1).to_string(),
        Err(_) => token.to_string(),
    }
}
