//! Schedule expressions and the triggers they produce
//!
//! Two grammars are recognized:
//! - Cron: exactly five fields, `minute hour day-of-month month day-of-week`
//!   (`*`, numbers, lists, ranges, steps and names)
//! - Interval: `interval <seconds>`, firing every N seconds from the moment
//!   the expression is parsed
//!
//! Cron expressions are evaluated in a configurable timezone (UTC by default).

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use std::fmt;
use std::str::FromStr;

/// Keyword introducing an interval schedule
const INTERVAL_KEYWORD: &str = "interval";

/// Day-of-week names, indexed by the standard cron number (0 = Sunday)
const WEEKDAY_NAMES: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];

/// Schedule parse failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScheduleParseError {
    /// Blank expression
    #[error("empty schedule expression")]
    Empty,
    /// Neither five cron fields nor an interval
    #[error("expected 5 cron fields or 'interval <seconds>', got {fields} field(s): {expression}")]
    Unrecognized {
        /// Offending expression
        expression: String,
        /// Number of whitespace-separated fields
        fields: usize,
    },
    /// Interval without a positive integer
    #[error("invalid interval '{0}': expected a positive number of seconds")]
    InvalidInterval(String),
    /// A cron field was rejected
    #[error("invalid cron expression '{expression}': {reason}")]
    InvalidCron {
        /// Offending expression
        expression: String,
        /// Parser message
        reason: String,
    },
}

/// A parsed schedule able to compute its next fire time
#[derive(Debug, Clone)]
pub enum Trigger {
    /// Five-field cron schedule
    Cron(CronTrigger),
    /// Fixed interval
    Interval(IntervalTrigger),
}

impl Trigger {
    /// Parse an expression, evaluating cron fields in UTC and anchoring
    /// intervals at the current instant.
    pub fn parse(expression: &str) -> Result<Self, ScheduleParseError> {
        Self::parse_with(expression, Tz::UTC, Utc::now())
    }

    /// Parse an expression with an explicit cron timezone and interval anchor.
    pub fn parse_with(
        expression: &str,
        timezone: Tz,
        anchor: DateTime<Utc>,
    ) -> Result<Self, ScheduleParseError> {
        let fields: Vec<&str> = expression.split_whitespace().collect();
        match fields.as_slice() {
            [] => Err(ScheduleParseError::Empty),
            [keyword, rest @ ..] if *keyword == INTERVAL_KEYWORD => {
                IntervalTrigger::from_fields(expression, rest, anchor).map(Self::Interval)
            }
            [minute, hour, day, month, weekday] => {
                let fields = [*minute, *hour, *day, *month, *weekday];
                CronTrigger::from_fields(expression, fields, timezone).map(Self::Cron)
            }
            _ => Err(ScheduleParseError::Unrecognized {
                expression: expression.to_string(),
                fields: fields.len(),
            }),
        }
    }

    /// Earliest fire time strictly after `after`. `None` when the schedule
    /// can never fire again.
    pub fn next_fire_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::Cron(cron) => cron.next_fire_after(after),
            Self::Interval(interval) => Some(interval.next_fire_after(after)),
        }
    }

    /// The expression this trigger was parsed from
    pub fn expression(&self) -> &str {
        match self {
            Self::Cron(cron) => &cron.expression,
            Self::Interval(interval) => &interval.expression,
        }
    }
}

impl FromStr for Trigger {
    type Err = ScheduleParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.expression())
    }
}

/// Cron-based trigger
#[derive(Debug, Clone)]
pub struct CronTrigger {
    expression: String,
    schedule: cron::Schedule,
    timezone: Tz,
}

impl CronTrigger {
    fn from_fields(
        expression: &str,
        [minute, hour, day, month, weekday]: [&str; 5],
        timezone: Tz,
    ) -> Result<Self, ScheduleParseError> {
        let invalid = |reason: String| ScheduleParseError::InvalidCron {
            expression: expression.to_string(),
            reason,
        };

        let weekday = normalize_weekdays(weekday).map_err(invalid)?;
        // The cron crate expects seconds first and an optional year last.
        let extended = format!("0 {minute} {hour} {day} {month} {weekday} *");
        let schedule = cron::Schedule::from_str(&extended).map_err(|e| invalid(e.to_string()))?;

        Ok(Self {
            expression: expression.to_string(),
            schedule,
            timezone,
        })
    }

    /// Timezone the fields are evaluated in
    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    fn next_fire_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let local = after.with_timezone(&self.timezone);
        self.schedule
            .after(&local)
            .next()
            .map(|next| next.with_timezone(&Utc))
    }
}

/// Rewrite numeric day-of-week values (0-7, with 0 and 7 both Sunday) as
/// names so they are not confused with the cron crate's 1-based numbering.
fn normalize_weekdays(field: &str) -> Result<String, String> {
    let items = field
        .split(',')
        .map(|item| {
            let (range, step) = match item.split_once('/') {
                Some((range, step)) => (range, Some(step)),
                None => (item, None),
            };
            let range = match range.split_once('-') {
                Some((start, "7")) if step.is_some() => {
                    return Err(format!(
                        "day-of-week range '{start}-7' cannot take a step; use '{start}-6'"
                    ))
                }
                Some((start, "7")) => format!("{}-Sat,Sun", weekday_name(start)?),
                Some((start, end)) => format!("{}-{}", weekday_name(start)?, weekday_name(end)?),
                // `N/step` runs from N to the end of the week
                None if step.is_some() && matches!(range, "6" | "7") => {
                    return weekday_name(range)
                }
                None if step.is_some() && is_numeric(range) => {
                    format!("{}-Sat", weekday_name(range)?)
                }
                None => weekday_name(range)?,
            };
            Ok(match step {
                Some(step) => format!("{range}/{step}"),
                None => range,
            })
        })
        .collect::<Result<Vec<_>, String>>()?;
    Ok(items.join(","))
}

fn is_numeric(token: &str) -> bool {
    !token.is_empty() && token.chars().all(|c| c.is_ascii_digit())
}

fn weekday_name(token: &str) -> Result<String, String> {
    if !is_numeric(token) {
        // `*`, `?` and names pass through to the cron parser.
        return Ok(token.to_string());
    }
    match token.parse::<usize>() {
        Ok(7) => Ok(WEEKDAY_NAMES[0].to_string()),
        Ok(n) if n < WEEKDAY_NAMES.len() => Ok(WEEKDAY_NAMES[n].to_string()),
        _ => Err(format!("day-of-week value {token} out of range 0-7")),
    }
}

/// Interval-based trigger
#[derive(Debug, Clone)]
pub struct IntervalTrigger {
    expression: String,
    every: Duration,
    anchor: DateTime<Utc>,
}

impl IntervalTrigger {
    fn from_fields(
        expression: &str,
        fields: &[&str],
        anchor: DateTime<Utc>,
    ) -> Result<Self, ScheduleParseError> {
        let invalid = || ScheduleParseError::InvalidInterval(expression.to_string());
        let seconds = match fields {
            [seconds] => seconds.parse::<u32>().map_err(|_| invalid())?,
            _ => return Err(invalid()),
        };
        if seconds == 0 {
            return Err(invalid());
        }

        Ok(Self {
            expression: expression.to_string(),
            every: Duration::seconds(i64::from(seconds)),
            anchor,
        })
    }

    /// Interval length
    pub fn every(&self) -> Duration {
        self.every
    }

    /// Fire times are `anchor + k * every` for `k >= 1`.
    fn next_fire_after(&self, after: DateTime<Utc>) -> DateTime<Utc> {
        let every_ms = self.every.num_milliseconds();
        let elapsed_ms = (after - self.anchor).num_milliseconds();
        let periods = (elapsed_ms.div_euclid(every_ms) + 1).max(1);
        self.anchor + Duration::milliseconds(every_ms * periods)
    }
}

#[cfg(test)]
mod tests;
